//! Customer context settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    ConfigError, ConfigResult, DEFAULT_API_BASE, DEFAULT_API_VERSION, EnvSource,
    ValidationErrors,
};
use crate::auth::{DEFAULT_EAGER_REFRESH_INTERVAL, DEFAULT_REFRESH_MARGIN};
use crate::cache::DEFAULT_MAX_AGE;

/// Keys never live longer than this, so a larger refresh margin would
/// refresh on every call.
const MAX_KEY_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Tunables for a [`CustomerContext`](crate::CustomerContext).
///
/// Serialized as camelCase JSON; every field is optional in a settings file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// A cached customer younger than this is returned without a network call.
    #[serde(rename = "cachedCustomerMaxAgeSecs", with = "duration_secs")]
    pub cached_customer_max_age: Duration,
    /// Keys are refreshed this long before they expire.
    #[serde(rename = "keyRefreshMarginSecs", with = "duration_secs")]
    pub key_refresh_margin: Duration,
    /// Minimum spacing between eager key refreshes.
    #[serde(rename = "eagerRefreshIntervalSecs", with = "duration_secs")]
    pub eager_refresh_interval: Duration,
    pub api_version: String,
    pub api_base: String,
    pub include_apple_pay_sources: bool,
    pub prefetch_on_provider_change: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            cached_customer_max_age: DEFAULT_MAX_AGE,
            key_refresh_margin: DEFAULT_REFRESH_MARGIN,
            eager_refresh_interval: DEFAULT_EAGER_REFRESH_INTERVAL,
            api_version: DEFAULT_API_VERSION.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            include_apple_pay_sources: false,
            prefetch_on_provider_change: true,
        }
    }
}

impl ContextSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with `CUSTOMER_CONTEXT_*` environment overrides applied.
    pub fn from_env() -> ConfigResult<Self> {
        Self::default().merge_env()
    }

    /// Loads a JSON settings file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Applies overrides from the process environment.
    pub fn merge_env(self) -> ConfigResult<Self> {
        self.merge_source(&EnvSource::new())
    }

    /// Applies overrides from `env`. Unset variables leave fields untouched.
    pub fn merge_source(mut self, env: &EnvSource) -> ConfigResult<Self> {
        if let Some(secs) = env.get_parsed::<f64>("cached_customer_max_age_secs")? {
            self.cached_customer_max_age =
                secs_to_duration(env, "cached_customer_max_age_secs", secs)?;
        }
        if let Some(secs) = env.get_parsed::<f64>("key_refresh_margin_secs")? {
            self.key_refresh_margin = secs_to_duration(env, "key_refresh_margin_secs", secs)?;
        }
        if let Some(secs) = env.get_parsed::<f64>("eager_refresh_interval_secs")? {
            self.eager_refresh_interval =
                secs_to_duration(env, "eager_refresh_interval_secs", secs)?;
        }
        if let Some(version) = env.get("api_version")? {
            self.api_version = version;
        }
        if let Some(base) = env.get("api_base")? {
            self.api_base = base;
        }
        if let Some(include) = env.get_parsed::<bool>("include_apple_pay_sources")? {
            self.include_apple_pay_sources = include;
        }
        if let Some(prefetch) = env.get_parsed::<bool>("prefetch_on_provider_change")? {
            self.prefetch_on_provider_change = prefetch;
        }
        Ok(self)
    }

    pub fn cached_customer_max_age(mut self, max_age: Duration) -> Self {
        self.cached_customer_max_age = max_age;
        self
    }

    pub fn key_refresh_margin(mut self, margin: Duration) -> Self {
        self.key_refresh_margin = margin;
        self
    }

    pub fn eager_refresh_interval(mut self, interval: Duration) -> Self {
        self.eager_refresh_interval = interval;
        self
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn include_apple_pay_sources(mut self, include: bool) -> Self {
        self.include_apple_pay_sources = include;
        self
    }

    pub fn prefetch_on_provider_change(mut self, prefetch: bool) -> Self {
        self.prefetch_on_provider_change = prefetch;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.api_version.trim().is_empty() {
            errors.push(ConfigError::invalid("apiVersion", "must not be empty"));
        }
        if let Err(e) = url::Url::parse(&self.api_base) {
            errors.push(ConfigError::invalid("apiBase", e.to_string()));
        }
        if self.key_refresh_margin >= MAX_KEY_LIFETIME {
            errors.push(ConfigError::invalid(
                "keyRefreshMarginSecs",
                format!(
                    "must be shorter than {}s",
                    MAX_KEY_LIFETIME.as_secs()
                ),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::ValidationErrors(ValidationErrors(errors))),
        }
    }
}

fn secs_to_duration(env: &EnvSource, key: &str, secs: f64) -> ConfigResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::invalid(env.env_key(key), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = ContextSettings::default();
        assert_eq!(settings.cached_customer_max_age, Duration::from_secs(60));
        assert_eq!(settings.key_refresh_margin, Duration::from_secs(300));
        assert_eq!(settings.api_version, DEFAULT_API_VERSION);
        assert!(!settings.include_apple_pay_sources);
        assert!(settings.prefetch_on_provider_change);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"cachedCustomerMaxAgeSecs": 30, "includeApplePaySources": true}}"#
        )
        .unwrap();

        let settings = ContextSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.cached_customer_max_age, Duration::from_secs(30));
        assert!(settings.include_apple_pay_sources);
        assert_eq!(settings.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            ContextSettings::from_file("/nonexistent/customer_context.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_json_round_trip_field_names() {
        let value = serde_json::to_value(ContextSettings::default()).unwrap();
        assert_eq!(value["cachedCustomerMaxAgeSecs"], 60.0);
        assert_eq!(value["apiVersion"], DEFAULT_API_VERSION);
        assert_eq!(value["prefetchOnProviderChange"], true);
    }

    #[test]
    fn test_merge_env_source() {
        let vars: HashMap<String, String> = [
            ("CUSTOMER_CONTEXT_CACHED_CUSTOMER_MAX_AGE_SECS", "12.5"),
            ("CUSTOMER_CONTEXT_API_VERSION", "2019-05-16"),
            ("CUSTOMER_CONTEXT_INCLUDE_APPLE_PAY_SOURCES", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let env = EnvSource::from_map("CUSTOMER_CONTEXT_", vars);

        let settings = ContextSettings::default().merge_source(&env).unwrap();
        assert_eq!(settings.cached_customer_max_age, Duration::from_millis(12_500));
        assert_eq!(settings.api_version, "2019-05-16");
        assert!(settings.include_apple_pay_sources);
        assert_eq!(settings.key_refresh_margin, DEFAULT_REFRESH_MARGIN);
    }

    #[test]
    fn test_merge_env_rejects_negative_duration() {
        let vars: HashMap<String, String> =
            [("CUSTOMER_CONTEXT_KEY_REFRESH_MARGIN_SECS".to_string(), "-1".to_string())]
                .into_iter()
                .collect();
        let env = EnvSource::from_map("CUSTOMER_CONTEXT_", vars);
        assert!(ContextSettings::default().merge_source(&env).is_err());
    }

    #[test]
    fn test_validate_collects_errors() {
        let settings = ContextSettings::default()
            .api_version(" ")
            .api_base("not a url")
            .key_refresh_margin(MAX_KEY_LIFETIME);

        match settings.validate() {
            Err(ConfigError::ValidationErrors(errors)) => assert_eq!(errors.0.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_validate_single_error() {
        let settings = ContextSettings::default().api_version("");
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
