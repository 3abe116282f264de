//! Environment variable configuration source.
//!
//! Read-only: variables are looked up, never set. Tests inject a map instead
//! of touching the process environment.

use std::collections::HashMap;

use super::{ConfigError, ConfigResult};

/// Prefix used by [`ContextSettings::from_env`](super::ContextSettings::from_env).
pub const DEFAULT_ENV_PREFIX: &str = "CUSTOMER_CONTEXT_";

/// Prefixed environment lookup.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
    overrides: Option<HashMap<String, String>>,
}

impl EnvSource {
    /// Reads the process environment with the default prefix.
    pub fn new() -> Self {
        Self::prefixed(DEFAULT_ENV_PREFIX)
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            overrides: None,
        }
    }

    /// Reads from `vars` instead of the process environment. Keys are full
    /// variable names, prefix included.
    pub fn from_map(prefix: impl Into<String>, vars: HashMap<String, String>) -> Self {
        Self {
            prefix: prefix.into(),
            overrides: Some(vars),
        }
    }

    /// Full variable name for a setting, e.g. `api_version` becomes
    /// `CUSTOMER_CONTEXT_API_VERSION`.
    pub fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase().replace('.', "_"))
    }

    pub fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        let env_key = self.env_key(key);
        match &self.overrides {
            Some(vars) => Ok(vars.get(&env_key).cloned()),
            None => match std::env::var(&env_key) {
                Ok(value) => Ok(Some(value)),
                Err(std::env::VarError::NotPresent) => Ok(None),
                Err(e) => Err(ConfigError::invalid(env_key, e.to_string())),
            },
        }
    }

    pub fn get_parsed<T>(&self, key: &str) -> ConfigResult<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key)? {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::invalid(self.env_key(key), e.to_string())),
            None => Ok(None),
        }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}
