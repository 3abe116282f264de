//! Ephemeral key types.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

const CUSTOMER_OBJECT_TYPE: &str = "customer";

#[derive(Debug, Deserialize)]
struct AssociatedObject {
    #[serde(rename = "type")]
    object_type: String,
    id: String,
}

/// Key JSON as issued by the merchant backend.
#[derive(Debug, Deserialize)]
struct KeyResponse {
    id: String,
    secret: String,
    created: i64,
    expires: i64,
    #[serde(default)]
    livemode: bool,
    #[serde(default)]
    associated_objects: Vec<AssociatedObject>,
}

/// Short-lived delegated credential scoped to one customer.
///
/// Immutable once issued. A newer key supersedes it; it is never updated in
/// place. Identity is the key id, the secret is never compared.
#[derive(Clone)]
pub struct EphemeralKey {
    id: String,
    subject_id: String,
    secret: SecretString,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    livemode: bool,
}

impl EphemeralKey {
    /// Builds a key, enforcing `issued_at < expires_at`.
    pub fn new(
        id: impl Into<String>,
        subject_id: impl Into<String>,
        secret: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        let id = id.into();
        let subject_id = subject_id.into();
        let secret = secret.into();

        if id.is_empty() {
            return Err(Error::InvalidKey("key id is empty".into()));
        }
        if subject_id.is_empty() {
            return Err(Error::InvalidKey("subject id is empty".into()));
        }
        if secret.is_empty() {
            return Err(Error::InvalidKey("key secret is empty".into()));
        }
        if issued_at >= expires_at {
            return Err(Error::InvalidKey(format!(
                "key {} expires at {} which is not after its issue time {}",
                id, expires_at, issued_at
            )));
        }

        Ok(Self {
            id,
            subject_id,
            secret: SecretString::from(secret),
            issued_at,
            expires_at,
            livemode: false,
        })
    }

    /// Parses the key JSON returned by a [`KeyProvider`](super::KeyProvider).
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let response = KeyResponse::deserialize(value)
            .map_err(|e| Error::InvalidKey(format!("malformed key response: {}", e)))?;

        let subject_id = response
            .associated_objects
            .into_iter()
            .find(|obj| obj.object_type == CUSTOMER_OBJECT_TYPE)
            .map(|obj| obj.id)
            .ok_or_else(|| Error::InvalidKey("key has no associated customer".into()))?;

        let issued_at = DateTime::from_timestamp(response.created, 0)
            .ok_or_else(|| Error::InvalidKey(format!("invalid created: {}", response.created)))?;
        let expires_at = DateTime::from_timestamp(response.expires, 0)
            .ok_or_else(|| Error::InvalidKey(format!("invalid expires: {}", response.expires)))?;

        let mut key = Self::new(
            response.id,
            subject_id,
            response.secret,
            issued_at,
            expires_at,
        )?;
        key.livemode = response.livemode;
        Ok(key)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Customer the key authorizes.
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Exposes the key secret for use as an authorization header.
    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn livemode(&self) -> bool {
        self.livemode
    }

    /// Check if the key is past its actual expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if the key is within `margin` of expiry.
    pub fn needs_refresh(&self, margin: std::time::Duration) -> bool {
        let margin = Duration::from_std(margin).unwrap_or(Duration::MAX);
        match self.expires_at.checked_sub_signed(margin) {
            Some(refresh_at) => Utc::now() >= refresh_at,
            None => true,
        }
    }

    /// Whether both values are the same issued key.
    pub fn same_key(&self, other: &EphemeralKey) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKey")
            .field("id", &self.id)
            .field("subject_id", &self.subject_id)
            .field("secret", &"[redacted]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("livemode", &self.livemode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key_json(created: i64, expires: i64) -> serde_json::Value {
        json!({
            "id": "ephkey_123",
            "object": "ephemeral_key",
            "secret": "ek_test_123",
            "created": created,
            "expires": expires,
            "livemode": false,
            "associated_objects": [{"type": "customer", "id": "cus_123"}]
        })
    }

    #[test]
    fn test_from_json() {
        let now = Utc::now().timestamp();
        let key = EphemeralKey::from_json(&key_json(now, now + 3600)).unwrap();
        assert_eq!(key.id(), "ephkey_123");
        assert_eq!(key.subject_id(), "cus_123");
        assert_eq!(key.secret(), "ek_test_123");
        assert!(!key.livemode());
        assert!(!key.is_expired());
        assert!(!key.needs_refresh(std::time::Duration::from_secs(300)));
    }

    #[test]
    fn test_needs_refresh_within_margin() {
        let now = Utc::now().timestamp();
        let key = EphemeralKey::from_json(&key_json(now - 100, now + 120)).unwrap();
        assert!(!key.is_expired());
        assert!(key.needs_refresh(std::time::Duration::from_secs(300)));
    }

    #[test]
    fn test_expired() {
        let key = EphemeralKey::from_json(&key_json(0, 10)).unwrap();
        assert!(key.is_expired());
        assert!(key.needs_refresh(std::time::Duration::ZERO));
    }

    #[test]
    fn test_rejects_inverted_lifetime() {
        let err = EphemeralKey::from_json(&key_json(2000, 1000)).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn test_rejects_missing_customer() {
        let mut value = key_json(1000, 2000);
        value["associated_objects"] = json!([{"type": "account", "id": "acct_1"}]);
        assert!(matches!(
            EphemeralKey::from_json(&value),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            EphemeralKey::from_json(&json!({"id": "ephkey_1"})),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = EphemeralKey::from_json(&key_json(1000, 2000)).unwrap();
        let debug = format!("{:?}", key);
        assert!(!debug.contains("ek_test_123"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn test_same_key_is_identity() {
        let a = EphemeralKey::from_json(&key_json(1000, 2000)).unwrap();
        let b = EphemeralKey::from_json(&key_json(1000, 3000)).unwrap();
        let mut other = key_json(1000, 2000);
        other["id"] = json!("ephkey_456");
        let c = EphemeralKey::from_json(&other).unwrap();
        assert!(a.same_key(&b));
        assert!(!a.same_key(&c));
    }
}
