//! Static key provider.

use async_trait::async_trait;

use crate::Result;
use crate::auth::KeyProvider;

/// Provider that always answers with the same key JSON.
pub struct StaticKeyProvider {
    response: serde_json::Value,
}

impl StaticKeyProvider {
    pub fn new(response: serde_json::Value) -> Self {
        Self { response }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn create_key(&self, _api_version: &str) -> Result<serde_json::Value> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::EphemeralKey;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticKeyProvider::new(json!({
            "id": "ephkey_1",
            "secret": "ek_test_1",
            "created": 1000,
            "expires": 2000,
            "associated_objects": [{"type": "customer", "id": "cus_1"}]
        }));

        let json = provider.create_key("2020-03-02").await.unwrap();
        let key = EphemeralKey::from_json(&json).unwrap();
        assert_eq!(key.subject_id(), "cus_1");
    }
}
