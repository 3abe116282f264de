//! Ephemeral key provider trait.

use async_trait::async_trait;

use crate::Result;

/// Issues ephemeral keys, usually by calling the merchant's backend.
///
/// The returned JSON is opaque to the caller beyond the fields parsed by
/// [`EphemeralKey::from_json`](super::EphemeralKey::from_json).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Provider name for debugging.
    fn name(&self) -> &str;

    /// Create a new key for the given payment API version.
    async fn create_key(&self, api_version: &str) -> Result<serde_json::Value>;
}
