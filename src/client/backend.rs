//! Customer backend adapter trait definition.

use async_trait::async_trait;

use crate::Result;
use crate::auth::EphemeralKey;
use crate::customer::{Customer, UpdateCustomerParams};

/// Authorized calls against the payment backend's customer resource.
///
/// Every call takes the ephemeral key to authorize with. A rejected key must
/// surface as [`Error::AuthRejected`](crate::Error::AuthRejected) so the
/// caller can refresh and retry; anything else is a terminal failure.
///
/// Writes are retried after `AuthRejected`, so a write must only report it
/// when the server did not apply the change. Failures after that point,
/// such as reading the customer back, must use another variant.
#[async_trait]
pub trait CustomerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn retrieve_customer(&self, key: &EphemeralKey) -> Result<Customer>;

    async fn update_customer(
        &self,
        key: &EphemeralKey,
        params: &UpdateCustomerParams,
    ) -> Result<Customer>;

    async fn attach_source(&self, key: &EphemeralKey, source_id: &str) -> Result<Customer>;

    async fn detach_source(&self, key: &EphemeralKey, source_id: &str) -> Result<Customer>;

    async fn select_default_source(&self, key: &EphemeralKey, source_id: &str) -> Result<Customer> {
        let params = UpdateCustomerParams::new().default_source(source_id);
        self.update_customer(key, &params).await
    }
}
