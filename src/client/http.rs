//! HTTP customer backend.

use async_trait::async_trait;
use url::Url;

use super::CustomerBackend;
use super::error::error_from_body;
use crate::auth::EphemeralKey;
use crate::config::{DEFAULT_API_BASE, DEFAULT_API_VERSION};
use crate::customer::{Customer, UpdateCustomerParams};
use crate::{Error, Result};

/// Customer backend speaking the payment API over HTTPS.
///
/// Requests authenticate with the ephemeral key secret as a bearer token and
/// pin the API version the key was issued for.
#[derive(Debug, Clone)]
pub struct HttpCustomerBackend {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
}

impl HttpCustomerBackend {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_API_BASE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/v1/customers/{subject}` followed by `extra`, each segment
    /// percent-encoded so ids cannot leave the customer resource.
    fn customer_url(&self, key: &EphemeralKey, extra: &[&str]) -> Result<Url> {
        let invalid_base = |reason: String| {
            Error::Config(format!("invalid api base {}: {}", self.base_url, reason))
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid_base(e.to_string()))?;

        let subject = path_segment(key.subject_id())?;
        let mut segments = Vec::with_capacity(extra.len());
        for id in extra {
            segments.push(path_segment(id)?);
        }

        url.path_segments_mut()
            .map_err(|_| invalid_base("cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(["v1", "customers", subject])
            .extend(segments);
        Ok(url)
    }

    fn authorize(
        &self,
        req: reqwest::RequestBuilder,
        key: &EphemeralKey,
    ) -> reqwest::RequestBuilder {
        req.bearer_auth(key.secret())
            .header("Stripe-Version", &self.api_version)
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status.as_u16(), &body))
    }

    async fn read_customer(response: reqwest::Response) -> Result<Customer> {
        response
            .json()
            .await
            .map_err(|e| Error::Parse(format!("invalid customer response: {}", e)))
    }

    /// Reads the customer back after a write the server already applied.
    ///
    /// A rejected key here must not reach the caller as `AuthRejected`:
    /// that would refresh the key and send the write a second time.
    async fn reread_after_write(&self, key: &EphemeralKey, action: &str) -> Result<Customer> {
        match self.retrieve_customer(key).await {
            Err(Error::AuthRejected { status, message }) => Err(Error::Remote {
                message: format!(
                    "{} applied but reading the customer back failed: {}",
                    action, message
                ),
                status: Some(status),
                error_type: Some("authentication_error".to_string()),
            }),
            other => other,
        }
    }
}

/// Rejects ids that url normalization would drop or collapse.
fn path_segment(id: &str) -> Result<&str> {
    match id {
        "" | "." | ".." => Err(Error::InvalidRequest(format!(
            "invalid resource id: {:?}",
            id
        ))),
        _ => Ok(id),
    }
}

impl Default for HttpCustomerBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustomerBackend for HttpCustomerBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn retrieve_customer(&self, key: &EphemeralKey) -> Result<Customer> {
        let req = self.authorize(self.http.get(self.customer_url(key, &[])?), key);
        let response = self.execute(req).await?;
        Self::read_customer(response).await
    }

    async fn update_customer(
        &self,
        key: &EphemeralKey,
        params: &UpdateCustomerParams,
    ) -> Result<Customer> {
        let req = self
            .authorize(self.http.post(self.customer_url(key, &[])?), key)
            .form(&params.to_form());
        let response = self.execute(req).await?;
        Self::read_customer(response).await
    }

    async fn attach_source(&self, key: &EphemeralKey, source_id: &str) -> Result<Customer> {
        let url = self.customer_url(key, &["sources"])?;
        let req = self
            .authorize(self.http.post(url), key)
            .form(&[("source", source_id)]);
        self.execute(req).await?;
        self.reread_after_write(key, "attach").await
    }

    async fn detach_source(&self, key: &EphemeralKey, source_id: &str) -> Result<Customer> {
        let url = self.customer_url(key, &["sources", source_id])?;
        let req = self.authorize(self.http.delete(url), key);
        self.execute(req).await?;
        self.reread_after_write(key, "detach").await
    }
}
