//! HTTP key provider backed by a merchant endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::auth::KeyProvider;
use crate::{Error, Result};

#[derive(Serialize)]
struct CreateKeyRequest<'a> {
    api_version: &'a str,
}

/// Provider that POSTs `{"api_version": ...}` to a merchant endpoint and
/// returns the key JSON from the response body.
pub struct HttpKeyProvider {
    http: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
}

impl HttpKeyProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            headers: HashMap::new(),
        }
    }

    /// Use an existing HTTP client.
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Add a header sent with every key request (e.g. a session cookie).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl KeyProvider for HttpKeyProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn create_key(&self, api_version: &str) -> Result<serde_json::Value> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .json(&CreateKeyRequest { api_version });
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote {
                message: if body.is_empty() {
                    format!("key endpoint returned {}", status)
                } else {
                    body
                },
                status: Some(status.as_u16()),
                error_type: None,
            });
        }

        Ok(response.json().await?)
    }
}
