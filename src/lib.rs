//! # customer-context
//!
//! Ephemeral-key customer context for payment clients.
//!
//! A client app never holds a long-lived payment API secret. Instead it asks
//! its own backend (a [`KeyProvider`]) for a short-lived ephemeral key scoped
//! to one customer, and uses that key to read and update the customer's
//! payment sources directly.
//!
//! [`CustomerContext`] ties the pieces together:
//!
//! - [`EphemeralKeyManager`] keeps the current key and runs at most one
//!   refresh at a time, shared by all concurrent callers.
//! - [`CachedObjectStore`] holds the last fetched customer for a bounded age.
//! - A [`CustomerBackend`] performs the authorized calls; a rejected key is
//!   refreshed and the call retried once.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use customer_context::{CustomerContext, HttpCustomerBackend, HttpKeyProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), customer_context::Error> {
//!     let provider = HttpKeyProvider::new("https://example.com/ephemeral_keys")
//!         .header("Authorization", "Bearer session-token");
//!     let context = CustomerContext::new(
//!         Arc::new(provider),
//!         Arc::new(HttpCustomerBackend::new()),
//!     );
//!
//!     let customer = context.retrieve_customer().await?;
//!     println!("{} has {} sources", customer.id, customer.sources().len());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod customer;
pub mod observability;
pub mod prelude;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{
    DEFAULT_EAGER_REFRESH_INTERVAL, DEFAULT_REFRESH_MARGIN, EphemeralKey, EphemeralKeyManager,
    HttpKeyProvider, KeyProvider, StaticKeyProvider,
};
pub use cache::{CachedObjectStore, DEFAULT_MAX_AGE};
pub use client::{CustomerBackend, HttpCustomerBackend};
pub use config::{ContextSettings, EnvSource};
pub use customer::{
    Customer, CustomerContext, CustomerContextBuilder, CustomerSource, Shipping,
    UpdateCustomerParams, install_shared, reset_shared, shared,
};
pub use observability::{ContextMetrics, MetricsSummary};

/// Error type for customer context operations.
///
/// Cloneable so that one key refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No key provider has been configured.
    #[error("No ephemeral key provider configured")]
    MissingKeyProvider,

    /// The key provider failed or returned an unusable key.
    #[error("Key provider '{provider}' failed: {source}")]
    KeyProvider {
        provider: String,
        source: Arc<Error>,
    },

    /// Key JSON is malformed or violates key invariants.
    #[error("Invalid ephemeral key: {0}")]
    InvalidKey(String),

    /// The only available key is past its expiry.
    #[error("Ephemeral key {key_id} expired at {expired_at}")]
    ExpiredKey {
        key_id: String,
        expired_at: DateTime<Utc>,
    },

    /// The backend rejected the ephemeral key.
    #[error("Ephemeral key rejected (HTTP {status}): {message}")]
    AuthRejected { status: u16, message: String },

    /// Backend returned an error response.
    #[error("Remote error (HTTP {status}): {message}", status = status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into()))]
    Remote {
        message: String,
        status: Option<u16>,
        error_type: Option<String>,
    },

    /// Network connectivity or request failed.
    #[error("Network request failed: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// The request cannot be expressed against the backend.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to parse a backend response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The caller gave up before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// A key refresh ended without producing an outcome.
    #[error("Key refresh aborted")]
    RefreshAborted,
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Key rejected or unavailable (401, 403, expired)
    Authorization,
    /// Missing provider, bad settings, malformed keys or responses
    Configuration,
    /// Network or server errors that may succeed on retry
    Transient,
    /// Cancelled or aborted by the caller or runtime
    Cancelled,
    /// Internal errors (IO, JSON, other remote failures)
    Internal,
}

impl Error {
    /// Wraps a provider failure with the provider's name.
    pub fn key_provider(provider: impl Into<String>, source: Error) -> Self {
        Error::KeyProvider {
            provider: provider.into(),
            source: Arc::new(source),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::AuthRejected { .. } | Error::ExpiredKey { .. } => ErrorCategory::Authorization,
            Error::Remote {
                status: Some(401 | 403),
                ..
            } => ErrorCategory::Authorization,
            Error::KeyProvider { source, .. } => match source.category() {
                ErrorCategory::Transient => ErrorCategory::Transient,
                ErrorCategory::Cancelled => ErrorCategory::Cancelled,
                _ => ErrorCategory::Authorization,
            },

            Error::MissingKeyProvider
            | Error::InvalidKey(_)
            | Error::InvalidRequest(_)
            | Error::Parse(_)
            | Error::Config(_) => ErrorCategory::Configuration,

            Error::Network(_) => ErrorCategory::Transient,
            Error::Remote {
                status: Some(429 | 500..=599),
                ..
            } => ErrorCategory::Transient,

            Error::Cancelled | Error::RefreshAborted => ErrorCategory::Cancelled,

            Error::Io(_) | Error::Json(_) | Error::Remote { .. } => ErrorCategory::Internal,
        }
    }

    pub fn is_authorization_error(&self) -> bool {
        self.category() == ErrorCategory::Authorization
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Whether the backend refused the key itself.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Error::AuthRejected { .. }
                | Error::Remote {
                    status: Some(401),
                    ..
                }
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::AuthRejected { status, .. } => Some(*status),
            Error::Remote { status, .. } => *status,
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::InvalidValue { key, message } => {
                Error::Config(format!("Invalid value for {}: {}", key, message))
            }
            config::ConfigError::Serialization(e) => Error::Config(e.to_string()),
            config::ConfigError::Io(e) => e.into(),
            config::ConfigError::ValidationErrors(errors) => Error::Config(errors.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
