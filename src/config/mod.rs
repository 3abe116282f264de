//! Customer context configuration.
//!
//! ```rust,no_run
//! use customer_context::config::ContextSettings;
//!
//! # fn example() -> Result<(), customer_context::config::ConfigError> {
//! let settings = ContextSettings::from_file("customer_context.json")?
//!     .merge_env()?;
//! settings.validate()?;
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod settings;

pub use env::{DEFAULT_ENV_PREFIX, EnvSource};
pub use settings::ContextSettings;

use thiserror::Error;

/// Payment API version requested for new keys and sent with backend calls.
pub const DEFAULT_API_VERSION: &str = "2020-03-02";

/// Base URL of the payment backend.
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Errors that can occur in configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The key with invalid value
        key: String,
        /// Error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Multiple validation errors
    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed: ")?;
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
