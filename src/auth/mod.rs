//! Ephemeral key handling.
//!
//! - [`EphemeralKey`]: a short-lived credential scoped to one customer
//! - [`KeyProvider`]: where keys come from (usually the merchant's backend)
//! - [`EphemeralKeyManager`]: current key plus single-flight refresh

mod key;
mod manager;
mod provider;
mod providers;

pub use key::EphemeralKey;
pub use manager::{DEFAULT_EAGER_REFRESH_INTERVAL, DEFAULT_REFRESH_MARGIN, EphemeralKeyManager};
pub use provider::KeyProvider;
pub use providers::{HttpKeyProvider, StaticKeyProvider};
