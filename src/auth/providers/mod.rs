//! Key provider implementations.

mod explicit;
mod http;

pub use explicit::StaticKeyProvider;
pub use http::HttpKeyProvider;
