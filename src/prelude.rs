//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use customer_context::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::Result;

// Keys
pub use crate::auth::{EphemeralKey, EphemeralKeyManager, HttpKeyProvider, KeyProvider};

// Customer
pub use crate::customer::{
    Customer, CustomerContext, CustomerSource, UpdateCustomerParams, shared,
};

// Backend
pub use crate::client::{CustomerBackend, HttpCustomerBackend};

pub use crate::config::ContextSettings;
