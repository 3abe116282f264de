//! Payment backend client for customer resources.

mod backend;
mod error;
mod http;

pub use backend::CustomerBackend;
pub use error::{ErrorDetail, ErrorResponse};
pub use http::HttpCustomerBackend;
