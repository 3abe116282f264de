//! Customer model and the cached customer context.

mod context;
mod shared;
mod types;

pub use context::{CustomerContext, CustomerContextBuilder};
pub use shared::{install_shared, reset_shared, shared};
pub use types::{
    Address, Customer, CustomerSource, Shipping, SourceList, UpdateCustomerParams,
};
