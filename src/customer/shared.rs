//! Process-wide customer context.
//!
//! Apps that only ever deal with one signed-in customer can use [`shared`]
//! instead of threading a [`CustomerContext`] through their code. Tests
//! replace or drop it with [`install_shared`] and [`reset_shared`].

use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use super::CustomerContext;
use crate::client::HttpCustomerBackend;
use crate::config::ContextSettings;

static SHARED: RwLock<Option<CustomerContext>> = RwLock::new(None);

fn default_context() -> CustomerContext {
    let settings = ContextSettings::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring invalid customer context environment");
        ContextSettings::default()
    });
    let backend = HttpCustomerBackend::new()
        .with_base_url(settings.api_base.clone())
        .with_api_version(settings.api_version.clone());

    CustomerContext::builder()
        .backend(Arc::new(backend))
        .settings(settings)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Invalid customer context settings, using defaults");
            CustomerContext::without_provider(Arc::new(HttpCustomerBackend::new()))
        })
}

/// The shared context, created on first use without a key provider.
///
/// Settings come from `CUSTOMER_CONTEXT_*` environment variables.
pub fn shared() -> CustomerContext {
    if let Some(context) = SHARED
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return context.clone();
    }

    SHARED
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .get_or_insert_with(default_context)
        .clone()
}

/// Replaces the shared context, returning the previous one.
pub fn install_shared(context: CustomerContext) -> Option<CustomerContext> {
    SHARED
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(context)
}

/// Drops the shared context; the next [`shared`] call creates a fresh one.
/// Clones already handed out keep working independently.
pub fn reset_shared() -> Option<CustomerContext> {
    SHARED.write().unwrap_or_else(PoisonError::into_inner).take()
}
