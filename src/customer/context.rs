//! Customer context: cached, key-authorized access to one customer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use super::{Customer, UpdateCustomerParams};
use crate::auth::{EphemeralKey, EphemeralKeyManager, KeyProvider};
use crate::cache::CachedObjectStore;
use crate::client::{CustomerBackend, HttpCustomerBackend};
use crate::config::ContextSettings;
use crate::observability::{ContextMetrics, MetricsSummary, OperationSpan};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Retrieve,
    Update,
    SelectDefaultSource,
    AttachSource,
    DetachSource,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Retrieve => "retrieve_customer",
            Operation::Update => "update_customer",
            Operation::SelectDefaultSource => "select_default_source",
            Operation::AttachSource => "attach_source",
            Operation::DetachSource => "detach_source",
        }
    }

    fn is_read(self) -> bool {
        matches!(self, Operation::Retrieve)
    }
}

struct Inner {
    backend: Arc<dyn CustomerBackend>,
    keys: RwLock<Arc<EphemeralKeyManager>>,
    cache: CachedObjectStore<Customer>,
    settings: RwLock<ContextSettings>,
    metrics: Arc<ContextMetrics>,
    /// Bumped whenever the key provider changes; results from operations
    /// that started under an older provider are not cached.
    generation: AtomicU64,
}

/// Retrieves and updates a customer with an ephemeral key.
///
/// Reads are served from a cache while younger than
/// [`cached_customer_max_age`](Self::cached_customer_max_age). Cache misses
/// and writes acquire a key from the [`EphemeralKeyManager`] (one refresh
/// shared by all concurrent callers) and call the [`CustomerBackend`]. A key
/// the backend rejects is force-refreshed and the call retried once.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct CustomerContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CustomerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerContext")
            .field("backend", &self.inner.backend.name())
            .field("keys", &self.key_manager())
            .field("settings", &self.settings())
            .finish()
    }
}

/// Builder for [`CustomerContext`].
#[derive(Default)]
pub struct CustomerContextBuilder {
    provider: Option<Arc<dyn KeyProvider>>,
    backend: Option<Arc<dyn CustomerBackend>>,
    settings: ContextSettings,
}

impl CustomerContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_provider(mut self, provider: Arc<dyn KeyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Backend to call. Defaults to [`HttpCustomerBackend`] pointed at the
    /// configured API base.
    pub fn backend(mut self, backend: Arc<dyn CustomerBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn settings(mut self, settings: ContextSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validates the settings and builds the context. With a key provider
    /// set, a customer prefetch starts in the background.
    pub fn build(self) -> Result<CustomerContext> {
        self.settings.validate()?;

        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(
                HttpCustomerBackend::new()
                    .with_base_url(self.settings.api_base.clone())
                    .with_api_version(self.settings.api_version.clone()),
            )
        });
        Ok(CustomerContext::from_parts(self.provider, backend, self.settings))
    }
}

fn build_manager(
    provider: Option<Arc<dyn KeyProvider>>,
    settings: &ContextSettings,
    metrics: &Arc<ContextMetrics>,
) -> EphemeralKeyManager {
    let manager = match provider {
        Some(provider) => EphemeralKeyManager::new(provider),
        None => EphemeralKeyManager::unconfigured(),
    };
    manager
        .with_api_version(settings.api_version.clone())
        .with_refresh_margin(settings.key_refresh_margin)
        .with_eager_refresh_interval(settings.eager_refresh_interval)
        .with_metrics(Arc::clone(metrics))
}

impl CustomerContext {
    pub fn builder() -> CustomerContextBuilder {
        CustomerContextBuilder::new()
    }

    /// Creates a context with default settings and starts prefetching the
    /// customer.
    pub fn new(provider: Arc<dyn KeyProvider>, backend: Arc<dyn CustomerBackend>) -> Self {
        Self::from_parts(Some(provider), backend, ContextSettings::default())
    }

    /// Creates a context that fails with [`Error::MissingKeyProvider`] until
    /// [`set_key_provider`](Self::set_key_provider) is called.
    pub fn without_provider(backend: Arc<dyn CustomerBackend>) -> Self {
        Self::from_parts(None, backend, ContextSettings::default())
    }

    fn from_parts(
        provider: Option<Arc<dyn KeyProvider>>,
        backend: Arc<dyn CustomerBackend>,
        settings: ContextSettings,
    ) -> Self {
        let metrics = Arc::new(ContextMetrics::new());
        let manager = build_manager(provider.clone(), &settings, &metrics);
        let prefetch = provider.is_some() && settings.prefetch_on_provider_change;
        let context = Self {
            inner: Arc::new(Inner {
                backend,
                keys: RwLock::new(Arc::new(manager)),
                cache: CachedObjectStore::new(),
                settings: RwLock::new(settings),
                metrics,
                generation: AtomicU64::new(0),
            }),
        };
        if prefetch {
            context.spawn_prefetch();
        }
        context
    }

    /// Replaces the key provider. The current key, any in-flight refresh and
    /// the cached customer are discarded, then the customer is prefetched
    /// with the new provider.
    pub fn set_key_provider(&self, provider: Arc<dyn KeyProvider>) {
        let prefetch = self.replace_manager(Some(provider));
        if prefetch {
            self.spawn_prefetch();
        }
    }

    /// Removes the key provider; later operations fail with
    /// [`Error::MissingKeyProvider`].
    pub fn clear_key_provider(&self) {
        self.replace_manager(None);
    }

    fn replace_manager(&self, provider: Option<Arc<dyn KeyProvider>>) -> bool {
        let settings = self.settings();
        let configured = provider.is_some();
        let manager = build_manager(provider, &settings, &self.inner.metrics);

        {
            let mut keys = self
                .inner
                .keys
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            *keys = Arc::new(manager);
            self.inner.cache.clear();
        }
        debug!(configured, "Key provider replaced");

        configured && settings.prefetch_on_provider_change
    }

    pub fn key_manager(&self) -> Arc<EphemeralKeyManager> {
        Arc::clone(
            &self
                .inner
                .keys
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn settings(&self) -> ContextSettings {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cached_customer_max_age(&self) -> Duration {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cached_customer_max_age
    }

    /// Takes effect on the next cache check; entries are not re-evaluated.
    pub fn set_cached_customer_max_age(&self, max_age: Duration) {
        self.inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .cached_customer_max_age = max_age;
    }

    pub fn set_include_apple_pay_sources(&self, include: bool) {
        self.inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .include_apple_pay_sources = include;
    }

    pub fn clear_cached_customer(&self) {
        self.inner.cache.clear();
    }

    /// The cached customer if it is still fresh. Never touches the network.
    pub fn cached_customer(&self) -> Option<Customer> {
        let subject = self.key_manager().current_subject()?;
        self.inner
            .cache
            .get(&subject, self.cached_customer_max_age())
            .map(|customer| self.present(customer))
    }

    /// Starts a background key refresh if the key is missing or about to
    /// expire. See [`EphemeralKeyManager::refresh_eagerly`].
    pub fn refresh_key_eagerly(&self) -> bool {
        self.key_manager().refresh_eagerly()
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.inner.metrics.summary()
    }

    pub async fn retrieve_customer(&self) -> Result<Customer> {
        self.execute(
            Operation::Retrieve,
            |backend, key| async move { backend.retrieve_customer(&key).await }.boxed(),
        )
        .await
    }

    /// Like [`retrieve_customer`](Self::retrieve_customer), but returns
    /// [`Error::Cancelled`] once `cancel` fires. Shared work keeps running.
    pub async fn retrieve_customer_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Customer> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.retrieve_customer() => result,
        }
    }

    /// Updates the customer. The backend's response, not `params`, is cached.
    pub async fn update_customer(&self, params: UpdateCustomerParams) -> Result<Customer> {
        let params = Arc::new(params);
        self.execute(
            Operation::Update,
            move |backend, key| {
                let params = Arc::clone(&params);
                async move { backend.update_customer(&key, &params).await }.boxed()
            },
        )
        .await
    }

    pub async fn select_default_source(&self, source_id: impl Into<String>) -> Result<Customer> {
        let source_id: Arc<str> = source_id.into().into();
        self.execute(
            Operation::SelectDefaultSource,
            move |backend, key| {
                let source_id = Arc::clone(&source_id);
                async move { backend.select_default_source(&key, &source_id).await }.boxed()
            },
        )
        .await
    }

    pub async fn attach_source(&self, source_id: impl Into<String>) -> Result<Customer> {
        let source_id: Arc<str> = source_id.into().into();
        self.execute(
            Operation::AttachSource,
            move |backend, key| {
                let source_id = Arc::clone(&source_id);
                async move { backend.attach_source(&key, &source_id).await }.boxed()
            },
        )
        .await
    }

    pub async fn detach_source(&self, source_id: impl Into<String>) -> Result<Customer> {
        let source_id: Arc<str> = source_id.into().into();
        self.execute(
            Operation::DetachSource,
            move |backend, key| {
                let source_id = Arc::clone(&source_id);
                async move { backend.detach_source(&key, &source_id).await }.boxed()
            },
        )
        .await
    }

    async fn execute<F>(&self, op: Operation, call: F) -> Result<Customer>
    where
        F: Fn(Arc<dyn CustomerBackend>, EphemeralKey) -> BoxFuture<'static, Result<Customer>>,
    {
        let span = OperationSpan::new(op.name());
        let result = self
            .run(op, &call, &span)
            .instrument(span.span().clone())
            .await;
        span.finish(result.is_err());
        result.map(|customer| self.present(customer))
    }

    async fn run<F>(&self, op: Operation, call: &F, span: &OperationSpan) -> Result<Customer>
    where
        F: Fn(Arc<dyn CustomerBackend>, EphemeralKey) -> BoxFuture<'static, Result<Customer>>,
    {
        let (generation, manager) = {
            let keys = self.inner.keys.read().unwrap_or_else(PoisonError::into_inner);
            (self.inner.generation.load(Ordering::SeqCst), Arc::clone(&*keys))
        };
        let max_age = self.cached_customer_max_age();

        if op.is_read() {
            let cached = manager
                .current_subject()
                .and_then(|subject| self.inner.cache.get(&subject, max_age));
            self.inner.metrics.record_cache_lookup(cached.is_some());
            span.record_cache_hit(cached.is_some());
            if let Some(customer) = cached {
                debug!(customer_id = %customer.id, "Returning cached customer");
                return Ok(customer);
            }
        }

        let mut key = manager.get_key(false).await?;

        // A concurrent fetch may have filled the cache while we waited.
        if op.is_read()
            && let Some(customer) = self.inner.cache.get(key.subject_id(), max_age)
        {
            return Ok(customer);
        }

        let result = match self.call_remote(call, key.clone()).await {
            Err(Error::AuthRejected { message, .. }) => {
                warn!(key_id = key.id(), %message, "Ephemeral key rejected, refreshing");
                self.inner.metrics.auth_retries.inc();
                span.record_auth_retry();
                key = manager.get_key(true).await?;
                self.call_remote(call, key.clone()).await
            }
            other => other,
        };

        let subject = key.subject_id();
        match result {
            Ok(customer) => {
                // Provider swaps bump the generation under the write lock.
                let _keys = self.inner.keys.read().unwrap_or_else(PoisonError::into_inner);
                if self.inner.generation.load(Ordering::SeqCst) == generation {
                    self.inner.cache.put(subject, customer.clone());
                }
                Ok(customer)
            }
            Err(e) => {
                if !op.is_read() && self.inner.cache.invalidate(subject) {
                    debug!(error = %e, "Invalidated cached customer after failed write");
                }
                Err(e)
            }
        }
    }

    async fn call_remote<F>(&self, call: &F, key: EphemeralKey) -> Result<Customer>
    where
        F: Fn(Arc<dyn CustomerBackend>, EphemeralKey) -> BoxFuture<'static, Result<Customer>>,
    {
        let start = Instant::now();
        let result = call(Arc::clone(&self.inner.backend), key).await;
        self.inner
            .metrics
            .record_remote_call(result.is_ok(), start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    fn present(&self, customer: Customer) -> Customer {
        let include_apple_pay = self
            .inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .include_apple_pay_sources;
        if include_apple_pay {
            customer
        } else {
            customer.without_apple_pay_sources()
        }
    }

    fn spawn_prefetch(&self) {
        let Ok(handle) = Handle::try_current() else {
            debug!("No tokio runtime, skipping customer prefetch");
            return;
        };

        let context = self.clone();
        handle.spawn(
            async move {
                if let Err(e) = context.retrieve_customer().await {
                    debug!(error = %e, "Customer prefetch failed");
                }
            }
            .instrument(tracing::debug_span!("customer.prefetch")),
        );
    }
}
