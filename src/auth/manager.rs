//! Single-flight ephemeral key manager.
//!
//! Holds at most one current key and at most one in-flight refresh. Callers
//! that need a key while a refresh is running join it as waiters and all
//! receive the same outcome, in the order they joined. The refresh itself
//! runs on a spawned task, so a caller that gives up never cancels work other
//! waiters depend on.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use super::{EphemeralKey, KeyProvider};
use crate::config::DEFAULT_API_VERSION;
use crate::observability::{ContextMetrics, key_refresh_span};
use crate::{Error, Result};

/// Keys are refreshed this long before they actually expire.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Minimum spacing between two eager refreshes.
pub const DEFAULT_EAGER_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

type KeyResult = Result<EphemeralKey>;

struct PendingRefresh {
    cycle: u64,
    waiters: Vec<oneshot::Sender<KeyResult>>,
}

#[derive(Default)]
struct KeyState {
    current: Option<EphemeralKey>,
    pending: Option<PendingRefresh>,
    cycles: u64,
    last_eager_refresh: Option<Instant>,
}

fn lock(state: &Mutex<KeyState>) -> MutexGuard<'_, KeyState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Acquired {
    Ready(EphemeralKey),
    Waiting(oneshot::Receiver<KeyResult>),
}

/// Owns the current ephemeral key and coordinates refreshes.
pub struct EphemeralKeyManager {
    provider: Option<Arc<dyn KeyProvider>>,
    api_version: String,
    refresh_margin: Duration,
    eager_refresh_interval: Duration,
    state: Arc<Mutex<KeyState>>,
    metrics: Arc<ContextMetrics>,
}

impl std::fmt::Debug for EphemeralKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("EphemeralKeyManager")
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .field("api_version", &self.api_version)
            .field("refresh_margin", &self.refresh_margin)
            .field("current", &state.current)
            .field("refresh_pending", &state.pending.is_some())
            .finish()
    }
}

impl EphemeralKeyManager {
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self::build(Some(provider))
    }

    /// A manager with no provider; every key request fails with
    /// [`Error::MissingKeyProvider`].
    pub fn unconfigured() -> Self {
        Self::build(None)
    }

    fn build(provider: Option<Arc<dyn KeyProvider>>) -> Self {
        Self {
            provider,
            api_version: DEFAULT_API_VERSION.to_string(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            eager_refresh_interval: DEFAULT_EAGER_REFRESH_INTERVAL,
            state: Arc::new(Mutex::new(KeyState::default())),
            metrics: Arc::new(ContextMetrics::new()),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_eager_refresh_interval(mut self, interval: Duration) -> Self {
        self.eager_refresh_interval = interval;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ContextMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// The current key, without checking or refreshing it.
    pub fn current_key(&self) -> Option<EphemeralKey> {
        lock(&self.state).current.clone()
    }

    /// Customer the current key is scoped to, if any key has been issued.
    pub fn current_subject(&self) -> Option<String> {
        lock(&self.state)
            .current
            .as_ref()
            .map(|key| key.subject_id().to_string())
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// Number of live callers waiting on the in-flight refresh.
    pub fn pending_waiters(&self) -> usize {
        lock(&self.state)
            .pending
            .as_ref()
            .map(|p| p.waiters.iter().filter(|w| !w.is_closed()).count())
            .unwrap_or(0)
    }

    /// Returns a usable key, refreshing through the provider when the current
    /// key is missing, within the refresh margin, or `force_refresh` is set.
    ///
    /// Concurrent callers share one provider call.
    pub async fn get_key(&self, force_refresh: bool) -> Result<EphemeralKey> {
        match self.join_or_start(force_refresh)? {
            Acquired::Ready(key) => Ok(key),
            Acquired::Waiting(rx) => rx.await.map_err(|_| Error::RefreshAborted)?,
        }
    }

    /// Like [`get_key`](Self::get_key), but gives up with
    /// [`Error::Cancelled`] when `cancel` fires. The shared refresh keeps
    /// running for the remaining waiters.
    pub async fn get_key_with_cancel(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<EphemeralKey> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.get_key(force_refresh) => result,
        }
    }

    /// Returns a key that is not past its expiry, or [`Error::ExpiredKey`].
    pub async fn get_fresh_key(&self) -> Result<EphemeralKey> {
        let key = self.get_key(false).await?;
        if key.is_expired() {
            return Err(Error::ExpiredKey {
                key_id: key.id().to_string(),
                expired_at: key.expires_at(),
            });
        }
        Ok(key)
    }

    /// Starts a background refresh when the key is missing or close to
    /// expiry, at most once per eager refresh interval. Never blocks.
    ///
    /// Returns whether a refresh was started.
    pub fn refresh_eagerly(&self) -> bool {
        let Some(provider) = self.provider.as_ref() else {
            return false;
        };
        let Ok(handle) = Handle::try_current() else {
            return false;
        };

        let mut state = lock(&self.state);
        if state.pending.is_some() {
            return false;
        }
        if state
            .current
            .as_ref()
            .is_some_and(|key| !key.needs_refresh(self.refresh_margin))
        {
            return false;
        }
        let now = Instant::now();
        if state
            .last_eager_refresh
            .is_some_and(|last| now.duration_since(last) < self.eager_refresh_interval)
        {
            return false;
        }

        state.last_eager_refresh = Some(now);
        self.start_refresh(&mut state, &handle, Arc::clone(provider), Vec::new());
        true
    }

    fn join_or_start(&self, force_refresh: bool) -> Result<Acquired> {
        let provider = self.provider.as_ref().ok_or(Error::MissingKeyProvider)?;

        let mut state = lock(&self.state);
        if !force_refresh
            && let Some(key) = state.current.as_ref()
            && !key.needs_refresh(self.refresh_margin)
        {
            return Ok(Acquired::Ready(key.clone()));
        }

        let (tx, rx) = oneshot::channel();
        if let Some(pending) = state.pending.as_mut() {
            pending.waiters.retain(|w| !w.is_closed());
            pending.waiters.push(tx);
            debug!(
                cycle = pending.cycle,
                waiters = pending.waiters.len(),
                "Joined in-flight key refresh"
            );
        } else {
            let handle = Handle::try_current()
                .map_err(|_| Error::Config("key refresh requires a tokio runtime".into()))?;
            self.start_refresh(&mut state, &handle, Arc::clone(provider), vec![tx]);
        }

        Ok(Acquired::Waiting(rx))
    }

    fn start_refresh(
        &self,
        state: &mut KeyState,
        handle: &Handle,
        provider: Arc<dyn KeyProvider>,
        waiters: Vec<oneshot::Sender<KeyResult>>,
    ) {
        state.cycles += 1;
        let cycle = state.cycles;
        state.pending = Some(PendingRefresh { cycle, waiters });
        self.metrics.key_refreshes.inc();

        let shared = Arc::clone(&self.state);
        let metrics = Arc::clone(&self.metrics);
        let api_version = self.api_version.clone();
        let span = key_refresh_span(provider.name(), cycle);

        handle.spawn(
            async move {
                let issued = AssertUnwindSafe(provider.create_key(&api_version))
                    .catch_unwind()
                    .await;
                let result = match issued {
                    Ok(Ok(json)) => EphemeralKey::from_json(&json)
                        .map_err(|e| Error::key_provider(provider.name(), e)),
                    Ok(Err(e)) => Err(Error::key_provider(provider.name(), e)),
                    Err(_) => Err(Error::RefreshAborted),
                };
                resolve_refresh(&shared, &metrics, cycle, result);
            }
            .instrument(span),
        );
    }
}

/// Publishes a refresh outcome and wakes every waiter of `cycle`.
fn resolve_refresh(
    state: &Mutex<KeyState>,
    metrics: &ContextMetrics,
    cycle: u64,
    result: KeyResult,
) {
    let waiters = {
        let mut state = lock(state);
        match &result {
            Ok(key) => state.current = Some(key.clone()),
            // A failed refresh keeps the old key unless it is already dead.
            Err(_) => {
                if state.current.as_ref().is_some_and(EphemeralKey::is_expired) {
                    state.current = None;
                }
            }
        }
        match state.pending.take() {
            Some(pending) if pending.cycle == cycle => pending.waiters,
            other => {
                state.pending = other;
                Vec::new()
            }
        }
    };

    match &result {
        Ok(key) => {
            let span = tracing::Span::current();
            span.record("key_id", key.id());
            span.record("subject_id", key.subject_id());
            debug!(waiters = waiters.len(), "Ephemeral key refreshed");
        }
        Err(e) => {
            metrics.key_refresh_failures.inc();
            warn!(error = %e, waiters = waiters.len(), "Ephemeral key refresh failed");
        }
    }

    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}
