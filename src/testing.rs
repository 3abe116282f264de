//! Test doubles shared by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Notify;

use crate::auth::{EphemeralKey, KeyProvider};
use crate::client::CustomerBackend;
use crate::customer::{Customer, CustomerSource, UpdateCustomerParams};
use crate::{Error, Result};

fn secret_for(id: &str) -> String {
    id.replace("ephkey", "ek_test")
}

pub fn key_json(id: &str, subject: &str, created: i64, expires: i64) -> serde_json::Value {
    json!({
        "id": id,
        "object": "ephemeral_key",
        "secret": secret_for(id),
        "created": created,
        "expires": expires,
        "livemode": false,
        "associated_objects": [{"type": "customer", "id": subject}]
    })
}

/// A key valid for the next hour.
pub fn test_key(id: &str, subject: &str) -> EphemeralKey {
    let now = Utc::now().timestamp();
    EphemeralKey::from_json(&key_json(id, subject, now - 60, now + 3600)).unwrap()
}

fn card(id: &str, last4: &str, tokenization_method: Option<&str>) -> CustomerSource {
    CustomerSource {
        id: id.to_string(),
        object: "card".to_string(),
        brand: Some("Visa".to_string()),
        last4: Some(last4.to_string()),
        tokenization_method: tokenization_method.map(str::to_string),
    }
}

/// Customer with one plain card (the default) and one Apple Pay card.
pub fn test_customer(id: &str) -> Customer {
    let mut customer = Customer::new(id);
    customer.default_source = Some("card_1".to_string());
    customer.sources.data = vec![
        card("card_1", "4242", None),
        card("card_apple", "1881", Some("apple_pay")),
    ];
    customer
}

/// Key provider that issues `ephkey_1`, `ephkey_2`, ... for `cus_1`.
pub struct CountingKeyProvider {
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    lifetime_secs: i64,
    pub(crate) failing: AtomicBool,
    pub(crate) malformed: AtomicBool,
}

impl CountingKeyProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: None,
            lifetime_secs: 3600,
            failing: AtomicBool::new(false),
            malformed: AtomicBool::new(false),
        }
    }

    /// Each call waits for a notification before answering.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Seconds from now until issued keys expire. May be negative.
    pub fn with_lifetime(mut self, secs: i64) -> Self {
        self.lifetime_secs = secs;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyProvider for CountingKeyProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn create_key(&self, _api_version: &str) -> Result<serde_json::Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Remote {
                message: "key endpoint unavailable".into(),
                status: Some(503),
                error_type: None,
            });
        }
        if self.malformed.load(Ordering::SeqCst) {
            return Ok(json!({"id": format!("ephkey_{n}")}));
        }

        let now = Utc::now().timestamp();
        Ok(key_json(
            &format!("ephkey_{n}"),
            "cus_1",
            now - 3600,
            now + self.lifetime_secs,
        ))
    }
}

#[derive(Default)]
struct FakeState {
    rejected: HashSet<String>,
    fail_next: Option<Error>,
    seen_keys: Vec<String>,
}

/// In-memory backend holding one customer.
///
/// Keys registered with [`reject_key`](Self::reject_key) get
/// `AuthRejected`; [`fail_next`](Self::fail_next) fails the next call.
pub struct FakeBackend {
    customer: Mutex<Customer>,
    state: Mutex<FakeState>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl FakeBackend {
    pub fn new(customer: Customer) -> Self {
        Self {
            customer: Mutex::new(customer),
            state: Mutex::new(FakeState::default()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Retrieves wait for a notification after being counted.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn reject_key(&self, key_id: &str) {
        self.state.lock().unwrap().rejected.insert(key_id.to_string());
    }

    pub fn fail_next(&self, error: Error) {
        self.state.lock().unwrap().fail_next = Some(error);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().seen_keys.clone()
    }

    fn authorize(&self, key: &EphemeralKey) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.seen_keys.push(key.id().to_string());

        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if state.rejected.contains(key.id()) {
            return Err(Error::AuthRejected {
                status: 401,
                message: "Invalid API Key provided".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CustomerBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn retrieve_customer(&self, key: &EphemeralKey) -> Result<Customer> {
        self.authorize(key)?;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.customer.lock().unwrap().clone())
    }

    async fn update_customer(
        &self,
        key: &EphemeralKey,
        params: &UpdateCustomerParams,
    ) -> Result<Customer> {
        self.authorize(key)?;
        let mut customer = self.customer.lock().unwrap();
        if let Some(source) = &params.default_source {
            customer.default_source = Some(source.clone());
        }
        if let Some(email) = &params.email {
            customer.email = Some(email.clone());
        }
        if let Some(shipping) = &params.shipping {
            customer.shipping = Some(shipping.clone());
        }
        customer.description = Some(
            params
                .description
                .clone()
                .unwrap_or_else(|| "updated by backend".to_string()),
        );
        Ok(customer.clone())
    }

    async fn attach_source(&self, key: &EphemeralKey, source_id: &str) -> Result<Customer> {
        self.authorize(key)?;
        let mut customer = self.customer.lock().unwrap();
        customer.sources.data.push(card(source_id, "0005", None));
        Ok(customer.clone())
    }

    async fn detach_source(&self, key: &EphemeralKey, source_id: &str) -> Result<Customer> {
        self.authorize(key)?;
        let mut customer = self.customer.lock().unwrap();
        let before = customer.sources.data.len();
        customer.sources.data.retain(|s| s.id != source_id);
        if customer.sources.data.len() == before {
            return Err(Error::Remote {
                message: format!("No such source: {}", source_id),
                status: Some(404),
                error_type: Some("invalid_request_error".into()),
            });
        }
        if customer.default_source.as_deref() == Some(source_id) {
            customer.default_source = None;
        }
        Ok(customer.clone())
    }
}
