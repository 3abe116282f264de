//! Customer resource types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const APPLE_PAY_TOKENIZATION: &str = "apple_pay";

/// A payment source attached to a customer. Card fields are only present
/// for card sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerSource {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenization_method: Option<String>,
}

impl CustomerSource {
    pub fn is_apple_pay(&self) -> bool {
        self.tokenization_method.as_deref() == Some(APPLE_PAY_TOKENIZATION)
    }
}

/// Paged source list, as returned inside the customer object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceList {
    #[serde(default)]
    pub data: Vec<CustomerSource>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Shipping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
}

/// Customer record as returned by the payment backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_source: Option<String>,
    #[serde(default)]
    pub sources: SourceList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping: Option<Shipping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Customer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_source: None,
            sources: SourceList::default(),
            shipping: None,
            email: None,
            description: None,
        }
    }

    pub fn sources(&self) -> &[CustomerSource] {
        &self.sources.data
    }

    pub fn source(&self, id: &str) -> Option<&CustomerSource> {
        self.sources.data.iter().find(|s| s.id == id)
    }

    /// Copy of this customer with Apple Pay card sources removed. A default
    /// source that pointed at one is cleared.
    pub fn without_apple_pay_sources(&self) -> Self {
        let mut customer = self.clone();
        customer.sources.data.retain(|s| !s.is_apple_pay());
        if let Some(default) = customer.default_source.as_deref()
            && customer.source(default).is_none()
            && self.source(default).is_some()
        {
            customer.default_source = None;
        }
        customer
    }
}

/// Fields to change on a customer. Unset fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateCustomerParams {
    pub default_source: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub shipping: Option<Shipping>,
    pub metadata: BTreeMap<String, String>,
}

impl UpdateCustomerParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_source(mut self, source_id: impl Into<String>) -> Self {
        self.default_source = Some(source_id.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn shipping(mut self, shipping: Shipping) -> Self {
        self.shipping = Some(shipping);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Flattens into backend form fields (`shipping[address][city]`, ...).
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = Vec::new();
        let mut push = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                form.push((key.to_string(), v.clone()));
            }
        };

        push("default_source", &self.default_source);
        push("email", &self.email);
        push("description", &self.description);

        if let Some(shipping) = &self.shipping {
            push("shipping[name]", &shipping.name);
            push("shipping[phone]", &shipping.phone);
            let address = &shipping.address;
            push("shipping[address][line1]", &address.line1);
            push("shipping[address][line2]", &address.line2);
            push("shipping[address][city]", &address.city);
            push("shipping[address][state]", &address.state);
            push("shipping[address][postal_code]", &address.postal_code);
            push("shipping[address][country]", &address.country);
        }

        for (k, v) in &self.metadata {
            form.push((format!("metadata[{}]", k), v.clone()));
        }

        form
    }
}
