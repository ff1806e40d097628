//! Extensions are sub-state machines hung off a request.
//!
//! Each variant implements [`Extension`] and is looked up by its id in an
//! [`ExtensionRegistry`]. The reducer only ever talks to the registry, so a new
//! variant is a new type plus a `register` call.
use super::address_based::{AddressBasedPaymentNetwork, AddressParameters};
use super::error::RequestError;
use super::identity::Identity;
use super::request::Request;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub type Extensions = BTreeMap<String, ExtensionState>;

/// Checks an address handed to a payment network extension.
pub type AddressValidator<'a> = &'a dyn Fn(&str) -> bool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionAction {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtensionType {
    PaymentNetwork,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionEvent {
    pub name: String,
    pub parameters: Value,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionState {
    pub id: String,
    #[serde(rename = "type")]
    pub extension_type: ExtensionType,
    pub version: String,
    pub values: BTreeMap<String, String>,
    pub events: Vec<ExtensionEvent>,
}

pub trait Extension: Send + Sync {
    fn id(&self) -> &str;

    /// Applies `action` and returns the new extension map. `previous` is never
    /// modified; on error it is still the caller's current state.
    fn apply_action_to_extension(
        &self,
        is_valid_address: AddressValidator<'_>,
        previous: &Extensions,
        action: &ExtensionAction,
        request: &Request,
        signer: &Identity,
        timestamp: u64,
    ) -> Result<Extensions, RequestError>;
}

/// A payment network also authors the actions it understands. Builders check
/// their own arguments; everything else is left to `apply_action_to_extension`.
pub trait PaymentNetwork: Extension {
    fn create_creation_action(
        &self,
        parameters: &AddressParameters,
    ) -> Result<ExtensionAction, RequestError>;

    fn create_add_payment_address_action(
        &self,
        payment_address: &str,
    ) -> Result<ExtensionAction, RequestError>;

    fn create_add_refund_address_action(
        &self,
        refund_address: &str,
    ) -> Result<ExtensionAction, RequestError>;
}

pub struct ExtensionRegistry {
    extensions: BTreeMap<String, Box<dyn Extension>>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExtensionRegistry {
    /// A registry that knows no extension; every id is passed through.
    pub fn empty() -> Self {
        Self {
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(AddressBasedPaymentNetwork::default()));
        registry
    }

    pub fn register(&mut self, extension: Box<dyn Extension>) {
        self.extensions.insert(extension.id().to_owned(), extension);
    }

    pub fn get(&self, id: &str) -> Option<&dyn Extension> {
        self.extensions.get(id).map(|extension| &**extension)
    }

    pub fn apply_extension_action(
        &self,
        is_valid_address: AddressValidator<'_>,
        previous: &Extensions,
        action: &ExtensionAction,
        request: &Request,
        signer: &Identity,
        timestamp: u64,
    ) -> Result<Extensions, RequestError> {
        match self.get(&action.id) {
            Some(extension) => extension.apply_action_to_extension(
                is_valid_address,
                previous,
                action,
                request,
                signer,
                timestamp,
            ),
            None => {
                tracing::debug!(extension_id = %action.id, "storing action of unregistered extension");
                Ok(store_unregistered(previous, action, timestamp))
            }
        }
    }
}

// Unregistered ids are stored as given, without validation.
fn store_unregistered(previous: &Extensions, action: &ExtensionAction, timestamp: u64) -> Extensions {
    let mut extensions = previous.clone();
    let state = extensions
        .entry(action.id.clone())
        .or_insert_with(|| ExtensionState {
            id: action.id.clone(),
            extension_type: ExtensionType::Unknown,
            version: action.version.clone().unwrap_or_default(),
            values: BTreeMap::new(),
            events: vec![],
        });

    if let Value::Object(parameters) = &action.parameters {
        for (key, value) in parameters {
            if let Value::String(value) = value {
                state.values.insert(key.clone(), value.clone());
            }
        }
    }
    state.events.push(ExtensionEvent {
        name: action.action.clone(),
        parameters: action.parameters.clone(),
        timestamp,
    });

    extensions
}

impl ExtensionState {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl ExtensionEvent {
    pub fn new(name: impl Into<String>, parameters: Value, timestamp: u64) -> Self {
        Self {
            name: name.into(),
            parameters,
            timestamp,
        }
    }
}

impl ExtensionAction {
    pub fn new(id: impl Into<String>, action: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            parameters,
            version: None,
        }
    }
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
    /// Event parameters the reducer records for this action.
    pub fn summary(&self) -> Value {
        json!({ "extensionId": self.id, "action": self.action })
    }
}
