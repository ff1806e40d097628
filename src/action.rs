//! Action wire format, canonical bytes and the signature binding.
//!
//! An action is `{data: {name, parameters, version}, signature}`. The bytes
//! that get signed and hashed are the JSON rendering of `data` with every
//! object's keys in sorted order, so two parties always agree on them.
use super::amount;
use super::error::RequestError;
use super::extension::ExtensionAction;
use super::identity::Identity;
use super::signature::{Signature, SignatureProvider, SignatureVerifier};
use super::utils;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version stamped on every action built by this crate.
pub const CURRENT_VERSION: &str = "2.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionName {
    Create,
    Accept,
    Cancel,
    ReduceExpectedAmount,
    IncreaseExpectedAmount,
    AddExtensionsData,
    /// Anything outside the request vocabulary is extension traffic.
    Extension(String),
}

/// Name used by [`UnsignedAction::extension`].
pub const EXTENSION_ACTION_NAME: &str = "extension";

impl ActionName {
    pub fn as_str(&self) -> &str {
        match self {
            ActionName::Create => "create",
            ActionName::Accept => "accept",
            ActionName::Cancel => "cancel",
            ActionName::ReduceExpectedAmount => "reduceExpectedAmount",
            ActionName::IncreaseExpectedAmount => "increaseExpectedAmount",
            ActionName::AddExtensionsData => "addExtensionsData",
            ActionName::Extension(name) => name,
        }
    }
}

impl From<String> for ActionName {
    fn from(value: String) -> Self {
        match value.as_str() {
            "create" => ActionName::Create,
            "accept" => ActionName::Accept,
            "cancel" => ActionName::Cancel,
            "reduceExpectedAmount" => ActionName::ReduceExpectedAmount,
            "increaseExpectedAmount" => ActionName::IncreaseExpectedAmount,
            "addExtensionsData" => ActionName::AddExtensionsData,
            _ => ActionName::Extension(value),
        }
    }
}

impl From<ActionName> for String {
    fn from(value: ActionName) -> Self {
        value.as_str().to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedAction {
    pub name: ActionName,
    pub parameters: Value,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub data: UnsignedAction,
    pub signature: Signature,
}

// Parameters carried by each request action. Fields a replayed action might
// omit are optional so the reducer can report what is missing.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParameters {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub expected_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions_data: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

/// Parameters of `accept`, `cancel` and `addExtensionsData`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions_data: Option<Vec<Value>>,
}

/// Parameters of `reduceExpectedAmount` and `increaseExpectedAmount`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountDeltaParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions_data: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub extension: ExtensionAction,
}

impl CreateParameters {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
    pub fn set_expected_amount(mut self, amount: impl Into<String>) -> Self {
        self.expected_amount = amount.into();
        self
    }
    pub fn set_payee(mut self, payee: Identity) -> Self {
        self.payee = Some(payee);
        self
    }
    pub fn set_payer(mut self, payer: Identity) -> Self {
        self.payer = Some(payer);
        self
    }
    pub fn set_extensions_data(mut self, data: Vec<Value>) -> Self {
        self.extensions_data = Some(data);
        self
    }
    pub fn set_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
    pub fn set_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }
    /// Field checks shared by formatting and by the reducer.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.currency.is_empty() {
            return Err(RequestError::validation("currency must be given"));
        }
        if !amount::is_valid(&self.expected_amount) {
            return Err(RequestError::validation(
                "expectedAmount must be a string representing a positive integer",
            ));
        }
        if self.payee.is_none() && self.payer.is_none() {
            return Err(RequestError::validation("payee or payer identity must be given"));
        }
        Ok(())
    }
}

impl RequestParameters {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            extensions_data: None,
        }
    }
    pub fn set_extensions_data(mut self, data: Vec<Value>) -> Self {
        self.extensions_data = Some(data);
        self
    }
}

impl AmountDeltaParameters {
    pub fn new(request_id: impl Into<String>, delta_amount: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            delta_amount: Some(delta_amount.into()),
            extensions_data: None,
        }
    }
    pub fn set_extensions_data(mut self, data: Vec<Value>) -> Self {
        self.extensions_data = Some(data);
        self
    }
}

impl UnsignedAction {
    fn build<P: Serialize>(name: ActionName, parameters: &P) -> Result<Self, RequestError> {
        let parameters = serde_json::to_value(parameters)
            .map_err(|e| RequestError::validation(format!("unserializable parameters: {e}")))?;
        Ok(Self {
            name,
            parameters,
            version: CURRENT_VERSION.to_owned(),
        })
    }

    /// A missing creation timestamp is filled in with the current time.
    pub fn create(parameters: &CreateParameters) -> Result<Self, RequestError> {
        parameters.validate()?;
        let mut parameters = parameters.clone();
        parameters.timestamp.get_or_insert_with(utils::unix_now);
        Self::build(ActionName::Create, &parameters)
    }
    pub fn accept(parameters: &RequestParameters) -> Result<Self, RequestError> {
        require_request_id(parameters.request_id.as_deref())?;
        Self::build(ActionName::Accept, parameters)
    }
    pub fn cancel(parameters: &RequestParameters) -> Result<Self, RequestError> {
        require_request_id(parameters.request_id.as_deref())?;
        Self::build(ActionName::Cancel, parameters)
    }
    pub fn reduce_expected_amount(
        parameters: &AmountDeltaParameters,
    ) -> Result<Self, RequestError> {
        require_request_id(parameters.request_id.as_deref())?;
        require_delta(parameters.delta_amount.as_deref())?;
        Self::build(ActionName::ReduceExpectedAmount, parameters)
    }
    pub fn increase_expected_amount(
        parameters: &AmountDeltaParameters,
    ) -> Result<Self, RequestError> {
        require_request_id(parameters.request_id.as_deref())?;
        require_delta(parameters.delta_amount.as_deref())?;
        Self::build(ActionName::IncreaseExpectedAmount, parameters)
    }
    pub fn add_extensions_data(parameters: &RequestParameters) -> Result<Self, RequestError> {
        require_request_id(parameters.request_id.as_deref())?;
        if parameters.extensions_data.as_ref().is_none_or(Vec::is_empty) {
            return Err(RequestError::validation("extensionsData must be given"));
        }
        Self::build(ActionName::AddExtensionsData, parameters)
    }
    pub fn extension(request_id: impl Into<String>, extension: ExtensionAction) -> Result<Self, RequestError> {
        let parameters = ExtensionParameters {
            request_id: Some(request_id.into()),
            extension,
        };
        Self::build(ActionName::Extension(EXTENSION_ACTION_NAME.into()), &parameters)
    }

    /// The exact bytes that are signed, and hashed into the request id.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, RequestError> {
        canonical_json(self)
    }
}

impl Action {
    pub fn parameters<P: serde::de::DeserializeOwned>(&self) -> Result<P, RequestError> {
        serde_json::from_value(self.data.parameters.clone()).map_err(|e| {
            RequestError::validation(format!(
                "malformed parameters for {}: {e}",
                self.data.name.as_str()
            ))
        })
    }

    /// Serialized form handed to the action-log storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RequestError> {
        canonical_json(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RequestError> {
        serde_json::from_slice(bytes)
            .map_err(|e| RequestError::validation(format!("malformed action: {e}")))
    }
}

/// Signs the canonical bytes of `unsigned` as `signer`.
pub fn format(
    unsigned: UnsignedAction,
    signer: &Identity,
    provider: &dyn SignatureProvider,
) -> Result<Action, RequestError> {
    let bytes = unsigned.canonical_bytes()?;
    let signature = provider.sign(&bytes, signer)?;
    Ok(Action {
        data: unsigned,
        signature,
    })
}

/// Identity bound to the action's signature, verified against its data.
pub fn get_signer_identity_from_action(
    action: &Action,
    verifier: &dyn SignatureVerifier,
) -> Result<Identity, RequestError> {
    let bytes = action.data.canonical_bytes()?;
    Ok(verifier.recover(&bytes, &action.signature)?)
}

/// Request id of the channel opened by `create`: the sha256 of its canonical bytes.
pub fn request_id(create: &Action) -> Result<String, RequestError> {
    Ok(sha256::digest(&canonical_json(create)?))
}

fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, RequestError> {
    // serde_json maps keep their keys ordered, so going through Value sorts
    // every nested object.
    let value = serde_json::to_value(value)
        .map_err(|e| RequestError::validation(format!("unserializable action: {e}")))?;
    serde_json::to_vec(&value)
        .map_err(|e| RequestError::validation(format!("unserializable action: {e}")))
}

fn require_request_id(request_id: Option<&str>) -> Result<(), RequestError> {
    match request_id {
        Some(id) if !id.is_empty() => Ok(()),
        _ => Err(RequestError::validation("requestId must be given")),
    }
}

fn require_delta(delta: Option<&str>) -> Result<(), RequestError> {
    match delta {
        Some(delta) if amount::is_valid(delta) => Ok(()),
        Some(_) => Err(RequestError::validation(
            "deltaAmount must be a string representing a positive integer",
        )),
        None => Err(RequestError::validation("deltaAmount must be given")),
    }
}
