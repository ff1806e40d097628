//! Payment network extension that records where to pay and where to refund.
//!
//! Vocabulary: `create` (optionally carrying both addresses),
//! `addPaymentAddress` (payee only) and `addRefundAddress` (payer only). Each
//! address can be given once.
use super::error::RequestError;
use super::extension::{
    AddressValidator, Extension, ExtensionAction, ExtensionEvent, ExtensionState, ExtensionType,
    Extensions, PaymentNetwork,
};
use super::identity::Identity;
use super::request::Request;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const ADDRESS_BASED_ID: &str = "pn-address-based";
pub const ADDRESS_BASED_VERSION: &str = "0.1.0";

pub const ACTION_CREATE: &str = "create";
pub const ACTION_ADD_PAYMENT_ADDRESS: &str = "addPaymentAddress";
pub const ACTION_ADD_REFUND_ADDRESS: &str = "addRefundAddress";

const PAYMENT_ADDRESS: &str = "paymentAddress";
const REFUND_ADDRESS: &str = "refundAddress";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AddressBasedPaymentNetwork {
    id: String,
    version: String,
}

impl Default for AddressBasedPaymentNetwork {
    fn default() -> Self {
        Self::new(ADDRESS_BASED_ID)
    }
}

impl AddressBasedPaymentNetwork {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: ADDRESS_BASED_VERSION.to_owned(),
        }
    }

    fn apply_creation(
        &self,
        is_valid_address: AddressValidator<'_>,
        previous: &Extensions,
        action: &ExtensionAction,
        timestamp: u64,
    ) -> Result<ExtensionState, RequestError> {
        if previous.contains_key(&action.id) {
            return Err(RequestError::state("This extension has already been created"));
        }
        let Some(version) = action.version.clone() else {
            return Err(RequestError::validation("version is missing"));
        };
        let parameters = parse(action)?;

        let mut values = BTreeMap::new();
        if let Some(address) = parameters.payment_address {
            check_address(is_valid_address, PAYMENT_ADDRESS, &address)?;
            values.insert(PAYMENT_ADDRESS.to_owned(), address);
        }
        if let Some(address) = parameters.refund_address {
            check_address(is_valid_address, REFUND_ADDRESS, &address)?;
            values.insert(REFUND_ADDRESS.to_owned(), address);
        }

        let event = ExtensionEvent::new(ACTION_CREATE, json!(values), timestamp);
        Ok(ExtensionState {
            id: action.id.clone(),
            extension_type: ExtensionType::PaymentNetwork,
            version,
            values,
            events: vec![event],
        })
    }

    /// Shared by both `add*Address` actions: `role` is who may sign,
    /// `key` the value that may only be set once.
    #[allow(clippy::too_many_arguments)]
    fn apply_add_address(
        &self,
        is_valid_address: AddressValidator<'_>,
        previous: &Extensions,
        action: &ExtensionAction,
        role: (&str, Option<&Identity>),
        signer: &Identity,
        key: &str,
        timestamp: u64,
    ) -> Result<ExtensionState, RequestError> {
        let Some(state) = previous.get(&action.id) else {
            return Err(RequestError::state(
                "The extension should be created before receiving any other action",
            ));
        };
        let (role_name, party) = role;
        let Some(party) = party else {
            return Err(RequestError::validation(format!(
                "The request must have a {role_name}"
            )));
        };
        if party != signer {
            return Err(RequestError::authorization(format!(
                "The signer must be the {role_name}"
            )));
        }
        if state.values.contains_key(key) {
            return Err(RequestError::state(match key {
                PAYMENT_ADDRESS => "Payment address already given",
                _ => "Refund address already given",
            }));
        }

        let parameters = parse(action)?;
        let address = match key {
            PAYMENT_ADDRESS => parameters.payment_address,
            _ => parameters.refund_address,
        }
        .ok_or_else(|| RequestError::validation(format!("{key} must be given")))?;
        check_address(is_valid_address, key, &address)?;

        let mut state = state.clone();
        state.values.insert(key.to_owned(), address.clone());
        state.events.push(ExtensionEvent::new(
            action.action.clone(),
            json!({ key: address }),
            timestamp,
        ));
        Ok(state)
    }
}

impl PaymentNetwork for AddressBasedPaymentNetwork {
    fn create_creation_action(
        &self,
        parameters: &AddressParameters,
    ) -> Result<ExtensionAction, RequestError> {
        Ok(ExtensionAction::new(&self.id, ACTION_CREATE, to_value(parameters)?)
            .with_version(&self.version))
    }

    fn create_add_payment_address_action(
        &self,
        payment_address: &str,
    ) -> Result<ExtensionAction, RequestError> {
        if payment_address.is_empty() {
            return Err(RequestError::validation("paymentAddress must be given"));
        }
        let parameters = AddressParameters {
            payment_address: Some(payment_address.to_owned()),
            refund_address: None,
        };
        Ok(ExtensionAction::new(
            &self.id,
            ACTION_ADD_PAYMENT_ADDRESS,
            to_value(&parameters)?,
        ))
    }

    fn create_add_refund_address_action(
        &self,
        refund_address: &str,
    ) -> Result<ExtensionAction, RequestError> {
        if refund_address.is_empty() {
            return Err(RequestError::validation("refundAddress must be given"));
        }
        let parameters = AddressParameters {
            payment_address: None,
            refund_address: Some(refund_address.to_owned()),
        };
        Ok(ExtensionAction::new(
            &self.id,
            ACTION_ADD_REFUND_ADDRESS,
            to_value(&parameters)?,
        ))
    }
}

impl Extension for AddressBasedPaymentNetwork {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply_action_to_extension(
        &self,
        is_valid_address: AddressValidator<'_>,
        previous: &Extensions,
        action: &ExtensionAction,
        request: &Request,
        signer: &Identity,
        timestamp: u64,
    ) -> Result<Extensions, RequestError> {
        let state = match action.action.as_str() {
            ACTION_CREATE => self.apply_creation(is_valid_address, previous, action, timestamp)?,
            ACTION_ADD_PAYMENT_ADDRESS => self.apply_add_address(
                is_valid_address,
                previous,
                action,
                ("payee", request.payee.as_ref()),
                signer,
                PAYMENT_ADDRESS,
                timestamp,
            )?,
            ACTION_ADD_REFUND_ADDRESS => self.apply_add_address(
                is_valid_address,
                previous,
                action,
                ("payer", request.payer.as_ref()),
                signer,
                REFUND_ADDRESS,
                timestamp,
            )?,
            other => return Err(RequestError::UnknownAction(other.to_owned())),
        };

        let mut extensions = previous.clone();
        extensions.insert(action.id.clone(), state);
        Ok(extensions)
    }
}

fn parse(action: &ExtensionAction) -> Result<AddressParameters, RequestError> {
    if action.parameters.is_null() {
        return Ok(AddressParameters::default());
    }
    serde_json::from_value(action.parameters.clone())
        .map_err(|e| RequestError::validation(format!("malformed extension parameters: {e}")))
}

fn to_value(parameters: &AddressParameters) -> Result<Value, RequestError> {
    serde_json::to_value(parameters)
        .map_err(|e| RequestError::validation(format!("unserializable parameters: {e}")))
}

fn check_address(
    is_valid_address: AddressValidator<'_>,
    key: &str,
    address: &str,
) -> Result<(), RequestError> {
    if is_valid_address(address) {
        Ok(())
    } else {
        Err(RequestError::validation(format!("{key} '{address}' is not a valid address")))
    }
}
