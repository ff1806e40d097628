//! The request snapshot folded out of a channel's actions.
//!
//! A [`Request`] is always derived from the log and never written back as a
//! source of truth. Every applied action leaves one [`Event`] behind.
use super::extension::Extensions;
use super::identity::Identity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestState {
    Created,
    Accepted,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Payee,
    Payer,
    ThirdParty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,
    pub parameters: Value,
    pub action_signer: Identity,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: String,
    pub creator: Identity,
    pub currency: String,
    pub expected_amount: String, // non-negative integer string, see amount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<Identity>,
    pub state: RequestState,
    pub events: Vec<Event>,
    pub extensions: Extensions,
    pub extensions_data: Vec<Value>,
    pub timestamp: u64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

impl Request {
    /// Role `identity` plays in this request. A party that is both payee and
    /// payer is treated as the payee.
    pub fn role_of(&self, identity: &Identity) -> Role {
        if self.payee.as_ref() == Some(identity) {
            Role::Payee
        } else if self.payer.as_ref() == Some(identity) {
            Role::Payer
        } else {
            Role::ThirdParty
        }
    }

    pub fn push_extensions_data(&mut self, data: Option<&Vec<Value>>) {
        if let Some(data) = data {
            self.extensions_data.extend(data.iter().cloned());
        }
    }

    pub fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn is_canceled(&self) -> bool {
        self.state == RequestState::Canceled
    }
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        parameters: Value,
        action_signer: Identity,
        timestamp: u64,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            action_signer,
            timestamp,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestState::Created => "created",
            RequestState::Accepted => "accepted",
            RequestState::Canceled => "canceled",
        })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Payee => "payee",
            Role::Payer => "payer",
            Role::ThirdParty => "third party",
        })
    }
}
