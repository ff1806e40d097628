use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityType {
    /// bech32m rendering of an ed25519 public key
    Ed25519PublicKey,
}

/// A party to a request. Two identities are the same party iff both fields match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "type")]
    pub identity_type: IdentityType,
    pub value: String,
}

impl Identity {
    pub fn new(identity_type: IdentityType, value: impl Into<String>) -> Self {
        Self {
            identity_type,
            value: value.into(),
        }
    }
    pub fn ed25519(value: impl Into<String>) -> Self {
        Self::new(IdentityType::Ed25519PublicKey, value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
