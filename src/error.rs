//! Error taxonomy shared by the reducer, the extensions and the index

/// Rule violations raised while building or applying an action.
///
/// During replay these are caught and recorded against the offending entry;
/// when applying a freshly authored action they surface to the caller.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authorization error: {0}")]
    Authorization(String),
    #[error("state error: {0}")]
    State(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

impl RequestError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SignatureError {
    #[error("no signing key registered for identity {0}")]
    UnknownSigner(String),
    #[error("malformed signature value: {0}")]
    Malformed(String),
    #[error("signature does not match the signed data")]
    Mismatch,
}

impl From<SignatureError> for RequestError {
    fn from(value: SignatureError) -> Self {
        RequestError::Authorization(format!("invalid signature: {value}"))
    }
}

/// Failures of the key-value collaborator backing the transaction index.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sled i/o failed")]
    Sled(#[from] sled::Error),
    #[error("failed to encode index value: {0}")]
    Encode(String),
    #[error("failed to decode index value")]
    Decode(#[from] minicbor::decode::Error),
    #[error("store lock was poisoned")]
    Poisoned,
}

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no timestamp indexed for location {0}")]
    UnknownLocation(String),
}
