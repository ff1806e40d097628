//! Tunables for the reducer and the on-disk index.
use super::action::CURRENT_VERSION;
use super::request::{RequestState, Role};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Who may cancel a request, per state. A canceled request can never be
/// canceled again whatever this table says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPolicy {
    pub payee_when_created: bool,
    pub payer_when_created: bool,
    pub payee_when_accepted: bool,
    pub payer_when_accepted: bool,
}

impl Default for CancelPolicy {
    fn default() -> Self {
        Self {
            payee_when_created: true,
            payer_when_created: true,
            payee_when_accepted: true,
            payer_when_accepted: false,
        }
    }
}

impl CancelPolicy {
    pub fn permits(&self, role: Role, state: RequestState) -> bool {
        match (state, role) {
            (RequestState::Created, Role::Payee) => self.payee_when_created,
            (RequestState::Created, Role::Payer) => self.payer_when_created,
            (RequestState::Accepted, Role::Payee) => self.payee_when_accepted,
            (RequestState::Accepted, Role::Payer) => self.payer_when_accepted,
            (RequestState::Canceled, _) | (_, Role::ThirdParty) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogicConfig {
    pub cancel_policy: CancelPolicy,
    pub supported_versions: Vec<String>,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            cancel_policy: CancelPolicy::default(),
            supported_versions: vec![CURRENT_VERSION.to_owned()],
        }
    }
}

impl LogicConfig {
    /// Missing fields fall back to their defaults.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn is_supported(&self, version: &str) -> bool {
        self.supported_versions.iter().any(|v| v == version)
    }
}

/// Where the sled database behind the index and the action log lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexConfig {
    pub path: Option<PathBuf>,
    /// Wipe the database when it is dropped
    pub temporary: bool,
}

impl IndexConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            temporary: false,
        }
    }

    pub fn temporary() -> Self {
        Self {
            path: None,
            temporary: true,
        }
    }

    pub fn open(&self) -> anyhow::Result<sled::Db> {
        let mut config = sled::Config::new().temporary(self.temporary);
        if let Some(path) = &self.path {
            config = config.path(path);
        }
        Ok(config.open()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cancel_table() {
        let policy = CancelPolicy::default();

        assert!(policy.permits(Role::Payee, RequestState::Created));
        assert!(policy.permits(Role::Payer, RequestState::Created));
        assert!(policy.permits(Role::Payee, RequestState::Accepted));
        assert!(!policy.permits(Role::Payer, RequestState::Accepted));
        assert!(!policy.permits(Role::Payee, RequestState::Canceled));
        assert!(!policy.permits(Role::ThirdParty, RequestState::Created));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            LogicConfig::from_json(r#"{ "cancelPolicy": { "payeeWhenCreated": true, "payerWhenCreated": false, "payeeWhenAccepted": false, "payerWhenAccepted": false } }"#)
                .unwrap();

        assert!(!config.cancel_policy.permits(Role::Payer, RequestState::Created));
        assert!(config.is_supported(CURRENT_VERSION));
        assert!(!config.is_supported("1.0.0"));
    }
}
