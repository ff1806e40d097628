//! Folds a channel's actions into a [`Request`].
//!
//! Two entry points share the same rules:
//!
//! - [`Reducer::apply_action`] applies one action the caller just authored to a
//!   state it trusts and fails on the first violation.
//! - [`Reducer::replay`] rebuilds a channel from raw log entries. An entry that
//!   does not decode, carries a bad signature or breaks a rule is set aside
//!   with its reason and the fold carries on with the next one.
//!
//! Neither ever mutates the request it is given; each step works on a copy.
use super::action::{
    self, Action, ActionName, AmountDeltaParameters, CreateParameters, ExtensionParameters,
    RequestParameters,
};
use super::amount;
use super::config::LogicConfig;
use super::error::RequestError;
use super::extension::{AddressValidator, ExtensionRegistry, Extensions};
use super::identity::Identity;
use super::request::{Event, Request, RequestState, Role};
use super::signature::SignatureVerifier;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One serialized action as handed over by the action-log storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub location: String,
    pub timestamp: u64,
    /// Arrival order in the storage, breaks timestamp ties
    pub sequence: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredEntry {
    pub reason: String,
    pub entry: ChannelEntry,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplayOutcome {
    /// `None` until a valid create has been applied
    pub request: Option<Request>,
    pub ignored: Vec<IgnoredEntry>,
}

/// What happened to a single entry during replay.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Applied(Box<Request>),
    Ignored(String),
}

pub struct Reducer<'a> {
    verifier: &'a dyn SignatureVerifier,
    registry: &'a ExtensionRegistry,
    is_valid_address: AddressValidator<'a>,
    config: &'a LogicConfig,
}

impl<'a> Reducer<'a> {
    pub fn new(
        verifier: &'a dyn SignatureVerifier,
        registry: &'a ExtensionRegistry,
        is_valid_address: AddressValidator<'a>,
        config: &'a LogicConfig,
    ) -> Self {
        Self {
            verifier,
            registry,
            is_valid_address,
            config,
        }
    }

    /// Rebuilds channel `channel_id`. Entries are ordered by
    /// `(timestamp, sequence)` first. Only the create whose hash is
    /// `channel_id` can open the request.
    pub fn replay(&self, channel_id: &str, entries: &[ChannelEntry]) -> ReplayOutcome {
        let mut ordered: Vec<&ChannelEntry> = entries.iter().collect();
        ordered.sort_by_key(|entry| (entry.timestamp, entry.sequence));

        let mut outcome = ReplayOutcome::default();
        for entry in ordered {
            match self.replay_entry(channel_id, outcome.request.as_ref(), entry) {
                EntryOutcome::Applied(request) => outcome.request = Some(*request),
                EntryOutcome::Ignored(reason) => {
                    tracing::warn!(location = %entry.location, %reason, "ignoring channel entry");
                    outcome.ignored.push(IgnoredEntry {
                        reason,
                        entry: entry.clone(),
                    });
                }
            }
        }
        outcome
    }

    pub fn replay_entry(
        &self,
        channel_id: &str,
        current: Option<&Request>,
        entry: &ChannelEntry,
    ) -> EntryOutcome {
        let applied = Action::from_bytes(&entry.payload)
            .and_then(|action| self.apply_action(current, &action, entry.timestamp))
            .and_then(|request| {
                if request.request_id == channel_id {
                    Ok(request)
                } else {
                    Err(RequestError::validation(format!(
                        "create of request {} does not belong to channel {channel_id}",
                        request.request_id
                    )))
                }
            });

        match applied {
            Ok(request) => EntryOutcome::Applied(Box::new(request)),
            Err(err) => EntryOutcome::Ignored(err.to_string()),
        }
    }

    /// Applies `action` on top of `previous`, stamped with `timestamp`.
    pub fn apply_action(
        &self,
        previous: Option<&Request>,
        action: &Action,
        timestamp: u64,
    ) -> Result<Request, RequestError> {
        if !self.config.is_supported(&action.data.version) {
            return Err(RequestError::validation(format!(
                "version {} is not supported",
                action.data.version
            )));
        }
        let signer = action::get_signer_identity_from_action(action, self.verifier)?;

        let Some(request) = previous else {
            return match action.data.name {
                ActionName::Create => create(action, signer, timestamp),
                _ => Err(RequestError::state("the request must be created first")),
            };
        };

        match &action.data.name {
            ActionName::Create => Err(RequestError::state(
                "no request is expected: the channel already holds a request",
            )),
            ActionName::Accept => accept(request, action, signer, timestamp),
            ActionName::Cancel => self.cancel(request, action, signer, timestamp),
            ActionName::ReduceExpectedAmount => {
                change_expected_amount(request, action, signer, timestamp, Role::Payee)
            }
            ActionName::IncreaseExpectedAmount => {
                change_expected_amount(request, action, signer, timestamp, Role::Payer)
            }
            ActionName::AddExtensionsData => add_extensions_data(request, action, signer, timestamp),
            ActionName::Extension(_) => self.extension(request, action, signer, timestamp),
        }
    }

    fn cancel(
        &self,
        request: &Request,
        action: &Action,
        signer: Identity,
        timestamp: u64,
    ) -> Result<Request, RequestError> {
        let params: RequestParameters = action.parameters()?;
        check_request_id(request, params.request_id.as_deref())?;

        // extensionsData lands on the copy before the checks below; an error
        // drops the copy, so the order has no visible effect.
        let mut next = request.clone();
        next.push_extensions_data(params.extensions_data.as_ref());

        if request.is_canceled() {
            return Err(RequestError::state("the request is already canceled"));
        }
        let role = request.role_of(&signer);
        if !self.config.cancel_policy.permits(role, request.state) {
            return Err(RequestError::authorization(format!(
                "a {role} cannot cancel a request in the {} state",
                request.state
            )));
        }

        next.state = RequestState::Canceled;
        next.push_event(Event::new(
            action.data.name.as_str(),
            json!({ "extensionsDataLength": data_len(&params.extensions_data) }),
            signer,
            timestamp,
        ));
        Ok(next)
    }

    /// Extension traffic: the registry works out the new extension map.
    fn extension(
        &self,
        request: &Request,
        action: &Action,
        signer: Identity,
        timestamp: u64,
    ) -> Result<Request, RequestError> {
        let params: ExtensionParameters = action.parameters()?;
        check_request_id(request, params.request_id.as_deref())?;

        let extensions: Extensions = self.registry.apply_extension_action(
            self.is_valid_address,
            &request.extensions,
            &params.extension,
            request,
            &signer,
            timestamp,
        )?;

        let mut next = request.clone();
        next.extensions = extensions;
        next.push_event(Event::new(
            action.data.name.as_str(),
            params.extension.summary(),
            signer,
            timestamp,
        ));
        Ok(next)
    }
}

fn create(action: &Action, signer: Identity, timestamp: u64) -> Result<Request, RequestError> {
    let params: CreateParameters = action.parameters()?;
    params.validate()?;

    if params.payee.as_ref() != Some(&signer) && params.payer.as_ref() != Some(&signer) {
        return Err(RequestError::authorization(
            "the signer must be the payee or the payer",
        ));
    }

    let mut request = Request {
        request_id: action::request_id(action)?,
        creator: signer.clone(),
        currency: params.currency.clone(),
        expected_amount: params.expected_amount.clone(),
        payee: params.payee.clone(),
        payer: params.payer.clone(),
        state: RequestState::Created,
        events: vec![],
        extensions: Extensions::new(),
        extensions_data: vec![],
        timestamp: params.timestamp.unwrap_or(timestamp),
        version: action.data.version.clone(),
        nonce: params.nonce,
    };
    request.push_extensions_data(params.extensions_data.as_ref());
    request.push_event(Event::new(
        action.data.name.as_str(),
        json!({
            "expectedAmount": params.expected_amount,
            "extensionsDataLength": data_len(&params.extensions_data),
            "isSignedRequest": false,
        }),
        signer,
        timestamp,
    ));
    Ok(request)
}

fn accept(
    request: &Request,
    action: &Action,
    signer: Identity,
    timestamp: u64,
) -> Result<Request, RequestError> {
    let params: RequestParameters = action.parameters()?;
    check_request_id(request, params.request_id.as_deref())?;
    if request.payer.is_none() {
        return Err(RequestError::validation("the request must have a payer"));
    }

    // extensionsData lands on the copy before the checks below; an error
    // drops the copy, so the order has no visible effect.
    let mut next = request.clone();
    next.push_extensions_data(params.extensions_data.as_ref());

    if request.role_of(&signer) != Role::Payer {
        return Err(RequestError::authorization("the signer must be the payer"));
    }
    if request.state != RequestState::Created {
        return Err(RequestError::state(format!(
            "the request state must be created, not {}",
            request.state
        )));
    }

    next.state = RequestState::Accepted;
    next.push_event(Event::new(
        action.data.name.as_str(),
        json!({ "extensionsDataLength": data_len(&params.extensions_data) }),
        signer,
        timestamp,
    ));
    Ok(next)
}

/// `reduceExpectedAmount` (signed by the payee) and `increaseExpectedAmount`
/// (signed by the payer).
fn change_expected_amount(
    request: &Request,
    action: &Action,
    signer: Identity,
    timestamp: u64,
    role: Role,
) -> Result<Request, RequestError> {
    let params: AmountDeltaParameters = action.parameters()?;
    check_request_id(request, params.request_id.as_deref())?;

    let party = match role {
        Role::Payer => request.payer.as_ref(),
        _ => request.payee.as_ref(),
    };
    if party.is_none() {
        return Err(RequestError::validation(format!("the request must have a {role}")));
    }
    let delta = match params.delta_amount.as_deref() {
        None | Some("") => return Err(RequestError::validation("deltaAmount must be given")),
        Some(delta) if !amount::is_valid(delta) => {
            return Err(RequestError::validation(
                "deltaAmount must be a string representing a positive integer",
            ));
        }
        Some(delta) => delta,
    };

    // extensionsData lands on the copy before the checks below; an error
    // drops the copy, so the order has no visible effect.
    let mut next = request.clone();
    next.push_extensions_data(params.extensions_data.as_ref());

    if request.role_of(&signer) != role {
        return Err(RequestError::authorization(format!("the signer must be the {role}")));
    }
    if request.is_canceled() {
        return Err(RequestError::state("the request must not be canceled"));
    }

    next.expected_amount = match role {
        Role::Payer => amount::add(&request.expected_amount, delta)?,
        _ => amount::reduce(&request.expected_amount, delta)?,
    };
    next.push_event(Event::new(
        action.data.name.as_str(),
        json!({
            "deltaAmount": delta,
            "extensionsDataLength": data_len(&params.extensions_data),
        }),
        signer,
        timestamp,
    ));
    Ok(next)
}

fn add_extensions_data(
    request: &Request,
    action: &Action,
    signer: Identity,
    timestamp: u64,
) -> Result<Request, RequestError> {
    let params: RequestParameters = action.parameters()?;
    check_request_id(request, params.request_id.as_deref())?;
    if data_len(&params.extensions_data) == 0 {
        return Err(RequestError::validation("extensionsData must be given"));
    }

    let mut next = request.clone();
    next.push_extensions_data(params.extensions_data.as_ref());
    next.push_event(Event::new(
        action.data.name.as_str(),
        json!({ "extensionsDataLength": data_len(&params.extensions_data) }),
        signer,
        timestamp,
    ));
    Ok(next)
}

fn check_request_id(request: &Request, request_id: Option<&str>) -> Result<(), RequestError> {
    match request_id {
        None | Some("") => Err(RequestError::validation("requestId must be given")),
        Some(id) if id != request.request_id => Err(RequestError::validation(format!(
            "requestId {id} does not match request {}",
            request.request_id
        ))),
        Some(_) => Ok(()),
    }
}

fn data_len<T>(data: &Option<Vec<T>>) -> usize {
    data.as_ref().map_or(0, Vec::len)
}
