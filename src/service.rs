//! Service layer API: an action log on sled, indexed and replayed on read.
//!
//! Every request operation follows the same path: rebuild the channel from
//! the log, apply the new action fail-fast on top of it, then persist and
//! index the action. Request snapshots are never stored.
use super::action::{
    self, Action, AmountDeltaParameters, CreateParameters, RequestParameters, UnsignedAction,
};
use super::config::{IndexConfig, LogicConfig};
use super::error::RequestError;
use super::extension::{ExtensionAction, ExtensionRegistry};
use super::identity::Identity;
use super::location_by_topic::BlockHeader;
use super::reducer::{ChannelEntry, Reducer, ReplayOutcome};
use super::request::Request;
use super::signature::{SignatureProvider, SignatureVerifier};
use super::store::{self, SledStore};
use super::timestamp_by_location::TimestampBoundaries;
use super::transaction_index::TransactionIndex;
use super::utils;
use anyhow::{Context, anyhow};
use minicbor::bytes::ByteVec;
use serde_json::Value;
use std::sync::Arc;

const INDEX_TREE: &str = "transaction-index";

fn record_key(location: &str) -> String {
    format!("action-log/{location}")
}

/// A serialized action as kept in the log, keyed by its location. The
/// location hashes the whole record, sequence included, so an action sent
/// twice is logged twice.
#[derive(Debug, minicbor::Encode, minicbor::Decode)]
struct StoredAction {
    #[n(0)]
    payload: ByteVec,
    #[n(1)]
    timestamp: u64,
    #[n(2)]
    sequence: u64,
}

pub struct RequestService {
    instance: Arc<sled::Db>,
    store: Arc<SledStore>,
    index: TransactionIndex,
    registry: ExtensionRegistry,
    verifier: Box<dyn SignatureVerifier>,
    is_valid_address: Box<dyn Fn(&str) -> bool>,
    config: LogicConfig,
}

impl RequestService {
    pub fn new(
        instance: Arc<sled::Db>,
        verifier: Box<dyn SignatureVerifier>,
        is_valid_address: Box<dyn Fn(&str) -> bool>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(SledStore::open(&instance, INDEX_TREE)?);

        Ok(Self {
            instance,
            index: TransactionIndex::new(store.clone()),
            store,
            registry: ExtensionRegistry::with_defaults(),
            verifier,
            is_valid_address,
            config: LogicConfig::default(),
        })
    }

    /// Opens the database described by `config` and builds a service over it.
    pub fn open(
        config: &IndexConfig,
        verifier: Box<dyn SignatureVerifier>,
        is_valid_address: Box<dyn Fn(&str) -> bool>,
    ) -> anyhow::Result<Self> {
        let db = config.open().context("Failed to open the request database")?;
        Self::new(Arc::new(db), verifier, is_valid_address)
    }

    pub fn with_config(mut self, config: LogicConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: ExtensionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn index(&self) -> &TransactionIndex {
        &self.index
    }

    fn reducer(&self) -> Reducer<'_> {
        Reducer::new(
            &*self.verifier,
            &self.registry,
            &*self.is_valid_address,
            &self.config,
        )
    }

    /// Appends a serialized action to the log of `channel_id`. The channel id
    /// is always indexed as one of its own topics. The record and its index
    /// entries are committed in one batch.
    pub fn persist_transaction(
        &self,
        channel_id: &str,
        topics: &[String],
        payload: Vec<u8>,
        timestamp: u64,
    ) -> anyhow::Result<ChannelEntry> {
        let sequence = self.instance.generate_id()?;
        let stored = StoredAction {
            payload: ByteVec::from(payload),
            timestamp,
            sequence,
        };
        let location = sha256::digest(&minicbor::to_vec(&stored)?);

        let mut topics = topics.to_vec();
        if !topics.iter().any(|t| t == channel_id) {
            topics.push(channel_id.to_owned());
        }
        self.index
            .add_transaction_with(
                &location,
                &BlockHeader::single(channel_id, &topics),
                timestamp,
                |staged| staged.write(record_key(&location), &stored),
            )
            .with_context(|| format!("Failed to persist action {location}"))?;

        tracing::debug!(%location, channel_id, timestamp, sequence, "persisted action");

        Ok(entry(location, stored))
    }

    /// Entries of a channel ordered by `(timestamp, sequence)`.
    pub fn get_transactions_by_channel_id(
        &self,
        channel_id: &str,
        boundaries: Option<&TimestampBoundaries>,
    ) -> anyhow::Result<Vec<ChannelEntry>> {
        let mut entries = vec![];
        for location in self.index.get_storage_location_list(channel_id, boundaries)? {
            let stored = store::read::<StoredAction>(self.store.as_ref(), &record_key(&location))?
                .ok_or_else(|| anyhow!("Indexed action {location} is missing from the log"))?;
            entries.push(entry(location, stored));
        }
        entries.sort_by_key(|entry| (entry.timestamp, entry.sequence));
        Ok(entries)
    }

    /// Replays the whole channel.
    pub fn compute_request(&self, request_id: &str) -> anyhow::Result<ReplayOutcome> {
        let entries = self.get_transactions_by_channel_id(request_id, None)?;
        Ok(self.reducer().replay(request_id, &entries))
    }

    /// Requests discoverable under `topic`, skipping channels without a valid create.
    pub fn get_requests_by_topic(
        &self,
        topic: &str,
        boundaries: Option<&TimestampBoundaries>,
    ) -> anyhow::Result<Vec<Request>> {
        let mut requests = vec![];
        for channel_id in self.index.get_channel_ids_for_topic(topic, boundaries)? {
            if let Some(request) = self.compute_request(&channel_id)?.request {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    fn load_request(&self, request_id: &str) -> anyhow::Result<Request> {
        self.compute_request(request_id)?
            .request
            .ok_or_else(|| anyhow!("Request {request_id} not found"))
    }

    /// Applies `action` to `current` and, if that succeeds, persists it.
    fn append(
        &self,
        current: Option<&Request>,
        action: Action,
        topics: &[String],
    ) -> anyhow::Result<Request> {
        let timestamp = utils::unix_now();
        let next = self.reducer().apply_action(current, &action, timestamp)?;
        if current.is_none() && self.compute_request(&next.request_id)?.request.is_some() {
            return Err(RequestError::state(
                "no request is expected: the channel already holds a request",
            )
            .into());
        }

        self.persist_transaction(&next.request_id, topics, action.to_bytes()?, timestamp)?;

        tracing::info!(
            request_id = %next.request_id,
            action = action.data.name.as_str(),
            state = %next.state,
            "applied action"
        );
        Ok(next)
    }

    fn sign_and_append(
        &self,
        request_id: &str,
        unsigned: UnsignedAction,
        signer: &Identity,
        provider: &dyn SignatureProvider,
    ) -> anyhow::Result<Request> {
        let request = self.load_request(request_id)?;
        let action = action::format(unsigned, signer, provider)?;
        self.append(Some(&request), action, &[])
    }

    /// Opens a new channel. The request id is only known once the create is signed.
    pub fn create_request(
        &self,
        parameters: &CreateParameters,
        signer: &Identity,
        provider: &dyn SignatureProvider,
        topics: &[String],
    ) -> anyhow::Result<Request> {
        let action = action::format(UnsignedAction::create(parameters)?, signer, provider)?;
        self.append(None, action, topics)
            .context("Request failed on create: ")
    }

    pub fn accept_request(
        &self,
        request_id: &str,
        signer: &Identity,
        provider: &dyn SignatureProvider,
    ) -> anyhow::Result<Request> {
        let unsigned = UnsignedAction::accept(&RequestParameters::new(request_id))?;
        self.sign_and_append(request_id, unsigned, signer, provider)
    }

    pub fn cancel_request(
        &self,
        request_id: &str,
        signer: &Identity,
        provider: &dyn SignatureProvider,
    ) -> anyhow::Result<Request> {
        let unsigned = UnsignedAction::cancel(&RequestParameters::new(request_id))?;
        self.sign_and_append(request_id, unsigned, signer, provider)
    }

    pub fn reduce_expected_amount(
        &self,
        request_id: &str,
        delta_amount: &str,
        signer: &Identity,
        provider: &dyn SignatureProvider,
    ) -> anyhow::Result<Request> {
        let unsigned = UnsignedAction::reduce_expected_amount(&AmountDeltaParameters::new(
            request_id,
            delta_amount,
        ))?;
        self.sign_and_append(request_id, unsigned, signer, provider)
    }

    pub fn increase_expected_amount(
        &self,
        request_id: &str,
        delta_amount: &str,
        signer: &Identity,
        provider: &dyn SignatureProvider,
    ) -> anyhow::Result<Request> {
        let unsigned = UnsignedAction::increase_expected_amount(&AmountDeltaParameters::new(
            request_id,
            delta_amount,
        ))?;
        self.sign_and_append(request_id, unsigned, signer, provider)
    }

    pub fn add_extensions_data(
        &self,
        request_id: &str,
        extensions_data: Vec<Value>,
        signer: &Identity,
        provider: &dyn SignatureProvider,
    ) -> anyhow::Result<Request> {
        let unsigned = UnsignedAction::add_extensions_data(
            &RequestParameters::new(request_id).set_extensions_data(extensions_data),
        )?;
        self.sign_and_append(request_id, unsigned, signer, provider)
    }

    pub fn apply_extension_action(
        &self,
        request_id: &str,
        extension: ExtensionAction,
        signer: &Identity,
        provider: &dyn SignatureProvider,
    ) -> anyhow::Result<Request> {
        let unsigned = UnsignedAction::extension(request_id, extension)?;
        self.sign_and_append(request_id, unsigned, signer, provider)
    }
}

fn entry(location: String, stored: StoredAction) -> ChannelEntry {
    ChannelEntry {
        location,
        timestamp: stored.timestamp,
        sequence: stored.sequence,
        payload: stored.payload.to_vec(),
    }
}
