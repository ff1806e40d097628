//! Topic, channel and time lookups over stored actions.
//!
//! Composes [`LocationByTopic`] and [`TimestampByLocation`] over one
//! key-value store. `add_transaction` stages the writes of both and commits
//! them as one batch, so the two never disagree about a location.
use super::error::{IndexError, StoreError};
use super::location_by_topic::{BlockHeader, LocationByTopic};
use super::store::{KeyValueStore, MemoryStore, StagedWrites};
use super::timestamp_by_location::{TimestampBoundaries, TimestampByLocation};
use std::sync::{Arc, Mutex};

pub struct TransactionIndex {
    store: Arc<dyn KeyValueStore>,
    location_by_topic: LocationByTopic,
    timestamp_by_location: TimestampByLocation,
    // serializes the read-modify-write of add_transaction
    write_lock: Mutex<()>,
}

impl TransactionIndex {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            location_by_topic: LocationByTopic::new(store.clone()),
            timestamp_by_location: TimestampByLocation::new(store.clone()),
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    pub fn location_by_topic(&self) -> &LocationByTopic {
        &self.location_by_topic
    }

    pub fn timestamp_by_location(&self) -> &TimestampByLocation {
        &self.timestamp_by_location
    }

    pub fn get_last_transaction_timestamp(&self) -> Result<Option<u64>, IndexError> {
        self.timestamp_by_location.get_last_transaction_timestamp()
    }

    /// Indexes `data_id` under the channels and topics of `header` and at
    /// `timestamp`. Either every entry is written or none is.
    pub fn add_transaction(
        &self,
        data_id: &str,
        header: &BlockHeader,
        timestamp: u64,
    ) -> Result<(), IndexError> {
        self.add_transaction_with(data_id, header, timestamp, |_| Ok(()))
    }

    /// Like [`add_transaction`](Self::add_transaction), with the caller's own
    /// writes staged into the same commit.
    pub fn add_transaction_with<F>(
        &self,
        data_id: &str,
        header: &BlockHeader,
        timestamp: u64,
        extra: F,
    ) -> Result<(), IndexError>
    where
        F: FnOnce(&mut StagedWrites<'_>) -> Result<(), StoreError>,
    {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut staged = StagedWrites::new(self.store.as_ref());
        extra(&mut staged)?;
        LocationByTopic::stage(&mut staged, data_id, header)?;
        TimestampByLocation::stage(&mut staged, data_id, timestamp)?;
        staged.commit()?;

        tracing::debug!(
            location = data_id,
            timestamp,
            channels = header.channel_ids.len(),
            "indexed transaction"
        );
        Ok(())
    }

    /// Locations of `channel_id` in arrival order, optionally restricted to a window.
    pub fn get_storage_location_list(
        &self,
        channel_id: &str,
        boundaries: Option<&TimestampBoundaries>,
    ) -> Result<Vec<String>, IndexError> {
        let locations = self
            .location_by_topic
            .get_storage_locations_from_channel_id(channel_id)?;

        let Some(boundaries) = boundaries else {
            return Ok(locations);
        };
        let mut kept = Vec::with_capacity(locations.len());
        for location in locations {
            if self
                .timestamp_by_location
                .is_data_in_boundaries(&location, boundaries)?
            {
                kept.push(location);
            }
        }
        Ok(kept)
    }

    pub fn get_channel_ids_for_topic(
        &self,
        topic: &str,
        boundaries: Option<&TimestampBoundaries>,
    ) -> Result<Vec<String>, IndexError> {
        let channel_ids = self.location_by_topic.get_channel_ids_from_topic(topic)?;
        self.keep_channels_in_boundaries(channel_ids, boundaries)
    }

    pub fn get_channel_ids_for_multiple_topics(
        &self,
        topics: &[String],
        boundaries: Option<&TimestampBoundaries>,
    ) -> Result<Vec<String>, IndexError> {
        let channel_ids = self
            .location_by_topic
            .get_channel_ids_from_multiple_topics(topics)?;
        self.keep_channels_in_boundaries(channel_ids, boundaries)
    }

    /// A channel is kept when at least one of its locations is in the window.
    fn keep_channels_in_boundaries(
        &self,
        channel_ids: Vec<String>,
        boundaries: Option<&TimestampBoundaries>,
    ) -> Result<Vec<String>, IndexError> {
        let Some(boundaries) = boundaries else {
            return Ok(channel_ids);
        };

        let mut kept = vec![];
        for channel_id in channel_ids {
            if self.has_location_in_boundaries(&channel_id, boundaries)? {
                kept.push(channel_id);
            }
        }
        Ok(kept)
    }

    fn has_location_in_boundaries(
        &self,
        channel_id: &str,
        boundaries: &TimestampBoundaries,
    ) -> Result<bool, IndexError> {
        for location in self
            .location_by_topic
            .get_storage_locations_from_channel_id(channel_id)?
        {
            if self
                .timestamp_by_location
                .is_data_in_boundaries(&location, boundaries)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
