//! Append-only map from storage location to the timestamp it was stored at.
use super::error::{IndexError, StoreError};
use super::store::{self, KeyValueStore, StagedWrites};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const LAST_TIMESTAMP_KEY: &str = "last-transaction-timestamp";

fn timestamp_key(location: &str) -> String {
    format!("timestamp-by-location/{location}")
}

/// Inclusive time window. A missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampBoundaries {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,
}

impl TimestampBoundaries {
    pub fn since(from: u64) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }
    pub fn until(to: u64) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }
    pub fn between(from: u64, to: u64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }
    pub fn contains(&self, timestamp: u64) -> bool {
        self.from.is_none_or(|from| from <= timestamp) && self.to.is_none_or(|to| timestamp <= to)
    }
}

pub struct TimestampByLocation {
    store: Arc<dyn KeyValueStore>,
}

impl TimestampByLocation {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn push_timestamp_by_location(&self, location: &str, timestamp: u64) -> Result<(), IndexError> {
        let mut staged = StagedWrites::new(self.store.as_ref());
        Self::stage(&mut staged, location, timestamp)?;
        Ok(staged.commit()?)
    }

    /// Records `timestamp` for `location` unless one is already known, and
    /// moves the last-seen checkpoint forward.
    pub(crate) fn stage(
        staged: &mut StagedWrites<'_>,
        location: &str,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        let key = timestamp_key(location);
        if staged.read::<u64>(&key)?.is_none() {
            staged.write(key, &timestamp)?;
        }

        let last = staged.read::<u64>(LAST_TIMESTAMP_KEY)?;
        if last.is_none_or(|last| last < timestamp) {
            staged.write(LAST_TIMESTAMP_KEY.to_owned(), &timestamp)?;
        }
        Ok(())
    }

    pub fn get_timestamp_from_location(&self, location: &str) -> Result<Option<u64>, IndexError> {
        Ok(store::read(self.store.as_ref(), &timestamp_key(location))?)
    }

    pub fn is_data_in_boundaries(
        &self,
        location: &str,
        boundaries: &TimestampBoundaries,
    ) -> Result<bool, IndexError> {
        let timestamp = self
            .get_timestamp_from_location(location)?
            .ok_or_else(|| IndexError::UnknownLocation(location.to_owned()))?;
        Ok(boundaries.contains(timestamp))
    }

    /// Highest timestamp indexed so far; `None` on an empty index.
    pub fn get_last_transaction_timestamp(&self) -> Result<Option<u64>, IndexError> {
        Ok(store::read(self.store.as_ref(), LAST_TIMESTAMP_KEY)?)
    }
}
