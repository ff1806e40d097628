//! Topic and channel lookups over storage locations.
//!
//! Three lists are kept, each in insertion order without duplicates:
//! channel → locations, topic → channels and channel → topics. The order of
//! a channel's locations is the order they arrived in, which replay relies on.
//!
//! Every element of a list is its own key, `<kind>/<hex name>/item/<position>`,
//! next to a `member/<hex value>` marker and a `len` counter. An append only
//! touches those three keys and a read is one prefix scan.
use super::error::{IndexError, StoreError};
use super::store::{KeyValueStore, StagedWrites};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const LOCATIONS_BY_CHANNEL: &str = "locations-by-channel";
const CHANNELS_BY_TOPIC: &str = "channels-by-topic";
const TOPICS_BY_CHANNEL: &str = "topics-by-channel";

// names are hex encoded so no topic can reach into another topic's prefix
fn list_key(kind: &str, name: &str) -> String {
    format!("{kind}/{}/", hex::encode(name))
}

/// Which channels a stored block of actions belongs to, and under which
/// topics each channel should be discoverable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// channel id → positions of its actions inside the block
    pub channel_ids: BTreeMap<String, Vec<u64>>,
    pub topics: BTreeMap<String, Vec<String>>,
}

impl BlockHeader {
    /// Header for a block holding a single action of `channel_id`.
    pub fn single(channel_id: &str, topics: &[String]) -> Self {
        let mut header = Self::default();
        header.channel_ids.insert(channel_id.to_owned(), vec![0]);
        header.topics.insert(channel_id.to_owned(), topics.to_vec());
        header
    }
}

pub struct LocationByTopic {
    store: Arc<dyn KeyValueStore>,
}

impl LocationByTopic {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn push_storage_location_indexed_with_block_topics(
        &self,
        location: &str,
        header: &BlockHeader,
    ) -> Result<(), IndexError> {
        let mut staged = StagedWrites::new(self.store.as_ref());
        Self::stage(&mut staged, location, header)?;
        Ok(staged.commit()?)
    }

    pub(crate) fn stage(
        staged: &mut StagedWrites<'_>,
        location: &str,
        header: &BlockHeader,
    ) -> Result<(), StoreError> {
        for channel_id in header.channel_ids.keys() {
            append_unique(staged, &list_key(LOCATIONS_BY_CHANNEL, channel_id), location)?;
        }
        for (channel_id, topics) in &header.topics {
            for topic in topics {
                append_unique(staged, &list_key(CHANNELS_BY_TOPIC, topic), channel_id)?;
                append_unique(staged, &list_key(TOPICS_BY_CHANNEL, channel_id), topic)?;
            }
        }
        Ok(())
    }

    /// Locations of a channel in arrival order; empty for an unknown channel.
    pub fn get_storage_locations_from_channel_id(
        &self,
        channel_id: &str,
    ) -> Result<Vec<String>, IndexError> {
        self.list(&list_key(LOCATIONS_BY_CHANNEL, channel_id))
    }

    pub fn get_channel_ids_from_topic(&self, topic: &str) -> Result<Vec<String>, IndexError> {
        self.list(&list_key(CHANNELS_BY_TOPIC, topic))
    }

    /// Union over `topics`, each channel once, in first-seen order.
    pub fn get_channel_ids_from_multiple_topics(
        &self,
        topics: &[String],
    ) -> Result<Vec<String>, IndexError> {
        let mut seen = BTreeSet::new();
        let mut channel_ids = vec![];
        for topic in topics {
            for channel_id in self.get_channel_ids_from_topic(topic)? {
                if seen.insert(channel_id.clone()) {
                    channel_ids.push(channel_id);
                }
            }
        }
        Ok(channel_ids)
    }

    pub fn get_topics_from_channel_id(&self, channel_id: &str) -> Result<Vec<String>, IndexError> {
        self.list(&list_key(TOPICS_BY_CHANNEL, channel_id))
    }

    fn list(&self, list: &str) -> Result<Vec<String>, IndexError> {
        let mut values = vec![];
        for (_, bytes) in self.store.scan_prefix(&format!("{list}item/"))? {
            values.push(minicbor::decode::<String>(&bytes).map_err(StoreError::from)?);
        }
        Ok(values)
    }
}

fn append_unique(staged: &mut StagedWrites<'_>, list: &str, value: &str) -> Result<(), StoreError> {
    let member = format!("{list}member/{}", hex::encode(value));
    if staged.read::<u64>(&member)?.is_some() {
        return Ok(());
    }

    let len = format!("{list}len");
    let position = staged.read::<u64>(&len)?.unwrap_or(0);
    // zero padded so key order is insertion order
    staged.write(format!("{list}item/{position:020}"), &value.to_owned())?;
    staged.write(member, &position)?;
    staged.write(len, &(position + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn locations_keep_arrival_order() {
        let index = LocationByTopic::new(Arc::new(MemoryStore::new()));
        for location in ["c", "a", "b", "a"] {
            index
                .push_storage_location_indexed_with_block_topics(location, &BlockHeader::single("chan", &[]))
                .unwrap();
        }

        assert_eq!(
            index.get_storage_locations_from_channel_id("chan").unwrap(),
            topics(&["c", "a", "b"])
        );
    }

    #[test]
    fn topic_fan_out() {
        let index = LocationByTopic::new(Arc::new(MemoryStore::new()));
        index
            .push_storage_location_indexed_with_block_topics(
                "loc1",
                &BlockHeader::single("chan", &topics(&["t1", "t2"])),
            )
            .unwrap();

        assert_eq!(index.get_channel_ids_from_topic("t1").unwrap(), topics(&["chan"]));
        assert_eq!(index.get_channel_ids_from_topic("t2").unwrap(), topics(&["chan"]));
        assert_eq!(
            index.get_channel_ids_from_multiple_topics(&topics(&["t1", "t2"])).unwrap(),
            topics(&["chan"])
        );
        assert_eq!(index.get_topics_from_channel_id("chan").unwrap(), topics(&["t1", "t2"]));
    }

    #[test]
    fn long_lists_keep_order() {
        let index = LocationByTopic::new(Arc::new(MemoryStore::new()));
        let locations: Vec<String> = (0..25).rev().map(|i| format!("loc{i}")).collect();
        for location in &locations {
            index
                .push_storage_location_indexed_with_block_topics(location, &BlockHeader::single("chan", &[]))
                .unwrap();
        }

        assert_eq!(index.get_storage_locations_from_channel_id("chan").unwrap(), locations);
    }

    #[test]
    fn names_with_separators_stay_apart() {
        let index = LocationByTopic::new(Arc::new(MemoryStore::new()));
        index
            .push_storage_location_indexed_with_block_topics("loc1", &BlockHeader::single("c1", &topics(&["a"])))
            .unwrap();
        index
            .push_storage_location_indexed_with_block_topics(
                "loc2",
                &BlockHeader::single("c2", &topics(&["a/item/x"])),
            )
            .unwrap();

        assert_eq!(index.get_channel_ids_from_topic("a").unwrap(), topics(&["c1"]));
        assert_eq!(index.get_channel_ids_from_topic("a/item/x").unwrap(), topics(&["c2"]));
    }

    #[test]
    fn unknown_keys_are_empty() {
        let index = LocationByTopic::new(Arc::new(MemoryStore::new()));

        assert!(index.get_storage_locations_from_channel_id("nope").unwrap().is_empty());
        assert!(index.get_channel_ids_from_topic("nope").unwrap().is_empty());
    }
}
