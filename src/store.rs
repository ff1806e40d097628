//! Key-value collaborator behind the transaction index.
//!
//! Values are CBOR encoded. Writes that must land together are staged in a
//! [`StagedWrites`] and committed with a single [`KeyValueStore::set_all`].
use super::error::StoreError;
use sled::Batch;
use std::collections::BTreeMap;
use std::sync::RwLock;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes every entry or none of them.
    fn set_all(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StoreError>;

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.set_all(vec![(key.to_owned(), value)])
    }

    /// Every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set_all(&self, batch: Vec<(String, Vec<u8>)>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.extend(batch);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// A named tree inside a sled database.
#[derive(Debug, Clone)]
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree(name)?,
        })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    fn set_all(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StoreError> {
        let mut batch = Batch::default();
        for (key, value) in entries {
            batch.insert(key.as_bytes(), value);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut entries = vec![];
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Encode(format!("non utf-8 key: {e}")))?;
            entries.push((key, value.to_vec()));
        }
        Ok(entries)
    }
}

/// Writes waiting to be committed, readable before they are.
pub struct StagedWrites<'a> {
    store: &'a dyn KeyValueStore,
    pending: BTreeMap<String, Vec<u8>>,
}

impl<'a> StagedWrites<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
        }
    }

    pub fn read<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.pending.get(key) {
            Some(bytes) => Ok(Some(minicbor::decode(bytes)?)),
            None => read(self.store, key),
        }
    }

    pub fn write<T: minicbor::Encode<()>>(&mut self, key: String, value: &T) -> Result<(), StoreError> {
        self.pending.insert(key, encode(value)?);
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.store.set_all(self.pending.into_iter().collect())
    }
}

pub fn read<T>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match store.get(key)? {
        Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}
