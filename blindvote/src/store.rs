use crate::*;
use std::collections::BTreeMap;
use std::convert::TryInto;
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// An insert found its key already present
    #[error("key {0} already exists")]
    Conflict(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Keys of the registry's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key<'a> {
    Election(&'a str),
    Votes(&'a str),
    Ballot(&'a str, &'a TokenId),
    Attendance(&'a IdentityKey),
    Participation(&'a IdentityKey),
}

impl<'a> Key<'a> {
    /// Prefix shared by every ballot of an election.
    ///
    /// Ids containing `_` can make prefixes of different elections overlap, so callers
    /// filter scanned ballots on their election id.
    pub fn ballot_prefix(election_id: &str) -> String {
        format!("BALLOT_{}_", election_id)
    }
}

impl<'a> fmt::Display for Key<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Key::Election(id) => write!(f, "ELECTION_{}", id),
            Key::Votes(id) => write!(f, "VOTES_{}", id),
            Key::Ballot(id, token) => write!(f, "{}{}", Key::ballot_prefix(id), token),
            Key::Attendance(identity) => write!(f, "ATTENDANCE_{}", identity),
            Key::Participation(identity) => write!(f, "PARTICIPATION_{}", identity),
        }
    }
}

/// A single write in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Write `value`, failing the whole batch if `key` is already present
    Insert { key: String, value: Vec<u8> },

    /// Write `value`, replacing anything present
    Put { key: String, value: Vec<u8> },

    /// Add to a big-endian u64 counter, starting from zero if absent
    Increment { key: String, by: u64 },
}

impl Write {
    pub fn key(&self) -> &str {
        match self {
            Write::Insert { key, .. } | Write::Put { key, .. } | Write::Increment { key, .. } => key,
        }
    }
}

/// Writes that commit together or not at all
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn insert<K: ToString>(mut self, key: K, value: Vec<u8>) -> Self {
        self.writes.push(Write::Insert {
            key: key.to_string(),
            value,
        });
        self
    }

    pub fn put<K: ToString>(mut self, key: K, value: Vec<u8>) -> Self {
        self.writes.push(Write::Put {
            key: key.to_string(),
            value,
        });
        self
    }

    pub fn increment<K: ToString>(mut self, key: K, by: u64) -> Self {
        self.writes.push(Write::Increment {
            key: key.to_string(),
            by,
        });
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Encode a counter value the way `Write::Increment` stores it
pub fn encode_counter(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_counter(bytes: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Backend(format!("counter has {} bytes, expected 8", bytes.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Key-value state with linearizable reads and atomic batched writes.
///
/// `commit` is the only way to write. Implementations must apply a batch as one unit:
/// either every write lands or, on any `Conflict`, none do.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Every key starting with `prefix`, in key order
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Write `value` only if `key` is absent, else `StoreError::Conflict`
    fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().insert(key, value))
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().put(key, value))
    }
}

/// A simple store that uses an in-memory BTreeMap behind a lock
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_owned())
}

impl Store for MemStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(poisoned)?;

        // Check everything before touching the map
        let mut counters: BTreeMap<&str, u64> = BTreeMap::new();
        for (i, write) in batch.writes.iter().enumerate() {
            match write {
                Write::Insert { key, .. } => {
                    let inserted_earlier = batch.writes[..i].iter().any(|w| w.key() == key.as_str());
                    if map.contains_key(key) || inserted_earlier {
                        return Err(StoreError::Conflict(key.clone()));
                    }
                }
                Write::Increment { key, by } => {
                    let current = match counters.get(key.as_str()) {
                        Some(value) => *value,
                        None => match map.get(key) {
                            Some(bytes) => decode_counter(bytes)?,
                            None => 0,
                        },
                    };
                    let next = current.checked_add(*by).ok_or_else(|| {
                        StoreError::Backend(format!("counter {} overflowed", key))
                    })?;
                    counters.insert(key.as_str(), next);
                }
                Write::Put { .. } => {}
            }
        }

        for write in batch.writes.iter() {
            match write {
                Write::Insert { key, value } | Write::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                Write::Increment { .. } => {}
            }
        }
        for (key, value) in counters {
            map.insert(key.to_owned(), encode_counter(value));
        }

        Ok(())
    }
}
