//! DashMap-based in-memory trust store.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{Error, Result};

use super::traits::{HostRecord, TrustStore};

/// In-process trust store.
///
/// Nothing survives the process; useful for tests and for tools that pin
/// host keys from their own configuration.
pub struct MemoryTrustStore {
    records: DashMap<(String, String), HostRecord>,
}

impl MemoryTrustStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Create a store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = HostRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store
                .records
                .entry((record.host.clone(), record.algorithm.clone()))
                .or_insert(record);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryTrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustStore for MemoryTrustStore {
    fn lookup(&self, host: &str, algorithm: &str) -> Result<Option<HostRecord>> {
        Ok(self
            .records
            .get(&(host.to_string(), algorithm.to_string()))
            .map(|entry| entry.value().clone()))
    }

    fn record(&self, record: HostRecord) -> Result<()> {
        match self
            .records
            .entry((record.host.clone(), record.algorithm.clone()))
        {
            Entry::Occupied(existing) if existing.get() == &record => Ok(()),
            Entry::Occupied(_) => Err(Error::TrustStore {
                path: "<memory>".to_string(),
                reason: format!(
                    "a different {} key is already recorded for {}",
                    record.algorithm, record.host
                ),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }
}
