//! In-memory persisted query backend

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use log::debug;

use super::{InsertOutcome, PersistedQueryRecord, QueryBackend};
use crate::core::PipelineResult;

/// Process-local record store keyed by query hash.
///
/// The shard lock held by the entry API makes create-if-absent atomic.
#[derive(Default)]
pub struct MemoryBackend {
    records: DashMap<String, PersistedQueryRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get all stored ids
    pub fn list_ids(&self) -> Vec<String> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[async_trait]
impl QueryBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &str) -> PipelineResult<Option<PersistedQueryRecord>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn insert_if_absent(&self, record: PersistedQueryRecord) -> PipelineResult<InsertOutcome> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(entry) => Ok(InsertOutcome::Existing(entry.get().clone())),
            Entry::Vacant(entry) => {
                debug!("Inserting persisted query with ID: {}", record.id);
                entry.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }
}
