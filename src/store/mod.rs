//! Persisted query store
//!
//! Content-addressable mapping from a query's SHA-256 hash to its text.
//! Records are create-only: once a hash is stored it never changes.
//! Overrides registered on the store are consulted before the default
//! backend, which lets embedders bring their own persistence.

pub mod etcd;
pub mod memory;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::{PersistedQueryBackend, PersistedQueryConfig},
    core::PipelineResult,
};

pub use etcd::EtcdBackend;
pub use memory::MemoryBackend;

/// A stored query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedQueryRecord {
    pub id: String,
    pub query_text: String,
    /// Human identifier, typically the operation name
    pub label: String,
    /// Unix seconds
    pub created_at: u64,
}

impl PersistedQueryRecord {
    pub fn new(query_text: impl Into<String>, label: impl Into<String>) -> Self {
        let query_text = query_text.into();
        Self {
            id: query_id(&query_text),
            query_text,
            label: label.into(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }
}

/// Lowercase hex SHA-256 of the query text
pub fn query_id(query_text: &str) -> String {
    format!("{:x}", Sha256::digest(query_text.as_bytes()))
}

/// Outcome of a create-if-absent write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Existing(PersistedQueryRecord),
}

/// Default backing store for persisted queries
#[async_trait]
pub trait QueryBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, id: &str) -> PipelineResult<Option<PersistedQueryRecord>>;

    /// Write the record unless one with the same id exists. Must be atomic.
    async fn insert_if_absent(&self, record: PersistedQueryRecord) -> PipelineResult<InsertOutcome>;
}

/// Hook point letting embedders supply persisted queries from elsewhere
#[async_trait]
pub trait PersistedQueryOverride: Send + Sync {
    fn name(&self) -> &str;

    /// Return the query text for `id`, or `None` to fall through
    async fn load(&self, id: &str) -> Option<String>;

    /// Observe a query that is about to be saved
    async fn saving(&self, _query_text: &str, _id: &str, _label: &str) {}
}

/// Persisted query lookup and registration
pub struct PersistedQueryStore {
    enabled: bool,
    require_operation_name: bool,
    backend: Arc<dyn QueryBackend>,
    overrides: Vec<Arc<dyn PersistedQueryOverride>>,
}

impl PersistedQueryStore {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            enabled: true,
            require_operation_name: true,
            backend,
            overrides: Vec::new(),
        }
    }

    /// A store whose default backend is switched off; only overrides answer
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Arc::new(MemoryBackend::new()))
        }
    }

    /// Build the store described by the configuration
    pub fn from_config(config: &PersistedQueryConfig) -> PipelineResult<Self> {
        let backend: Arc<dyn QueryBackend> = match config.backend {
            PersistedQueryBackend::Memory => Arc::new(MemoryBackend::new()),
            PersistedQueryBackend::Etcd => {
                let etcd = config
                    .etcd
                    .clone()
                    .ok_or_else(|| crate::config_error!("etcd backend selected without etcd settings"))?;
                Arc::new(EtcdBackend::new(etcd))
            }
        };

        Ok(Self {
            enabled: config.enabled,
            require_operation_name: config.require_operation_name,
            backend,
            overrides: Vec::new(),
        })
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_require_operation_name(mut self, required: bool) -> Self {
        self.require_operation_name = required;
        self
    }

    /// Register an override; overrides are consulted in registration order
    pub fn with_override(mut self, hook: Arc<dyn PersistedQueryOverride>) -> Self {
        self.overrides.push(hook);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether anything can answer a lookup
    pub fn is_active(&self) -> bool {
        self.enabled || !self.overrides.is_empty()
    }

    pub fn backend(&self) -> &Arc<dyn QueryBackend> {
        &self.backend
    }

    /// Look up query text by id.
    ///
    /// Overrides answer first; the default backend is only asked when the
    /// store is enabled. Backend failures degrade to a miss.
    pub async fn load(&self, id: &str) -> Option<String> {
        for hook in &self.overrides {
            if let Some(query) = hook.load(id).await {
                debug!("Persisted query {id} supplied by override {}", hook.name());
                return Some(query);
            }
        }

        if !self.enabled {
            return None;
        }

        match self.backend.get(id).await {
            Ok(record) => record.map(|r| r.query_text),
            Err(e) => {
                warn!("Persisted query lookup on {} failed: {e}", self.backend.name());
                None
            }
        }
    }

    /// Persist `query_text` under its hash and return the id.
    ///
    /// Returns `None` for empty queries, for unlabelled queries when a label
    /// is required, when the store is disabled, or when the backend fails.
    /// An id that already resolves is returned without writing.
    pub async fn save(&self, query_text: &str, label: &str) -> Option<String> {
        if query_text.is_empty() {
            return None;
        }
        if label.is_empty() && self.require_operation_name {
            return None;
        }

        let id = query_id(query_text);
        for hook in &self.overrides {
            hook.saving(query_text, &id, label).await;
        }

        if self.load(&id).await.is_some() {
            return Some(id);
        }

        if !self.enabled {
            return None;
        }

        let label = if label.is_empty() { id.as_str() } else { label };
        match self
            .backend
            .insert_if_absent(PersistedQueryRecord::new(query_text, label))
            .await
        {
            Ok(InsertOutcome::Inserted) => {
                debug!("Persisted query {id} ({label})");
                Some(id)
            }
            Ok(InsertOutcome::Existing(_)) => Some(id),
            Err(e) => {
                warn!("Persisting query {id} on {} failed: {e}", self.backend.name());
                None
            }
        }
    }
}
