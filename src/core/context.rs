//! Request context management
//!
//! `RequestContext` holds everything the pipeline knows about one logical
//! HTTP request. It is created at pipeline entry and dropped once the
//! response has been produced.

use std::{any::Any, collections::HashMap, fmt, time::Instant};

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{ambient::AmbientGuard, params::OperationParams, result::ExecutionResult};

/// Lifecycle states of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Created,
    Normalized,
    Resolved,
    Executed,
    Finalized,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self {
            PipelineState::Created => "created",
            PipelineState::Normalized => "normalized",
            PipelineState::Resolved => "resolved",
            PipelineState::Executed => "executed",
            PipelineState::Finalized => "finalized",
        };
        write!(f, "{}", state)
    }
}

/// Context that holds per-request state
pub struct RequestContext {
    id: String,
    started_at: Instant,
    state: PipelineState,

    /// Input as received, after before-normalize filters
    pub raw_input: JsonValue,

    /// Normalized operations, in submission order
    pub operations: Vec<OperationParams>,

    /// Results parallel to `operations`
    pub responses: Vec<ExecutionResult>,

    /// Whether the input was a batch
    pub batched: bool,

    /// Whether normalization rejected the input as a whole
    pub malformed: bool,

    ambient: Option<AmbientGuard>,

    /// Custom variables available to plugins
    vars: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    pub fn new(raw_input: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Instant::now(),
            state: PipelineState::Created,
            raw_input,
            operations: Vec::new(),
            responses: Vec::new(),
            batched: false,
            malformed: false,
            ambient: None,
            vars: HashMap::new(),
        }
    }

    /// Unique request id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: PipelineState) {
        log::debug!("Request {} {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    pub(crate) fn hold_ambient(&mut self, guard: AmbientGuard) {
        self.ambient = Some(guard);
    }

    /// Restore the captured ambient state, if any is still pending
    pub(crate) fn restore_ambient(&mut self) {
        if let Some(guard) = self.ambient.as_mut() {
            guard.restore();
        }
    }

    /// True while a captured snapshot has not been restored yet
    pub fn ambient_pending(&self) -> bool {
        self.ambient.as_ref().is_some_and(AmbientGuard::is_pending)
    }

    /// Store a typed value into the context
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.vars.insert(key.into(), Box::new(value));
    }

    /// Get a typed reference from the context
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.vars.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Get a string slice if the stored value is a `String`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get::<String>(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.vars.remove(key)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("operations", &self.operations.len())
            .field("batched", &self.batched)
            .field("malformed", &self.malformed)
            .finish()
    }
}
