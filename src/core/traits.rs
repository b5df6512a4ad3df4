//! Collaborator contracts for the pipeline
//!
//! The schema, its resolvers and the execution engine live outside this
//! crate. These traits are the narrow seams through which they are reached.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{
    ambient::AmbientSnapshot,
    context::RequestContext,
    error::PipelineResult,
    params::OperationParams,
    result::ExecutionResult,
};
use crate::orchestration::deadline::RequestDeadline;

/// Supplies the executable schema and a per-request resolution context
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    type Schema: Send + Sync + 'static;
    type Context: Send + Sync + 'static;

    /// Get the executable schema
    async fn schema(&self) -> PipelineResult<Arc<Self::Schema>>;

    /// Build the resolution context shared by every operation of one request
    fn context(&self, request: &RequestContext) -> Self::Context;
}

/// External GraphQL execution engine
#[async_trait]
pub trait Engine: Send + Sync {
    type Schema: Send + Sync + 'static;
    type Context: Send + Sync + 'static;

    /// Execute one operation. An `Err` is wrapped into the operation's
    /// `errors` array and never escapes the pipeline.
    async fn execute(
        &self,
        schema: &Self::Schema,
        query: &str,
        context: &Self::Context,
        variables: Option<&JsonMap<String, JsonValue>>,
        operation_name: Option<&str>,
    ) -> PipelineResult<ExecutionResult>;
}

/// Runs a request's resolved operations and returns results in the same order
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        request: &RequestContext,
        operations: &[&OperationParams],
        deadline: &RequestDeadline,
    ) -> Vec<ExecutionResult>;
}

/// State external to the request that must survive a nested execution
pub trait AmbientState: Send + Sync {
    /// Take a snapshot before execution starts
    fn capture(&self) -> PipelineResult<AmbientSnapshot>;

    /// Put a snapshot back verbatim
    fn restore(&self, snapshot: AmbientSnapshot);
}
