//! GraphQL-over-HTTP request pipeline.
//!
//! Normalizes single and batched GraphQL requests, resolves automatic
//! persisted queries, dispatches operations to an external engine and runs
//! plugin hooks around every step, served over pingora.

pub mod config;
pub mod core;
pub mod logging;
pub mod orchestration;
pub mod plugin;
pub mod service;
pub mod store;
pub(crate) mod utils;

pub use crate::core::{
    Engine, ExecutionResult, OperationParams, PipelineError, PipelineResponse, PipelineResult,
    SchemaProvider,
};
pub use orchestration::{Dispatcher, PipelineBuilder, RequestDeadline, RequestPipeline};
pub use store::PersistedQueryStore;
