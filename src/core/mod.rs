//! Core abstractions and data types of the pipeline
//!
//! This module provides the request context, operation parameters, results,
//! errors and the collaborator traits every other module builds on.

pub mod ambient;
pub mod context;
pub mod error;
pub mod params;
pub mod result;
pub mod traits;

// Re-export commonly used types
pub use ambient::{AmbientGuard, AmbientSnapshot, CurrentItem, NoAmbientState};
pub use context::{PipelineState, RequestContext};
pub use error::{ErrorContext, PipelineError, PipelineResult, PERSISTED_QUERY_NOT_FOUND};
pub use params::{OperationParams, QuerySource};
pub use result::{ExecutionResult, PipelineResponse, INVALID_RESPONSE_MESSAGE};
pub use traits::*;
