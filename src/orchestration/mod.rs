//! Request orchestration layer
//!
//! Normalization, persisted query resolution, dispatch and the lifecycle
//! that ties them together.

pub mod deadline;
pub mod dispatcher;
pub mod normalizer;
pub mod pipeline;

#[cfg(test)]
mod tests;

pub use deadline::RequestDeadline;
pub use dispatcher::Dispatcher;
pub use normalizer::ParamNormalizer;
pub use pipeline::{PipelineBuilder, RequestPipeline};
