//! Operation dispatch against the external engine

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use async_trait::async_trait;
use futures::{stream, FutureExt, StreamExt};
use log::{error, warn};
use serde_json::json;

use super::deadline::RequestDeadline;
use crate::{
    config::{ExecutionConfig, GraphQL},
    core::{
        Engine, ExecutionResult, OperationDispatcher, OperationParams, PipelineError,
        RequestContext, SchemaProvider,
    },
};

/// Builds the executable unit once per request and runs every resolved
/// operation of the request against the engine.
pub struct Dispatcher<P, E> {
    provider: Arc<P>,
    engine: Arc<E>,
    debug: bool,
    max_concurrency: usize,
}

impl<P, E> Dispatcher<P, E>
where
    P: SchemaProvider,
    E: Engine<Schema = P::Schema, Context = P::Context>,
{
    pub fn new(provider: Arc<P>, engine: Arc<E>) -> Self {
        Self {
            provider,
            engine,
            debug: false,
            max_concurrency: 4,
        }
    }

    pub fn from_config(
        provider: Arc<P>,
        engine: Arc<E>,
        graphql: &GraphQL,
        execution: &ExecutionConfig,
    ) -> Self {
        Self::new(provider, engine)
            .with_debug(graphql.debug)
            .with_max_concurrency(execution.max_concurrency)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    async fn execute_one(
        &self,
        schema: &P::Schema,
        context: &P::Context,
        operation: &OperationParams,
        deadline: &RequestDeadline,
    ) -> ExecutionResult {
        let Some(query) = operation.query.as_deref() else {
            return ExecutionResult::from_error(
                &crate::internal_error!("operation dispatched without a query"),
                self.debug,
            );
        };

        let started = Instant::now();
        let execution = AssertUnwindSafe(self.engine.execute(
            schema,
            query,
            context,
            operation.variables.as_ref(),
            operation.operation_name.as_deref(),
        ))
        .catch_unwind();

        let mut result = match deadline.run("executing the operation", execution).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!("Operation '{}' failed: {e}", operation.label());
                ExecutionResult::from_error(&e, self.debug)
            }
            Ok(Err(panic)) => {
                let e = PipelineError::Execution(panic_message(panic));
                error!("Engine panicked on operation '{}': {e}", operation.label());
                ExecutionResult::from_error(&e, self.debug)
            }
            Err(e) => ExecutionResult::from_error(&e, self.debug),
        };

        if self.debug {
            result.extensions.insert(
                "tracing".to_string(),
                json!({
                    "operationName": operation.operation_name,
                    "durationMs": started.elapsed().as_secs_f64() * 1000.0,
                }),
            );
        }

        result
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "engine panicked".to_string()
    }
}

#[async_trait]
impl<P, E> OperationDispatcher for Dispatcher<P, E>
where
    P: SchemaProvider + 'static,
    E: Engine<Schema = P::Schema, Context = P::Context> + 'static,
{
    async fn dispatch(
        &self,
        request: &RequestContext,
        operations: &[&OperationParams],
        deadline: &RequestDeadline,
    ) -> Vec<ExecutionResult> {
        if operations.is_empty() {
            return Vec::new();
        }

        let schema = match deadline.run("loading the schema", self.provider.schema()).await {
            Ok(Ok(schema)) => schema,
            Ok(Err(e)) | Err(e) => {
                error!("Request {} could not obtain a schema: {e}", request.id());
                let failed = ExecutionResult::from_error(&e, self.debug);
                return vec![failed; operations.len()];
            }
        };
        let context = self.provider.context(request);

        stream::iter(operations.iter().copied())
            .map(|operation| self.execute_one(&schema, &context, operation, deadline))
            .buffered(self.max_concurrency)
            .collect()
            .await
    }
}
