//! Request lifecycle
//!
//! `Created -> Normalized -> Resolved -> Executed -> Finalized`. Each step
//! runs exactly once per request; malformed input jumps from `Created`
//! straight to `Finalized`.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value as JsonValue;

use super::{deadline::RequestDeadline, normalizer::ParamNormalizer};
use crate::{
    config::Config,
    core::{
        AmbientGuard, AmbientState, ExecutionResult, NoAmbientState, OperationDispatcher,
        OperationParams, PipelineError, PipelineResponse, PipelineResult, PipelineState,
        QuerySource, RequestContext,
    },
    plugin::{PipelinePlugin, PluginExecutor},
    store::{query_id, PersistedQueryStore},
};

const MISSING_QUERY_MESSAGE: &str =
    "GraphQL Request must include at least one of those two parameters: \"query\" or \"queryId\"";

/// Drives one logical GraphQL request from raw input to response
pub struct RequestPipeline {
    normalizer: ParamNormalizer,
    store: Arc<PersistedQueryStore>,
    dispatcher: Arc<dyn OperationDispatcher>,
    ambient: Arc<dyn AmbientState>,
    plugins: PluginExecutor,
    persist_all: bool,
    debug: bool,
}

pub struct PipelineBuilder {
    normalizer: ParamNormalizer,
    store: Arc<PersistedQueryStore>,
    dispatcher: Arc<dyn OperationDispatcher>,
    ambient: Arc<dyn AmbientState>,
    plugins: PluginExecutor,
    persist_all: bool,
    debug: bool,
}

impl PipelineBuilder {
    pub fn new(dispatcher: Arc<dyn OperationDispatcher>) -> Self {
        Self {
            normalizer: ParamNormalizer::default(),
            store: Arc::new(PersistedQueryStore::disabled()),
            dispatcher,
            ambient: Arc::new(NoAmbientState),
            plugins: PluginExecutor::default(),
            persist_all: false,
            debug: false,
        }
    }

    /// Wire normalizer limits, the persisted query store and the plugin
    /// chain as configured
    pub fn from_config(
        config: &Config,
        dispatcher: Arc<dyn OperationDispatcher>,
    ) -> PipelineResult<Self> {
        let store = PersistedQueryStore::from_config(&config.persisted_queries)?;
        Ok(Self {
            normalizer: ParamNormalizer::from_config(&config.execution),
            store: Arc::new(store),
            plugins: PluginExecutor::from_specs(&config.plugins)?,
            persist_all: config.persisted_queries.persist_all,
            debug: config.graphql.debug,
            ..Self::new(dispatcher)
        })
    }

    pub fn normalizer(mut self, normalizer: ParamNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn store(mut self, store: Arc<PersistedQueryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn ambient(mut self, ambient: Arc<dyn AmbientState>) -> Self {
        self.ambient = ambient;
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn PipelinePlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn persist_all(mut self, persist_all: bool) -> Self {
        self.persist_all = persist_all;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self) -> RequestPipeline {
        RequestPipeline {
            normalizer: self.normalizer,
            store: self.store,
            dispatcher: self.dispatcher,
            ambient: self.ambient,
            plugins: self.plugins,
            persist_all: self.persist_all,
            debug: self.debug,
        }
    }
}

impl RequestPipeline {
    pub fn builder(dispatcher: Arc<dyn OperationDispatcher>) -> PipelineBuilder {
        PipelineBuilder::new(dispatcher)
    }

    pub fn store(&self) -> &Arc<PersistedQueryStore> {
        &self.store
    }

    /// Run a request end to end.
    ///
    /// Only a failed ambient capture is returned as `Err`. Malformed input
    /// produces a response flagged `malformed`; every other failure is
    /// scoped to one operation's `errors`.
    pub async fn execute(
        &self,
        raw: JsonValue,
        deadline: RequestDeadline,
    ) -> PipelineResult<PipelineResponse> {
        let guard = AmbientGuard::capture(self.ambient.clone()).map_err(|e| match e {
            PipelineError::AmbientState(_) => e,
            other => PipelineError::AmbientState(other.to_string()),
        })?;

        let mut ctx = RequestContext::new(JsonValue::Null);
        ctx.hold_ambient(guard);

        let mut raw = raw;
        self.plugins.before_normalize(&ctx, &mut raw).await;
        ctx.raw_input = raw;

        if let Err(e) = self.normalize(&mut ctx) {
            warn!("Request {} is malformed: {e}", ctx.id());
            ctx.malformed = true;
            ctx.operations = vec![OperationParams::invalid(e.to_string())];
            ctx.responses = vec![ExecutionResult::from_error(&e, self.debug)];
            return Ok(self.finalize(ctx).await);
        }

        let mut slots = self.resolve(&mut ctx, &deadline).await;
        self.dispatch(&mut ctx, &mut slots, &deadline).await;

        Ok(self.finalize(ctx).await)
    }

    fn normalize(&self, ctx: &mut RequestContext) -> PipelineResult<()> {
        ctx.operations = self.normalizer.normalize(&ctx.raw_input)?;
        ctx.batched = ctx.raw_input.is_array();
        ctx.advance(PipelineState::Normalized);
        Ok(())
    }

    /// Settle the query text of every operation.
    ///
    /// Returns one slot per operation: `Some` when the operation already has
    /// its final (error) result, `None` when it still has to run.
    async fn resolve(
        &self,
        ctx: &mut RequestContext,
        deadline: &RequestDeadline,
    ) -> Vec<Option<ExecutionResult>> {
        let mut slots = Vec::with_capacity(ctx.operations.len());

        for operation in ctx.operations.iter_mut() {
            slots.push(self.resolve_one(operation, deadline).await);
        }
        ctx.advance(PipelineState::Resolved);

        for (operation, slot) in ctx.operations.iter().zip(&slots) {
            if slot.is_none() {
                self.plugins.after_resolve(ctx, operation).await;
            }
        }

        slots
    }

    async fn resolve_one(
        &self,
        operation: &mut OperationParams,
        deadline: &RequestDeadline,
    ) -> Option<ExecutionResult> {
        if let Some(msg) = &operation.error {
            let e = PipelineError::MalformedInput(msg.clone());
            return Some(ExecutionResult::from_error(&e, self.debug));
        }

        let id = match operation.source() {
            QuerySource::Inline(query) => {
                self.persist_inline(operation, query, deadline).await;
                return None;
            }
            QuerySource::Persisted(id) => id.to_string(),
            QuerySource::Missing => {
                let e = PipelineError::MalformedInput(MISSING_QUERY_MESSAGE.to_string());
                return Some(ExecutionResult::from_error(&e, self.debug));
            }
        };

        match deadline
            .run("loading a persisted query", self.store.load(&id))
            .await
        {
            Ok(Some(query)) => {
                debug!("Resolved persisted query {id}");
                operation.query = Some(query);
                operation.persisted = true;
                None
            }
            Ok(None) => Some(ExecutionResult::from_error(
                &PipelineError::PersistedQueryNotFound(id),
                self.debug,
            )),
            Err(e) => Some(ExecutionResult::from_error(&e, self.debug)),
        }
    }

    /// Save an inline query when it is an APQ registration or every query
    /// is persisted. A failed save never affects the operation.
    async fn persist_inline(
        &self,
        operation: &OperationParams,
        query: &str,
        deadline: &RequestDeadline,
    ) {
        let hash = operation.persisted_query_hash();
        if hash.is_none() && !self.persist_all {
            return;
        }
        if let Some(hash) = hash {
            if hash != query_id(query) {
                warn!("APQ hash {hash} does not match the query it was sent with");
            }
        }

        if let Err(e) = deadline
            .run("persisting a query", self.store.save(query, operation.label()))
            .await
        {
            warn!("Skipped persisting query: {e}");
        }
    }

    /// Run the still-open slots and fill them in, keeping positions
    async fn dispatch(
        &self,
        ctx: &mut RequestContext,
        slots: &mut [Option<ExecutionResult>],
        deadline: &RequestDeadline,
    ) {
        self.plugins.before_execute(ctx).await;

        let pending: Vec<usize> = (0..slots.len()).filter(|&i| slots[i].is_none()).collect();
        if !pending.is_empty() {
            let operations: Vec<&OperationParams> =
                pending.iter().map(|&i| &ctx.operations[i]).collect();
            let results = self.dispatcher.dispatch(ctx, &operations, deadline).await;
            if results.len() != pending.len() {
                warn!(
                    "Dispatcher returned {} results for {} operations",
                    results.len(),
                    pending.len()
                );
            }
            for (i, result) in pending.into_iter().zip(results) {
                slots[i] = Some(result);
            }
        }

        ctx.responses = slots
            .iter_mut()
            .map(|slot| {
                slot.take().unwrap_or_else(|| {
                    ExecutionResult::from_error(
                        &crate::internal_error!("operation produced no result"),
                        self.debug,
                    )
                })
            })
            .collect();
        ctx.advance(PipelineState::Executed);
    }

    /// Filter and normalize results, restore ambient state, notify observers
    async fn finalize(&self, mut ctx: RequestContext) -> PipelineResponse {
        let raw_results = std::mem::take(&mut ctx.responses);

        let mut results = Vec::with_capacity(raw_results.len());
        for (operation, raw) in ctx.operations.iter().zip(&raw_results) {
            let mut result = raw.clone();
            self.plugins.after_execute(&ctx, operation, raw, &mut result).await;
            result.normalize();
            results.push(result);
        }

        ctx.restore_ambient();
        ctx.advance(PipelineState::Finalized);

        for ((operation, raw), result) in ctx.operations.iter().zip(&raw_results).zip(&results) {
            self.plugins.after_response(&ctx, operation, raw, result).await;
        }

        PipelineResponse {
            results,
            batched: ctx.batched,
            malformed: ctx.malformed,
        }
    }
}
