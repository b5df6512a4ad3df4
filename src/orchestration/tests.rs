//! End-to-end request scenarios against a stub engine

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use serde_yaml::Value as YamlValue;

use super::*;
use crate::{
    core::{
        AmbientSnapshot, AmbientState, CurrentItem, Engine, ExecutionResult, OperationParams,
        PipelineError, PipelineResult, PipelineState, RequestContext, SchemaProvider,
    },
    plugin::{build_plugin, PipelinePlugin},
    store::{
        query_id, InsertOutcome, MemoryBackend, PersistedQueryRecord, PersistedQueryStore,
        QueryBackend,
    },
};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct StubProvider;

#[async_trait]
impl SchemaProvider for StubProvider {
    type Schema = ();
    type Context = String;

    async fn schema(&self) -> PipelineResult<Arc<()>> {
        Ok(Arc::new(()))
    }

    fn context(&self, request: &RequestContext) -> String {
        request.id().to_string()
    }
}

/// Answers `{__typename}`, fails `{fail}`, returns nothing for `{empty}`,
/// hangs on `{slow}` and echoes anything else. Clobbers the ambient slot
/// the way a nested execution would.
struct StubEngine {
    ambient: Arc<CurrentItem<String>>,
    calls: AtomicUsize,
}

#[async_trait]
impl Engine for StubEngine {
    type Schema = ();
    type Context = String;

    async fn execute(
        &self,
        _schema: &(),
        query: &str,
        _context: &String,
        variables: Option<&JsonMap<String, JsonValue>>,
        _operation_name: Option<&str>,
    ) -> PipelineResult<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ambient.replace(Some("inner".to_string()));

        match query {
            "{__typename}" => Ok(ExecutionResult::from_data(json!({ "__typename": "Query" }))),
            "{fail}" => Err(PipelineError::Execution("resolver exploded".to_string())),
            "{empty}" => Ok(ExecutionResult::default()),
            "{slow}" => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(ExecutionResult::default())
            }
            _ => Ok(ExecutionResult::from_data(json!({
                "echo": query,
                "variables": variables.cloned(),
            }))),
        }
    }
}

struct BrokenAmbient;

impl AmbientState for BrokenAmbient {
    fn capture(&self) -> PipelineResult<AmbientSnapshot> {
        Err(PipelineError::Internal("snapshot unavailable".to_string()))
    }

    fn restore(&self, _snapshot: AmbientSnapshot) {}
}

struct Fixture {
    engine: Arc<StubEngine>,
    ambient: Arc<CurrentItem<String>>,
    backend: Arc<MemoryBackend>,
}

fn setup(configure: impl FnOnce(PipelineBuilder) -> PipelineBuilder) -> (Fixture, RequestPipeline) {
    init_log();
    let ambient = Arc::new(CurrentItem::new(Some("outer".to_string())));
    let engine = Arc::new(StubEngine {
        ambient: ambient.clone(),
        calls: AtomicUsize::new(0),
    });
    let backend = Arc::new(MemoryBackend::new());

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(StubProvider), engine.clone()));
    let builder = RequestPipeline::builder(dispatcher)
        .store(Arc::new(PersistedQueryStore::new(backend.clone())))
        .ambient(ambient.clone());
    let pipeline = configure(builder).build();

    (
        Fixture {
            engine,
            ambient,
            backend,
        },
        pipeline,
    )
}

fn ambient_value(fixture: &Fixture) -> Option<String> {
    fixture.ambient.get().map(|v| v.as_str().to_string())
}

#[tokio::test]
async fn test_typename_query() {
    let (fixture, pipeline) = setup(|b| b);
    let response = pipeline
        .execute(json!({ "query": "{__typename}" }), RequestDeadline::none())
        .await
        .unwrap();

    assert!(!response.batched);
    assert_eq!(response.to_json(), json!({ "data": { "__typename": "Query" } }));
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_persisted_query_miss_skips_engine() {
    let (fixture, pipeline) = setup(|b| b);
    let raw = json!({
        "extensions": { "persistedQuery": { "version": 1, "sha256Hash": "abc123" } }
    });
    let response = pipeline.execute(raw, RequestDeadline::none()).await.unwrap();

    assert_eq!(
        response.to_json(),
        json!({
            "errors": [{
                "message": "PersistedQueryNotFound",
                "extensions": { "code": "PERSISTED_QUERY_NOT_FOUND" }
            }]
        })
    );
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_persisted_query_registration_then_hit() {
    let (fixture, pipeline) = setup(|b| b);
    let query = "query Posts { posts { id } }";
    let hash = query_id(query);
    let extensions = json!({ "persistedQuery": { "version": 1, "sha256Hash": hash } });

    let register = json!({ "query": query, "operationName": "Posts", "extensions": extensions });
    let response = pipeline.execute(register, RequestDeadline::none()).await.unwrap();
    assert!(response.results[0].errors.is_empty());
    assert_eq!(fixture.backend.list_ids(), vec![hash.clone()]);

    let hit = json!({ "extensions": extensions, "variables": { "first": 2 } });
    let response = pipeline.execute(hit, RequestDeadline::none()).await.unwrap();
    let data = response.results[0].data.as_ref().unwrap();
    assert_eq!(data["echo"], json!(query));
    assert_eq!(data["variables"], json!({ "first": 2 }));
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_anonymous_registration_is_not_persisted() {
    let (fixture, pipeline) = setup(|b| b);
    let query = "{ posts { id } }";
    let raw = json!({
        "query": query,
        "extensions": { "persistedQuery": { "version": 1, "sha256Hash": query_id(query) } }
    });

    let response = pipeline.execute(raw, RequestDeadline::none()).await.unwrap();
    assert!(response.results[0].errors.is_empty());
    assert!(fixture.backend.is_empty());
}

#[tokio::test]
async fn test_persist_all() {
    let (fixture, pipeline) = setup(|b| b.persist_all(true));
    let raw = json!({ "query": "query Me { me }", "operationName": "Me" });

    pipeline.execute(raw, RequestDeadline::none()).await.unwrap();
    assert_eq!(fixture.backend.list_ids(), vec![query_id("query Me { me }")]);
}

#[tokio::test]
async fn test_batch_with_one_failure() {
    let (fixture, pipeline) = setup(|b| b);
    let raw = json!([{ "query": "{fail}" }, { "query": "{__typename}" }]);
    let response = pipeline.execute(raw, RequestDeadline::none()).await.unwrap();

    let body = response.to_json();
    let results = body.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["errors"][0]["extensions"]["code"], json!("INTERNAL_SERVER_ERROR"));
    assert_eq!(results[0]["errors"][0]["message"], json!("Internal server error"));
    assert_eq!(results[1], json!({ "data": { "__typename": "Query" } }));
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_batch_keeps_slots_around_unresolved_operations() {
    let (fixture, pipeline) = setup(|b| b);
    let raw = json!([
        { "query": "{a}" },
        { "queryId": "missing" },
        17,
        { "operationName": "NoQuery" },
        { "query": "{b}" }
    ]);
    let response = pipeline.execute(raw, RequestDeadline::none()).await.unwrap();

    assert!(response.batched);
    assert_eq!(response.results.len(), 5);
    assert_eq!(response.results[0].data.as_ref().unwrap()["echo"], json!("{a}"));
    assert!(response.results[1].has_error_code("PERSISTED_QUERY_NOT_FOUND"));
    assert!(response.results[2].has_error_code("BAD_REQUEST"));
    assert!(response.results[3].has_error_code("BAD_REQUEST"));
    assert_eq!(response.results[4].data.as_ref().unwrap()["echo"], json!("{b}"));
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_ambient_state_is_restored() {
    let (fixture, pipeline) = setup(|b| b);

    pipeline
        .execute(json!({ "query": "{__typename}" }), RequestDeadline::none())
        .await
        .unwrap();
    assert_eq!(ambient_value(&fixture).as_deref(), Some("outer"));

    pipeline
        .execute(json!({ "query": "{fail}" }), RequestDeadline::none())
        .await
        .unwrap();
    assert_eq!(ambient_value(&fixture).as_deref(), Some("outer"));
}

#[tokio::test]
async fn test_failed_ambient_capture_is_fatal() {
    let (fixture, pipeline) = setup(|b| b.ambient(Arc::new(BrokenAmbient)));
    let err = pipeline
        .execute(json!({ "query": "{__typename}" }), RequestDeadline::none())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::AmbientState(_)));
    assert!(err.is_fatal());
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_request() {
    let (fixture, pipeline) = setup(|b| b);
    let response = pipeline
        .execute(json!("query { a }"), RequestDeadline::none())
        .await
        .unwrap();

    assert!(response.malformed);
    let body = response.to_json();
    assert!(body.is_object());
    assert_eq!(body["errors"][0]["extensions"]["code"], json!("BAD_REQUEST"));
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(ambient_value(&fixture).as_deref(), Some("outer"));
}

#[tokio::test]
async fn test_oversized_batch_is_malformed() {
    let (_, pipeline) = setup(|b| b.normalizer(ParamNormalizer::new(true, 2)));
    let raw = json!([{ "query": "{a}" }, { "query": "{b}" }, { "query": "{c}" }]);
    let response = pipeline.execute(raw, RequestDeadline::none()).await.unwrap();
    assert!(response.malformed);
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn test_timeout() {
    let (fixture, pipeline) = setup(|b| b);
    let raw = json!([{ "query": "{slow}" }, { "query": "{__typename}" }]);
    let response = pipeline
        .execute(raw, RequestDeadline::after(Duration::from_millis(100)))
        .await
        .unwrap();

    assert!(response.results[0].has_error_code("TIMEOUT"));
    assert!(response.results[1].errors.is_empty());
    assert_eq!(ambient_value(&fixture).as_deref(), Some("outer"));
}

/// Backend whose reads or writes hang past any reasonable deadline
struct HangingBackend {
    hang_get: bool,
    hang_insert: bool,
}

#[async_trait]
impl QueryBackend for HangingBackend {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn get(&self, _id: &str) -> PipelineResult<Option<PersistedQueryRecord>> {
        if self.hang_get {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        Ok(None)
    }

    async fn insert_if_absent(&self, _record: PersistedQueryRecord) -> PipelineResult<InsertOutcome> {
        if self.hang_insert {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        Ok(InsertOutcome::Inserted)
    }
}

fn hanging_store(hang_get: bool, hang_insert: bool) -> Arc<PersistedQueryStore> {
    Arc::new(PersistedQueryStore::new(Arc::new(HangingBackend {
        hang_get,
        hang_insert,
    })))
}

#[tokio::test]
async fn test_slow_store_lookup_times_out_its_slot() {
    let (fixture, pipeline) = setup(|b| b.store(hanging_store(true, false)));
    let raw = json!([{ "queryId": "x" }, { "query": "{__typename}" }]);
    let response = pipeline
        .execute(raw, RequestDeadline::after(Duration::from_millis(100)))
        .await
        .unwrap();

    assert_eq!(response.results.len(), 2);
    assert!(response.results[0].has_error_code("TIMEOUT"));
    assert_eq!(
        response.results[1].data,
        Some(json!({ "__typename": "Query" }))
    );
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ambient_value(&fixture).as_deref(), Some("outer"));
}

#[tokio::test]
async fn test_slow_registration_still_executes() {
    let (fixture, pipeline) = setup(|b| b.store(hanging_store(false, true)));
    let query = "{__typename}";
    let raw = json!({
        "query": query,
        "operationName": "Typename",
        "extensions": { "persistedQuery": { "version": 1, "sha256Hash": query_id(query) } }
    });
    let response = pipeline
        .execute(raw, RequestDeadline::after(Duration::from_millis(100)))
        .await
        .unwrap();

    assert!(response.results[0].errors.is_empty());
    assert_eq!(
        response.results[0].data,
        Some(json!({ "__typename": "Query" }))
    );
    assert_eq!(fixture.engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ambient_value(&fixture).as_deref(), Some("outer"));
}

#[tokio::test]
async fn test_empty_result_is_normalized() {
    let (_, pipeline) = setup(|b| b);
    let response = pipeline
        .execute(json!({ "query": "{empty}" }), RequestDeadline::none())
        .await
        .unwrap();
    assert_eq!(
        response.to_json(),
        json!({ "errors": ["The GraphQL request returned an invalid response"] })
    );
}

/// Rewrites results and records what observers are handed
#[derive(Default)]
struct RecordingPlugin {
    seen: Mutex<Vec<(JsonValue, JsonValue, PipelineState, bool)>>,
    resolved: AtomicUsize,
}

#[async_trait]
impl PipelinePlugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recording"
    }

    async fn before_normalize(&self, _ctx: &RequestContext, raw: &mut JsonValue) {
        if raw.get("query").is_none() {
            raw["query"] = json!("{__typename}");
        }
    }

    async fn after_resolve(&self, _ctx: &RequestContext, _operation: &OperationParams) {
        self.resolved.fetch_add(1, Ordering::SeqCst);
    }

    async fn after_execute(
        &self,
        _ctx: &RequestContext,
        _operation: &OperationParams,
        _raw: &ExecutionResult,
        result: &mut ExecutionResult,
    ) {
        result.data = Some(json!({ "filtered": true }));
    }

    async fn after_response(
        &self,
        ctx: &RequestContext,
        _operation: &OperationParams,
        raw: &ExecutionResult,
        result: &ExecutionResult,
    ) {
        self.seen.lock().unwrap().push((
            raw.data.clone().unwrap_or_default(),
            result.data.clone().unwrap_or_default(),
            ctx.state(),
            ctx.ambient_pending(),
        ));
    }
}

#[tokio::test]
async fn test_plugin_hooks() {
    let recording = Arc::new(RecordingPlugin::default());
    let extensions = build_plugin(
        "result-extensions",
        serde_yaml::from_str::<YamlValue>("extensions: { served_by: gqlpipe }").unwrap(),
    )
    .unwrap();
    let (_, pipeline) = setup(|b| b.plugin(recording.clone()).plugin(extensions));

    let response = pipeline
        .execute(json!({ "operationName": "Anything" }), RequestDeadline::none())
        .await
        .unwrap();

    assert_eq!(
        response.to_json(),
        json!({ "data": { "filtered": true }, "extensions": { "served_by": "gqlpipe" } })
    );
    assert_eq!(recording.resolved.load(Ordering::SeqCst), 1);

    let seen = recording.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (raw, filtered, state, ambient_pending) = &seen[0];
    assert_eq!(raw, &json!({ "__typename": "Query" }));
    assert_eq!(filtered, &json!({ "filtered": true }));
    assert_eq!(*state, PipelineState::Finalized);
    assert!(!ambient_pending);
}
