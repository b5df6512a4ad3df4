use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use serde_yaml::Value as YamlValue;

use crate::core::{ExecutionResult, OperationParams, PipelineResult, RequestContext};

use super::PipelinePlugin;

const DEFAULT_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0,
];

// Total number of requests that reached execution
static REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "graphql_requests_total",
        "The total number of GraphQL requests since gqlpipe started"
    )
    .unwrap()
});

// Operations by outcome
static OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "graphql_operations_total",
        "GraphQL operations by outcome",
        &[
            "outcome", // ok | error
            "code",    // first error code, empty on success
        ]
    )
    .unwrap()
});

// Persisted query lookups
static PERSISTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "graphql_persisted_queries_total",
        "Persisted query lookups by result",
        &["result"]
    )
    .unwrap()
});

// Histogram for request latency, one sample per request
static LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "graphql_latency",
        "GraphQL request latency in milliseconds",
    )
    .buckets(DEFAULT_BUCKETS.to_vec());
    register_histogram_vec!(opts, &["batched"]).unwrap()
});

pub const PLUGIN_NAME: &str = "prometheus";

pub fn create_prometheus_plugin(_cfg: YamlValue) -> PipelineResult<Arc<dyn PipelinePlugin>> {
    Ok(Arc::new(PluginPrometheus {}))
}

/// Render every registered metric in the text exposition format
pub fn gather_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::error!("Failed to encode metrics: {e}");
    }
    buffer
}

pub struct PluginPrometheus;

#[async_trait]
impl PipelinePlugin for PluginPrometheus {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn before_execute(&self, _ctx: &RequestContext) {
        REQUESTS.inc();
    }

    async fn after_response(
        &self,
        ctx: &RequestContext,
        operation: &OperationParams,
        _raw: &ExecutionResult,
        result: &ExecutionResult,
    ) {
        let code = result
            .errors
            .first()
            .and_then(|e| e["extensions"]["code"].as_str())
            .unwrap_or_default();
        let outcome = if result.errors.is_empty() { "ok" } else { "error" };
        OPERATIONS.with_label_values(&[outcome, code]).inc();

        if operation.persisted {
            PERSISTED.with_label_values(&["hit"]).inc();
        } else if code == "PERSISTED_QUERY_NOT_FOUND" {
            PERSISTED.with_label_values(&["miss"]).inc();
        }

        // Last operation of the request closes it
        let is_last = ctx
            .operations
            .last()
            .is_some_and(|last| std::ptr::eq(last, operation));
        if !is_last {
            return;
        }

        let batched = if ctx.batched { "true" } else { "false" };
        LATENCY
            .with_label_values(&[batched])
            .observe(ctx.started_at().elapsed().as_millis() as f64);
    }
}
