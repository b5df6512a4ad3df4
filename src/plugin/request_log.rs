use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::core::{ExecutionResult, OperationParams, PipelineResult, RequestContext};

use super::{plugin_config, PipelinePlugin};

pub const PLUGIN_NAME: &str = "request-log";

pub fn create_request_log_plugin(cfg: YamlValue) -> PipelineResult<Arc<dyn PipelinePlugin>> {
    let config: PluginConfig = plugin_config(PLUGIN_NAME, cfg)?;
    Ok(Arc::new(PluginRequestLog { config }))
}

#[derive(Debug, Serialize, Deserialize)]
struct PluginConfig {
    /// Operations slower than this are logged at `warn`
    #[serde(default = "PluginConfig::default_slow_threshold_ms")]
    slow_threshold_ms: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: Self::default_slow_threshold_ms(),
        }
    }
}

impl PluginConfig {
    fn default_slow_threshold_ms() -> u64 {
        1000
    }
}

/// One summary line per finished operation
pub struct PluginRequestLog {
    config: PluginConfig,
}

impl PluginRequestLog {
    fn render(
        ctx: &RequestContext,
        operation: &OperationParams,
        result: &ExecutionResult,
        elapsed_ms: u128,
    ) -> String {
        let name = match operation.label() {
            "" => "<anonymous>",
            label => label,
        };
        let source = if operation.persisted { "persisted" } else { "inline" };
        let outcome = result
            .errors
            .first()
            .and_then(|e| e["extensions"]["code"].as_str())
            .unwrap_or("ok");

        format!(
            "request_id={} operation={name} source={source} batched={} outcome={outcome} elapsed_ms={elapsed_ms}",
            ctx.id(),
            ctx.batched,
        )
    }
}

#[async_trait]
impl PipelinePlugin for PluginRequestLog {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn after_response(
        &self,
        ctx: &RequestContext,
        operation: &OperationParams,
        _raw: &ExecutionResult,
        result: &ExecutionResult,
    ) {
        let elapsed_ms = ctx.started_at().elapsed().as_millis();
        let line = Self::render(ctx, operation, result, elapsed_ms);
        if elapsed_ms > self.config.slow_threshold_ms as u128 {
            warn!("slow {line}");
        } else {
            info!("{line}");
        }
    }
}
