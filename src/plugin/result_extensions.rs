use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use serde_yaml::Value as YamlValue;

use crate::core::{ExecutionResult, OperationParams, PipelineResult, RequestContext};

use super::{plugin_config, PipelinePlugin};

pub const PLUGIN_NAME: &str = "result-extensions";

pub fn create_result_extensions_plugin(
    cfg: YamlValue,
) -> PipelineResult<Arc<dyn PipelinePlugin>> {
    let config: PluginConfig = plugin_config(PLUGIN_NAME, cfg)?;
    Ok(Arc::new(PluginResultExtensions { config }))
}

/// Static entries merged into every result's `extensions`.
#[derive(Default, Debug, Serialize, Deserialize)]
struct PluginConfig {
    #[serde(default)]
    extensions: JsonMap<String, JsonValue>,

    /// Also add `requestId` with the request's id
    #[serde(default)]
    request_id: bool,
}

pub struct PluginResultExtensions {
    config: PluginConfig,
}

#[async_trait]
impl PipelinePlugin for PluginResultExtensions {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn after_execute(
        &self,
        ctx: &RequestContext,
        _operation: &OperationParams,
        _raw: &ExecutionResult,
        result: &mut ExecutionResult,
    ) {
        for (k, v) in &self.config.extensions {
            result.extensions.insert(k.clone(), v.clone());
        }
        if self.config.request_id {
            result
                .extensions
                .insert("requestId".to_string(), JsonValue::String(ctx.id().to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_entries_are_merged() {
        let cfg: YamlValue = serde_yaml::from_str(
            r#"
extensions:
  region: eu-west
  version: 2
request_id: true
"#,
        )
        .unwrap();
        let plugin = create_result_extensions_plugin(cfg).unwrap();

        let ctx = RequestContext::new(json!({}));
        let raw = ExecutionResult::from_data(json!({ "a": 1 }));
        let mut result = raw.clone();
        plugin
            .after_execute(&ctx, &OperationParams::default(), &raw, &mut result)
            .await;

        assert_eq!(result.extensions["region"], json!("eu-west"));
        assert_eq!(result.extensions["version"], json!(2));
        assert_eq!(result.extensions["requestId"], json!(ctx.id()));
        assert!(raw.extensions.is_empty());
    }
}
