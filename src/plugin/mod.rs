pub mod prometheus;
pub mod request_log;
pub mod result_extensions;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::{
    config::PluginSpec,
    core::{ExecutionResult, OperationParams, PipelineError, PipelineResult, RequestContext},
};

/// Hooks into the request pipeline.
///
/// Filters receive `&mut` and may rewrite what they are given; observers
/// only look. Every hook has a no-op default.
#[async_trait]
pub trait PipelinePlugin: Send + Sync {
    /// Return the name of this plugin
    fn name(&self) -> &str;

    /// Filter the raw request payload before it is normalized
    async fn before_normalize(&self, _ctx: &RequestContext, _raw: &mut JsonValue) {}

    /// Observe an operation whose query text is known
    async fn after_resolve(&self, _ctx: &RequestContext, _operation: &OperationParams) {}

    /// Observe the request right before its operations are dispatched
    async fn before_execute(&self, _ctx: &RequestContext) {}

    /// Filter one operation's result.
    ///
    /// `raw` is what the engine produced; `result` starts as a copy of it and
    /// carries the changes of earlier plugins.
    async fn after_execute(
        &self,
        _ctx: &RequestContext,
        _operation: &OperationParams,
        _raw: &ExecutionResult,
        _result: &mut ExecutionResult,
    ) {
    }

    /// Observe one operation after ambient state has been restored
    async fn after_response(
        &self,
        _ctx: &RequestContext,
        _operation: &OperationParams,
        _raw: &ExecutionResult,
        _result: &ExecutionResult,
    ) {
    }
}

/// Runs plugins in registration order
#[derive(Default, Clone)]
pub struct PluginExecutor {
    pub plugins: Vec<Arc<dyn PipelinePlugin>>,
}

impl PluginExecutor {
    pub fn new(plugins: Vec<Arc<dyn PipelinePlugin>>) -> Self {
        Self { plugins }
    }

    /// Build every configured plugin, failing on the first unknown name
    pub fn from_specs(specs: &[PluginSpec]) -> PipelineResult<Self> {
        specs
            .iter()
            .map(|spec| build_plugin(&spec.name, spec.config.clone()))
            .collect::<PipelineResult<Vec<_>>>()
            .map(Self::new)
    }

    pub fn push(&mut self, plugin: Arc<dyn PipelinePlugin>) {
        self.plugins.push(plugin);
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[async_trait]
impl PipelinePlugin for PluginExecutor {
    fn name(&self) -> &str {
        "plugin-executor"
    }

    async fn before_normalize(&self, ctx: &RequestContext, raw: &mut JsonValue) {
        for plugin in self.plugins.iter() {
            plugin.before_normalize(ctx, raw).await;
        }
    }

    async fn after_resolve(&self, ctx: &RequestContext, operation: &OperationParams) {
        for plugin in self.plugins.iter() {
            plugin.after_resolve(ctx, operation).await;
        }
    }

    async fn before_execute(&self, ctx: &RequestContext) {
        for plugin in self.plugins.iter() {
            plugin.before_execute(ctx).await;
        }
    }

    async fn after_execute(
        &self,
        ctx: &RequestContext,
        operation: &OperationParams,
        raw: &ExecutionResult,
        result: &mut ExecutionResult,
    ) {
        for plugin in self.plugins.iter() {
            plugin.after_execute(ctx, operation, raw, result).await;
        }
    }

    async fn after_response(
        &self,
        ctx: &RequestContext,
        operation: &OperationParams,
        raw: &ExecutionResult,
        result: &ExecutionResult,
    ) {
        for plugin in self.plugins.iter() {
            plugin.after_response(ctx, operation, raw, result).await;
        }
    }
}

pub type PluginCreateFn = fn(YamlValue) -> PipelineResult<Arc<dyn PipelinePlugin>>;

/// Global registry mapping plugin names to their factory functions.
static PLUGIN_BUILDER_REGISTRY: Lazy<HashMap<&'static str, PluginCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, PluginCreateFn)> = vec![
        (
            prometheus::PLUGIN_NAME,
            prometheus::create_prometheus_plugin,
        ),
        (
            request_log::PLUGIN_NAME,
            request_log::create_request_log_plugin,
        ),
        (
            result_extensions::PLUGIN_NAME,
            result_extensions::create_result_extensions_plugin,
        ),
    ];
    arr.into_iter().collect()
});

/// Creates plugin instances from configuration using a factory pattern.
///
/// Looks up the plugin builder function in the global registry and invokes it
/// with the provided configuration. Fails fast for unknown plugin types.
pub fn build_plugin(name: &str, cfg: YamlValue) -> PipelineResult<Arc<dyn PipelinePlugin>> {
    let builder = PLUGIN_BUILDER_REGISTRY
        .get(name)
        .ok_or_else(|| PipelineError::Plugin(format!("Unknown plugin type: {name}")))?;
    builder(cfg)
}

/// Decode a plugin's YAML config; an absent config means defaults.
fn plugin_config<T>(name: &str, cfg: YamlValue) -> PipelineResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if cfg.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(cfg)
        .map_err(|e| PipelineError::Plugin(format!("Invalid {name} plugin config: {e}")))
}
