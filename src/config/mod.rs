use std::fs;
use std::net::SocketAddr;

use log::{debug, trace};
use pingora_core::server::configuration::{Opt, ServerConf};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use validator::{Validate, ValidationError};

use crate::{config_error, core::PipelineResult};

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_plugins"))]
pub struct Config {
    #[serde(default)]
    pub pingora: ServerConf,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub listeners: Vec<Listener>,

    #[serde(default)]
    #[validate(nested)]
    pub graphql: GraphQL,
    #[serde(default)]
    #[validate(nested)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    #[validate(nested)]
    pub persisted_queries: PersistedQueryConfig,
    #[validate(nested)]
    pub log: Option<Log>,

    #[serde(default)]
    #[validate(nested)]
    pub plugins: Vec<PluginSpec>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> PipelineResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .map_err(|e| config_error!("Unable to read conf file from {path}: {e}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    // config file load entry point
    pub fn load_yaml_with_opt_override(opt: &Opt) -> PipelineResult<Self> {
        if let Some(path) = &opt.conf {
            let mut conf = Self::load_from_yaml(path)?;
            conf.merge_with_opt(opt);
            Ok(conf)
        } else {
            Err(config_error!("No path specified"))
        }
    }

    pub fn from_yaml(conf_str: &str) -> PipelineResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| config_error!("Unable to parse yaml conf: {e}"))?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .map_err(|e| config_error!("Conf file validation failed: {e}"))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> PipelineResult<String> {
        serde_yaml::to_string(self).map_err(|e| config_error!("Unable to render yaml conf: {e}"))
    }

    pub fn merge_with_opt(&mut self, opt: &Opt) {
        if opt.daemon {
            self.pingora.daemon = true;
        }
    }

    fn validate_plugins(&self) -> Result<(), ValidationError> {
        for spec in &self.plugins {
            if let Err(e) = crate::plugin::build_plugin(&spec.name, spec.config.clone()) {
                let mut err = ValidationError::new("invalid_plugin");
                err.add_param("name".into(), &spec.name);
                err.add_param("reason".into(), &e.to_string());
                return Err(err);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Listener::validate_tls_for_offer_h2"))]
pub struct Listener {
    pub address: SocketAddr,
    pub tls: Option<Tls>,
    #[serde(default)]
    pub offer_h2: bool,
}

impl Listener {
    fn validate_tls_for_offer_h2(&self) -> Result<(), ValidationError> {
        if self.offer_h2 && self.tls.is_none() {
            Err(ValidationError::new("tls_required_for_h2"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tls {
    pub cert_path: String,
    pub key_path: String,
}

/// HTTP surface of the GraphQL endpoint
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct GraphQL {
    #[serde(default = "GraphQL::default_endpoint")]
    #[validate(custom(function = "validate_path"))]
    pub endpoint: String,

    /// Include internal error detail and tracing in responses
    #[serde(default)]
    pub debug: bool,

    #[validate(custom(function = "validate_path"))]
    pub metrics_path: Option<String>,

    /// Largest POST body accepted, in bytes
    #[serde(default = "GraphQL::default_max_body_bytes")]
    #[validate(range(min = 1))]
    pub max_body_bytes: usize,
}

impl Default for GraphQL {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            debug: false,
            metrics_path: None,
            max_body_bytes: Self::default_max_body_bytes(),
        }
    }
}

impl GraphQL {
    fn default_endpoint() -> String {
        "/graphql".to_string()
    }

    fn default_max_body_bytes() -> usize {
        1024 * 1024
    }
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ValidationError::new("path_must_start_with_slash"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct ExecutionConfig {
    /// Bound on store lookups and engine execution for one request
    #[serde(default = "ExecutionConfig::default_timeout_ms")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,

    #[serde(default = "ExecutionConfig::default_batching")]
    pub batching: bool,

    #[serde(default = "ExecutionConfig::default_max_batch_size")]
    #[validate(range(min = 1))]
    pub max_batch_size: usize,

    /// Operations of one batch executed at the same time
    #[serde(default = "ExecutionConfig::default_max_concurrency")]
    #[validate(range(min = 1))]
    pub max_concurrency: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            batching: Self::default_batching(),
            max_batch_size: Self::default_max_batch_size(),
            max_concurrency: Self::default_max_concurrency(),
        }
    }
}

impl ExecutionConfig {
    fn default_timeout_ms() -> u64 {
        30_000
    }

    fn default_batching() -> bool {
        true
    }

    fn default_max_batch_size() -> usize {
        10
    }

    fn default_max_concurrency() -> usize {
        4
    }
}

#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistedQueryBackend {
    #[default]
    Memory,
    Etcd,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "PersistedQueryConfig::validate_backend"))]
pub struct PersistedQueryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Anonymous operations are never persisted when set
    #[serde(default = "PersistedQueryConfig::default_require_operation_name")]
    pub require_operation_name: bool,

    /// Persist every labelled inline query, not only APQ registrations
    #[serde(default)]
    pub persist_all: bool,

    #[serde(default)]
    pub backend: PersistedQueryBackend,

    #[validate(nested)]
    pub etcd: Option<Etcd>,
}

impl Default for PersistedQueryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            require_operation_name: Self::default_require_operation_name(),
            persist_all: false,
            backend: PersistedQueryBackend::default(),
            etcd: None,
        }
    }
}

impl PersistedQueryConfig {
    fn default_require_operation_name() -> bool {
        true
    }

    fn validate_backend(&self) -> Result<(), ValidationError> {
        if self.backend == PersistedQueryBackend::Etcd && self.etcd.is_none() {
            Err(ValidationError::new("etcd_required_for_etcd_backend"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Etcd {
    #[validate(length(min = 1))]
    pub host: Vec<String>,
    #[serde(default = "Etcd::default_prefix")]
    pub prefix: String,
    pub timeout: Option<u32>,
    pub connect_timeout: Option<u32>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Etcd {
    fn default_prefix() -> String {
        "/gqlpipe/persisted_queries".to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[validate(length(min = 1))]
    pub path: String,

    #[serde(default = "Log::default_level")]
    #[validate(custom(function = "Log::validate_level"))]
    pub level: String,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }

    fn validate_level(level: &str) -> Result<(), ValidationError> {
        level
            .parse::<log::LevelFilter>()
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid_log_level"))
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// One entry of the ordered plugin list
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct PluginSpec {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub config: YamlValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_load_file() {
        init_log();
        let conf_str = r#"
---
pingora:
  version: 1

listeners:
  - address: 0.0.0.0:8080
  - address: "[::1]:8080"
    tls:
      cert_path: /etc/ssl/server.crt
      key_path: /etc/ssl/server.key
    offer_h2: true

graphql:
  endpoint: /graphql
  debug: true
  metrics_path: /metrics

execution:
  timeout_ms: 5000
  max_batch_size: 5

persisted_queries:
  enabled: true
  backend: etcd
  etcd:
    host: ["http://127.0.0.1:2379"]

log:
  path: /var/log/gqlpipe.log
  level: debug

plugins:
  - name: request-log
  - name: prometheus
        "#;
        let conf = Config::from_yaml(conf_str).unwrap();
        assert_eq!(2, conf.listeners.len());
        assert!(conf.graphql.debug);
        assert_eq!(conf.graphql.metrics_path.as_deref(), Some("/metrics"));
        assert_eq!(5000, conf.execution.timeout_ms);
        assert_eq!(5, conf.execution.max_batch_size);
        assert!(conf.execution.batching);
        assert_eq!(4, conf.execution.max_concurrency);
        assert!(conf.persisted_queries.enabled);
        assert!(conf.persisted_queries.require_operation_name);
        assert_eq!(conf.persisted_queries.backend, PersistedQueryBackend::Etcd);
        assert_eq!(
            conf.persisted_queries.etcd.as_ref().unwrap().prefix,
            "/gqlpipe/persisted_queries"
        );
        assert_eq!(conf.log.as_ref().unwrap().level_filter(), log::LevelFilter::Debug);
        assert_eq!(
            conf.plugins.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["request-log", "prometheus"]
        );
        print!("{}", conf.to_yaml().unwrap());
    }

    #[test]
    fn test_defaults() {
        init_log();
        let conf = Config::from_yaml("listeners:\n  - address: 127.0.0.1:8080\n").unwrap();
        assert_eq!(conf.graphql.endpoint, "/graphql");
        assert!(!conf.graphql.debug);
        assert_eq!(conf.graphql.max_body_bytes, 1024 * 1024);
        assert!(!conf.persisted_queries.enabled);
        assert_eq!(conf.persisted_queries.backend, PersistedQueryBackend::Memory);
        assert!(conf.plugins.is_empty());
    }

    #[test]
    fn test_valid_max_body_bytes() {
        init_log();
        let conf_str = r#"
listeners:
  - address: 127.0.0.1:8080
graphql:
  max_body_bytes: 0
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_listeners_length() {
        init_log();
        let conf_str = r#"
listeners: []
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_listeners_tls_for_offer_h2() {
        init_log();
        let conf_str = r#"
listeners:
  - address: 0.0.0.0:8080
    offer_h2: true
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_endpoint_path() {
        init_log();
        let conf_str = r#"
listeners:
  - address: 0.0.0.0:8080
graphql:
  endpoint: graphql
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_execution_limits() {
        init_log();
        let conf_str = r#"
listeners:
  - address: 0.0.0.0:8080
execution:
  max_concurrency: 0
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_etcd_backend() {
        init_log();
        let conf_str = r#"
listeners:
  - address: 0.0.0.0:8080
persisted_queries:
  enabled: true
  backend: etcd
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_plugins() {
        init_log();
        let conf_str = r#"
listeners:
  - address: 0.0.0.0:8080
plugins:
  - name: no-such-plugin
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_log_level() {
        init_log();
        let conf_str = r#"
listeners:
  - address: 0.0.0.0:8080
log:
  path: /tmp/gqlpipe.log
  level: loud
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }
}
