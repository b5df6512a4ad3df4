//! Request parameter normalization
//!
//! Turns a raw, loosely-typed request payload into ordered
//! [`OperationParams`], resolving the APQ extension protocol along the way.

use log::{trace, warn};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::{
    config::ExecutionConfig,
    core::{OperationParams, PipelineError, PipelineResult},
    utils::sanitize::{sanitize_value, strip_slashes},
};

/// Parses single and batched operation payloads
#[derive(Debug, Clone)]
pub struct ParamNormalizer {
    batching: bool,
    max_batch_size: usize,
}

impl Default for ParamNormalizer {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl ParamNormalizer {
    pub fn new(batching: bool, max_batch_size: usize) -> Self {
        Self {
            batching,
            max_batch_size,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.batching, config.max_batch_size)
    }

    /// Normalize a raw payload.
    ///
    /// Fails only when the payload as a whole is unusable. Individual batch
    /// elements that are malformed come back as error-carrying entries.
    pub fn normalize(&self, raw: &JsonValue) -> PipelineResult<Vec<OperationParams>> {
        match raw {
            JsonValue::Object(_) => Ok(vec![self.normalize_one(raw)]),
            JsonValue::Array(items) => {
                if !self.batching {
                    return Err(PipelineError::MalformedInput(
                        "Batched queries are not supported by this server".to_string(),
                    ));
                }
                if items.is_empty() {
                    return Err(PipelineError::MalformedInput(
                        "Batch request must contain at least one operation".to_string(),
                    ));
                }
                if items.len() > self.max_batch_size {
                    return Err(PipelineError::MalformedInput(format!(
                        "Batch of {} operations exceeds the limit of {}",
                        items.len(),
                        self.max_batch_size
                    )));
                }
                Ok(items.iter().map(|item| self.normalize_one(item)).collect())
            }
            other => Err(PipelineError::MalformedInput(format!(
                "GraphQL Server expects JSON object or array, but got {}",
                json_kind(other)
            ))),
        }
    }

    /// Normalize one operation object
    pub fn normalize_one(&self, raw: &JsonValue) -> OperationParams {
        let Some(map) = raw.as_object() else {
            return OperationParams::invalid(format!(
                "GraphQL operation must be a JSON object, but got {}",
                json_kind(raw)
            ));
        };

        let query = match string_param(map, "query") {
            Ok(v) => v,
            Err(msg) => return OperationParams::invalid(msg),
        };
        let explicit_id = match string_param(map, "queryId") {
            Ok(v) => v,
            Err(msg) => return OperationParams::invalid(msg),
        };
        let operation_name = match string_param(map, "operationName") {
            Ok(v) => v,
            Err(msg) => return OperationParams::invalid(msg),
        };

        let extensions = map.get("extensions").and_then(decode_extensions);
        let variables = map.get("variables").and_then(decode_variables);

        let mut params = OperationParams {
            query,
            operation_name,
            variables,
            extensions,
            ..Default::default()
        };

        if params.query.is_none() {
            params.query_id = explicit_id.or_else(|| params.persisted_query_hash().map(str::to_string));
        }

        trace!("Normalized operation: {params:?}");
        params
    }
}

/// Read an optional string parameter; empty strings count as absent.
fn string_param(map: &JsonMap<String, JsonValue>, key: &str) -> Result<Option<String>, String> {
    match map.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) if s.is_empty() => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(format!(
            "GraphQL Request parameter \"{key}\" must be string, but got {}",
            json_kind(other)
        )),
    }
}

/// Decode JSON text, retrying once with backslash escapes removed.
fn decode_json_lenient(text: &str) -> Option<JsonValue> {
    serde_json::from_str(text)
        .ok()
        .or_else(|| serde_json::from_str(&strip_slashes(text)).ok())
}

fn decode_extensions(value: &JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(text) => match decode_json_lenient(text) {
            Some(decoded) => Some(decoded),
            None => {
                warn!("Keeping undecodable extensions as a string");
                Some(value.clone())
            }
        },
        other => Some(other.clone()),
    }
}

fn decode_variables(value: &JsonValue) -> Option<JsonMap<String, JsonValue>> {
    match value {
        JsonValue::Null => None,
        JsonValue::Object(map) => {
            let mut map = map.clone();
            map.values_mut().for_each(sanitize_value);
            Some(map)
        }
        JsonValue::String(text) if text.trim().is_empty() => None,
        JsonValue::String(text) => match decode_json_lenient(text) {
            Some(JsonValue::Object(map)) => Some(map),
            Some(JsonValue::Null) => None,
            Some(other) => {
                warn!(
                    "{}",
                    PipelineError::InvalidVariables(format!(
                        "expected an object, decoded {}",
                        json_kind(&other)
                    ))
                );
                None
            }
            None => {
                warn!(
                    "{}",
                    PipelineError::InvalidVariables("variables are not valid JSON".to_string())
                );
                None
            }
        },
        other => {
            warn!(
                "{}",
                PipelineError::InvalidVariables(format!("unexpected {}", json_kind(other)))
            );
            None
        }
    }
}

pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
