//! Execution results and the per-request response envelope

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::error::PipelineError;

/// Message used when a result carries neither data nor errors
pub const INVALID_RESPONSE_MESSAGE: &str = "The GraphQL request returned an invalid response";

/// Result of executing one operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<JsonValue>,

    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub extensions: JsonMap<String, JsonValue>,
}

impl ExecutionResult {
    pub fn from_data(data: JsonValue) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn from_error(err: &PipelineError, debug: bool) -> Self {
        Self {
            errors: vec![err.to_graphql_error(debug)],
            ..Default::default()
        }
    }

    /// True when the result has neither usable data nor errors
    pub fn is_invalid(&self) -> bool {
        self.errors.is_empty() && matches!(self.data, None | Some(JsonValue::Null))
    }

    /// Replace an invalid result with the well-known invalid-response error
    pub fn normalize(&mut self) {
        if self.is_invalid() {
            self.data = None;
            self.errors = vec![JsonValue::String(INVALID_RESPONSE_MESSAGE.to_string())];
        }
    }

    /// True when any error carries the given `extensions.code`
    pub fn has_error_code(&self, code: &str) -> bool {
        self.errors.iter().any(|error| {
            error
                .get("extensions")
                .and_then(|ext| ext.get("code"))
                .and_then(JsonValue::as_str)
                == Some(code)
        })
    }
}

/// Final output of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResponse {
    /// One entry per submitted operation, in submission order
    pub results: Vec<ExecutionResult>,
    /// Whether the input was a batch (array)
    pub batched: bool,
    /// Whether normalization rejected the input as a whole
    pub malformed: bool,
}

impl PipelineResponse {
    /// Serialize to the wire shape: an object for single requests, an array for batches
    pub fn to_json(&self) -> JsonValue {
        if self.batched && !self.malformed {
            JsonValue::Array(
                self.results
                    .iter()
                    .map(|r| serde_json::to_value(r).unwrap_or(JsonValue::Null))
                    .collect(),
            )
        } else {
            self.results
                .first()
                .and_then(|r| serde_json::to_value(r).ok())
                .unwrap_or_else(|| {
                    serde_json::json!({ "errors": [INVALID_RESPONSE_MESSAGE] })
                })
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_json()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_result_is_normalized() {
        let mut result = ExecutionResult::default();
        result.normalize();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "errors": [INVALID_RESPONSE_MESSAGE] })
        );
    }

    #[test]
    fn null_data_without_errors_is_invalid() {
        let result = ExecutionResult::from_data(JsonValue::Null);
        assert!(result.is_invalid());
    }

    #[test]
    fn valid_result_is_untouched() {
        let mut result = ExecutionResult::from_data(json!({ "__typename": "Query" }));
        let before = result.clone();
        result.normalize();
        assert_eq!(result, before);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "data": { "__typename": "Query" } })
        );
    }

    #[test]
    fn apq_miss_has_well_known_code() {
        let err = PipelineError::PersistedQueryNotFound("deadbeef".to_string());
        let result = ExecutionResult::from_error(&err, false);
        assert!(result.has_error_code("PERSISTED_QUERY_NOT_FOUND"));
        assert_eq!(result.errors[0]["message"], "PersistedQueryNotFound");
    }

    #[test]
    fn batch_serializes_as_array() {
        let response = PipelineResponse {
            results: vec![
                ExecutionResult::from_data(json!({ "a": 1 })),
                ExecutionResult::from_data(json!({ "b": 2 })),
            ],
            batched: true,
            malformed: false,
        };
        assert_eq!(
            response.to_json(),
            json!([{ "data": { "a": 1 } }, { "data": { "b": 2 } }])
        );
    }
}
