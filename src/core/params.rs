//! Operation parameters produced by the normalizer

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Where an operation's query text comes from once normalization is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource<'a> {
    /// Query text sent inline
    Inline(&'a str),
    /// Query must be loaded from the persisted query store
    Persisted(&'a str),
    /// Neither a query nor an id was supplied
    Missing,
}

/// One GraphQL operation request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<JsonMap<String, JsonValue>>,

    /// A mapping, or the original string when it could not be decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,

    /// Set when this entry was structurally invalid
    #[serde(skip)]
    pub error: Option<String>,

    /// Set by the pipeline when `query` was loaded from the store
    #[serde(skip)]
    pub persisted: bool,
}

impl OperationParams {
    /// Entry standing in for a structurally invalid batch element
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// The effective operation source: inline query wins over any id.
    pub fn source(&self) -> QuerySource<'_> {
        match (&self.query, &self.query_id) {
            (Some(query), _) => QuerySource::Inline(query),
            (None, Some(id)) => QuerySource::Persisted(id),
            (None, None) => QuerySource::Missing,
        }
    }

    /// `extensions.persistedQuery.sha256Hash`, if present and a string
    pub fn persisted_query_hash(&self) -> Option<&str> {
        self.extensions
            .as_ref()?
            .get("persistedQuery")?
            .get("sha256Hash")?
            .as_str()
    }

    /// Operation name, treating an empty string as absent
    pub fn label(&self) -> &str {
        self.operation_name.as_deref().unwrap_or_default()
    }
}
