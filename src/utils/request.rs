//! Extraction of raw GraphQL parameters from HTTP requests

use http::Method;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::{PipelineError, PipelineResult};

/// Deepest bracket nesting honoured in a form key; deeper keys stay plain
const MAX_KEY_DEPTH: usize = 16;

pub mod content_type {
    pub const JSON: &str = "application/json";
    pub const GRAPHQL: &str = "application/graphql";
    pub const FORM: &str = "application/x-www-form-urlencoded";
}

/// Media type without parameters, lowercased
pub fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Build the raw parameter payload for a request.
///
/// GET reads the query string; POST reads the body according to its
/// content type. The result is handed to the normalizer unchanged.
pub fn parse_request(
    method: &Method,
    query: Option<&str>,
    content_type_header: Option<&str>,
    body: &[u8],
) -> PipelineResult<JsonValue> {
    if method == Method::GET {
        return Ok(params_from_query(query.unwrap_or_default()));
    }
    parse_body(content_type_header, body)
}

pub fn parse_body(content_type_header: Option<&str>, body: &[u8]) -> PipelineResult<JsonValue> {
    let media = content_type_header.map(media_type).unwrap_or_default();

    match media.as_str() {
        content_type::JSON => serde_json::from_slice(body)
            .map_err(|e| PipelineError::MalformedInput(format!("Could not parse JSON: {e}"))),
        content_type::GRAPHQL => {
            let query = std::str::from_utf8(body)
                .map_err(|_| PipelineError::MalformedInput("Body is not valid UTF-8".to_string()))?;
            let mut params = JsonMap::new();
            params.insert("query".to_string(), JsonValue::String(query.to_string()));
            Ok(JsonValue::Object(params))
        }
        content_type::FORM => {
            let form = std::str::from_utf8(body)
                .map_err(|_| PipelineError::MalformedInput("Body is not valid UTF-8".to_string()))?;
            Ok(params_from_query(form))
        }
        "" => Err(PipelineError::MalformedInput(
            "Missing \"Content-Type\" header".to_string(),
        )),
        other => Err(PipelineError::MalformedInput(format!(
            "Unexpected content type: \"{other}\""
        ))),
    }
}

/// Decode `application/x-www-form-urlencoded` pairs into a JSON object.
///
/// Bracketed keys nest: `variables[first]=1` yields
/// `{"variables": {"first": "1"}}`. Later plain keys replace earlier ones.
pub fn params_from_query(query: &str) -> JsonValue {
    let mut params = JsonMap::new();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let (base, path) = split_key(&key);
        if base.is_empty() {
            continue;
        }
        insert_path(&mut params, base, &path, JsonValue::String(value.into_owned()));
    }

    JsonValue::Object(params)
}

/// `a[b][c]` -> (`a`, [`b`, `c`]). Unbalanced or too deeply nested keys
/// are kept whole.
fn split_key(key: &str) -> (&str, Vec<&str>) {
    let Some(open) = key.find('[') else {
        return (key, Vec::new());
    };

    let base = &key[..open];
    let mut path = Vec::new();
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        match stripped.find(']') {
            Some(_) if path.len() == MAX_KEY_DEPTH => return (key, Vec::new()),
            Some(close) => {
                path.push(&stripped[..close]);
                rest = &stripped[close + 1..];
            }
            None => return (key, Vec::new()),
        }
    }

    (base, path)
}

fn insert_path(map: &mut JsonMap<String, JsonValue>, key: &str, path: &[&str], value: JsonValue) {
    let Some((next, rest)) = path.split_first() else {
        map.insert(key.to_string(), value);
        return;
    };

    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| JsonValue::Object(JsonMap::new()));
    if !entry.is_object() {
        *entry = JsonValue::Object(JsonMap::new());
    }
    if let JsonValue::Object(child) = entry {
        insert_path(child, next, rest, value);
    }
}
