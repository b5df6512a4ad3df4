//! Text sanitization for loosely-typed request values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

static TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!--[\s\S]*?-->|</?[A-Za-z][^<>]*>").expect("static regex"));
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\x00-\x1f\x7f]+").expect("static regex"));

/// Strip markup, collapse whitespace and control characters, trim.
pub fn sanitize_text(input: &str) -> String {
    let without_tags = TAGS.replace_all(input, "");
    WHITESPACE
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

/// Sanitize every string reachable from `value`, in place.
pub fn sanitize_value(value: &mut JsonValue) {
    match value {
        JsonValue::String(s) => *s = sanitize_text(s),
        JsonValue::Array(items) => items.iter_mut().for_each(sanitize_value),
        JsonValue::Object(map) => map.values_mut().for_each(sanitize_value),
        _ => {}
    }
}

/// Undo backslash escaping added by form encoders that quote their input.
pub fn strip_slashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
