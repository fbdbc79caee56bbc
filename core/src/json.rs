//! Pure transforms over JSON parameter trees.
//!
//! Two operations live here:
//!
//! - [`deep_equals`]: structural equality used for no-op update detection and for the
//!   replacement-trigger projection.
//! - [`expand_defaults`]: expansion of `__default__` markers, which let a template carry a
//!   base64-encoded JSON document as the default body of a mapping.
//!
//! Neither function mutates its input.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Key that marks a mapping as carrying an encoded default document.
pub const DEFAULT_MARKER: &str = "__default__";

/// Errors from [`expand_defaults`].
#[derive(Error, Debug)]
pub enum ExpandError {
    /// The marker value was not a string
    #[error("__default__ must be a base64 string, got {0}")]
    MarkerNotString(String),

    /// The marker was not valid base64
    #[error("__default__ is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded marker was not a JSON document
    #[error("__default__ does not decode to JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Compare two numeric leaves.
///
/// NaN equals NaN and nothing else; `0.0 == -0.0`.
#[must_use]
#[allow(clippy::float_cmp)] // exact comparison intended
pub fn numbers_equal(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    a == b
}

fn number_values_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => numbers_equal(x, y),
        _ => false,
    }
}

/// Structural equality of two JSON trees.
///
/// Mappings must have identical key sets with recursively equal values, arrays must have
/// the same length and pairwise equal elements, and an array never equals a mapping.
#[must_use]
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => number_values_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equals(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| deep_equals(x, y)))
        }
        _ => false,
    }
}

/// [`deep_equals`] for trees that may be absent.
///
/// An absent tree equals only another absent tree; in particular it does not equal `null`.
#[must_use]
pub fn params_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => deep_equals(x, y),
        _ => false,
    }
}

/// Expand every `__default__` marker in `tree`.
///
/// # Errors
///
/// Returns an [`ExpandError`] when a marker is not a string, is not base64, or does not
/// decode to a JSON document.
pub fn expand_defaults(tree: &Value) -> Result<Value, ExpandError> {
    match tree {
        Value::Array(items) => items
            .iter()
            .map(expand_defaults)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => expand_mapping(map),
        leaf => Ok(leaf.clone()),
    }
}

fn expand_mapping(map: &Map<String, Value>) -> Result<Value, ExpandError> {
    let Some(encoded) = marker(map)? else {
        return expand_entries(map, Map::new()).map(Value::Object);
    };

    let decoded = decode(encoded)?;
    let siblings_only = map.len() == 1;

    let base = match expand_defaults(&decoded)? {
        Value::Object(defaults) => defaults,
        // A bare primitive or array default stands in for the whole node...
        other if siblings_only => return Ok(other),
        // ...unless siblings exist, in which case only the siblings survive.
        _ => Map::new(),
    };

    let siblings = map
        .iter()
        .filter(|(key, _)| key.as_str() != DEFAULT_MARKER)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<Map<_, _>>();

    expand_entries(&siblings, base).map(Value::Object)
}

/// Returns the encoded marker, or `None` when the mapping has no usable marker.
///
/// A `null` or empty-string marker is treated as an ordinary key.
fn marker(map: &Map<String, Value>) -> Result<Option<&str>, ExpandError> {
    match map.get(DEFAULT_MARKER) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ExpandError::MarkerNotString(other.to_string())),
    }
}

fn decode(encoded: &str) -> Result<Value, ExpandError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn expand_entries(
    entries: &Map<String, Value>,
    mut into: Map<String, Value>,
) -> Result<Map<String, Value>, ExpandError> {
    for (key, value) in entries {
        into.insert(key.clone(), expand_defaults(value)?);
    }
    Ok(into)
}
