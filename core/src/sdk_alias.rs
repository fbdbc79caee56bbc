//! Handlers that forward resource parameters to a single API method.
//!
//! Many custom resources are thin wrappers around one service call. [`SdkAlias`] builds
//! Create/Update/Delete/NoUpdate handlers that reshape the parameters, call an
//! [`ApiClient`] method, and turn the response into a physical id and attributes.
//!
//! Parameter shaping runs in this order: `force_bools`, `force_nums`, `physical_id_as`,
//! `keys`, `map_keys`, `downcase`.

use crate::event::SERVICE_TOKEN;
use crate::handler::{CreateFn, DeleteFn, NoUpdateFn, Reply, UpdateFn};
use crate::reply::HandlerOutcome;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by an [`ApiClient`] call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP-like status code reported by the service, if any
    pub status_code: Option<u16>,
    /// Human readable message, forwarded as the failure reason
    pub message: String,
}

impl ApiError {
    /// Error with a status code.
    #[must_use]
    pub fn with_status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
        }
    }
}

/// A service client exposing named methods that take and return JSON.
pub trait ApiClient: Send + Sync {
    /// Call `method` with `params`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the service call fails.
    fn call<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ApiError>> + Send + 'a>>;
}

/// Derives the physical id from `(response, params)`.
pub type PhysicalIdFn = Arc<dyn Fn(&Value, &Value) -> Option<String> + Send + Sync>;

/// Derives attributes from the response.
pub type AttrsFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
enum PhysicalIdSource {
    Key(String),
    Derive(PhysicalIdFn),
}

#[derive(Clone)]
enum AttrsSource {
    Keys(Vec<String>),
    Derive(AttrsFn),
}

/// Handler factory forwarding parameters to one [`ApiClient`] method.
#[derive(Clone)]
pub struct SdkAlias {
    api: Arc<dyn ApiClient>,
    method: String,
    keys: Option<Vec<String>>,
    map_keys: Vec<(String, String)>,
    downcase: bool,
    force_bools: Vec<String>,
    force_nums: Vec<String>,
    physical_id_as: Option<String>,
    return_physical_id: Option<PhysicalIdSource>,
    return_attrs: Option<AttrsSource>,
    ignore_error_codes: Vec<u16>,
}

impl fmt::Debug for SdkAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkAlias")
            .field("method", &self.method)
            .field("keys", &self.keys)
            .field("map_keys", &self.map_keys)
            .field("downcase", &self.downcase)
            .field("force_bools", &self.force_bools)
            .field("force_nums", &self.force_nums)
            .field("physical_id_as", &self.physical_id_as)
            .field("ignore_error_codes", &self.ignore_error_codes)
            .finish_non_exhaustive()
    }
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl SdkAlias {
    /// Alias `method` of `api`.
    #[must_use]
    pub fn new(api: Arc<dyn ApiClient>, method: impl Into<String>) -> Self {
        Self {
            api,
            method: method.into(),
            keys: None,
            map_keys: Vec::new(),
            downcase: false,
            force_bools: Vec::new(),
            force_nums: Vec::new(),
            physical_id_as: None,
            return_physical_id: None,
            return_attrs: None,
            ignore_error_codes: Vec::new(),
        }
    }

    /// Only pass these (dotted) keys to the method.
    #[must_use]
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(strings(keys));
        self
    }

    /// Rename top-level keys.
    #[must_use]
    pub fn map_keys<I, K, V>(mut self, mapping: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.map_keys = mapping
            .into_iter()
            .map(|(from, to)| (from.into(), to.into()))
            .collect();
        self
    }

    /// Lower-case the first letter of every top-level key.
    #[must_use]
    pub fn downcase(mut self) -> Self {
        self.downcase = true;
        self
    }

    /// Coerce the values at these dotted paths (`*` matches any key or index) to booleans.
    #[must_use]
    pub fn force_bools<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_bools = strings(paths);
        self
    }

    /// Coerce the values at these dotted paths (`*` matches any key or index) to numbers.
    #[must_use]
    pub fn force_nums<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_nums = strings(paths);
        self
    }

    /// Pass the physical id to the method under `key`.
    #[must_use]
    pub fn physical_id_as(mut self, key: impl Into<String>) -> Self {
        self.physical_id_as = Some(key.into());
        self
    }

    /// Read the physical id from the response at a dotted path.
    #[must_use]
    pub fn return_physical_id(mut self, path: impl Into<String>) -> Self {
        self.return_physical_id = Some(PhysicalIdSource::Key(path.into()));
        self
    }

    /// Derive the physical id from `(response, params)`.
    #[must_use]
    pub fn return_physical_id_with<F>(mut self, derive: F) -> Self
    where
        F: Fn(&Value, &Value) -> Option<String> + Send + Sync + 'static,
    {
        self.return_physical_id = Some(PhysicalIdSource::Derive(Arc::new(derive)));
        self
    }

    /// Expose these (dotted) response keys as attributes.
    #[must_use]
    pub fn return_attrs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.return_attrs = Some(AttrsSource::Keys(strings(keys)));
        self
    }

    /// Derive attributes from the response.
    #[must_use]
    pub fn return_attrs_with<F>(mut self, derive: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.return_attrs = Some(AttrsSource::Derive(Arc::new(derive)));
        self
    }

    /// Treat errors with these status codes as success without id or attributes.
    #[must_use]
    pub fn ignore_error_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.ignore_error_codes = codes.into_iter().collect();
        self
    }

    /// Create handler.
    #[must_use]
    pub fn create_handler(self) -> CreateFn {
        tracing::debug!(method = %self.method, "Aliasing method as Create operation");
        let alias = Arc::new(self);
        Arc::new(move |params, reply| Arc::clone(&alias).forward(None, params, reply))
    }

    /// Update handler; the old parameters are not forwarded.
    #[must_use]
    pub fn update_handler(self) -> UpdateFn {
        tracing::debug!(method = %self.method, "Aliasing method as Update operation");
        let alias = Arc::new(self);
        Arc::new(move |physical_id, params, _old_params, reply| {
            Arc::clone(&alias).forward(Some(physical_id), params, reply);
        })
    }

    /// Delete handler.
    #[must_use]
    pub fn delete_handler(self) -> DeleteFn {
        tracing::debug!(method = %self.method, "Aliasing method as Delete operation");
        let alias = Arc::new(self);
        Arc::new(move |physical_id, params, reply| {
            Arc::clone(&alias).forward(Some(physical_id), params, reply);
        })
    }

    /// NoUpdate handler.
    #[must_use]
    pub fn no_update_handler(self) -> NoUpdateFn {
        tracing::debug!(method = %self.method, "Aliasing method as NoUpdate operation");
        let alias = Arc::new(self);
        Arc::new(move |physical_id, params, reply| {
            Arc::clone(&alias).forward(Some(physical_id), params, reply);
        })
    }

    fn forward(self: Arc<Self>, physical_id: Option<String>, params: Value, reply: Reply) {
        tokio::spawn(async move {
            let params = without_service_token(params);
            let used = self.usable_params(physical_id, &params);
            tracing::info!(method = %self.method, params = %used, "Calling aliased method");

            let outcome = match self.api.call(&self.method, used).await {
                Ok(data) => {
                    tracing::info!(method = %self.method, response = %data, "Aliased method succeeded");
                    HandlerOutcome {
                        error: None,
                        physical_id: self.physical_id_from(&data, &params),
                        data: self.attrs_from(&data),
                    }
                }
                Err(error) if error.status_code.is_some_and(|code| self.ignore_error_codes.contains(&code)) => {
                    tracing::info!(method = %self.method, %error, "Aliased method error ignored");
                    HandlerOutcome::success()
                }
                Err(error) => {
                    tracing::warn!(method = %self.method, %error, "Aliased method had error");
                    HandlerOutcome::failure(error.message)
                }
            };
            reply.send(outcome);
        });
    }

    fn usable_params(&self, physical_id: Option<String>, params: &Value) -> Value {
        let mut params = match params {
            Value::Object(_) => params.clone(),
            _ => Value::Object(Map::new()),
        };

        for path in &self.force_bools {
            force_path(&mut params, path, &to_bool);
        }
        for path in &self.force_nums {
            force_path(&mut params, path, &to_number);
        }

        let Value::Object(mut map) = params else {
            return params;
        };

        if let Some(alias) = &self.physical_id_as {
            map.insert(alias.clone(), physical_id.map_or(Value::Null, Value::String));
        }

        if let Some(keys) = &self.keys {
            map = key_filter(keys, &Value::Object(map));
        }

        if !self.map_keys.is_empty() {
            map = map
                .into_iter()
                .map(|(key, value)| {
                    let mapped = self
                        .map_keys
                        .iter()
                        .find(|(from, _)| *from == key)
                        .map_or(key, |(_, to)| to.clone());
                    (mapped, value)
                })
                .collect();
        }

        if self.downcase {
            map = map
                .into_iter()
                .map(|(key, value)| (downcase_first(&key), value))
                .collect();
        }

        Value::Object(map)
    }

    fn physical_id_from(&self, data: &Value, params: &Value) -> Option<String> {
        match self.return_physical_id.as_ref()? {
            PhysicalIdSource::Key(path) => match access(data, path)? {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            },
            PhysicalIdSource::Derive(derive) => derive(data, params),
        }
    }

    fn attrs_from(&self, data: &Value) -> Option<Value> {
        match self.return_attrs.as_ref()? {
            AttrsSource::Keys(keys) => Some(Value::Object(key_filter(keys, data))),
            AttrsSource::Derive(derive) => derive(data),
        }
    }
}

fn without_service_token(params: Value) -> Value {
    match params {
        Value::Object(mut map) => {
            map.remove(SERVICE_TOKEN);
            Value::Object(map)
        }
        other => other,
    }
}

/// Follow a dotted path through objects and arrays.
fn access<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |node, key| match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}

/// Keep only `keys` (dotted paths), keyed by the full path.
fn key_filter(keys: &[String], data: &Value) -> Map<String, Value> {
    keys.iter()
        .filter_map(|key| access(data, key).map(|value| (key.clone(), value.clone())))
        .collect()
}

fn downcase_first(key: &str) -> String {
    let mut chars = key.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    })
}

fn child_mut<'a>(node: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => map.get_mut(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get_mut(index)),
        _ => None,
    }
}

/// Apply `translate` at every location matched by the dotted `path`.
///
/// A `None` translation removes an object entry and nulls an array element. Paths that do
/// not resolve are skipped.
fn force_path(params: &mut Value, path: &str, translate: &dyn Fn(&Value) -> Option<Value>) {
    let segments: Vec<&str> = path.split('.').collect();
    force_segments(params, &segments, translate);
}

fn force_segments(node: &mut Value, segments: &[&str], translate: &dyn Fn(&Value) -> Option<Value>) {
    match segments {
        [] => {}
        ["*"] => match node {
            Value::Array(items) => {
                for item in items.iter_mut() {
                    *item = translate(item).unwrap_or(Value::Null);
                }
            }
            Value::Object(map) => {
                let keys: Vec<String> = map.keys().cloned().collect();
                for key in keys {
                    translate_entry(map, &key, translate);
                }
            }
            _ => {}
        },
        [last] => match node {
            Value::Object(map) => translate_entry(map, last, translate),
            Value::Array(items) => {
                if let Some(item) = last.parse::<usize>().ok().and_then(|index| items.get_mut(index)) {
                    *item = translate(item).unwrap_or(Value::Null);
                }
            }
            _ => {}
        },
        ["*", rest @ ..] => match node {
            Value::Array(items) => {
                for item in items.iter_mut() {
                    force_segments(item, rest, translate);
                }
            }
            Value::Object(map) => {
                for value in map.values_mut() {
                    force_segments(value, rest, translate);
                }
            }
            _ => {}
        },
        [first, rest @ ..] => {
            if let Some(child) = child_mut(node, first) {
                force_segments(child, rest, translate);
            }
        }
    }
}

fn translate_entry(
    map: &mut Map<String, Value>,
    key: &str,
    translate: &dyn Fn(&Value) -> Option<Value>,
) {
    let Some(current) = map.get(key) else {
        return;
    };
    match translate(current) {
        Some(value) => {
            map.insert(key.to_owned(), value);
        }
        None => {
            map.remove(key);
        }
    }
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => Some("null".to_owned()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// `"0" "false" "" "null" "undefined"` → false, `"1" "true"` → true, anything else → removed.
fn to_bool(value: &Value) -> Option<Value> {
    match coerce_text(value)?.as_str() {
        "0" | "false" | "" | "null" | "undefined" => Some(Value::Bool(false)),
        "1" | "true" => Some(Value::Bool(true)),
        _ => None,
    }
}

/// Numeric coercion; text that is not a number becomes `null`.
fn to_number(value: &Value) -> Option<Value> {
    let number = match value {
        Value::Number(_) => return Some(value.clone()),
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    };
    Some(number_value(number))
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
        Value::from(number as i64)
    } else {
        serde_json::Number::from_f64(number).map_or(Value::Null, Value::Number)
    }
}
