//! Lifecycle events delivered by the orchestrator.
//!
//! The event is deserialized once per invocation and never mutated afterwards. Fields the
//! dispatcher does not interpret (`ResourceType`, `ServiceToken`, ...) are kept in
//! [`Event::extra`] so that a self re-invocation reproduces the original payload.

use crate::reply::ReplyDocument;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Property injected by the orchestrator that identifies the backing function.
///
/// It is an internal service identity and is removed before parameters reach handlers.
pub const SERVICE_TOKEN: &str = "ServiceToken";

/// The kind of lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RequestType {
    /// A new resource is being created
    Create,
    /// An existing resource's properties changed
    Update,
    /// The resource is being removed
    Delete,
    /// Any request type this dispatcher does not understand
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Continuation state carried by a long-running re-invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LongRunningRequestContext {
    /// Number of ping rounds already completed
    #[serde(default)]
    pub passed_pings: u32,

    /// The reply produced by the operation that started the ping cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<ReplyDocument>,

    /// Physical id echoed from the raw response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,

    /// Attribute data echoed from the raw response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LongRunningRequestContext {
    /// Context for the first ping after an operation reported success.
    #[must_use]
    pub fn first_round(raw_response: ReplyDocument) -> Self {
        Self {
            passed_pings: 0,
            physical_resource_id: Some(raw_response.physical_resource_id.clone()),
            data: raw_response.data.clone(),
            raw_response: Some(raw_response),
        }
    }

    /// Context for the round after this one, carrying the raw response forward.
    #[must_use]
    pub fn next_round(&self) -> Self {
        Self {
            passed_pings: self.passed_pings.saturating_add(1),
            ..self.clone()
        }
    }
}

/// The inbound lifecycle request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    /// Create, Update or Delete; missing or malformed values decode as `Unknown`
    #[serde(default, deserialize_with = "lenient_request_type")]
    pub request_type: RequestType,

    /// Current parameter tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_properties: Option<Value>,

    /// Prior parameter tree (Update only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Value>,

    /// Identity of the managed resource (absent on Create)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,

    /// Stack correlation id
    #[serde(default)]
    pub stack_id: String,

    /// Request correlation id
    #[serde(default)]
    pub request_id: String,

    /// Logical id of the resource inside the template
    #[serde(default)]
    pub logical_resource_id: String,

    /// Pre-signed URL that receives the single reply
    #[serde(rename = "ResponseURL", default)]
    pub response_url: String,

    /// Present only on long-running re-invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_running_request_context: Option<LongRunningRequestContext>,

    /// Every other field of the inbound payload, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Identity used when neither the handler nor the request names one.
    #[must_use]
    pub fn synthesized_physical_id(&self) -> String {
        [
            self.stack_id.as_str(),
            self.logical_resource_id.as_str(),
            self.request_id.as_str(),
        ]
        .join("/")
    }

    /// The current parameters with the service token removed.
    #[must_use]
    pub fn params(&self) -> Option<Value> {
        self.resource_properties.as_ref().map(strip_service_token)
    }

    /// The prior parameters with the service token removed.
    #[must_use]
    pub fn old_params(&self) -> Option<Value> {
        self.old_resource_properties.as_ref().map(strip_service_token)
    }

    /// A copy of this event that resumes the operation with `context`.
    #[must_use]
    pub fn with_context(&self, context: LongRunningRequestContext) -> Self {
        Self {
            long_running_request_context: Some(context),
            ..self.clone()
        }
    }
}

/// Decode `RequestType` without failing the whole event, so the request can still be
/// answered with a FAILED reply.
fn lenient_request_type<'de, D>(deserializer: D) -> Result<RequestType, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(name) => match name.as_str() {
            "Create" => RequestType::Create,
            "Update" => RequestType::Update,
            "Delete" => RequestType::Delete,
            _ => RequestType::Unknown,
        },
        _ => RequestType::Unknown,
    })
}

/// Remove the top-level [`SERVICE_TOKEN`] key from a parameter tree.
#[must_use]
pub fn strip_service_token(params: &Value) -> Value {
    match params {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != SERVICE_TOKEN)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}
