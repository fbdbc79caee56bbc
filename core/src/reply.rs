//! Reply documents sent to the orchestrator's callback URL.

use crate::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome status of a lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// The operation completed
    Success,
    /// The operation failed; `Reason` explains why
    Failed,
}

impl Status {
    /// Wire representation, also used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

/// The document PUT to `ResponseURL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplyDocument {
    /// SUCCESS or FAILED
    pub status: Status,

    /// Failure message (FAILED only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Identity of the managed resource
    #[serde(default)]
    pub physical_resource_id: String,

    /// Echoed from the request
    #[serde(default)]
    pub stack_id: String,

    /// Echoed from the request
    #[serde(default)]
    pub request_id: String,

    /// Echoed from the request
    #[serde(default)]
    pub logical_resource_id: String,

    /// Attributes exposed to `Fn::GetAtt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// What a handler reports through its [`Reply`](crate::handler::Reply).
///
/// `error` set means failure; otherwise the optional id and data describe the resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutcome {
    /// Failure message
    pub error: Option<String>,
    /// Physical resource id chosen by the handler
    pub physical_id: Option<String>,
    /// Attribute data chosen by the handler
    pub data: Option<Value>,
}

impl HandlerOutcome {
    /// A success with no id and no data.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// A failure carrying `reason`.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Set the physical resource id.
    #[must_use]
    pub fn with_physical_id(mut self, physical_id: impl Into<String>) -> Self {
        self.physical_id = Some(physical_id.into());
        self
    }

    /// Set the attribute data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether the handler reported an error.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

impl ReplyDocument {
    /// Build the reply for `event` from a handler outcome.
    ///
    /// The physical id falls back from the handler's id to the request's id, then to the id
    /// carried by a long-running context, then to `StackId/LogicalResourceId/RequestId`.
    /// Successful replies without data echo `old_params`.
    #[must_use]
    pub fn from_outcome(event: &Event, outcome: HandlerOutcome, old_params: Option<&Value>) -> Self {
        let carried = event
            .long_running_request_context
            .as_ref()
            .and_then(|ctx| ctx.physical_resource_id.as_deref());

        let physical_resource_id = non_empty(outcome.physical_id.as_deref())
            .or_else(|| non_empty(event.physical_resource_id.as_deref()))
            .or_else(|| non_empty(carried))
            .map_or_else(|| event.synthesized_physical_id(), str::to_owned);

        let (status, reason, data) = match outcome.error {
            Some(reason) => (Status::Failed, Some(reason), outcome.data),
            None => (
                Status::Success,
                None,
                outcome.data.or_else(|| old_params.cloned()),
            ),
        };

        Self {
            status,
            reason,
            physical_resource_id,
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            data,
        }
    }

    /// Shorthand for a FAILED reply with `reason`.
    #[must_use]
    pub fn failed(event: &Event, reason: impl Into<String>) -> Self {
        Self::from_outcome(event, HandlerOutcome::failure(reason), None)
    }

    /// Whether this reply reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
