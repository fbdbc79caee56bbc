//! Long-running operations.
//!
//! Some operations cannot finish within one invocation. When a [`LongRunning`]
//! configuration is present, a successful Create/Update/Delete does not reply straight
//! away. Instead the function re-invokes itself after `ping_interval` with a
//! [`LongRunningRequestContext`] and the matching poll method decides, round by round,
//! whether the resource has stabilized.
//!
//! ```text
//! INITIAL ──SUCCESS──▶ ping ──▶ POLLING ──not done──▶ ping ──▶ POLLING ...
//!    │                              │
//!    └─FAILED─▶ reply               ├─outcome─▶ reply (SETTLED)
//!                                   └─PassedPings ≥ MaxPings─▶ FAILED reply (EXCEEDED)
//! ```

use crate::environment::SelfInvoker;
use crate::event::{LongRunningRequestContext, RequestType};
use crate::handler::PollReply;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Reason used when a context arrives but no configuration exists.
pub const CONTEXT_WITHOUT_CONFIGURATION: &str =
    "FATAL: LongRunningRequestContext received but no LongRunning configuration is defined.";

/// Poll method for Create: `(context, params, reply)`
pub type PollCreateFn = Arc<dyn Fn(LongRunningRequestContext, Value, PollReply) + Send + Sync>;

/// Poll method for Update: `(context, physical_id, params, old_params, reply)`
pub type PollUpdateFn =
    Arc<dyn Fn(LongRunningRequestContext, String, Value, Value, PollReply) + Send + Sync>;

/// Poll method for Delete: `(context, physical_id, params, reply)`
pub type PollDeleteFn =
    Arc<dyn Fn(LongRunningRequestContext, String, Value, PollReply) + Send + Sync>;

/// Poll methods, one per request type.
#[derive(Clone, Default)]
pub struct PollMethods {
    /// Poll method for Create
    pub create: Option<PollCreateFn>,
    /// Poll method for Update
    pub update: Option<PollUpdateFn>,
    /// Poll method for Delete
    pub delete: Option<PollDeleteFn>,
}

impl PollMethods {
    /// Whether a poll method exists for `request_type`.
    #[must_use]
    pub const fn has(&self, request_type: RequestType) -> bool {
        match request_type {
            RequestType::Create => self.create.is_some(),
            RequestType::Update => self.update.is_some(),
            RequestType::Delete => self.delete.is_some(),
            RequestType::Unknown => false,
        }
    }
}

impl fmt::Debug for PollMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollMethods")
            .field("create", &self.create.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

/// Long-running configuration of a resource.
#[derive(Clone)]
pub struct LongRunning {
    /// Delay between ping rounds
    pub ping_interval: Duration,
    /// Maximum number of ping rounds before giving up
    pub max_pings: u32,
    /// Capability to re-invoke this function
    pub invoker: Option<Arc<dyn SelfInvoker>>,
    /// Poll methods
    pub methods: PollMethods,
}

impl fmt::Debug for LongRunning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LongRunning")
            .field("ping_interval", &self.ping_interval)
            .field("max_pings", &self.max_pings)
            .field("invoker", &self.invoker.is_some())
            .field("methods", &self.methods)
            .finish()
    }
}

impl LongRunning {
    /// Configuration with the given interval and ping budget, no invoker and no methods.
    #[must_use]
    pub fn new(ping_interval: Duration, max_pings: u32) -> Self {
        Self {
            ping_interval,
            max_pings,
            invoker: None,
            methods: PollMethods::default(),
        }
    }

    /// Set the self re-invocation capability.
    #[must_use]
    pub fn with_invoker(mut self, invoker: Arc<dyn SelfInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Set the Create poll method.
    #[must_use]
    pub fn on_create<F>(mut self, method: F) -> Self
    where
        F: Fn(LongRunningRequestContext, Value, PollReply) + Send + Sync + 'static,
    {
        self.methods.create = Some(Arc::new(method));
        self
    }

    /// Set the Update poll method.
    #[must_use]
    pub fn on_update<F>(mut self, method: F) -> Self
    where
        F: Fn(LongRunningRequestContext, String, Value, Value, PollReply) + Send + Sync + 'static,
    {
        self.methods.update = Some(Arc::new(method));
        self
    }

    /// Set the Delete poll method.
    #[must_use]
    pub fn on_delete<F>(mut self, method: F) -> Self
    where
        F: Fn(LongRunningRequestContext, String, Value, PollReply) + Send + Sync + 'static,
    {
        self.methods.delete = Some(Arc::new(method));
        self
    }

    /// Whether a fresh request of `request_type` should enter the ping cycle.
    ///
    /// Requires both the invoke capability and a poll method for that type; otherwise the
    /// handler's reply is sent directly.
    #[must_use]
    pub const fn applies_to(&self, request_type: RequestType) -> bool {
        self.invoker.is_some() && self.methods.has(request_type)
    }

    /// Whether `context` has used up the ping budget.
    #[must_use]
    pub const fn is_exceeded(&self, context: &LongRunningRequestContext) -> bool {
        context.passed_pings >= self.max_pings
    }

    /// Failure reason once the ping budget is exhausted.
    #[must_use]
    pub fn exceeded_reason(&self) -> String {
        format!(
            "FATAL: LongRunning resource failed to stabilize within MaxPings ({} of {} seconds each)",
            self.max_pings,
            self.ping_interval.as_secs()
        )
    }
}

/// Failure reason when the next ping could not be started.
#[must_use]
pub fn pingback_failure_reason(error: &str) -> String {
    format!("Was unable to trigger long running pingback step: {error}")
}
