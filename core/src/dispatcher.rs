//! The request dispatcher state machine.
//!
//! [`DispatchReducer`] turns one inbound [`Event`] into exactly one reply document (or
//! exactly one accepted self re-invocation), followed by exactly one call to
//! [`InvocationContext::done`]. All I/O is described as effects:
//!
//! - handlers and poll methods run inside `Effect::Future` and feed their signal back as
//!   [`DispatchAction::HandlerSignalled`],
//! - the reply PUT runs inside `Effect::Future` and feeds back
//!   [`DispatchAction::ReplySettled`],
//! - the wait between pings is an `Effect::Delay` carrying [`DispatchAction::PingDue`].
//!
//! ```text
//! Idle ──Received──▶ Handling ──HandlerSignalled──▶ Replying ──ReplySettled──▶ Done
//!   │                   │                             ▲
//!   │                   └──(long-running)──▶ Pinging ─┤ PingbackFailed
//!   │                                           │
//!   │                                           └─PingbackAccepted──▶ Done
//!   └──(invalid, no-op, exceeded, unknown)──▶ Replying
//! ```
//!
//! Actions that do not fit the current phase are ignored, so late or duplicated signals
//! can never produce a second reply or a second termination.

use crate::SmallVec;
use crate::definition::ResourceDefinition;
use crate::effect::Effect;
use crate::environment::{InvocationContext, LambdaEnvironment, ResponseTransport};
use crate::event::{Event, LongRunningRequestContext, RequestType};
use crate::handler::{
    CreateFn, DeleteFn, HANDLER_DROPPED_REPLY, HANDLER_PANICKED, NoUpdateFn, PollReply, Reply,
    Signal, UpdateFn,
};
use crate::json::{expand_defaults, params_equal};
use crate::long_running::{
    CONTEXT_WITHOUT_CONFIGURATION, LongRunning, PollCreateFn, PollDeleteFn, PollUpdateFn,
    pingback_failure_reason,
};
use crate::reducer::Reducer;
use crate::reply::{HandlerOutcome, ReplyDocument};
use crate::smallvec;
use crate::validation::check_if_invalid;
use futures::FutureExt as _;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Reason sent for request types this dispatcher does not know.
pub const UNKNOWN_REQUEST_TYPE: &str =
    "The impossible happend! CloudFormation sent an unknown RequestType.";

/// Reason used when a long-running round has no way to re-invoke the function.
pub const NO_INVOKER: &str = "no self-invoke capability is configured";

/// Reason sent when the resource defines no handler for the request type.
#[must_use]
pub fn missing_handler_reason(request_type: RequestType) -> String {
    format!("FATAL: No {request_type} handler is defined for this resource.")
}

/// Where a handler's signal is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Straight to the transport
    Direct,
    /// First operation of a long-running request: success starts the ping cycle
    LongRunning,
    /// A poll method: not-done schedules another round
    Poll,
}

/// Actions driving the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    /// The inbound event
    Received(Box<Event>),
    /// A handler or poll method signalled
    HandlerSignalled {
        /// What was signalled
        signal: Signal,
        /// How to route it
        completion: Completion,
    },
    /// The ping interval elapsed; re-invoke with `context`
    PingDue {
        /// Context for the next round
        context: LongRunningRequestContext,
    },
    /// The self re-invocation was accepted
    PingbackAccepted,
    /// The self re-invocation could not be started
    PingbackFailed {
        /// Failure reason sent to the orchestrator
        reason: String,
        /// Physical id carried by the pending round
        physical_id: Option<String>,
    },
    /// The reply PUT finished, with the HTTP status or the transport error
    ReplySettled {
        /// Outcome of the PUT
        result: Result<u16, String>,
    },
}

/// Progress of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Waiting for the event
    #[default]
    Idle,
    /// A handler or poll method is running
    Handling,
    /// Waiting to re-invoke for the next ping round
    Pinging,
    /// The reply is being delivered
    Replying,
    /// Termination has been signalled
    Done,
}

/// State of one invocation.
#[derive(Debug, Clone, Default)]
pub struct DispatchState {
    /// The inbound event, once received
    pub event: Option<Event>,
    /// Parameters after stripping and default expansion
    pub params: Option<Value>,
    /// Prior parameters after stripping and default expansion
    pub old_params: Option<Value>,
    /// Current phase
    pub phase: Phase,
    /// The reply document, once produced
    pub reply: Option<ReplyDocument>,
}

impl DispatchState {
    /// Whether the invocation has signalled termination.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }
}

/// Collaborators for one invocation.
#[derive(Clone)]
pub struct DispatchEnvironment {
    /// The resource being served
    pub definition: Arc<ResourceDefinition>,
    /// Identity of the running function
    pub lambda: Arc<LambdaEnvironment>,
    /// Reply delivery
    pub transport: Arc<dyn ResponseTransport>,
    /// Termination hook
    pub context: Arc<dyn InvocationContext>,
}

/// The dispatcher reducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchReducer;

type Effects = SmallVec<[Effect<DispatchAction>; 4]>;

/// A handler or poll method bound to its arguments.
enum Call {
    Create(CreateFn, Value),
    Update(UpdateFn, String, Value, Value),
    Delete(DeleteFn, String, Value),
    NoUpdate(NoUpdateFn, String, Value),
    PollCreate(PollCreateFn, LongRunningRequestContext, Value),
    PollUpdate(PollUpdateFn, LongRunningRequestContext, String, Value, Value),
    PollDelete(PollDeleteFn, LongRunningRequestContext, String, Value),
}

impl Call {
    fn into_effect(self, lambda: Arc<LambdaEnvironment>, completion: Completion) -> Effect<DispatchAction> {
        Effect::future(async move {
            let signal = AssertUnwindSafe(self.run(lambda))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let reason = handler_panicked_reason(payload.as_ref());
                    tracing::error!(%reason, "Handler panicked");
                    Signal::Reply(HandlerOutcome::failure(reason))
                });
            Some(DispatchAction::HandlerSignalled { signal, completion })
        })
    }

    /// Call the handler and wait for its signal.
    async fn run(self, lambda: Arc<LambdaEnvironment>) -> Signal {
        let receiver = match self {
            Self::Create(handler, params) => {
                let (reply, receiver) = Reply::channel(lambda);
                handler(params, reply);
                receiver
            }
            Self::Update(handler, id, params, old) => {
                let (reply, receiver) = Reply::channel(lambda);
                handler(id, params, old, reply);
                receiver
            }
            Self::Delete(handler, id, params) | Self::NoUpdate(handler, id, params) => {
                let (reply, receiver) = Reply::channel(lambda);
                handler(id, params, reply);
                receiver
            }
            Self::PollCreate(method, context, params) => {
                let (reply, receiver) = PollReply::channel(lambda);
                method(context, params, reply);
                receiver
            }
            Self::PollUpdate(method, context, id, params, old) => {
                let (reply, receiver) = PollReply::channel(lambda);
                method(context, id, params, old, reply);
                receiver
            }
            Self::PollDelete(method, context, id, params) => {
                let (reply, receiver) = PollReply::channel(lambda);
                method(context, id, params, reply);
                receiver
            }
        };
        receiver
            .await
            .unwrap_or_else(|_| Signal::Reply(HandlerOutcome::failure(HANDLER_DROPPED_REPLY)))
    }
}

fn handler_panicked_reason(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str));
    match message {
        Some(message) => format!("{HANDLER_PANICKED}: {message}"),
        None => HANDLER_PANICKED.to_owned(),
    }
}

impl DispatchReducer {
    fn received(&self, state: &mut DispatchState, event: Event, env: &DispatchEnvironment) -> Effects {
        tracing::info!(
            request = %serde_json::to_string(&event).unwrap_or_default(),
            "REQUEST RECEIVED"
        );
        metrics::counter!("cfn_resource.requests.total", "request_type" => event.request_type.to_string())
            .increment(1);

        let expanded = event
            .params()
            .as_ref()
            .map(expand_defaults)
            .transpose()
            .and_then(|params| {
                let old = event.old_params().as_ref().map(expand_defaults).transpose()?;
                Ok((params, old))
            });
        let request_type = event.request_type;
        let has_context = event.long_running_request_context.is_some();
        state.event = Some(event);

        match expanded {
            Ok((params, old_params)) => {
                state.params = params;
                state.old_params = old_params;
            }
            // A continuation always goes to the engine; its round already expanded these trees.
            Err(error) if has_context => {
                tracing::warn!(%error, "Carried parameters failed to expand; polling with them as received");
                state.params = state.event.as_ref().and_then(Event::params);
                state.old_params = state.event.as_ref().and_then(Event::old_params);
            }
            Err(error) => return self.invalid(state, env, request_type, error.to_string()),
        }

        if has_context {
            return self.poll(state, env);
        }

        if let Some(invalidation) = check_if_invalid(state.params.as_ref(), &env.definition.validation) {
            return self.invalid(state, env, request_type, invalidation);
        }

        self.classify(state, env)
    }

    fn invalid(
        &self,
        state: &mut DispatchState,
        env: &DispatchEnvironment,
        request_type: RequestType,
        invalidation: String,
    ) -> Effects {
        if request_type == RequestType::Delete {
            tracing::info!(%invalidation, "Delete of invalid resource skipped");
            return self.reply(state, env, HandlerOutcome::success());
        }
        self.reply(state, env, HandlerOutcome::failure(invalidation))
    }

    fn classify(&self, state: &mut DispatchState, env: &DispatchEnvironment) -> Effects {
        let Some(event) = state.event.as_ref() else {
            return SmallVec::new();
        };
        let definition = &env.definition;
        let request_type = event.request_type;
        let physical_id = event.physical_resource_id.clone().unwrap_or_default();
        let params = state.params.clone().unwrap_or(Value::Null);
        let old_params = state.old_params.clone().unwrap_or(Value::Null);

        let completion = match &definition.long_running {
            Some(config) if config.applies_to(request_type) => Completion::LongRunning,
            _ => Completion::Direct,
        };

        let (handler_type, call) = match request_type {
            RequestType::Create => (
                RequestType::Create,
                definition.create.clone().map(|handler| Call::Create(handler, params)),
            ),
            RequestType::Update if params_equal(state.params.as_ref(), state.old_params.as_ref()) => {
                tracing::info!("Parameters unchanged; treating Update as a no-op");
                let Some(handler) = definition.no_update.clone() else {
                    return self.reply(state, env, HandlerOutcome::success());
                };
                return self.handle(state, env, Call::NoUpdate(handler, physical_id, params), Completion::Direct);
            }
            RequestType::Update if self.requires_replacement(state, definition) => {
                tracing::info!("Replacement triggered; delegating Update to the Create handler");
                (
                    RequestType::Create,
                    definition.create.clone().map(|handler| Call::Create(handler, params)),
                )
            }
            RequestType::Update => (
                RequestType::Update,
                definition
                    .update
                    .clone()
                    .map(|handler| Call::Update(handler, physical_id, params, old_params)),
            ),
            RequestType::Delete => (
                RequestType::Delete,
                definition
                    .delete
                    .clone()
                    .map(|handler| Call::Delete(handler, physical_id, params)),
            ),
            RequestType::Unknown => {
                return self.reply(state, env, HandlerOutcome::failure(UNKNOWN_REQUEST_TYPE));
            }
        };

        match call {
            Some(call) => self.handle(state, env, call, completion),
            None => self.reply(state, env, HandlerOutcome::failure(missing_handler_reason(handler_type))),
        }
    }

    /// Whether any replacement-trigger key differs between the new and old parameters.
    fn requires_replacement(&self, state: &DispatchState, definition: &ResourceDefinition) -> bool {
        definition.triggers_replacement.iter().any(|key| {
            let current = state.params.as_ref().and_then(|p| p.get(key));
            let old = state.old_params.as_ref().and_then(|p| p.get(key));
            !params_equal(current, old)
        })
    }

    fn poll(&self, state: &mut DispatchState, env: &DispatchEnvironment) -> Effects {
        let Some(event) = state.event.as_ref() else {
            return SmallVec::new();
        };
        let Some(context) = event.long_running_request_context.clone() else {
            return SmallVec::new();
        };
        let Some(config) = env.definition.long_running.as_ref() else {
            return self.reply(state, env, HandlerOutcome::failure(CONTEXT_WITHOUT_CONFIGURATION));
        };

        if config.is_exceeded(&context) {
            tracing::warn!(
                passed_pings = context.passed_pings,
                max_pings = config.max_pings,
                "Long-running resource exceeded its ping budget"
            );
            return self.reply(state, env, HandlerOutcome::failure(config.exceeded_reason()));
        }

        let physical_id = event
            .physical_resource_id
            .clone()
            .or_else(|| context.physical_resource_id.clone())
            .unwrap_or_default();
        let params = state.params.clone().unwrap_or(Value::Null);
        let old_params = state.old_params.clone().unwrap_or(Value::Null);

        let call = match event.request_type {
            RequestType::Create => config
                .methods
                .create
                .clone()
                .map(|method| Call::PollCreate(method, context.clone(), params)),
            RequestType::Update => config
                .methods
                .update
                .clone()
                .map(|method| Call::PollUpdate(method, context.clone(), physical_id, params, old_params)),
            RequestType::Delete => config
                .methods
                .delete
                .clone()
                .map(|method| Call::PollDelete(method, context.clone(), physical_id, params)),
            RequestType::Unknown => {
                return self.reply(state, env, HandlerOutcome::failure(UNKNOWN_REQUEST_TYPE));
            }
        };

        match call {
            Some(call) => {
                tracing::info!(passed_pings = context.passed_pings, "Polling long-running resource");
                self.handle(state, env, call, Completion::Poll)
            }
            None => {
                tracing::info!("No poll method for request type; settling with the carried response");
                let mut outcome = HandlerOutcome::success();
                outcome.physical_id = context.physical_resource_id;
                outcome.data = context.data;
                self.reply(state, env, outcome)
            }
        }
    }

    fn handle(
        &self,
        state: &mut DispatchState,
        env: &DispatchEnvironment,
        call: Call,
        completion: Completion,
    ) -> Effects {
        state.phase = Phase::Handling;
        smallvec![call.into_effect(Arc::clone(&env.lambda), completion)]
    }

    fn signalled(
        &self,
        state: &mut DispatchState,
        env: &DispatchEnvironment,
        signal: Signal,
        completion: Completion,
    ) -> Effects {
        match (completion, signal) {
            (Completion::Direct, Signal::Reply(outcome)) => self.reply(state, env, outcome),
            (Completion::LongRunning, Signal::Reply(outcome)) => {
                let Some(event) = state.event.as_ref() else {
                    return SmallVec::new();
                };
                let document = ReplyDocument::from_outcome(event, outcome, state.old_params.as_ref());
                if !document.is_success() {
                    return self.send(state, env, document);
                }
                self.schedule_ping(state, env, LongRunningRequestContext::first_round(document))
            }
            (Completion::Poll, Signal::Reply(outcome)) => self.reply(state, env, outcome),
            (Completion::Poll, Signal::NotDone) => {
                let Some(context) = state
                    .event
                    .as_ref()
                    .and_then(|event| event.long_running_request_context.as_ref())
                    .map(LongRunningRequestContext::next_round)
                else {
                    return SmallVec::new();
                };
                self.schedule_ping(state, env, context)
            }
            // A plain Reply cannot signal not-done.
            (Completion::Direct | Completion::LongRunning, Signal::NotDone) => {
                self.reply(state, env, HandlerOutcome::failure(HANDLER_DROPPED_REPLY))
            }
        }
    }

    fn schedule_ping(
        &self,
        state: &mut DispatchState,
        env: &DispatchEnvironment,
        context: LongRunningRequestContext,
    ) -> Effects {
        let Some(config) = env.definition.long_running.as_ref() else {
            return self.reply(state, env, HandlerOutcome::failure(CONTEXT_WITHOUT_CONFIGURATION));
        };
        tracing::info!(
            passed_pings = context.passed_pings,
            delay_secs = config.ping_interval.as_secs(),
            "Scheduling long-running ping"
        );
        metrics::counter!("cfn_resource.pings.scheduled.total").increment(1);
        state.phase = Phase::Pinging;
        smallvec![Effect::Delay {
            duration: config.ping_interval,
            action: Box::new(DispatchAction::PingDue { context }),
        }]
    }

    fn ping(
        &self,
        state: &mut DispatchState,
        env: &DispatchEnvironment,
        context: LongRunningRequestContext,
    ) -> Effects {
        let Some(event) = state.event.as_ref() else {
            return SmallVec::new();
        };
        let physical_id = context.physical_resource_id.clone();
        let invoker = env
            .definition
            .long_running
            .as_ref()
            .and_then(|config: &LongRunning| config.invoker.clone());
        let Some(invoker) = invoker else {
            return self.pingback_failed(state, env, pingback_failure_reason(NO_INVOKER), physical_id);
        };

        let payload = match serde_json::to_vec(&event.with_context(context)) {
            Ok(payload) => payload,
            Err(error) => {
                return self.pingback_failed(state, env, pingback_failure_reason(&error.to_string()), physical_id);
            }
        };
        let function_name = env.lambda.lambda_arn.clone();

        smallvec![Effect::future(async move {
            match invoker.invoke(&function_name, payload).await {
                Ok(()) => Some(DispatchAction::PingbackAccepted),
                Err(error) => Some(DispatchAction::PingbackFailed {
                    reason: pingback_failure_reason(&error.to_string()),
                    physical_id,
                }),
            }
        })]
    }

    fn pingback_failed(
        &self,
        state: &mut DispatchState,
        env: &DispatchEnvironment,
        reason: String,
        physical_id: Option<String>,
    ) -> Effects {
        tracing::warn!(%reason, "Long-running pingback failed");
        metrics::counter!("cfn_resource.pingback.failures.total").increment(1);
        let mut outcome = HandlerOutcome::failure(reason);
        outcome.physical_id = physical_id;
        self.reply(state, env, outcome)
    }

    fn reply(&self, state: &mut DispatchState, env: &DispatchEnvironment, outcome: HandlerOutcome) -> Effects {
        let Some(event) = state.event.as_ref() else {
            return SmallVec::new();
        };
        let document = ReplyDocument::from_outcome(event, outcome, state.old_params.as_ref());
        self.send(state, env, document)
    }

    fn send(&self, state: &mut DispatchState, env: &DispatchEnvironment, document: ReplyDocument) -> Effects {
        if state.reply.is_some() {
            return SmallVec::new();
        }
        let Some(event) = state.event.as_ref() else {
            return SmallVec::new();
        };
        let url = event.response_url.clone();

        tracing::info!(
            body = %serde_json::to_string(&document).unwrap_or_default(),
            "RESPONSE BODY"
        );
        tracing::info!(url = %url, "REPLYING TO");
        metrics::counter!("cfn_resource.replies.total", "status" => document.status.as_str()).increment(1);

        state.phase = Phase::Replying;
        state.reply = Some(document.clone());

        let transport = Arc::clone(&env.transport);
        smallvec![Effect::future(async move {
            let result = transport.send(&url, &document).await.map_err(|e| e.to_string());
            Some(DispatchAction::ReplySettled { result })
        })]
    }

    fn terminate(&self, state: &mut DispatchState, env: &DispatchEnvironment) -> Effects {
        if state.phase == Phase::Done {
            return SmallVec::new();
        }
        state.phase = Phase::Done;
        let context = Arc::clone(&env.context);
        smallvec![Effect::future(async move {
            context.done();
            None
        })]
    }
}

impl Reducer for DispatchReducer {
    type State = DispatchState;
    type Action = DispatchAction;
    type Environment = DispatchEnvironment;

    fn reduce(&self, state: &mut DispatchState, action: DispatchAction, env: &DispatchEnvironment) -> Effects {
        match (state.phase, action) {
            (Phase::Idle, DispatchAction::Received(event)) => self.received(state, *event, env),
            (Phase::Handling, DispatchAction::HandlerSignalled { signal, completion }) => {
                self.signalled(state, env, signal, completion)
            }
            (Phase::Pinging, DispatchAction::PingDue { context }) => self.ping(state, env, context),
            (Phase::Pinging, DispatchAction::PingbackAccepted) => {
                tracing::info!("Long-running pingback accepted; ending invocation without replying");
                self.terminate(state, env)
            }
            (Phase::Pinging, DispatchAction::PingbackFailed { reason, physical_id }) => {
                self.pingback_failed(state, env, reason, physical_id)
            }
            (Phase::Replying, DispatchAction::ReplySettled { result }) => {
                match result {
                    Ok(status) => tracing::info!(status, "Reply delivered"),
                    Err(error) => {
                        tracing::warn!(%error, "Reply delivery failed");
                        metrics::counter!("cfn_resource.transport.failures.total").increment(1);
                    }
                }
                self.terminate(state, env)
            }
            (phase, action) => {
                tracing::debug!(?phase, ?action, "Ignoring action outside its phase");
                SmallVec::new()
            }
        }
    }
}
