//! # CFN Resource Core
//!
//! Core types and the request lifecycle state machine for CloudFormation custom
//! resources backed by a Lambda function.
//!
//! A single inbound lifecycle event (Create, Update, Delete, or a long-running
//! re-invocation) is turned into exactly one reply document delivered to the
//! pre-signed callback URL, or into exactly one self re-invocation that carries the
//! operation forward.
//!
//! ## Core Concepts
//!
//! - **Event**: The inbound lifecycle request ([`event::Event`])
//! - **`ResourceDefinition`**: Caller-supplied handlers, validation and long-running
//!   configuration ([`definition::ResourceDefinition`])
//! - **Reply**: The one-shot continuation every handler receives ([`handler::Reply`])
//! - **`ReplyDocument`**: The wire-level outcome ([`reply::ReplyDocument`])
//! - **Reducer**: The dispatcher state machine, a pure function
//!   `(State, Action, Environment) → Effects` ([`dispatcher::DispatchReducer`])
//! - **Effect**: Side effect descriptions executed by the runtime crate
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Explicit Effects (no hidden I/O in the reducer)
//! - Collaborators (transport, self-invoke, termination) injected via traits
//!
//! ## Example
//!
//! ```ignore
//! use cfn_resource_core::definition::ResourceDefinition;
//! use cfn_resource_core::reply::HandlerOutcome;
//!
//! let definition = ResourceDefinition::builder()
//!     .create(|params, reply| {
//!         tracing::info!(?params, "creating");
//!         reply.send(HandlerOutcome::success().with_physical_id("my-id"));
//!     })
//!     .delete(|_physical_id, _params, reply| reply.success())
//!     .build();
//! ```

pub use smallvec::{SmallVec, smallvec};

/// Lifecycle events received from the orchestrator
pub mod event;

/// Reply documents and handler outcomes
pub mod reply;

/// Lambda environment derivation and collaborator traits
pub mod environment;

/// Structural JSON equality and `__default__` template expansion
pub mod json;

/// Parameter validation (predicate, inline schema, schema file)
pub mod validation;

/// Reply continuations, handler signatures and the async adapter
pub mod handler;

/// Long-running (ping/poll) configuration and transitions
pub mod long_running;

/// Resource definitions and their builder
pub mod definition;

/// Handler factory forwarding parameters to an API client method
pub mod sdk_alias;

/// The request dispatcher state machine
pub mod dispatcher;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all decision logic and are deterministic and testable.
pub mod reducer {
    use super::{SmallVec, effect::Effect};

    /// The Reducer trait - core abstraction for the dispatcher state machine
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Inspects the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution).
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Delayed action (ping interval before a self re-invocation)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap an async block that feeds one action back into the reducer
        #[must_use]
        pub fn future<F>(fut: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(fut))
        }

        /// Whether this effect is a no-op
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

pub use definition::ResourceDefinition;
pub use dispatcher::{DispatchAction, DispatchEnvironment, DispatchReducer, DispatchState};
pub use effect::Effect;
pub use event::{Event, LongRunningRequestContext, RequestType};
pub use handler::{PollReply, Reply};
pub use reducer::Reducer;
pub use reply::{HandlerOutcome, ReplyDocument, Status};
