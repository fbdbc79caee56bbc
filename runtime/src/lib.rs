//! # CFN Resource Runtime
//!
//! Runtime for the dispatcher state machine defined in `cfn-resource-core`.
//!
//! - [`store::Store`] executes reducer effects on tokio and feeds their actions back.
//! - [`Dispatcher`] runs one invocation from inbound event to termination.
//! - [`transport::HttpsTransport`] delivers reply documents with a single HTTPS PUT.
//! - [`lambda::LambdaRuntime`] hosts the dispatcher behind the Lambda Runtime API.
//!
//! ## Example
//!
//! ```ignore
//! use cfn_resource_core::ResourceDefinition;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let definition = ResourceDefinition::builder()
//!         .create(|_params, reply| reply.success())
//!         .delete(|_id, _params, reply| reply.success())
//!         .build();
//!     cfn_resource_runtime::lambda::run(definition).await
//! }
//! ```

use cfn_resource_core::environment::{
    EnvironmentError, InvocationContext, ResponseTransport, derive_environment,
};
use cfn_resource_core::{DispatchAction, DispatchEnvironment, DispatchReducer, DispatchState, Event};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{RwLock, watch};

pub mod config;
pub mod lambda;
pub mod metrics;
pub mod telemetry;
pub mod transport;

pub use store::Store;

/// Errors that end an invocation before the dispatcher could reply.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The invoked function ARN could not be parsed
    #[error("Failed to derive the Lambda environment: {0}")]
    Environment(#[from] EnvironmentError),

    /// The inbound payload is not a lifecycle event
    #[error("Failed to decode the inbound event: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Decrements the pending-effect counter on drop and wakes `settled()` waiters at zero.
struct PendingGuard {
    pending: Arc<AtomicUsize>,
    idle: Arc<watch::Sender<()>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.send_replace(());
        }
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{Arc, AtomicUsize, Ordering, PendingGuard, RwLock, watch};
    use cfn_resource_core::effect::Effect;
    use cfn_resource_core::reducer::Reducer;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock`)
    /// 2. Reducer (the state machine)
    /// 3. Environment (injected collaborators)
    /// 4. Effect execution (with feedback loop)
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        pending_effects: Arc<AtomicUsize>,
        idle: Arc<watch::Sender<()>>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Send + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with initial state
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            let (idle, _) = watch::channel(());
            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                pending_effects: Arc::new(AtomicUsize::new(0)),
                idle: Arc::new(idle),
            }
        }

        /// Send an action to the store
        ///
        /// Reduces the action under the write lock, then starts every returned effect.
        /// Returns once the effects are started, not once they complete; use
        /// [`Store::settled`] to wait for the feedback loop to go quiet.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) {
            tracing::debug!("Processing action");

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                #[allow(clippy::cast_precision_loss)]
                metrics::histogram!("store.effects.count").record(effects.len() as f64);

                effects
            };

            tracing::trace!("Executing {} effects", effects.len());
            for effect in effects {
                self.execute_effect(effect);
            }
        }

        /// Wait until no effect is running or scheduled.
        ///
        /// Effects that feed an action back start their follow-up effects before they
        /// count as finished, so the store is only idle once the whole chain is.
        pub async fn settled(&self) {
            let mut idle = self.idle.subscribe();
            while self.pending_effects.load(Ordering::SeqCst) > 0 {
                if idle.changed().await.is_err() {
                    return;
                }
            }
        }

        /// Number of effects currently running or scheduled
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::SeqCst)
        }

        /// Read current state via a closure
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        fn track(&self) -> PendingGuard {
            self.pending_effects.fetch_add(1, Ordering::SeqCst);
            PendingGuard {
                pending: Arc::clone(&self.pending_effects),
                idle: Arc::clone(&self.idle),
            }
        }

        fn execute_effect(&self, effect: Effect<A>) {
            match effect {
                Effect::None => {
                    tracing::trace!("Executing Effect::None (no-op)");
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    tracing::trace!("Executing Effect::Future");
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);

                    let guard = self.track();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Some(action) = fut.await {
                            tracing::trace!("Effect::Future produced an action, sending to store");
                            store.send(action).await;
                        } else {
                            tracing::trace!("Effect::Future completed with no action");
                        }
                    });
                },
                Effect::Delay { duration, action } => {
                    tracing::trace!("Executing Effect::Delay (duration: {:?})", duration);
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);

                    let guard = self.track();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        tokio::time::sleep(duration).await;
                        tracing::trace!("Effect::Delay completed, sending action");
                        store.send(*action).await;
                    });
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                pending_effects: Arc::clone(&self.pending_effects),
                idle: Arc::clone(&self.idle),
            }
        }
    }
}

type DispatchStore = Store<DispatchState, DispatchAction, DispatchEnvironment, DispatchReducer>;

/// Runs invocations of one resource definition.
///
/// Each call to [`Dispatcher::dispatch`] builds a fresh [`Store`]; nothing is shared
/// between invocations besides the definition and the transport.
#[derive(Clone)]
pub struct Dispatcher {
    definition: Arc<cfn_resource_core::ResourceDefinition>,
    transport: Arc<dyn ResponseTransport>,
}

impl Dispatcher {
    /// Create a dispatcher for `definition` replying through `transport`.
    #[must_use]
    pub fn new(
        definition: cfn_resource_core::ResourceDefinition,
        transport: Arc<dyn ResponseTransport>,
    ) -> Self {
        Self {
            definition: Arc::new(definition),
            transport,
        }
    }

    /// Run one invocation to completion.
    ///
    /// Returns once the reply was delivered (or failed to deliver) and `context.done()`
    /// was called, or once a long-running re-invocation was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Environment`] when the invoked function ARN is malformed.
    /// Handler, validation and transport failures never surface here; they end up in the
    /// reply document.
    #[tracing::instrument(
        skip_all,
        fields(request_id = %event.request_id, request_type = %event.request_type)
    )]
    pub async fn dispatch(
        &self,
        event: Event,
        context: Arc<dyn InvocationContext>,
    ) -> Result<DispatchState, DispatchError> {
        let lambda = derive_environment(context.invoked_function_arn())?;
        let store: DispatchStore = Store::new(
            DispatchState::default(),
            DispatchReducer,
            DispatchEnvironment {
                definition: Arc::clone(&self.definition),
                lambda: Arc::new(lambda),
                transport: Arc::clone(&self.transport),
                context,
            },
        );

        store.send(DispatchAction::Received(Box::new(event))).await;
        store.settled().await;
        Ok(store.state(DispatchState::clone).await)
    }

    /// Decode a raw payload and run it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Decode`] for payloads that are not lifecycle events, and
    /// everything [`Dispatcher::dispatch`] returns.
    pub async fn dispatch_value(
        &self,
        payload: serde_json::Value,
        context: Arc<dyn InvocationContext>,
    ) -> Result<DispatchState, DispatchError> {
        let event: Event = serde_json::from_value(payload)?;
        self.dispatch(event, context).await
    }
}
