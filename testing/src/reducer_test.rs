//! Given-When-Then harness for reducers.
//!
//! The dispatcher is usually exercised over several actions (an event arrives, a handler
//! signals, the reply settles), so the harness applies a sequence of actions and checks
//! the state after the last one together with the effects that action produced.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use cfn_resource_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use cfn_resource_testing::ReducerTest;
///
/// ReducerTest::new(DispatchReducer)
///     .with_env(environment)
///     .given_state(DispatchState::default())
///     .when_action(DispatchAction::Received(Box::new(create_event(json!({})))))
///     .then_action(DispatchAction::HandlerSignalled { signal, completion: Completion::Direct })
///     .then_state(|state| assert!(state.reply.is_some()))
///     .then_effects(|effects| assert_effects_count(effects, 1))
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    actions: Vec<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Set the first action (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.actions.clear();
        self.actions.push(action);
        self
    }

    /// Apply another action after the previous ones, ignoring their effects
    #[must_use]
    pub fn then_action(mut self, action: A) -> Self {
        self.actions.push(action);
        self
    }

    /// Add an assertion about the state after the last action (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the effects of the last action (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");
        let env = self
            .environment
            .expect("Environment must be set with with_env()");
        assert!(!self.actions.is_empty(), "Action must be set with when_action()");

        let mut effects = Vec::new();
        for action in self.actions {
            effects = self.reducer.reduce(&mut state, action, &env).into_vec();
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }
        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use cfn_resource_core::effect::Effect;
    use std::time::Duration;

    /// Assert that no effects were produced
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty
    #[allow(clippy::panic)]
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(effects.is_empty(), "Expected no effects, but got: {effects:?}");
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the count differs
    #[allow(clippy::panic)]
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {expected} effects, but got {}",
            effects.len()
        );
    }

    /// Assert that some effect is an `Effect::Future` (handler, transport or invoke call)
    ///
    /// # Panics
    ///
    /// Panics if there is none
    #[allow(clippy::panic)]
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect"
        );
    }

    /// Assert that some effect is an `Effect::Delay` of `duration` and return its action
    ///
    /// # Panics
    ///
    /// Panics if there is none
    #[allow(clippy::panic)]
    pub fn assert_delay_effect<A>(effects: &[Effect<A>], duration: Duration) -> &A {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Delay { duration: d, action } if *d == duration => Some(action.as_ref()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("Expected a Delay effect of {duration:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::assertions::{assert_delay_effect, assert_effects_count, assert_no_effects};
    use super::*;
    use cfn_resource_core::smallvec;
    use cfn_resource_core::SmallVec;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    enum TickAction {
        Tick,
        Later,
    }

    struct TickReducer;

    impl Reducer for TickReducer {
        type State = u32;
        type Action = TickAction;
        type Environment = Duration;

        fn reduce(&self, state: &mut u32, action: TickAction, env: &Duration) -> SmallVec<[Effect<TickAction>; 4]> {
            match action {
                TickAction::Tick => {
                    *state += 1;
                    SmallVec::new()
                }
                TickAction::Later => smallvec![Effect::Delay {
                    duration: *env,
                    action: Box::new(TickAction::Tick),
                }],
            }
        }
    }

    #[test]
    fn state_accumulates_over_actions() {
        ReducerTest::new(TickReducer)
            .with_env(Duration::from_secs(1))
            .given_state(0)
            .when_action(TickAction::Tick)
            .then_action(TickAction::Tick)
            .then_state(|state| assert_eq!(*state, 2))
            .then_effects(assert_no_effects)
            .run();
    }

    #[test]
    fn effects_come_from_the_last_action() {
        ReducerTest::new(TickReducer)
            .with_env(Duration::from_secs(5))
            .given_state(0)
            .when_action(TickAction::Tick)
            .then_action(TickAction::Later)
            .then_effects(|effects| {
                assert_effects_count(effects, 1);
                assert_eq!(assert_delay_effect(effects, Duration::from_secs(5)), &TickAction::Tick);
            })
            .run();
    }
}
