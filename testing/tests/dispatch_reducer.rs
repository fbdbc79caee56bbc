//! Multi-step dispatcher transitions driven through the given/when/then harness.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use cfn_resource_core::definition::ResourceDefinition;
use cfn_resource_core::dispatcher::{Completion, DispatchAction, DispatchEnvironment, DispatchReducer, DispatchState, Phase};
use cfn_resource_core::event::LongRunningRequestContext;
use cfn_resource_core::handler::Signal;
use cfn_resource_core::long_running::LongRunning;
use cfn_resource_core::reply::{HandlerOutcome, Status};
use cfn_resource_testing::assertions::{
    assert_delay_effect, assert_effects_count, assert_has_future_effect, assert_no_effects,
};
use cfn_resource_testing::mocks::{RecordingContext, RecordingInvoker, RecordingTransport};
use cfn_resource_testing::{ReducerTest, fixtures};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PING: Duration = Duration::from_secs(30);

fn environment(definition: ResourceDefinition) -> DispatchEnvironment {
    DispatchEnvironment {
        definition: Arc::new(definition),
        lambda: Arc::new(fixtures::lambda_environment()),
        transport: RecordingTransport::new(),
        context: RecordingContext::new(),
    }
}

fn long_running() -> ResourceDefinition {
    ResourceDefinition::builder()
        .create(|_, reply| reply.success())
        .long_running(
            LongRunning::new(PING, 4)
                .with_invoker(RecordingInvoker::new())
                .on_create(|_, _, reply| reply.not_done()),
        )
        .build()
}

fn signalled(outcome: HandlerOutcome, completion: Completion) -> DispatchAction {
    DispatchAction::HandlerSignalled {
        signal: Signal::Reply(outcome),
        completion,
    }
}

#[test]
fn create_runs_the_handler() {
    let definition = ResourceDefinition::builder()
        .create(|_, reply| reply.success())
        .build();

    ReducerTest::new(DispatchReducer)
        .with_env(environment(definition))
        .given_state(DispatchState::default())
        .when_action(DispatchAction::Received(Box::new(fixtures::create_event(json!({ "Foo": "Bar" })))))
        .then_state(|state| {
            assert_eq!(state.phase, Phase::Handling);
            assert_eq!(state.params, Some(json!({ "Foo": "Bar" })));
        })
        .then_effects(|effects| {
            assert_effects_count(effects, 1);
            assert_has_future_effect(effects);
        })
        .run();
}

#[test]
fn handler_reply_is_sent_then_the_invocation_ends() {
    let definition = ResourceDefinition::builder()
        .create(|_, reply| reply.success())
        .build();

    ReducerTest::new(DispatchReducer)
        .with_env(environment(definition))
        .given_state(DispatchState::default())
        .when_action(DispatchAction::Received(Box::new(fixtures::create_event(json!({})))))
        .then_action(signalled(
            HandlerOutcome::success().with_physical_id("yopadope"),
            Completion::Direct,
        ))
        .then_action(DispatchAction::ReplySettled { result: Ok(200) })
        .then_state(|state| {
            assert!(state.is_done());
            let reply = state.reply.as_ref().unwrap();
            assert_eq!(reply.status, Status::Success);
            assert_eq!(reply.physical_resource_id, "yopadope");
        })
        .then_effects(|effects| {
            assert_effects_count(effects, 1);
            assert_has_future_effect(effects);
        })
        .run();
}

#[test]
fn failed_delivery_still_terminates() {
    let definition = ResourceDefinition::builder()
        .create(|_, reply| reply.success())
        .build();

    ReducerTest::new(DispatchReducer)
        .with_env(environment(definition))
        .given_state(DispatchState::default())
        .when_action(DispatchAction::Received(Box::new(fixtures::create_event(json!({})))))
        .then_action(signalled(HandlerOutcome::failure("nope"), Completion::Direct))
        .then_action(DispatchAction::ReplySettled {
            result: Err("getaddrinfo ENOTFOUND".to_owned()),
        })
        .then_state(|state| {
            assert!(state.is_done());
            assert_eq!(state.reply.as_ref().unwrap().reason.as_deref(), Some("nope"));
        })
        .then_effects(|effects| assert_effects_count(effects, 1))
        .run();
}

#[test]
fn initial_success_waits_one_interval_before_pinging() {
    ReducerTest::new(DispatchReducer)
        .with_env(environment(long_running()))
        .given_state(DispatchState::default())
        .when_action(DispatchAction::Received(Box::new(fixtures::create_event(json!({})))))
        .then_action(signalled(
            HandlerOutcome::success().with_physical_id("foobar"),
            Completion::LongRunning,
        ))
        .then_state(|state| {
            assert_eq!(state.phase, Phase::Pinging);
            assert!(state.reply.is_none());
        })
        .then_effects(|effects| {
            let DispatchAction::PingDue { context } = assert_delay_effect(effects, PING) else {
                panic!("delay must carry PingDue");
            };
            assert_eq!(context.passed_pings, 0);
            assert_eq!(context.physical_resource_id.as_deref(), Some("foobar"));
            let raw = context.raw_response.as_ref().unwrap();
            assert_eq!(raw.status, Status::Success);
        })
        .run();
}

#[test]
fn not_done_poll_counts_the_round() {
    let event = fixtures::create_event(json!({})).with_context(LongRunningRequestContext {
        passed_pings: 1,
        physical_resource_id: Some("foobar".to_owned()),
        ..LongRunningRequestContext::default()
    });

    ReducerTest::new(DispatchReducer)
        .with_env(environment(long_running()))
        .given_state(DispatchState::default())
        .when_action(DispatchAction::Received(Box::new(event)))
        .then_action(DispatchAction::HandlerSignalled {
            signal: Signal::NotDone,
            completion: Completion::Poll,
        })
        .then_effects(|effects| {
            let DispatchAction::PingDue { context } = assert_delay_effect(effects, PING) else {
                panic!("delay must carry PingDue");
            };
            assert_eq!(context.passed_pings, 2);
            assert_eq!(context.physical_resource_id.as_deref(), Some("foobar"));
        })
        .run();
}

#[test]
fn accepted_pingback_ends_without_a_reply() {
    ReducerTest::new(DispatchReducer)
        .with_env(environment(long_running()))
        .given_state(DispatchState::default())
        .when_action(DispatchAction::Received(Box::new(fixtures::create_event(json!({})))))
        .then_action(signalled(HandlerOutcome::success(), Completion::LongRunning))
        .then_action(DispatchAction::PingDue {
            context: LongRunningRequestContext::default(),
        })
        .then_action(DispatchAction::PingbackAccepted)
        .then_state(|state| {
            assert!(state.is_done());
            assert!(state.reply.is_none());
        })
        .then_effects(|effects| assert_effects_count(effects, 1))
        .run();
}

#[test]
fn rejected_pingback_replies_with_the_carried_id() {
    ReducerTest::new(DispatchReducer)
        .with_env(environment(long_running()))
        .given_state(DispatchState::default())
        .when_action(DispatchAction::Received(Box::new(fixtures::create_event(json!({})))))
        .then_action(signalled(HandlerOutcome::success(), Completion::LongRunning))
        .then_action(DispatchAction::PingbackFailed {
            reason: "Was unable to trigger long running pingback step: throttled".to_owned(),
            physical_id: Some("foobar".to_owned()),
        })
        .then_state(|state| {
            let reply = state.reply.as_ref().unwrap();
            assert_eq!(reply.status, Status::Failed);
            assert_eq!(reply.physical_resource_id, "foobar");
        })
        .then_effects(assert_has_future_effect)
        .run();
}

#[test]
fn late_signal_after_termination_is_ignored() {
    let definition = ResourceDefinition::builder()
        .create(|_, reply| reply.success())
        .build();

    ReducerTest::new(DispatchReducer)
        .with_env(environment(definition))
        .given_state(DispatchState::default())
        .when_action(DispatchAction::Received(Box::new(fixtures::create_event(json!({})))))
        .then_action(signalled(HandlerOutcome::success().with_physical_id("first"), Completion::Direct))
        .then_action(DispatchAction::ReplySettled { result: Ok(200) })
        .then_action(signalled(HandlerOutcome::failure("second"), Completion::Direct))
        .then_state(|state| {
            assert!(state.is_done());
            assert_eq!(state.reply.as_ref().unwrap().physical_resource_id, "first");
        })
        .then_effects(assert_no_effects)
        .run();
}
