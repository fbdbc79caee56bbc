//! Handler signatures and the reply continuation.
//!
//! Every handler receives a [`Reply`]: a one-shot continuation that must be used exactly
//! once. Consuming methods make a second reply impossible, and dropping a `Reply` without
//! using it is observed by the dispatcher as a failure, so every invocation still ends with
//! exactly one reply.
//!
//! Handlers written as `async` functions are bridged to the callback convention by the
//! `adapt_*` functions.

use crate::environment::LambdaEnvironment;
use crate::reply::HandlerOutcome;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Reason used when a handler drops its [`Reply`] without using it.
pub const HANDLER_DROPPED_REPLY: &str = "Handler completed without replying.";

/// Reason prefix used when a handler or poll method panics.
pub const HANDLER_PANICKED: &str = "Handler panicked";

/// Reason used when an async handler fails with an empty message.
pub const ASYNC_HANDLER_NO_MESSAGE: &str = "Async handler failed without an error message.";

/// What a handler or poll method signalled.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// A final outcome
    Reply(HandlerOutcome),
    /// The long-running operation has not stabilized yet (poll methods only)
    NotDone,
}

/// One-shot continuation handed to Create/Update/Delete/NoUpdate handlers.
#[derive(Debug)]
pub struct Reply {
    sender: oneshot::Sender<Signal>,
    environment: Arc<LambdaEnvironment>,
}

impl Reply {
    /// Create a continuation and the receiver its signal arrives on.
    #[must_use]
    pub fn channel(environment: Arc<LambdaEnvironment>) -> (Self, oneshot::Receiver<Signal>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender,
                environment,
            },
            receiver,
        )
    }

    /// The function serving this invocation.
    #[must_use]
    pub fn environment(&self) -> &LambdaEnvironment {
        &self.environment
    }

    /// Report the outcome.
    pub fn send(self, outcome: HandlerOutcome) {
        // The receiver is gone only once the invocation has already settled.
        let _ = self.sender.send(Signal::Reply(outcome));
    }

    /// Report success without an id or data.
    pub fn success(self) {
        self.send(HandlerOutcome::success());
    }

    /// Report failure with `reason`.
    pub fn fail(self, reason: impl Into<String>) {
        self.send(HandlerOutcome::failure(reason));
    }

    /// Report the result of an async handler.
    pub fn settle(self, result: Result<HandlerResult, HandlerError>) {
        self.send(outcome_from_result(result));
    }
}

/// Continuation handed to long-running poll methods.
///
/// In addition to the final outcome it can signal that the operation is not done yet.
#[derive(Debug)]
pub struct PollReply(Reply);

impl PollReply {
    /// Create a continuation and the receiver its signal arrives on.
    #[must_use]
    pub fn channel(environment: Arc<LambdaEnvironment>) -> (Self, oneshot::Receiver<Signal>) {
        let (reply, receiver) = Reply::channel(environment);
        (Self(reply), receiver)
    }

    /// The function serving this invocation.
    #[must_use]
    pub fn environment(&self) -> &LambdaEnvironment {
        self.0.environment()
    }

    /// Ask for another ping round.
    pub fn not_done(self) {
        let _ = self.0.sender.send(Signal::NotDone);
    }

    /// The operation stabilized (or failed) with `outcome`.
    pub fn send(self, outcome: HandlerOutcome) {
        self.0.send(outcome);
    }

    /// Stabilized without an id or data.
    pub fn success(self) {
        self.0.success();
    }

    /// Failed with `reason`.
    pub fn fail(self, reason: impl Into<String>) {
        self.0.fail(reason);
    }
}

/// `Create(params, reply)`
pub type CreateFn = Arc<dyn Fn(Value, Reply) + Send + Sync>;

/// `Update(physical_id, params, old_params, reply)`
pub type UpdateFn = Arc<dyn Fn(String, Value, Value, Reply) + Send + Sync>;

/// `Delete(physical_id, params, reply)`
pub type DeleteFn = Arc<dyn Fn(String, Value, Reply) + Send + Sync>;

/// `NoUpdate(physical_id, params, reply)`
pub type NoUpdateFn = Arc<dyn Fn(String, Value, Reply) + Send + Sync>;

/// Successful result of an async handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerResult {
    /// Physical resource id
    pub physical_resource_id: Option<String>,
    /// Attributes exposed to `Fn::GetAtt`
    pub fn_get_attrs_data_obj: Option<Value>,
}

/// Error type async handlers fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by async handlers.
pub type HandlerFuture = BoxFuture<'static, Result<HandlerResult, HandlerError>>;

/// Async `Create(params)`
pub type AsyncCreateFn = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Async `Update(physical_id, params, old_params)`
pub type AsyncUpdateFn = Arc<dyn Fn(String, Value, Value) -> HandlerFuture + Send + Sync>;

/// Async `Delete(physical_id, params)`
pub type AsyncDeleteFn = Arc<dyn Fn(String, Value) -> HandlerFuture + Send + Sync>;

/// Async `NoUpdate(physical_id, params)`
pub type AsyncNoUpdateFn = Arc<dyn Fn(String, Value) -> HandlerFuture + Send + Sync>;

fn outcome_from_result(result: Result<HandlerResult, HandlerError>) -> HandlerOutcome {
    match result {
        Ok(HandlerResult {
            physical_resource_id,
            fn_get_attrs_data_obj,
        }) => HandlerOutcome {
            error: None,
            physical_id: physical_resource_id,
            data: fn_get_attrs_data_obj,
        },
        Err(error) => {
            let message = error.to_string();
            if message.is_empty() {
                HandlerOutcome::failure(ASYNC_HANDLER_NO_MESSAGE)
            } else {
                HandlerOutcome::failure(message)
            }
        }
    }
}

fn settle_later(future: HandlerFuture, reply: Reply) {
    tokio::spawn(async move { reply.settle(future.await) });
}

/// Bridge an async Create handler to the callback convention.
#[must_use]
pub fn adapt_create(handler: AsyncCreateFn) -> CreateFn {
    Arc::new(move |params, reply| settle_later(handler(params), reply))
}

/// Bridge an async Update handler to the callback convention.
#[must_use]
pub fn adapt_update(handler: AsyncUpdateFn) -> UpdateFn {
    Arc::new(move |physical_id, params, old_params, reply| {
        settle_later(handler(physical_id, params, old_params), reply);
    })
}

/// Bridge an async Delete handler to the callback convention.
#[must_use]
pub fn adapt_delete(handler: AsyncDeleteFn) -> DeleteFn {
    Arc::new(move |physical_id, params, reply| settle_later(handler(physical_id, params), reply))
}

/// Bridge an async NoUpdate handler to the callback convention.
#[must_use]
pub fn adapt_no_update(handler: AsyncNoUpdateFn) -> NoUpdateFn {
    Arc::new(move |physical_id, params, reply| settle_later(handler(physical_id, params), reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn environment() -> Arc<LambdaEnvironment> {
        Arc::new(LambdaEnvironment {
            lambda_arn: "arn:aws:lambda:fake-region-1:012345678910:function:Test".to_owned(),
            region: "fake-region-1".to_owned(),
            account_id: "012345678910".to_owned(),
            lambda_name: "Test".to_owned(),
        })
    }

    #[derive(Debug)]
    struct Silent;

    impl std::fmt::Display for Silent {
        fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            Ok(())
        }
    }

    impl std::error::Error for Silent {}

    #[tokio::test]
    async fn dropped_reply_closes_the_channel() {
        let (reply, receiver) = Reply::channel(environment());
        drop(reply);
        assert!(receiver.await.is_err());
    }

    #[tokio::test]
    async fn reply_exposes_environment() {
        let (reply, _receiver) = Reply::channel(environment());
        assert_eq!(reply.environment().region, "fake-region-1");
    }

    #[tokio::test]
    async fn poll_reply_can_signal_not_done() {
        let (reply, receiver) = PollReply::channel(environment());
        reply.not_done();
        assert_eq!(receiver.await.ok(), Some(Signal::NotDone));
    }

    #[tokio::test]
    async fn async_create_result_becomes_outcome() {
        let create = adapt_create(Arc::new(|params: Value| {
            Box::pin(async move {
                assert_eq!(params, json!({ "Foo": "Bar" }));
                Ok(HandlerResult {
                    physical_resource_id: Some("yopadope".to_owned()),
                    fn_get_attrs_data_obj: Some(json!({ "MyObj": "dopeayope" })),
                })
            }) as HandlerFuture
        }));

        let (reply, receiver) = Reply::channel(environment());
        create(json!({ "Foo": "Bar" }), reply);

        assert_eq!(
            receiver.await.ok(),
            Some(Signal::Reply(
                HandlerOutcome::success()
                    .with_physical_id("yopadope")
                    .with_data(json!({ "MyObj": "dopeayope" }))
            ))
        );
    }

    #[tokio::test]
    async fn async_update_error_message_becomes_reason() {
        let update = adapt_update(Arc::new(|_id, _params, _old| {
            Box::pin(async { Err::<HandlerResult, HandlerError>("Worked, it did not".into()) })
                as HandlerFuture
        }));

        let (reply, receiver) = Reply::channel(environment());
        update("someFakeId".to_owned(), json!({}), json!({}), reply);

        assert_eq!(
            receiver.await.ok(),
            Some(Signal::Reply(HandlerOutcome::failure("Worked, it did not")))
        );
    }

    #[tokio::test]
    async fn async_error_without_message_gets_placeholder() {
        let delete = adapt_delete(Arc::new(|_id, _params| {
            Box::pin(async { Err::<HandlerResult, HandlerError>(Box::new(Silent)) }) as HandlerFuture
        }));

        let (reply, receiver) = Reply::channel(environment());
        delete("someFakeId".to_owned(), json!({}), reply);

        assert_eq!(
            receiver.await.ok(),
            Some(Signal::Reply(HandlerOutcome::failure(ASYNC_HANDLER_NO_MESSAGE)))
        );
    }

    #[tokio::test]
    async fn async_no_update_receives_positional_arguments() {
        let no_update = adapt_no_update(Arc::new(|id: String, params: Value| {
            Box::pin(async move {
                Ok(HandlerResult {
                    physical_resource_id: Some(id),
                    fn_get_attrs_data_obj: Some(params),
                })
            }) as HandlerFuture
        }));

        let (reply, receiver) = Reply::channel(environment());
        no_update("someFakeId".to_owned(), json!({ "Foo": "Bar" }), reply);

        assert_eq!(
            receiver.await.ok(),
            Some(Signal::Reply(
                HandlerOutcome::success()
                    .with_physical_id("someFakeId")
                    .with_data(json!({ "Foo": "Bar" }))
            ))
        );
    }
}
