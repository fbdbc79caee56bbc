//! # CFN Resource Testing
//!
//! Testing utilities for CloudFormation custom resources.
//!
//! This crate provides:
//! - Recording implementations of the collaborator traits (transport, self-invoke,
//!   invocation context, API client)
//! - Request fixtures
//! - A given/when/then harness for reducers
//! - proptest strategies for JSON parameter trees
//!
//! ## Example
//!
//! ```ignore
//! use cfn_resource_testing::{fixtures, mocks::{RecordingContext, RecordingTransport}};
//! use cfn_resource_runtime::Dispatcher;
//!
//! #[tokio::test]
//! async fn create_replies_success() {
//!     let transport = RecordingTransport::new();
//!     let dispatcher = Dispatcher::new(definition(), transport.clone());
//!
//!     dispatcher
//!         .dispatch(fixtures::create_event(json!({ "Foo": "Bar" })), RecordingContext::new())
//!         .await?;
//!
//!     assert_eq!(transport.replies().len(), 1);
//! }
//! ```

mod reducer_test;

pub use reducer_test::{ReducerTest, assertions};

/// Recording implementations of the collaborator traits.
pub mod mocks {
    use cfn_resource_core::environment::{
        InvocationContext, InvokeError, ResponseTransport, SelfInvoker, TransportError,
    };
    use cfn_resource_core::reply::ReplyDocument;
    use cfn_resource_core::sdk_alias::{ApiClient, ApiError};
    use serde_json::Value;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::sync::Notify;

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A reply PUT captured by [`RecordingTransport`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedReply {
        /// Target URL
        pub url: String,
        /// The document
        pub reply: ReplyDocument,
    }

    /// Transport that records every reply instead of sending it.
    #[derive(Debug)]
    pub struct RecordingTransport {
        replies: Mutex<Vec<RecordedReply>>,
        outcome: Result<u16, String>,
    }

    impl RecordingTransport {
        /// Transport answering every PUT with status 200.
        #[must_use]
        pub fn new() -> Arc<Self> {
            Self::answering(Ok(200))
        }

        /// Transport whose every PUT fails with `message`, as an unreachable host would.
        #[must_use]
        pub fn failing(message: impl Into<String>) -> Arc<Self> {
            Self::answering(Err(message.into()))
        }

        fn answering(outcome: Result<u16, String>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(Vec::new()),
                outcome,
            })
        }

        /// All recorded replies, oldest first.
        #[must_use]
        pub fn replies(&self) -> Vec<RecordedReply> {
            lock(&self.replies).clone()
        }

        /// The only recorded reply document, if exactly one was sent.
        #[must_use]
        pub fn single_reply(&self) -> Option<ReplyDocument> {
            match lock(&self.replies).as_slice() {
                [only] => Some(only.reply.clone()),
                _ => None,
            }
        }
    }

    impl ResponseTransport for RecordingTransport {
        fn send<'a>(
            &'a self,
            url: &'a str,
            reply: &'a ReplyDocument,
        ) -> Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send + 'a>> {
            lock(&self.replies).push(RecordedReply {
                url: url.to_owned(),
                reply: reply.clone(),
            });
            let outcome = self.outcome.clone().map_err(TransportError::Request);
            Box::pin(async move { outcome })
        }
    }

    /// A self re-invocation captured by [`RecordingInvoker`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedInvocation {
        /// Function the payload was addressed to
        pub function_name: String,
        /// Decoded payload
        pub payload: Value,
    }

    /// Self-invoker that records every re-invocation.
    #[derive(Debug)]
    pub struct RecordingInvoker {
        invocations: Mutex<Vec<RecordedInvocation>>,
        rejection: Option<String>,
    }

    impl RecordingInvoker {
        /// Invoker accepting every invocation.
        #[must_use]
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                invocations: Mutex::new(Vec::new()),
                rejection: None,
            })
        }

        /// Invoker rejecting every invocation with `message`.
        #[must_use]
        pub fn rejecting(message: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                invocations: Mutex::new(Vec::new()),
                rejection: Some(message.into()),
            })
        }

        /// All recorded invocations, oldest first.
        #[must_use]
        pub fn invocations(&self) -> Vec<RecordedInvocation> {
            lock(&self.invocations).clone()
        }
    }

    impl SelfInvoker for RecordingInvoker {
        fn invoke<'a>(
            &'a self,
            function_name: &'a str,
            payload: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<(), InvokeError>> + Send + 'a>> {
            let payload = serde_json::from_slice(&payload).unwrap_or(Value::Null);
            lock(&self.invocations).push(RecordedInvocation {
                function_name: function_name.to_owned(),
                payload,
            });
            let result = self.rejection.clone().map_or(Ok(()), |m| Err(InvokeError::Rejected(m)));
            Box::pin(async move { result })
        }
    }

    /// Invocation context counting termination signals.
    #[derive(Debug)]
    pub struct RecordingContext {
        invoked_function_arn: String,
        done: AtomicUsize,
        notify: Notify,
    }

    impl RecordingContext {
        /// Context invoked through [`crate::fixtures::FUNCTION_ARN`].
        #[must_use]
        pub fn new() -> Arc<Self> {
            Self::with_arn(crate::fixtures::FUNCTION_ARN)
        }

        /// Context invoked through `arn`.
        #[must_use]
        pub fn with_arn(arn: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                invoked_function_arn: arn.into(),
                done: AtomicUsize::new(0),
                notify: Notify::new(),
            })
        }

        /// How many times termination was signalled.
        #[must_use]
        pub fn done_count(&self) -> usize {
            self.done.load(Ordering::SeqCst)
        }

        /// Wait until termination has been signalled at least once.
        pub async fn wait_done(&self) {
            let notified = self.notify.notified();
            if self.done_count() > 0 {
                return;
            }
            notified.await;
        }
    }

    impl InvocationContext for RecordingContext {
        fn invoked_function_arn(&self) -> &str {
            &self.invoked_function_arn
        }

        fn done(&self) {
            self.done.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    /// API client answering every call with a fixed result and recording the calls.
    #[derive(Debug)]
    pub struct ScriptedApi {
        calls: Mutex<Vec<(String, Value)>>,
        result: Result<Value, ApiError>,
    }

    impl ScriptedApi {
        /// Client answering with `result`.
        #[must_use]
        pub fn answering(result: Result<Value, ApiError>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                result,
            })
        }

        /// All recorded `(method, params)` calls, oldest first.
        #[must_use]
        pub fn calls(&self) -> Vec<(String, Value)> {
            lock(&self.calls).clone()
        }
    }

    impl ApiClient for ScriptedApi {
        fn call<'a>(
            &'a self,
            method: &'a str,
            params: Value,
        ) -> Pin<Box<dyn Future<Output = Result<Value, ApiError>> + Send + 'a>> {
            lock(&self.calls).push((method.to_owned(), params));
            let result = self.result.clone();
            Box::pin(async move { result })
        }
    }
}

/// Request fixtures.
pub mod fixtures {
    use cfn_resource_core::environment::LambdaEnvironment;
    use cfn_resource_core::event::{Event, LongRunningRequestContext, RequestType};
    use serde_json::{Map, Value};

    /// ARN tests are invoked through.
    pub const FUNCTION_ARN: &str =
        "arn:aws:lambda:fake-region-1:012345678910:function:CfnLambdaResource-TestFunction";

    /// Callback URL of fixture requests.
    pub const RESPONSE_URL: &str = "https://localhost:13002/foo/bar/taco";

    /// Stack id of fixture requests.
    pub const STACK_ID: &str = "fakeStackId";

    /// Request id of fixture requests.
    pub const REQUEST_ID: &str = "fakeRequestId";

    /// Logical resource id of fixture requests.
    pub const LOGICAL_RESOURCE_ID: &str = "MyTestResource";

    /// Physical id synthesized for fixture requests without one.
    #[must_use]
    pub fn synthesized_physical_id() -> String {
        format!("{STACK_ID}/{LOGICAL_RESOURCE_ID}/{REQUEST_ID}")
    }

    /// Environment derived from [`FUNCTION_ARN`].
    #[must_use]
    pub fn lambda_environment() -> LambdaEnvironment {
        LambdaEnvironment {
            lambda_arn: FUNCTION_ARN.to_owned(),
            region: "fake-region-1".to_owned(),
            account_id: "012345678910".to_owned(),
            lambda_name: "CfnLambdaResource-TestFunction".to_owned(),
        }
    }

    /// A request of `request_type` with the fixture identifiers.
    #[must_use]
    pub fn event(request_type: RequestType) -> Event {
        Event {
            request_type,
            resource_properties: None,
            old_resource_properties: None,
            physical_resource_id: None,
            stack_id: STACK_ID.to_owned(),
            request_id: REQUEST_ID.to_owned(),
            logical_resource_id: LOGICAL_RESOURCE_ID.to_owned(),
            response_url: RESPONSE_URL.to_owned(),
            long_running_request_context: None,
            extra: Map::from_iter([(
                "ResourceType".to_owned(),
                Value::String("Custom::TestResource".to_owned()),
            )]),
        }
    }

    /// A Create request.
    #[must_use]
    pub fn create_event(params: Value) -> Event {
        Event {
            resource_properties: Some(params),
            ..event(RequestType::Create)
        }
    }

    /// An Update request of `physical_id`.
    #[must_use]
    pub fn update_event(physical_id: &str, params: Value, old_params: Value) -> Event {
        Event {
            resource_properties: Some(params),
            old_resource_properties: Some(old_params),
            physical_resource_id: Some(physical_id.to_owned()),
            ..event(RequestType::Update)
        }
    }

    /// A Delete request of `physical_id`.
    #[must_use]
    pub fn delete_event(physical_id: &str, params: Value) -> Event {
        Event {
            resource_properties: Some(params),
            physical_resource_id: Some(physical_id.to_owned()),
            ..event(RequestType::Delete)
        }
    }

    /// A long-running re-invocation of `event` after `passed_pings` rounds.
    #[must_use]
    pub fn ping_event(event: Event, passed_pings: u32) -> Event {
        event.with_context(LongRunningRequestContext {
            passed_pings,
            ..LongRunningRequestContext::default()
        })
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use serde_json::{Map, Number, Value};

    /// Leaves of a parameter tree: everything CloudFormation can send, plus floats.
    pub fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            (-1.0e6f64..1.0e6).prop_filter_map("finite", |f| Number::from_f64(f).map(Value::Number)),
            "[a-zA-Z0-9 _-]{0,12}".prop_map(Value::String),
        ]
    }

    /// Parameter trees up to depth 4.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[A-Za-z]{1,8}", inner, 0..6)
                    .prop_map(|map| Value::Object(map.into_iter().collect::<Map<String, Value>>())),
            ]
        })
    }
}
