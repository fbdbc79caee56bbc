//! Lambda Runtime API host loop.
//!
//! - `GET  /2018-06-01/runtime/invocation/next` - next event (long-poll)
//! - `POST /2018-06-01/runtime/invocation/{requestId}/response` - invocation finished
//! - `POST /2018-06-01/runtime/invocation/{requestId}/error` - invocation failed
//!
//! The custom-resource outcome travels to the orchestrator through the reply PUT, so the
//! invocation response itself carries no payload.

use crate::config::{ConfigError, RuntimeConfig};
use crate::transport::HttpsTransport;
use crate::{DispatchError, Dispatcher};
use anyhow::Context as _;
use cfn_resource_core::ResourceDefinition;
use cfn_resource_core::environment::InvocationContext;
use reqwest::{Client, Response};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Header carrying the invocation id.
pub const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";

/// Header carrying the ARN the function was invoked through.
pub const FUNCTION_ARN_HEADER: &str = "Lambda-Runtime-Invoked-Function-Arn";

/// Errors talking to the Runtime API.
#[derive(Error, Debug)]
pub enum LambdaRuntimeError {
    /// HTTP exchange with the Runtime API failed
    #[error("Runtime API request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A required header was missing from the next-invocation response
    #[error("Runtime API response is missing header {0}")]
    MissingHeader(&'static str),

    /// Configuration was incomplete
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// [`InvocationContext`] for one Runtime API invocation.
#[derive(Debug)]
pub struct RuntimeContext {
    request_id: String,
    invoked_function_arn: String,
    done: AtomicBool,
}

impl RuntimeContext {
    /// Context for invocation `request_id` of `invoked_function_arn`.
    #[must_use]
    pub fn new(request_id: impl Into<String>, invoked_function_arn: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            invoked_function_arn: invoked_function_arn.into(),
            done: AtomicBool::new(false),
        }
    }

    /// Whether the dispatcher signalled termination.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl InvocationContext for RuntimeContext {
    fn invoked_function_arn(&self) -> &str {
        &self.invoked_function_arn
    }

    fn done(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            tracing::warn!(request_id = %self.request_id, "Termination signalled twice");
        }
    }
}

/// Serves invocations from the Runtime API until it becomes unreachable.
pub struct LambdaRuntime {
    client: Client,
    base_url: String,
    dispatcher: Dispatcher,
}

impl LambdaRuntime {
    /// Host `dispatcher` behind the Runtime API at `runtime_api` (`host:port`).
    #[must_use]
    pub fn new(runtime_api: &str, dispatcher: Dispatcher) -> Self {
        Self {
            // No timeout: `invocation/next` blocks until an event arrives.
            client: Client::new(),
            base_url: format!("http://{runtime_api}/2018-06-01/runtime"),
            dispatcher,
        }
    }

    /// Host `dispatcher` behind the Runtime API named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaRuntimeError::Config`] when no Runtime API endpoint is configured.
    pub fn from_config(config: &RuntimeConfig, dispatcher: Dispatcher) -> Result<Self, LambdaRuntimeError> {
        Ok(Self::new(config.require_runtime_api()?, dispatcher))
    }

    /// Serve invocations forever.
    ///
    /// # Errors
    ///
    /// Returns the first error talking to the Runtime API.
    pub async fn run(&self) -> Result<(), LambdaRuntimeError> {
        loop {
            self.serve_next().await?;
        }
    }

    /// Fetch, dispatch and acknowledge one invocation.
    ///
    /// # Errors
    ///
    /// Returns error if the Runtime API cannot be reached or answers without the
    /// invocation headers. Dispatch failures are reported to the Runtime API instead.
    #[tracing::instrument(skip(self), name = "lambda_invocation")]
    pub async fn serve_next(&self) -> Result<(), LambdaRuntimeError> {
        let response = self
            .client
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let request_id = header(&response, REQUEST_ID_HEADER)?;
        let function_arn = header(&response, FUNCTION_ARN_HEADER)?;
        let body = response.bytes().await?;
        tracing::debug!(%request_id, "Invocation received");

        let context = Arc::new(RuntimeContext::new(request_id.clone(), function_arn));
        let outcome = match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => {
                let context: Arc<dyn InvocationContext> = context.clone();
                self.dispatcher.dispatch_value(payload, context).await
            }
            Err(error) => Err(DispatchError::Decode(error)),
        };

        match outcome {
            Ok(_) => {
                if !context.is_done() {
                    tracing::warn!(%request_id, "Dispatcher settled without signalling termination");
                }
                metrics::counter!("cfn_resource.invocations.total", "outcome" => "response").increment(1);
                self.post(&format!("{}/invocation/{request_id}/response", self.base_url), &Value::Null)
                    .await
            }
            Err(error) => {
                tracing::error!(%request_id, %error, "Invocation failed before a reply could be sent");
                metrics::counter!("cfn_resource.invocations.total", "outcome" => "error").increment(1);
                self.post(
                    &format!("{}/invocation/{request_id}/error", self.base_url),
                    &error_body(&error),
                )
                .await
            }
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<(), LambdaRuntimeError> {
        self.client
            .post(url)
            .body(body.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn header(response: &Response, name: &'static str) -> Result<String, LambdaRuntimeError> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or(LambdaRuntimeError::MissingHeader(name))
}

fn error_body(error: &DispatchError) -> Value {
    let error_type = match error {
        DispatchError::Environment(_) => "EnvironmentError",
        DispatchError::Decode(_) => "DecodeError",
    };
    json!({ "errorMessage": error.to_string(), "errorType": error_type })
}

/// Run `definition` as a Lambda function.
///
/// Initialises tracing and metric descriptions, reads [`RuntimeConfig`] from the
/// environment, and serves invocations until the Runtime API fails.
///
/// # Errors
///
/// Returns error if configuration is incomplete, the transport cannot be built, or the
/// Runtime API becomes unreachable.
pub async fn run(definition: ResourceDefinition) -> anyhow::Result<()> {
    if let Err(error) = crate::telemetry::init_tracing() {
        tracing::debug!(%error, "Keeping the existing tracing subscriber");
    }
    crate::metrics::describe_metrics();

    let config = RuntimeConfig::from_env().context("failed to load runtime configuration")?;
    let transport = HttpsTransport::new(&config.transport).context("failed to build reply transport")?;

    tracing::info!(
        runtime_api = ?config.runtime_api,
        timeout_secs = config.transport.timeout.as_secs(),
        insecure_hosts = ?config.transport.insecure_hosts,
        "Starting custom resource runtime"
    );

    let dispatcher = Dispatcher::new(definition, Arc::new(transport));
    LambdaRuntime::from_config(&config, dispatcher)?
        .run()
        .await
        .context("Runtime API loop stopped")
}
