//! The execution environment of one invocation.
//!
//! Contains the [`LambdaEnvironment`] record derived from the invoked function ARN and the
//! collaborator traits the dispatcher talks to:
//!
//! - [`ResponseTransport`]: delivers the reply document to the callback URL
//! - [`SelfInvoker`]: asynchronously re-invokes this function (long-running pings)
//! - [`InvocationContext`]: the host's view of the running invocation
//!
//! The traits return `Pin<Box<dyn Future>>` instead of using `async fn` so they stay
//! usable as `Arc<dyn Trait>`.

use crate::reply::ReplyDocument;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Identity of the function serving the current invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaEnvironment {
    /// The full invoked function ARN
    pub lambda_arn: String,
    /// Region segment of the ARN
    pub region: String,
    /// Account segment of the ARN
    pub account_id: String,
    /// Function name segment of the ARN
    pub lambda_name: String,
}

/// Errors deriving a [`LambdaEnvironment`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    /// The ARN does not have the `<prefix>:<region>:<account>:function:<name>` shape
    #[error("Malformed function ARN: {0}")]
    MalformedArn(String),
}

/// Parse `arn:<partition>:lambda:<region>:<account>:function:<name>[:qualifier]`.
///
/// A version or alias qualifier is accepted and ignored.
///
/// # Errors
///
/// Returns [`EnvironmentError::MalformedArn`] when segments are missing or empty, or the
/// resource kind is not `function`.
pub fn derive_environment(invoked_function_arn: &str) -> Result<LambdaEnvironment, EnvironmentError> {
    let segments: Vec<&str> = invoked_function_arn.split(':').collect();

    match segments.as_slice() {
        [_, _, _, region, account_id, "function", lambda_name, ..]
            if !region.is_empty() && !account_id.is_empty() && !lambda_name.is_empty() =>
        {
            Ok(LambdaEnvironment {
                lambda_arn: invoked_function_arn.to_owned(),
                region: (*region).to_owned(),
                account_id: (*account_id).to_owned(),
                lambda_name: (*lambda_name).to_owned(),
            })
        }
        _ => Err(EnvironmentError::MalformedArn(invoked_function_arn.to_owned())),
    }
}

/// Errors delivering a reply document.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The callback URL could not be parsed
    #[error("Invalid response URL: {0}")]
    InvalidUrl(String),

    /// Connection, TLS or timeout failure
    #[error("Request to response URL failed: {0}")]
    Request(String),

    /// The reply document could not be serialized
    #[error("Failed to serialize reply: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivers reply documents to the orchestrator.
pub trait ResponseTransport: Send + Sync {
    /// PUT `reply` to `url` once and return the HTTP status code.
    ///
    /// Non-2xx statuses are returned as `Ok`; only failures to complete the exchange are
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the request could not be completed.
    fn send<'a>(
        &'a self,
        url: &'a str,
        reply: &'a ReplyDocument,
    ) -> Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send + 'a>>;
}

/// Errors starting a self re-invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The invocation service refused the request
    #[error("{0}")]
    Rejected(String),
}

/// Asynchronous (fire-and-forget) invocation of this function.
pub trait SelfInvoker: Send + Sync {
    /// Start an event-style invocation of `function_name` with `payload`.
    ///
    /// Resolves once the invocation has been accepted; it does not wait for the result.
    ///
    /// # Errors
    ///
    /// Returns an [`InvokeError`] when the invocation was not accepted.
    fn invoke<'a>(
        &'a self,
        function_name: &'a str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), InvokeError>> + Send + 'a>>;
}

/// The host's handle on the running invocation.
pub trait InvocationContext: Send + Sync {
    /// ARN the function was invoked through.
    fn invoked_function_arn(&self) -> &str;

    /// Signal that the invocation is finished. Called exactly once per invocation.
    fn done(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_environment_from_invoked_arn() -> Result<(), EnvironmentError> {
        let arn = "arn:aws:lambda:fake-region-1:012345678910:function:CfnLambdaResource-TestFunction";
        let environment = derive_environment(arn)?;

        assert_eq!(environment.lambda_arn, arn);
        assert_eq!(environment.region, "fake-region-1");
        assert_eq!(environment.account_id, "012345678910");
        assert_eq!(environment.lambda_name, "CfnLambdaResource-TestFunction");
        Ok(())
    }

    #[test]
    fn qualifier_is_ignored() -> Result<(), EnvironmentError> {
        let environment =
            derive_environment("arn:aws:lambda:eu-west-1:123456789012:function:resource:live")?;
        assert_eq!(environment.lambda_name, "resource");
        assert_eq!(environment.region, "eu-west-1");
        Ok(())
    }

    #[test]
    fn malformed_arns_are_rejected() {
        for arn in [
            "",
            "not-an-arn",
            "arn:aws:lambda:eu-west-1:123456789012:layer:thing",
            "arn:aws:lambda::123456789012:function:name",
            "arn:aws:lambda:eu-west-1:123456789012:function:",
        ] {
            assert_eq!(
                derive_environment(arn),
                Err(EnvironmentError::MalformedArn(arn.to_owned())),
                "{arn}"
            );
        }
    }
}
