//! Configuration from the process environment.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `AWS_LAMBDA_RUNTIME_API` | Runtime API `host:port` | required by the host loop |
//! | `CFN_RESOURCE_REPLY_TIMEOUT_SECS` | timeout of the reply PUT | `30` |
//! | `CFN_RESOURCE_INSECURE_HOSTS` | comma-separated hosts whose certificates are not checked | `localhost` |

use std::time::Duration;
use thiserror::Error;

/// Runtime API endpoint variable, set by the Lambda execution environment.
pub const RUNTIME_API_VAR: &str = "AWS_LAMBDA_RUNTIME_API";

/// Reply timeout variable.
pub const REPLY_TIMEOUT_VAR: &str = "CFN_RESOURCE_REPLY_TIMEOUT_SECS";

/// Insecure hosts variable.
pub const INSECURE_HOSTS_VAR: &str = "CFN_RESOURCE_INSECURE_HOSTS";

const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_INSECURE_HOSTS: &str = "localhost";

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    /// Failed to parse a variable
    #[error("Failed to parse {name}: {message}")]
    ParseError {
        /// Variable name
        name: String,
        /// What was wrong
        message: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Reply delivery configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound on one reply PUT
    pub timeout: Duration,
    /// Hosts allowed to present certificates that do not validate
    pub insecure_hosts: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_REPLY_TIMEOUT_SECS),
            insecure_hosts: parse_hosts(DEFAULT_INSECURE_HOSTS),
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    ///
    /// # Errors
    ///
    /// Returns error if the timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "{REPLY_TIMEOUT_VAR} must be > 0"
            )));
        }
        Ok(())
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Runtime API `host:port`, absent outside Lambda
    pub runtime_api: Option<String>,
    /// Reply delivery
    pub transport: TransportConfig,
}

impl RuntimeConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout = match lookup(REPLY_TIMEOUT_VAR) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::ParseError {
                name: REPLY_TIMEOUT_VAR.to_owned(),
                message: format!("{raw:?}: {e}"),
            })?,
            None => DEFAULT_REPLY_TIMEOUT_SECS,
        };
        let insecure_hosts = lookup(INSECURE_HOSTS_VAR)
            .map_or_else(|| parse_hosts(DEFAULT_INSECURE_HOSTS), |raw| parse_hosts(&raw));

        let config = Self {
            runtime_api: lookup(RUNTIME_API_VAR).filter(|api| !api.trim().is_empty()),
            transport: TransportConfig {
                timeout: Duration::from_secs(timeout),
                insecure_hosts,
            },
        };
        config.transport.validate()?;
        Ok(config)
    }

    /// The Runtime API endpoint, required to run the host loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVarNotSet`] outside the Lambda execution environment.
    pub fn require_runtime_api(&self) -> Result<&str, ConfigError> {
        self.runtime_api
            .as_deref()
            .ok_or_else(|| ConfigError::EnvVarNotSet(RUNTIME_API_VAR.to_owned()))
    }
}

fn parse_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() -> Result<(), ConfigError> {
        let config = RuntimeConfig::from_lookup(lookup(&[]))?;
        assert_eq!(config.runtime_api, None);
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(config.transport.insecure_hosts, vec!["localhost"]);
        assert_eq!(
            config.require_runtime_api(),
            Err(ConfigError::EnvVarNotSet(RUNTIME_API_VAR.to_owned()))
        );
        Ok(())
    }

    #[test]
    fn variables_override_defaults() -> Result<(), ConfigError> {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (RUNTIME_API_VAR, "127.0.0.1:9001"),
            (REPLY_TIMEOUT_VAR, " 5 "),
            (INSECURE_HOSTS_VAR, "localhost, 127.0.0.1,,"),
        ]))?;
        assert_eq!(config.require_runtime_api()?, "127.0.0.1:9001");
        assert_eq!(config.transport.timeout, Duration::from_secs(5));
        assert_eq!(config.transport.insecure_hosts, vec!["localhost", "127.0.0.1"]);
        Ok(())
    }

    #[test]
    fn empty_host_list_disables_the_exception() -> Result<(), ConfigError> {
        let config = RuntimeConfig::from_lookup(lookup(&[(INSECURE_HOSTS_VAR, "")]))?;
        assert!(config.transport.insecure_hosts.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_or_zero_timeout_is_rejected() {
        assert!(matches!(
            RuntimeConfig::from_lookup(lookup(&[(REPLY_TIMEOUT_VAR, "soon")])),
            Err(ConfigError::ParseError { .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_lookup(lookup(&[(REPLY_TIMEOUT_VAR, "0")])),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
