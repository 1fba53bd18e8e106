//! Purchase configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax, and a
//! `.env` file in the working directory is read first.
//!
//! # Example Configuration
//!
//! ```toml
//! [flow]
//! signature_timeout_secs = 120
//! confirmation_timeout_secs = 300
//!
//! [request]
//! max_slippage_bps = 200
//! deadline_window_secs = 3600
//! max_quote_age_secs = 60
//!
//! [backend]
//! base_url = "https://api.example.com/commerce/"
//! api_key = "$PPV_API_KEY"
//!
//! [chain]
//! chain_id = 84532
//! rpc_url = "https://sepolia.base.org"
//! commerce_contract = "0x0000000000000000000000000000000000000001"
//! price_oracle = "0x0000000000000000000000000000000000000002"
//! payer_private_key = "${PPV_PAYER_KEY}"
//! ```
//!
//! # Environment Variables
//!
//! - `PPV_CONFIG` - Path to configuration file (default: `ppv.toml`)
//! - Any variable referenced by `$VAR` in the config file

use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::state::{PROGRESS_AWAITING_CONFIRMATION, Step};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The TOML is malformed or has wrong types.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration for purchases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseConfig {
    /// Flow timeouts and estimates.
    #[serde(default)]
    pub flow: FlowConfig,
    /// Request construction policy.
    #[serde(default)]
    pub request: RequestPolicy,
    /// Backend signer service.
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    /// Chain connection.
    #[serde(default)]
    pub chain: Option<ChainConfig>,
}

/// Timeouts for each suspension point of the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Budget for the backend to accept the intent.
    pub intent_timeout_secs: u64,
    /// Budget for the backend to sign.
    pub signature_timeout_secs: u64,
    /// Budget for broadcasting the execution call.
    pub submit_timeout_secs: u64,
    /// Budget for on-chain confirmation.
    pub confirmation_timeout_secs: u64,
    /// Typical step durations, used for the remaining-time estimate.
    pub estimates: StepEstimates,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            intent_timeout_secs: 30,
            signature_timeout_secs: 120,
            submit_timeout_secs: 120,
            confirmation_timeout_secs: 300,
            estimates: StepEstimates::default(),
        }
    }
}

impl FlowConfig {
    /// Limit for the given suspension point.
    #[must_use]
    pub const fn timeout_for(&self, point: SuspensionPoint) -> Duration {
        Duration::from_secs(match point {
            SuspensionPoint::CreateIntent => self.intent_timeout_secs,
            SuspensionPoint::FetchSignature => self.signature_timeout_secs,
            SuspensionPoint::Submit => self.submit_timeout_secs,
            SuspensionPoint::Confirm => self.confirmation_timeout_secs,
        })
    }
}

/// The four places where an attempt waits on something external.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionPoint {
    /// Backend intent creation.
    CreateIntent,
    /// Backend signature.
    FetchSignature,
    /// Transaction broadcast.
    Submit,
    /// Transaction confirmation.
    Confirm,
}

/// Typical duration of each phase, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepEstimates {
    /// Intent creation.
    pub creating_intent_secs: u64,
    /// Signature retrieval.
    pub waiting_signature_secs: u64,
    /// Broadcasting the execution call.
    pub submitting_secs: u64,
    /// Waiting for confirmation.
    pub confirming_secs: u64,
}

impl Default for StepEstimates {
    fn default() -> Self {
        Self {
            creating_intent_secs: 5,
            waiting_signature_secs: 15,
            submitting_secs: 10,
            confirming_secs: 15,
        }
    }
}

impl StepEstimates {
    /// Estimated time left once an attempt is at `step` with `progress`.
    #[must_use]
    pub const fn remaining_after(&self, step: Step, progress: u8) -> Option<Duration> {
        let secs = match step {
            Step::Idle | Step::Error => return None,
            Step::Completed => 0,
            Step::CreatingIntent => {
                self.creating_intent_secs
                    + self.waiting_signature_secs
                    + self.submitting_secs
                    + self.confirming_secs
            }
            Step::WaitingSignature => {
                self.waiting_signature_secs + self.submitting_secs + self.confirming_secs
            }
            Step::ExecutingPayment if progress >= PROGRESS_AWAITING_CONFIRMATION => {
                self.confirming_secs
            }
            Step::ExecutingPayment => self.submitting_secs + self.confirming_secs,
        };
        Some(Duration::from_secs(secs))
    }
}

/// How payment intent requests are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestPolicy {
    /// Slippage tolerance in basis points (200 = 2%).
    pub max_slippage_bps: u16,
    /// Deadline distance from the time the request is built.
    pub deadline_window_secs: u64,
    /// Oldest price quote accepted.
    pub max_quote_age_secs: u64,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            max_slippage_bps: 200,
            deadline_window_secs: 3600,
            max_quote_age_secs: 60,
        }
    }
}

/// Backend signer service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; intent routes are resolved relative to it.
    pub base_url: String,
    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request HTTP timeout.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Delay between signature polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polls before giving up on a pending signature.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

/// Chain connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// EIP-155 chain ID.
    pub chain_id: u64,
    /// HTTP RPC endpoint.
    pub rpc_url: String,
    /// Commerce contract executing ETH payments.
    pub commerce_contract: Address,
    /// Price oracle contract.
    pub price_oracle: Address,
    /// Confirmations required before a payment counts as completed.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Payer key (hex). Use `$VAR` expansion rather than inline keys.
    #[serde(default)]
    pub payer_private_key: Option<String>,
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_max_polls() -> u32 {
    60
}

const fn default_confirmations() -> u64 {
    1
}

impl PurchaseConfig {
    /// Loads configuration from the path given by the `PPV_CONFIG` environment
    /// variable, falling back to `ppv.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        // Missing .env is normal
        let _ = dotenvy::dotenv();
        let path = std::env::var("PPV_CONFIG").unwrap_or_else(|_| "ppv.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path. A missing file yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        let config = Self::from_toml_str(&content)?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            path,
            backend = config.backend.is_some(),
            chain_id = config.chain.as_ref().map(|c| c.chain_id),
            "Loaded purchase configuration"
        );

        Ok(config)
    }

    /// Parses configuration text after expanding environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        Ok(toml::from_str(&expanded)?)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        // Unterminated `${NAME` is left as written
        let resolvable = !name.is_empty() && (closed || !braced);
        match std::env::var(&name) {
            Ok(value) if resolvable => result.push_str(&value),
            _ if braced => {
                result.push_str("${");
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
            _ => {
                result.push('$');
                result.push_str(&name);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PurchaseConfig::from_toml_str("").unwrap();
        assert_eq!(config, PurchaseConfig::default());
        assert_eq!(config.request.max_slippage_bps, 200);
        assert_eq!(config.request.deadline_window_secs, 3600);
        assert!(config.backend.is_none());
    }

    #[test]
    fn test_sections_parse() {
        let config = PurchaseConfig::from_toml_str(
            r#"
            [flow]
            signature_timeout_secs = 45

            [request]
            max_slippage_bps = 50

            [backend]
            base_url = "http://localhost:8080/"

            [chain]
            chain_id = 84532
            rpc_url = "https://sepolia.base.org"
            commerce_contract = "0x0000000000000000000000000000000000000001"
            price_oracle = "0x0000000000000000000000000000000000000002"
            "#,
        )
        .unwrap();
        assert_eq!(config.flow.signature_timeout_secs, 45);
        assert_eq!(config.flow.intent_timeout_secs, 30);
        assert_eq!(config.request.max_slippage_bps, 50);
        assert_eq!(config.request.max_quote_age_secs, 60);
        let backend = config.backend.unwrap();
        assert_eq!(backend.poll_interval_ms, 1000);
        assert_eq!(backend.max_polls, 60);
        let chain = config.chain.unwrap();
        assert_eq!(chain.confirmations, 1);
        assert_eq!(chain.chain_id, 84532);
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: test-only variable with a name no other test touches.
        unsafe { std::env::set_var("PPV_TEST_EXPAND_KEY", "secret") };
        assert_eq!(expand_env_vars("key = \"$PPV_TEST_EXPAND_KEY\""), "key = \"secret\"");
        assert_eq!(expand_env_vars("${PPV_TEST_EXPAND_KEY}-x"), "secret-x");
        assert_eq!(expand_env_vars("$PPV_TEST_UNSET_VAR"), "$PPV_TEST_UNSET_VAR");
        assert_eq!(expand_env_vars("${PPV_TEST_UNSET_VAR}"), "${PPV_TEST_UNSET_VAR}");
        assert_eq!(expand_env_vars("cost $ 5"), "cost $ 5");
    }

    #[test]
    fn test_expand_env_vars_keeps_malformed_braces() {
        // SAFETY: test-only variable with a name no other test touches.
        unsafe { std::env::set_var("PPV_TEST_OPEN_BRACE", "secret") };
        assert_eq!(expand_env_vars("a${}b"), "a${}b");
        assert_eq!(expand_env_vars("${PPV_TEST_OPEN_BRACE"), "${PPV_TEST_OPEN_BRACE");
        assert_eq!(expand_env_vars("${PPV_TEST_UNSET_VAR"), "${PPV_TEST_UNSET_VAR");
    }

    #[test]
    fn test_remaining_estimates_shrink() {
        let estimates = StepEstimates::default();
        let creating = estimates.remaining_after(Step::CreatingIntent, 10).unwrap();
        let waiting = estimates.remaining_after(Step::WaitingSignature, 25).unwrap();
        let confirming = estimates.remaining_after(Step::ExecutingPayment, 85).unwrap();
        assert!(creating > waiting);
        assert!(waiting > confirming);
        assert_eq!(estimates.remaining_after(Step::Completed, 100), Some(Duration::ZERO));
        assert_eq!(estimates.remaining_after(Step::Idle, 0), None);
    }

    #[test]
    fn test_timeouts() {
        let flow = FlowConfig::default();
        assert_eq!(flow.timeout_for(SuspensionPoint::Confirm), Duration::from_secs(300));
        assert_eq!(flow.timeout_for(SuspensionPoint::CreateIntent), Duration::from_secs(30));
    }
}
