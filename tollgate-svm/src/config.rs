//! Engine configuration.
//!
//! Loaded from a TOML file with `$VAR` / `${VAR}` environment expansion in
//! string values, then overridable by environment variables. All settings
//! have working defaults; an absent file configures a devnet engine.
//!
//! # Example
//!
//! ```toml
//! network = "mainnet"
//! rpc_url = "${TOLLGATE_RPC_URL}"
//! commitment = "confirmed"
//! poll_interval_ms = 1000
//! verify_deadline_secs = 60
//! ```
//!
//! # Environment Variables
//!
//! - `TOLLGATE_CONFIG` — Path to the TOML file (default: `tollgate.toml`)
//! - `TOLLGATE_RPC_URL` — Override the RPC endpoint
//! - `TOLLGATE_NETWORK` — Override the network (`mainnet` / `devnet`)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tollgate::RetryPolicy;
use tollgate::error::VerifyError;
use url::Url;

use crate::chain::{Address, Commitment};
use crate::networks::Network;

/// Engine-wide configuration, constructed once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ledger network to settle against (default: devnet).
    #[serde(default = "default_network")]
    pub network: Network,

    /// RPC endpoint; the network's public endpoint when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,

    /// Commitment verifications wait for (default: confirmed).
    #[serde(default = "default_commitment")]
    pub commitment: Commitment,

    /// Settlement mint override; the network's USDC deployment when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_override: Option<Address>,

    /// Interval between ledger polls, in milliseconds (default: 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Ceiling on one locate-and-confirm cycle, in seconds (default: 60).
    #[serde(default = "default_verify_deadline_secs")]
    pub verify_deadline_secs: u64,

    /// Retry attempts per RPC call, including the first (default: 3).
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Base backoff delay in milliseconds (default: 500).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff delay cap in milliseconds (default: 10000).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

const fn default_network() -> Network {
    Network::Devnet
}

const fn default_commitment() -> Commitment {
    Commitment::Confirmed
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_verify_deadline_secs() -> u64 {
    60
}

const fn default_retry_max_attempts() -> u32 {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    500
}

const fn default_retry_max_delay_ms() -> u64 {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            rpc_url: None,
            commitment: default_commitment(),
            mint_override: None,
            poll_interval_ms: default_poll_interval_ms(),
            verify_deadline_secs: default_verify_deadline_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the path in `TOLLGATE_CONFIG`, falling back
    /// to `tollgate.toml` in the current directory, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, VerifyError> {
        let path =
            std::env::var("TOLLGATE_CONFIG").unwrap_or_else(|_| "tollgate.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path. A missing file yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, VerifyError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)
                .map_err(|e| VerifyError::config(format!("read {path}: {e}")))?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)
            .map_err(|e| VerifyError::config(format!("parse {path}: {e}")))?;

        if let Ok(rpc_url) = std::env::var("TOLLGATE_RPC_URL") {
            let url = rpc_url
                .parse()
                .map_err(|e| VerifyError::config(format!("TOLLGATE_RPC_URL: {e}")))?;
            config.rpc_url = Some(url);
        }
        if let Ok(network) = std::env::var("TOLLGATE_NETWORK") {
            config.network = match network.as_str() {
                "mainnet" => Network::Mainnet,
                "devnet" => Network::Devnet,
                other => {
                    return Err(VerifyError::config(format!(
                        "TOLLGATE_NETWORK must be mainnet or devnet, got {other}"
                    )));
                }
            };
        }

        Ok(config)
    }

    /// The RPC endpoint to connect to.
    #[must_use]
    pub fn rpc_endpoint(&self) -> String {
        self.rpc_url
            .as_ref()
            .map_or_else(|| self.network.default_rpc_url().to_owned(), Url::to_string)
    }

    /// The mint payments settle in: the override when set, the network's
    /// USDC deployment otherwise.
    #[must_use]
    pub fn settlement_mint(&self) -> Address {
        self.mint_override
            .unwrap_or_else(|| self.network.settlement_mint())
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Verification deadline as a [`Duration`].
    #[must_use]
    pub const fn verify_deadline(&self) -> Duration {
        Duration::from_secs(self.verify_deadline_secs)
    }

    /// Retry policy derived from the configured bounds.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

/// Expands `$VAR` and `${VAR}` patterns from the process environment,
/// leaving unresolved variables as-is.
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

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Ok(val) = std::env::var(&var_name) {
            result.push_str(&val);
        } else {
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}
