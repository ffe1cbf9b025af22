//! # Configuration
//!
//! Timing and link settings for a showcase run. All fields have defaults, so
//! an empty JSON object (or `Config::default()`) is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const POLL_INTERVAL_MS: u64 = 1_000;
const ISSUANCE_TIMEOUT_MS: u64 = 10_000;
const WALLET_SCHEME: &str = "bcwallet://aries_connection_invitation";

/// Settings shared by the coordinators.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Interval between status polls, in milliseconds.
    pub poll_interval_ms: u64,

    /// How long a credential batch may take to reach issued state, in
    /// milliseconds.
    pub issuance_timeout_ms: u64,

    /// App-launch prefix for deep links into the holder's wallet. The query
    /// of an invitation or proof URL is appended to it.
    pub wallet_scheme: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL_MS,
            issuance_timeout_ms: ISSUANCE_TIMEOUT_MS,
            wallet_scheme: WALLET_SCHEME.into(),
        }
    }
}

impl Config {
    /// Interval between status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Issuance timeout window.
    #[must_use]
    pub const fn issuance_timeout(&self) -> Duration {
        Duration::from_millis(self.issuance_timeout_ms)
    }
}
