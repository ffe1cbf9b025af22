//! # Errors
//!
//! Failures surfaced by the coordinators and the step sequencer. Any error
//! returned from a step activation is terminal for the current flow instance:
//! the caller is expected to reset the flow and start again from its entry
//! point.

use std::time::Duration;

use thiserror::Error;

/// Result type for showcase operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while driving a showcase flow.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport or server failure on a create, poll or delete call made
    /// through the provider.
    #[error("request failed: {0}")]
    Request(#[source] anyhow::Error),

    /// Credential issuance did not complete within the allowed window.
    #[error("credential issuance did not complete within {after:?}")]
    Timeout {
        /// The window that elapsed.
        after: Duration,
    },

    /// The remote agent abandoned an exchange.
    #[error("{exchange} {id} was abandoned by the agent")]
    Abandoned {
        /// Kind of exchange (connection, credential or proof).
        exchange: Exchange,
        /// Identifier of the abandoned record.
        id: String,
    },

    /// Polling stopped before the exchange reached a terminal state.
    #[error("polling stopped before {0} completed")]
    Cancelled(Exchange),

    /// The current step has not reported completion yet.
    #[error("step {0} has not completed")]
    StepPending(String),

    /// The flow has already reached its final step.
    #[error("flow is finished")]
    FlowFinished,

    /// No flow has been started.
    #[error("no flow in progress")]
    NoFlow,

    /// A step needs state produced by an earlier step (for example, an
    /// established connection) that is not present.
    #[error("step {step} requires {missing}")]
    Precondition {
        /// Step identifier.
        step: String,
        /// Description of the missing state.
        missing: &'static str,
    },
}

impl Error {
    /// Wrap a provider failure.
    pub(crate) fn request(err: impl Into<anyhow::Error>) -> Self {
        Self::Request(err.into())
    }
}

/// Kind of exchange an error relates to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exchange {
    /// Connection handshake.
    Connection,
    /// Credential issuance.
    Credential,
    /// Proof presentation.
    Proof,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Credential => write!(f, "credential"),
            Self::Proof => write!(f, "proof"),
        }
    }
}
