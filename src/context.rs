//! # Flow Context
//!
//! Transient state of one flow instance: the connection, credential and
//! proof exchanges observed so far. The context is owned by the sequencer and
//! lent to one coordinator at a time. Each field has a single writer:
//!
//! - `connection`: the connection establisher
//! - `credentials` and `issuance_deadline`: the issuance coordinator
//! - `proof`: the proof coordinator
//! - `step`: the sequencer
//!
//! Every change is published as a [`Snapshot`] for presentation
//! collaborators to render.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::connection::Connection;
use crate::issuance::CredentialExchange;
use crate::poll::Sequenced;
use crate::presentation::ProofExchange;

/// Point-in-time view of a flow for presentation collaborators.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Flow instance.
    pub flow_id: Uuid,

    /// Index of the current step.
    pub step: usize,

    /// Connection state.
    pub connection: Connection,

    /// Credential exchanges of the current batch.
    pub credentials: Vec<CredentialExchange>,

    /// Proof exchange, if one has been requested.
    pub proof: Option<ProofExchange>,

    /// URL of an out-of-band proof request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_url: Option<String>,

    /// When the snapshot was taken.
    pub updated_at: DateTime<Utc>,
}

/// Mutable state of a single flow instance.
#[derive(Debug)]
pub struct FlowContext {
    pub(crate) flow_id: Uuid,
    pub(crate) step: usize,
    pub(crate) connection: Connection,
    pub(crate) credentials: Sequenced<Vec<CredentialExchange>>,
    pub(crate) issuance_deadline: Option<Instant>,
    pub(crate) proof: Option<Sequenced<ProofExchange>>,
    pub(crate) proof_url: Option<String>,
    tx: watch::Sender<Snapshot>,
}

impl FlowContext {
    /// Create an empty context. `deep_link` fixes how the holder will be
    /// reached for the lifetime of the flow's connection.
    #[must_use]
    pub fn new(deep_link: bool) -> Self {
        let flow_id = Uuid::new_v4();
        let connection = Connection::new(deep_link);
        let snapshot = Snapshot {
            flow_id,
            step: 0,
            connection: connection.clone(),
            credentials: vec![],
            proof: None,
            proof_url: None,
            updated_at: Utc::now(),
        };
        let (tx, _) = watch::channel(snapshot);
        Self {
            flow_id,
            step: 0,
            connection,
            credentials: Sequenced::default(),
            issuance_deadline: None,
            proof: None,
            proof_url: None,
            tx,
        }
    }

    /// Flow instance identifier.
    #[must_use]
    pub const fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Current connection state.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Credential exchanges of the current batch.
    #[must_use]
    pub fn credentials(&self) -> &[CredentialExchange] {
        self.credentials.get()
    }

    /// Current proof exchange.
    #[must_use]
    pub fn proof(&self) -> Option<&ProofExchange> {
        self.proof.as_ref().map(Sequenced::get)
    }

    /// URL of the current out-of-band proof request.
    #[must_use]
    pub fn proof_url(&self) -> Option<&str> {
        self.proof_url.as_deref()
    }

    /// Drop the proof exchange so the next proof step sends a new request.
    pub fn clear_proof(&mut self) {
        if self.proof.take().is_some() {
            self.proof_url = None;
            self.publish();
        }
    }

    /// Drop connection, credential and proof state. The deep-link choice is
    /// kept for the next connection.
    pub fn clear(&mut self) {
        self.connection = Connection::new(self.connection.is_deep_link());
        self.credentials = Sequenced::default();
        self.issuance_deadline = None;
        self.proof = None;
        self.proof_url = None;
        self.publish();
    }

    /// Start a new flow instance on this context. Subscribers keep receiving
    /// snapshots across the restart.
    pub fn restart(&mut self, deep_link: bool) {
        self.flow_id = Uuid::new_v4();
        self.step = 0;
        self.connection = Connection::new(deep_link);
        self.credentials = Sequenced::default();
        self.issuance_deadline = None;
        self.proof = None;
        self.proof_url = None;
        self.publish();
    }

    /// Subscribe to snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// The latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            flow_id: self.flow_id,
            step: self.step,
            connection: self.connection.clone(),
            credentials: self.credentials.get().clone(),
            proof: self.proof().cloned(),
            proof_url: self.proof_url.clone(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }
}
