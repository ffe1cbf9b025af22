//! # Provider
//!
//! The crate performs no I/O of its own. Implementors supply access to the
//! remote agent through the traits in this module, typically as thin
//! wrappers around HTTP calls. Each trait method maps to one operation of the
//! agent's API and returns the agent's response shape.
//!
//! Errors are reported with `anyhow` and wrapped by the coordinators as
//! [`crate::Error::Request`].

use std::collections::BTreeMap;
use std::future::Future;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::catalog::{RequestOptions, StarterCredential};
use crate::connection::ConnectionState;
use crate::issuance::CredentialExchange;
use crate::presentation::{AttributeGroup, PredicateGroup, ProofExchange};

/// Full set of agent operations required to run a showcase flow.
pub trait Provider: Connections + Credentials + Proofs + Clone {}

/// Request body for creating a connection invitation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvitationRequest {
    /// Label shown by the wallet for the inviting party.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Image shown by the wallet for the inviting party.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Response to an invitation request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    /// Handle used to poll the connection.
    pub id: String,

    /// Invitation payload for the holder's wallet.
    pub invitation_url: String,
}

/// Connection status as reported by the agent.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Connection identifier. Absent until the agent has assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Handshake state.
    pub state: ConnectionState,
}

/// Connection handshake operations.
pub trait Connections: Send + Sync {
    /// Create a connection invitation.
    fn create_invitation(
        &self, request: InvitationRequest,
    ) -> impl Future<Output = Result<Invitation>> + Send;

    /// Fetch the current state of a connection.
    fn connection(
        &self, connection_id: &str,
    ) -> impl Future<Output = Result<ConnectionStatus>> + Send;
}

/// Request body for issuing a credential.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    /// Connection to issue over.
    pub connection_id: String,

    /// Template of the credential to issue.
    pub cred: StarterCredential,
}

/// Credential issuance operations.
pub trait Credentials: Send + Sync {
    /// Offer a credential to the holder.
    fn issue_credential(
        &self, request: IssueRequest,
    ) -> impl Future<Output = Result<CredentialExchange>> + Send;

    /// Offer a credential to a holder reached through a deep link.
    fn issue_deep_credential(
        &self, request: IssueRequest,
    ) -> impl Future<Output = Result<CredentialExchange>> + Send;

    /// List credential exchange records for a connection.
    fn credentials(
        &self, connection_id: &str,
    ) -> impl Future<Output = Result<Vec<CredentialExchange>>> + Send;

    /// Delete a credential exchange record.
    fn delete_credential(&self, credential_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Request body for creating a proof request.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    /// Connection to send the request over. Empty for out-of-band
    /// requests.
    pub connection_id: String,

    /// Attribute groups keyed by credential name.
    pub attributes: BTreeMap<String, AttributeGroup>,

    /// Predicate groups keyed by credential name.
    pub predicates: BTreeMap<String, PredicateGroup>,

    /// Pass-through options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_options: Option<RequestOptions>,
}

/// Response to an out-of-band proof request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OobProof {
    /// Proof exchange identifier.
    pub id: String,

    /// URL carrying the request for the holder's wallet.
    pub proof_url: String,
}

/// Proof exchange operations.
pub trait Proofs: Send + Sync {
    /// Request a proof over an established connection.
    fn create_proof(
        &self, request: ProofRequest,
    ) -> impl Future<Output = Result<ProofExchange>> + Send;

    /// Create an out-of-band proof request.
    fn create_proof_oob(
        &self, request: ProofRequest,
    ) -> impl Future<Output = Result<OobProof>> + Send;

    /// Fetch the current state of a proof exchange.
    fn proof(&self, proof_id: &str) -> impl Future<Output = Result<ProofExchange>> + Send;
}
