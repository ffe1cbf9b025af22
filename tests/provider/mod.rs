//! # Scripted Agent
//!
//! In-memory implementation of the provider traits. Poll responses follow a
//! script set up by each test, and every call is counted so tests can check
//! when polling stops.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use credibil_showcase::connection::ConnectionState;
use credibil_showcase::issuance::{CredentialExchange, CredentialState};
use credibil_showcase::presentation::{ProofExchange, ProofState};
use credibil_showcase::provider::{
    ConnectionStatus, Connections, Credentials, Invitation, InvitationRequest, IssueRequest,
    OobProof, ProofRequest, Proofs,
};

pub const CONNECTION_ID: &str = "c1";
pub const INVITATION_URL: &str = "https://agent.example.com/c1?c_i=eyJsYWJlbCI6IkFsaWNlIn0";
pub const PROOF_URL: &str = "https://agent.example.com/proofs/?d_m=eyJyZXF1ZXN0IjoicDEifQ";

/// Number of calls made to each agent operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Calls {
    pub create_invitation: usize,
    pub connection: usize,
    pub issue: usize,
    pub issue_deep: usize,
    pub credentials: usize,
    pub delete: usize,
    pub create_proof: usize,
    pub create_proof_oob: usize,
    pub proof: usize,
}

#[derive(Debug, Default)]
struct State {
    connection_states: VecDeque<ConnectionState>,
    proof_states: VecDeque<ProofState>,
    accept_after: Option<usize>,
    fail_credentials: bool,
    records: Vec<CredentialExchange>,
    proof_requests: Vec<ProofRequest>,
    invitations: Vec<InvitationRequest>,
    next_id: usize,
    calls: Calls,
}

/// A scripted agent.
#[derive(Clone, Debug, Default)]
pub struct Agent {
    state: Arc<Mutex<State>>,
}

impl credibil_showcase::provider::Provider for Agent {}

impl Agent {
    /// An agent that completes connections on the first poll, accepts
    /// credentials on the first list, and receives presentations on the
    /// first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default().accept_credentials_after(Some(1))
    }

    /// Successive connection poll responses. The last one repeats.
    #[must_use]
    pub fn with_connection_states(self, states: impl IntoIterator<Item = ConnectionState>) -> Self {
        self.lock().connection_states = states.into_iter().collect();
        self
    }

    /// Successive proof poll responses. The last one repeats.
    #[must_use]
    pub fn with_proof_states(self, states: impl IntoIterator<Item = ProofState>) -> Self {
        self.lock().proof_states = states.into_iter().collect();
        self
    }

    /// The holder accepts every outstanding credential on the `n`th list
    /// call. `None` means credentials are never accepted.
    #[must_use]
    pub fn accept_credentials_after(self, n: Option<usize>) -> Self {
        self.lock().accept_after = n;
        self
    }

    /// Listing credentials fails with a transport error.
    #[must_use]
    pub fn failing_credentials(self) -> Self {
        self.lock().fail_credentials = true;
        self
    }

    /// Seed a credential record, as if issued earlier.
    pub fn seed_record(&self, id: &str, state: CredentialState, definition: Option<&str>) {
        self.lock().records.push(CredentialExchange {
            id: id.into(),
            state,
            credential_definition_id: definition.map(Into::into),
        });
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls
    }

    pub fn records(&self) -> Vec<CredentialExchange> {
        self.lock().records.clone()
    }

    pub fn proof_requests(&self) -> Vec<ProofRequest> {
        self.lock().proof_requests.clone()
    }

    pub fn invitations(&self) -> Vec<InvitationRequest> {
        self.lock().invitations.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("should lock")
    }
}

fn next<T: Copy>(script: &mut VecDeque<T>, default: T) -> T {
    if script.len() > 1 {
        script.pop_front().unwrap_or(default)
    } else {
        script.front().copied().unwrap_or(default)
    }
}

impl State {
    fn issue(&mut self, request: &IssueRequest) -> Result<CredentialExchange> {
        if request.connection_id != CONNECTION_ID {
            return Err(anyhow!("unknown connection {}", request.connection_id));
        }
        self.next_id += 1;
        let record = CredentialExchange {
            id: format!("cred-{}", self.next_id),
            state: CredentialState::Offered,
            credential_definition_id: request.cred.credential_definition_id.clone(),
        };
        self.records.push(record.clone());
        Ok(record)
    }
}

impl Connections for Agent {
    async fn create_invitation(&self, request: InvitationRequest) -> Result<Invitation> {
        let mut state = self.lock();
        state.calls.create_invitation += 1;
        state.invitations.push(request);
        Ok(Invitation {
            id: CONNECTION_ID.into(),
            invitation_url: INVITATION_URL.into(),
        })
    }

    async fn connection(&self, connection_id: &str) -> Result<ConnectionStatus> {
        let mut state = self.lock();
        state.calls.connection += 1;
        if connection_id != CONNECTION_ID {
            return Err(anyhow!("unknown connection {connection_id}"));
        }
        let polled = next(&mut state.connection_states, ConnectionState::Complete);
        Ok(ConnectionStatus {
            id: Some(CONNECTION_ID.into()),
            state: polled,
        })
    }
}

impl Credentials for Agent {
    async fn issue_credential(&self, request: IssueRequest) -> Result<CredentialExchange> {
        let mut state = self.lock();
        state.calls.issue += 1;
        state.issue(&request)
    }

    async fn issue_deep_credential(&self, request: IssueRequest) -> Result<CredentialExchange> {
        let mut state = self.lock();
        state.calls.issue_deep += 1;
        state.issue(&request)
    }

    async fn credentials(&self, connection_id: &str) -> Result<Vec<CredentialExchange>> {
        let mut state = self.lock();
        state.calls.credentials += 1;
        if state.fail_credentials {
            return Err(anyhow!("agent unavailable"));
        }
        if connection_id != CONNECTION_ID {
            return Err(anyhow!("unknown connection {connection_id}"));
        }
        if state.accept_after.is_some_and(|n| state.calls.credentials >= n) {
            for record in &mut state.records {
                record.state = CredentialState::CredentialIssued;
            }
        }
        Ok(state.records.clone())
    }

    async fn delete_credential(&self, credential_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.delete += 1;
        state.records.retain(|r| r.id != credential_id);
        Ok(())
    }
}

impl Proofs for Agent {
    async fn create_proof(&self, request: ProofRequest) -> Result<ProofExchange> {
        let mut state = self.lock();
        state.calls.create_proof += 1;
        if request.connection_id != CONNECTION_ID {
            return Err(anyhow!("unknown connection {}", request.connection_id));
        }
        state.proof_requests.push(request);
        Ok(ProofExchange {
            id: "p1".into(),
            state: ProofState::RequestSent,
        })
    }

    async fn create_proof_oob(&self, request: ProofRequest) -> Result<OobProof> {
        let mut state = self.lock();
        state.calls.create_proof_oob += 1;
        state.proof_requests.push(request);
        Ok(OobProof {
            id: "p1".into(),
            proof_url: PROOF_URL.into(),
        })
    }

    async fn proof(&self, proof_id: &str) -> Result<ProofExchange> {
        let mut state = self.lock();
        state.calls.proof += 1;
        let polled = next(&mut state.proof_states, ProofState::PresentationReceived);
        Ok(ProofExchange {
            id: proof_id.into(),
            state: polled,
        })
    }
}
