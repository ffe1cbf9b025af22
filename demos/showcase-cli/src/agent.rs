//! # HTTP Agent
//!
//! Provider implementation backed by the agent's REST API. Each provider
//! method is a single JSON request. Non-success responses are reported as
//! errors carrying the status and response body.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use credibil_showcase::issuance::CredentialExchange;
use credibil_showcase::presentation::ProofExchange;
use credibil_showcase::provider::{
    ConnectionStatus, Connections, Credentials, Invitation, InvitationRequest, IssueRequest,
    OobProof, ProofRequest, Proofs, Provider,
};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a remote identity agent.
#[derive(Clone, Debug)]
pub struct HttpAgent {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAgent {
    /// Create a client for the agent at `base_url`. Request paths are
    /// resolved relative to it.
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn req(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(path).with_context(|| format!("invalid agent path {path}"))?;
        tracing::debug!(%method, %url, "agent request");

        Ok(self
            .client
            .request(method, url)
            .timeout(TIMEOUT)
            .header("User-Agent", format!("showcase-cli/{}", env!("CARGO_PKG_VERSION"))))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = handle(self.req(Method::GET, path)?).await?;
        response.json().await.context("decoding agent response")
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = handle(self.req(Method::POST, path)?.json(body)).await?;
        response.json().await.context("decoding agent response")
    }
}

async fn handle(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.context("sending agent request")?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("{url} returned {status}: {body}"))
}

impl Provider for HttpAgent {}

impl Connections for HttpAgent {
    async fn create_invitation(&self, request: InvitationRequest) -> Result<Invitation> {
        self.post("connections/createInvite", &request).await
    }

    async fn connection(&self, connection_id: &str) -> Result<ConnectionStatus> {
        self.get(&format!("connections/getConnectionStatus/{connection_id}")).await
    }
}

impl Credentials for HttpAgent {
    async fn issue_credential(&self, request: IssueRequest) -> Result<CredentialExchange> {
        self.post("credentials/offerCredential", &request).await
    }

    async fn issue_deep_credential(&self, request: IssueRequest) -> Result<CredentialExchange> {
        self.post("credentials/offerDeepCredential", &request).await
    }

    async fn credentials(&self, connection_id: &str) -> Result<Vec<CredentialExchange>> {
        self.get(&format!("credentials/connId/{connection_id}")).await
    }

    async fn delete_credential(&self, credential_id: &str) -> Result<()> {
        handle(self.req(Method::DELETE, &format!("credentials/{credential_id}"))?).await?;
        Ok(())
    }
}

impl Proofs for HttpAgent {
    async fn create_proof(&self, request: ProofRequest) -> Result<ProofExchange> {
        self.post("proofs/requestProof", &request).await
    }

    async fn create_proof_oob(&self, request: ProofRequest) -> Result<OobProof> {
        self.post("proofs/requestProofOOB", &request).await
    }

    async fn proof(&self, proof_id: &str) -> Result<ProofExchange> {
        self.get(&format!("proofs/{proof_id}")).await
    }
}
