//! # Issuance
//!
//! Issues a batch of credentials over an established connection and waits
//! for the holder to accept them.
//!
//! Issue commands for a batch are dispatched together and complete in no
//! particular order; the coordinator joins only on the aggregate outcome.
//! The batch must reach issued state within a fixed window that starts at
//! dispatch. When it does not, [`Error::Timeout`] is raised and the flow has
//! to be restarted. Records that are stuck can instead be deleted and
//! reissued with [`IssuanceCoordinator::reissue_pending`].

use std::collections::HashSet;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time;

use crate::catalog::StarterCredential;
use crate::config::Config;
use crate::context::FlowContext;
use crate::error::Exchange;
use crate::poll::{self, Poller, Visibility};
use crate::provider::{Credentials, IssueRequest};
use crate::{Error, Result};

/// Credential exchange state.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialState {
    /// A credential has been proposed.
    #[serde(alias = "proposal-sent", alias = "proposal-received")]
    Proposed,
    /// A credential has been offered to the holder.
    #[serde(alias = "offer-sent", alias = "offer-received")]
    Offered,
    /// The holder has requested the offered credential.
    #[serde(alias = "request-received")]
    RequestSent,
    /// The credential has been issued.
    #[serde(alias = "credential-received")]
    CredentialIssued,
    /// The exchange finished.
    Done,
    /// The exchange was abandoned or declined.
    #[serde(alias = "declined")]
    Abandoned,
}

impl CredentialState {
    /// Whether the holder has the credential.
    #[must_use]
    pub const fn is_issued(self) -> bool {
        matches!(self, Self::CredentialIssued | Self::Done)
    }
}

/// A credential exchange record.
///
/// Agents report the credential definition either as a top-level
/// `credentialDefinitionId` or inside the record's
/// `metadata["_internal/indyCredential"]`; both are accepted.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", from = "CredentialRecord")]
pub struct CredentialExchange {
    /// Record identifier, stable across polls.
    pub id: String,

    /// Exchange state.
    pub state: CredentialState,

    /// Credential definition the record was issued against. Correlates the
    /// record with its template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_definition_id: Option<String>,
}

// Agent wire shape of a credential exchange record.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    id: String,
    state: CredentialState,
    #[serde(default)]
    credential_definition_id: Option<String>,
    #[serde(default)]
    metadata: Option<RecordMetadata>,
}

#[derive(Deserialize)]
struct RecordMetadata {
    #[serde(default, rename = "_internal/indyCredential")]
    indy_credential: Option<IndyCredential>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndyCredential {
    #[serde(default)]
    credential_definition_id: Option<String>,
}

impl From<CredentialRecord> for CredentialExchange {
    fn from(record: CredentialRecord) -> Self {
        let credential_definition_id = record.credential_definition_id.or_else(|| {
            record.metadata?.indy_credential?.credential_definition_id
        });
        Self {
            id: record.id,
            state: record.state,
            credential_definition_id,
        }
    }
}

/// Whether a batch of `expected` credentials has been issued: at least that
/// many records exist and all of them are issued.
#[must_use]
pub fn all_issued(records: &[CredentialExchange], expected: usize) -> bool {
    records.len() >= expected && records.iter().all(|r| r.state.is_issued())
}

/// Outcome of reissuing stuck credential records.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Reissue {
    /// Records deleted.
    pub deleted: Vec<String>,

    /// New records created in their place.
    pub reissued: Vec<CredentialExchange>,

    /// Deleted records with no matching template. Nothing is reissued for
    /// these.
    pub unmatched: Vec<String>,
}

/// Issues credential batches and watches them to completion.
pub struct IssuanceCoordinator<'a, P> {
    provider: &'a P,
    poller: Poller,
    config: &'a Config,
}

impl<'a, P: Credentials> IssuanceCoordinator<'a, P> {
    /// Create a coordinator using `provider` for agent calls.
    #[must_use]
    pub const fn new(
        provider: &'a P, config: &'a Config, visibility: watch::Receiver<Visibility>,
    ) -> Self {
        Self {
            provider,
            poller: Poller::new(visibility),
            config,
        }
    }

    /// Issue `templates` over the flow's connection and wait until every
    /// credential is issued. A batch already dispatched for this flow is not
    /// dispatched again; waiting resumes against the window set at dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the batch is not issued in time and
    /// [`Error::Request`] on any failed agent call.
    pub async fn issue(
        &mut self, ctx: &mut FlowContext, templates: &[StarterCredential],
    ) -> Result<()> {
        if ctx.issuance_deadline.is_none() {
            self.issue_batch(ctx, templates).await?;
        }
        self.await_issued(ctx, templates.len()).await
    }

    /// Dispatch an issue command for each template. Commands run
    /// concurrently with no ordering between them. The deep-link variant is
    /// used when the connection reaches the holder through a deep link.
    ///
    /// The issuance window starts when the batch is dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if any issue command fails, or
    /// [`Error::Precondition`] if the flow has no connection.
    pub async fn issue_batch(
        &self, ctx: &mut FlowContext, templates: &[StarterCredential],
    ) -> Result<()> {
        let Some(connection_id) = ctx.connection.connection_id().map(ToString::to_string) else {
            return Err(Error::Precondition {
                step: "credential".into(),
                missing: "an established connection",
            });
        };
        let deep = ctx.connection.is_deep_link();

        ctx.issuance_deadline = Some(poll::deadline(self.config.issuance_timeout()));
        let dispatches = templates.iter().map(|cred| {
            let request = IssueRequest {
                connection_id: connection_id.clone(),
                cred: cred.clone(),
            };
            async move {
                if deep {
                    self.provider.issue_deep_credential(request).await
                } else {
                    self.provider.issue_credential(request).await
                }
            }
        });
        let results = join_all(dispatches).await;
        tracing::info!(
            flow = %ctx.flow_id, count = templates.len(), deep, "issued credential batch"
        );

        let mut failure = None;
        for result in results {
            match result {
                Ok(record) => ctx.credentials.get_mut().push(record),
                Err(e) => {
                    tracing::error!(flow = %ctx.flow_id, "issue command failed: {e:#}");
                    failure.get_or_insert(e);
                }
            }
        }
        ctx.publish();
        failure.map_or(Ok(()), |e| Err(Error::request(e)))
    }

    /// Fetch the connection's credential records and apply them as the
    /// response to poll `seq`. Returns whether the batch is now issued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if the agent call fails.
    pub async fn poll_credentials(
        &self, ctx: &mut FlowContext, seq: u64, expected: usize,
    ) -> Result<bool> {
        let Some(connection_id) = ctx.connection.connection_id().map(ToString::to_string) else {
            return Err(Error::Precondition {
                step: "credential".into(),
                missing: "an established connection",
            });
        };
        let records = self.provider.credentials(&connection_id).await.map_err(Error::request)?;
        tracing::debug!(flow = %ctx.flow_id, seq, count = records.len(), "polled credentials");

        if ctx.credentials.apply(seq, records) {
            ctx.publish();
        }
        Ok(all_issued(ctx.credentials(), expected))
    }

    /// Poll until `expected` credentials are issued or the issuance window
    /// closes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the window closes first, and
    /// [`Error::Request`] if a poll fails.
    pub async fn await_issued(&mut self, ctx: &mut FlowContext, expected: usize) -> Result<()> {
        if all_issued(ctx.credentials(), expected) {
            return Ok(());
        }
        let window = self.config.issuance_timeout();
        let deadline = *ctx.issuance_deadline.get_or_insert_with(|| poll::deadline(window));

        self.poller.resume_after(ctx.credentials.applied());
        self.poller.start(Some(self.config.poll_interval()));
        let outcome = time::timeout_at(deadline, self.poll_until_issued(ctx, expected)).await;
        self.poller.stop();

        outcome.unwrap_or_else(|_| {
            tracing::warn!(flow = %ctx.flow_id, "credential issuance timed out");
            Err(Error::Timeout { after: window })
        })
    }

    async fn poll_until_issued(&mut self, ctx: &mut FlowContext, expected: usize) -> Result<()> {
        while let Some(seq) = self.poller.tick().await {
            if self.poll_credentials(ctx, seq, expected).await? {
                tracing::info!(flow = %ctx.flow_id, "credentials accepted");
                return Ok(());
            }
        }
        Err(Error::Cancelled(Exchange::Credential))
    }

    /// Delete every record that is not issued and reissue the template with
    /// the same credential definition. Records with no matching template are
    /// deleted and reported as unmatched; nothing is reissued for them.
    ///
    /// At most one live record per credential definition results: a
    /// definition that already has an issued record, or was reissued
    /// earlier in the same pass, is not reissued again. The issuance window
    /// restarts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if a delete or issue command fails.
    pub async fn reissue_pending(
        &self, ctx: &mut FlowContext, templates: &[StarterCredential],
    ) -> Result<Reissue> {
        let Some(connection_id) = ctx.connection.connection_id().map(ToString::to_string) else {
            return Err(Error::Precondition {
                step: "credential".into(),
                missing: "an established connection",
            });
        };

        let mut live: HashSet<String> = ctx
            .credentials()
            .iter()
            .filter(|r| r.state.is_issued())
            .filter_map(|r| r.credential_definition_id.clone())
            .collect();
        let pending: Vec<CredentialExchange> =
            ctx.credentials().iter().filter(|r| !r.state.is_issued()).cloned().collect();

        let mut outcome = Reissue::default();
        for record in pending {
            self.provider.delete_credential(&record.id).await.map_err(Error::request)?;
            ctx.credentials.get_mut().retain(|r| r.id != record.id);
            outcome.deleted.push(record.id.clone());

            let template = record.credential_definition_id.as_deref().and_then(|def| {
                templates.iter().find(|t| t.credential_definition_id.as_deref() == Some(def))
            });
            let Some(template) = template else {
                tracing::warn!(
                    flow = %ctx.flow_id, record = %record.id,
                    "no template matches record, not reissuing"
                );
                outcome.unmatched.push(record.id);
                continue;
            };

            let def = template.credential_definition_id.clone().unwrap_or_default();
            if !live.insert(def) {
                continue;
            }
            let request = IssueRequest {
                connection_id: connection_id.clone(),
                cred: template.clone(),
            };
            let reissued =
                self.provider.issue_credential(request).await.map_err(Error::request)?;
            tracing::info!(
                flow = %ctx.flow_id, old = %record.id, new = %reissued.id, "reissued credential"
            );
            ctx.credentials.get_mut().push(reissued.clone());
            outcome.reissued.push(reissued);
        }

        ctx.issuance_deadline = Some(poll::deadline(self.config.issuance_timeout()));
        ctx.publish();
        Ok(outcome)
    }
}
