//! # Presentation
//!
//! Requests a proof from the holder and waits for the presentation.
//!
//! A proof request is built from a use case section's requested credentials:
//! each credential listing properties contributes an attribute group and each
//! credential listing a predicate contributes a predicate group. Groups are
//! keyed by credential name and restricted to the schema named in the
//! credential definition identifier.
//!
//! Out-of-band requests are delivered to the holder as a scannable payload or
//! a deep link, both derived from the proof URL returned by the agent.
//! In-band requests are sent over the flow's established connection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::catalog::{AttributeValue, RequestOptions, RequestedCredential};
use crate::config::Config;
use crate::context::FlowContext;
use crate::error::Exchange;
use crate::link;
use crate::poll::{Poller, Sequenced, Visibility};
use crate::provider::{ProofRequest, Proofs};
use crate::{Error, Result};

/// Proof exchange state.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ProofState {
    /// The request has been sent to the holder.
    #[serde(alias = "request-received")]
    RequestSent,
    /// The holder has presented.
    #[serde(alias = "presentation-sent")]
    PresentationReceived,
    /// The exchange finished.
    Done,
    /// The exchange was abandoned or declined.
    #[serde(alias = "declined")]
    Abandoned,
}

impl ProofState {
    /// Whether the presentation has been received.
    #[must_use]
    pub const fn is_received(self) -> bool {
        matches!(self, Self::PresentationReceived | Self::Done)
    }
}

/// A proof exchange record.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProofExchange {
    /// Record identifier, stable across polls.
    pub id: String,

    /// Exchange state.
    pub state: ProofState,
}

/// Restricts a group to credentials of a given schema.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Restriction {
    /// Schema name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
}

/// Attributes requested from one credential.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AttributeGroup {
    /// Credentials the attributes may come from.
    pub restrictions: Vec<Restriction>,

    /// Attribute names.
    pub names: Vec<String>,
}

/// A predicate to be proven over one credential attribute.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PredicateGroup {
    /// Credentials the predicate may be proven over.
    pub restrictions: Vec<Restriction>,

    /// Attribute name.
    pub name: String,

    /// Value compared against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<AttributeValue>,

    /// Comparator, such as `>=`.
    pub p_type: String,
}

/// Schema name carried in a credential definition identifier: its fifth
/// colon-delimited segment (index 4).
#[must_use]
pub fn schema_name(credential_definition_id: &str) -> Option<&str> {
    credential_definition_id.split(':').nth(4)
}

/// Build a proof request from `requested` credentials. The request carries
/// no connection; set one for in-band delivery.
#[must_use]
pub fn build_request(
    requested: &[RequestedCredential], request_options: Option<RequestOptions>,
) -> ProofRequest {
    let mut attributes = BTreeMap::new();
    let mut predicates = BTreeMap::new();

    for cred in requested {
        let restrictions = vec![Restriction {
            schema_name: cred
                .credential_definition_id
                .as_deref()
                .and_then(schema_name)
                .map(ToString::to_string),
        }];

        if let Some(names) = &cred.properties {
            attributes.insert(cred.name.clone(), AttributeGroup {
                restrictions: restrictions.clone(),
                names: names.clone(),
            });
        }
        if let Some(predicate) = &cred.predicates {
            predicates.insert(cred.name.clone(), PredicateGroup {
                restrictions,
                name: predicate.name.clone(),
                p_value: predicate.value.clone(),
                p_type: predicate.type_.clone(),
            });
        }
    }

    ProofRequest {
        connection_id: String::new(),
        attributes,
        predicates,
        request_options,
    }
}

/// Scannable payload for the flow's out-of-band proof request, if one has
/// been created.
#[must_use]
pub fn scan_payload(ctx: &FlowContext) -> Option<String> {
    match (ctx.proof_url(), ctx.proof()) {
        (Some(url), Some(proof)) => Some(link::scan_payload(url, &proof.id)),
        _ => None,
    }
}

/// The flow's out-of-band proof request as an app-launch URI.
#[must_use]
pub fn deep_link(ctx: &FlowContext, scheme: &str) -> Option<String> {
    ctx.proof_url().and_then(|url| link::deep_link(url, scheme))
}

/// Creates proof requests and polls them until the holder presents.
pub struct ProofCoordinator<'a, P> {
    provider: &'a P,
    poller: Poller,
    config: &'a Config,
}

impl<'a, P: Proofs> ProofCoordinator<'a, P> {
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

    /// Create an out-of-band proof request. If the flow already has a proof
    /// request the existing one is kept and no request is sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if the agent call fails.
    pub async fn create_out_of_band_request(
        &self, ctx: &mut FlowContext, mut request: ProofRequest,
    ) -> Result<()> {
        if let Some(proof) = ctx.proof() {
            tracing::debug!(flow = %ctx.flow_id, proof = %proof.id, "reusing proof request");
            return Ok(());
        }
        request.connection_id = String::new();

        let oob = self.provider.create_proof_oob(request).await.map_err(Error::request)?;
        tracing::info!(flow = %ctx.flow_id, proof = %oob.id, "out-of-band proof requested");

        ctx.proof = Some(Sequenced::new(ProofExchange {
            id: oob.id,
            state: ProofState::RequestSent,
        }));
        ctx.proof_url = Some(oob.proof_url);
        ctx.publish();
        Ok(())
    }

    /// Send a proof request over the flow's connection. If the flow already
    /// has a proof request the existing one is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if the agent call fails, or
    /// [`Error::Precondition`] if the flow has no connection.
    pub async fn create_request(
        &self, ctx: &mut FlowContext, mut request: ProofRequest,
    ) -> Result<()> {
        if let Some(proof) = ctx.proof() {
            tracing::debug!(flow = %ctx.flow_id, proof = %proof.id, "reusing proof request");
            return Ok(());
        }
        let Some(connection_id) = ctx.connection.connection_id() else {
            return Err(Error::Precondition {
                step: "proof".into(),
                missing: "an established connection",
            });
        };
        request.connection_id = connection_id.to_string();

        let proof = self.provider.create_proof(request).await.map_err(Error::request)?;
        tracing::info!(flow = %ctx.flow_id, proof = %proof.id, "proof requested");

        ctx.proof = Some(Sequenced::new(proof));
        ctx.publish();
        Ok(())
    }

    /// Fetch the proof exchange and apply it as the response to poll `seq`.
    /// Returns the proof state after applying.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if the agent call fails, or
    /// [`Error::Precondition`] if no proof has been requested.
    pub async fn poll_proof_state(&self, ctx: &mut FlowContext, seq: u64) -> Result<ProofState> {
        let Some(proof_id) = ctx.proof().map(|p| p.id.clone()) else {
            return Err(Error::Precondition {
                step: "proof".into(),
                missing: "a proof request",
            });
        };
        let polled = self.provider.proof(&proof_id).await.map_err(Error::request)?;
        tracing::debug!(flow = %ctx.flow_id, seq, state = ?polled.state, "polled proof");

        let Some(proof) = ctx.proof.as_mut() else {
            return Err(Error::Precondition {
                step: "proof".into(),
                missing: "a proof request",
            });
        };
        if proof.apply(seq, polled) {
            ctx.publish();
        }
        Ok(ctx.proof().map_or(ProofState::RequestSent, |p| p.state))
    }

    /// Poll at the configured interval until the holder presents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Abandoned`] if the holder or agent abandons the
    /// exchange, and [`Error::Request`] if a poll fails.
    pub async fn await_presentation(&mut self, ctx: &mut FlowContext) -> Result<()> {
        let Some(proof) = ctx.proof.as_ref() else {
            return Err(Error::Precondition {
                step: "proof".into(),
                missing: "a proof request",
            });
        };

        let mut state = proof.get().state;
        if !state.is_received() && state != ProofState::Abandoned {
            self.poller.resume_after(proof.applied());
            self.poller.start(Some(self.config.poll_interval()));
            while !state.is_received() && state != ProofState::Abandoned {
                let Some(seq) = self.poller.tick().await else {
                    return Err(Error::Cancelled(Exchange::Proof));
                };
                state = match self.poll_proof_state(ctx, seq).await {
                    Ok(state) => state,
                    Err(e) => {
                        self.poller.stop();
                        return Err(e);
                    }
                };
            }
            self.poller.stop();
        }

        if state == ProofState::Abandoned {
            return Err(Error::Abandoned {
                exchange: Exchange::Proof,
                id: ctx.proof().map(|p| p.id.clone()).unwrap_or_default(),
            });
        }
        tracing::info!(flow = %ctx.flow_id, "presentation received");
        Ok(())
    }

    /// Build a request for `requested` credentials, send it out of band or
    /// over the connection, and wait for the presentation.
    ///
    /// # Errors
    ///
    /// Returns any error from creating the request or awaiting the
    /// presentation.
    pub async fn request_and_await(
        &mut self, ctx: &mut FlowContext, requested: &[RequestedCredential],
        request_options: Option<RequestOptions>, out_of_band: bool,
    ) -> Result<()> {
        let request = build_request(requested, request_options);
        if out_of_band {
            self.create_out_of_band_request(ctx, request).await?;
        } else {
            self.create_request(ctx, request).await?;
        }
        self.await_presentation(ctx).await
    }
}
