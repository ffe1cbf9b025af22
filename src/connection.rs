//! # Connection
//!
//! Establishes a connection between the remote agent and the holder's
//! wallet. An invitation is created through the provider and its state is
//! then polled until the agent reports the handshake complete or abandoned.
//!
//! State moves strictly forward. Poll responses that would move it backwards,
//! or that are older than the last applied response, are ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::catalog::Entity;
use crate::config::Config;
use crate::context::FlowContext;
use crate::error::Exchange;
use crate::link;
use crate::poll::{Poller, Sequenced, Visibility};
use crate::provider::{ConnectionStatus, Connections, Invitation, InvitationRequest};
use crate::{Error, Result};

/// Connection handshake state. Variants are ordered by handshake progress.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    /// No invitation has been created.
    #[default]
    Uninitiated,
    /// An invitation is waiting for the holder.
    Invited,
    /// The holder has requested a connection.
    Requested,
    /// The agent has responded to the request.
    Responded,
    /// The connection is established.
    #[serde(alias = "completed")]
    Complete,
    /// The agent gave up on the handshake.
    Abandoned,
}

impl ConnectionState {
    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Abandoned)
    }
}

/// A connection between the agent and the holder, as last observed.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    id: Option<String>,
    invite_id: Option<String>,
    state: Sequenced<ConnectionState>,
    invitation_url: Option<String>,
    is_deep_link: bool,
}

impl Connection {
    /// An uninitiated connection. `deep_link` is fixed for the connection's
    /// lifetime.
    #[must_use]
    pub fn new(deep_link: bool) -> Self {
        Self {
            is_deep_link: deep_link,
            ..Self::default()
        }
    }

    /// Connection identifier, once the agent has reported one.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Invitation handle returned when the invitation was created.
    #[must_use]
    pub fn invite_id(&self) -> Option<&str> {
        self.invite_id.as_deref()
    }

    /// Identifier to address the connection by: the agent-assigned id, or
    /// the invitation handle until one is known.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.invite_id.as_deref())
    }

    /// Handshake state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        *self.state.get()
    }

    /// Invitation URL to render as a scannable code.
    #[must_use]
    pub fn invitation_url(&self) -> Option<&str> {
        self.invitation_url.as_deref()
    }

    /// Whether the holder is reached through an app-launch URI.
    #[must_use]
    pub const fn is_deep_link(&self) -> bool {
        self.is_deep_link
    }

    /// The invitation as an app-launch URI. Only produced for deep-link
    /// connections; derived from the stored invitation URL so the two
    /// representations cannot diverge.
    #[must_use]
    pub fn deep_link(&self, scheme: &str) -> Option<String> {
        match (&self.invitation_url, self.is_deep_link) {
            (Some(url), true) => link::deep_link(url, scheme),
            _ => None,
        }
    }

    /// Choose how the holder is reached. Only possible before an invitation
    /// exists; returns whether the choice was applied.
    pub(crate) fn choose_deep_link(&mut self, deep_link: bool) -> bool {
        if self.invite_id.is_some() {
            return false;
        }
        self.is_deep_link = deep_link;
        true
    }

    fn invited(&mut self, invitation: Invitation) {
        self.invite_id = Some(invitation.id);
        self.invitation_url = Some(invitation.invitation_url);
        self.state = Sequenced::new(ConnectionState::Invited);
    }

    /// Apply a poll response tagged with `seq`. Returns whether it was
    /// applied.
    fn observe(&mut self, seq: u64, status: ConnectionStatus) -> bool {
        let current = self.state();
        if current.is_terminal() || status.state < current {
            tracing::debug!(?current, polled = ?status.state, "ignoring backward connection state");
            return false;
        }
        if !self.state.apply(seq, status.state) {
            return false;
        }
        match (&self.id, status.id) {
            (None, Some(id)) => self.id = Some(id),
            (Some(current), Some(polled)) if *current != polled => {
                tracing::warn!(%current, %polled, "agent reported a different connection id");
            }
            _ => {}
        }
        true
    }
}

/// Creates invitations and polls them to completion.
pub struct ConnectionEstablisher<'a, P> {
    provider: &'a P,
    poller: Poller,
    config: &'a Config,
}

impl<'a, P: Connections> ConnectionEstablisher<'a, P> {
    /// Create an establisher using `provider` for agent calls.
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

    /// Create a connection invitation and record it on the flow's
    /// connection, which moves to `invited`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if the agent call fails.
    pub async fn create_invitation(
        &self, ctx: &mut FlowContext, label: Option<String>, image_url: Option<String>,
    ) -> Result<()> {
        let request = InvitationRequest { label, image_url };
        let invitation =
            self.provider.create_invitation(request).await.map_err(Error::request)?;
        tracing::info!(flow = %ctx.flow_id, invite = %invitation.id, "invitation created");

        ctx.connection.invited(invitation);
        ctx.publish();
        Ok(())
    }

    /// Fetch the connection's state and apply it as the response to poll
    /// `seq`. Returns the connection state after applying.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Request`] if the agent call fails, or
    /// [`Error::Precondition`] if no invitation has been created.
    pub async fn poll_connection_state(
        &self, ctx: &mut FlowContext, seq: u64,
    ) -> Result<ConnectionState> {
        let Some(handle) = ctx.connection.invite_id().map(ToString::to_string) else {
            return Err(Error::Precondition {
                step: "connection".into(),
                missing: "an invitation",
            });
        };
        let status = self.provider.connection(&handle).await.map_err(Error::request)?;
        tracing::debug!(flow = %ctx.flow_id, seq, state = ?status.state, "polled connection");

        if ctx.connection.observe(seq, status) {
            ctx.publish();
        }
        Ok(ctx.connection.state())
    }

    /// Create an invitation (unless one exists) labelled for `entity`, then
    /// poll until the handshake completes. Returns once, when the connection
    /// is ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Abandoned`] if the agent abandons the handshake, and
    /// [`Error::Request`] on any failed agent call.
    pub async fn establish(&mut self, ctx: &mut FlowContext, entity: &Entity) -> Result<()> {
        if ctx.connection.invite_id().is_none() {
            self.create_invitation(ctx, Some(entity.name.clone()), entity.image_url.clone())
                .await?;
        }

        let mut state = ctx.connection.state();
        if !state.is_terminal() {
            self.poller.resume_after(ctx.connection.state.applied());
            self.poller.start(Some(self.config.poll_interval()));
            while !state.is_terminal() {
                let Some(seq) = self.poller.tick().await else {
                    return Err(Error::Cancelled(Exchange::Connection));
                };
                state = match self.poll_connection_state(ctx, seq).await {
                    Ok(state) => state,
                    Err(e) => {
                        self.poller.stop();
                        return Err(e);
                    }
                };
            }
            self.poller.stop();
        }

        if state == ConnectionState::Abandoned {
            return Err(Error::Abandoned {
                exchange: Exchange::Connection,
                id: ctx.connection.connection_id().unwrap_or_default().to_string(),
            });
        }
        tracing::info!(flow = %ctx.flow_id, id = ?ctx.connection.id(), "connection ready");
        Ok(())
    }
}
