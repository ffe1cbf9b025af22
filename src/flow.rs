//! # Flow
//!
//! The step sequencer walks the ordered steps of a use case, or of the
//! onboarding flow, one at a time. Activating a step hands control to the
//! coordinator for its type:
//!
//! | Step type              | Coordinator                 | Completes when            |
//! |------------------------|-----------------------------|---------------------------|
//! | `START`, `INFO`        | none                        | activated                 |
//! | `CONNECTION`           | [`ConnectionEstablisher`]   | the connection is ready   |
//! | `CREDENTIAL`           | [`IssuanceCoordinator`]     | the batch is issued       |
//! | `PROOF`, `PROOF_OOB`   | [`ProofCoordinator`]        | a presentation arrives    |
//! | `STEP_END`, `END`      | none                        | activated                 |
//!
//! `STEP_END` and `END` record the flow as completed and clear the
//! connection, credential and proof state. The flow is over at `END` or after
//! its last step; a `STEP_END` may be followed by further steps.
//!
//! The host advances once the current step has completed. Any error from an
//! activation is terminal for the flow instance: the host resets and starts
//! again. Dropping an activation future stops its polling.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::catalog::{Character, Section, Step, StepType, UseCase};
use crate::config::Config;
use crate::connection::{Connection, ConnectionEstablisher};
use crate::context::{FlowContext, Snapshot};
use crate::issuance::{CredentialExchange, IssuanceCoordinator, Reissue};
use crate::poll::Visibility;
use crate::presentation::{self, ProofCoordinator, ProofExchange};
use crate::provider::Provider;
use crate::{Error, Result};

/// What to run.
#[derive(Clone, Debug)]
pub enum FlowKind {
    /// A use case from the catalog.
    UseCase(UseCase),

    /// Onboarding as `character`, issuing the starter credentials at the
    /// `selection` positions.
    Onboarding {
        /// Character being onboarded.
        character: Character,
        /// Ordered onboarding steps.
        steps: Vec<Step>,
        /// Positions of the chosen starter credentials.
        selection: Vec<usize>,
    },
}

/// Result of activating a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// The step completed; the host may advance.
    Completed,

    /// The flow completed. Completion has been recorded and transient state
    /// cleared; control returns to the host's navigation.
    Finished,
}

#[derive(Debug)]
enum Completion {
    UseCase(String),
    Onboarding,
}

#[derive(Debug)]
struct Flow {
    completion: Completion,
    sections: Vec<Section>,
    steps: Vec<(usize, Step)>,
    index: usize,
    step_done: bool,
    finished: bool,
}

impl From<FlowKind> for Flow {
    fn from(kind: FlowKind) -> Self {
        let (completion, use_case) = match kind {
            FlowKind::UseCase(use_case) => (Completion::UseCase(use_case.slug.clone()), use_case),
            FlowKind::Onboarding {
                character,
                steps,
                selection,
            } => {
                let section = Section {
                    id: character.id.clone(),
                    entity: character.onboarding_entity.clone().unwrap_or_default(),
                    requested_credentials: vec![],
                    issue_credentials: character.selected_credentials(&selection),
                    steps,
                };
                let use_case = UseCase {
                    slug: character.id,
                    sections: vec![section],
                    ..UseCase::default()
                };
                (Completion::Onboarding, use_case)
            }
        };

        let steps = use_case.steps().map(|(i, step)| (i, step.clone())).collect();

        Self {
            completion,
            sections: use_case.sections,
            steps,
            index: 0,
            step_done: false,
            finished: false,
        }
    }
}

/// Drives a flow through its steps.
#[derive(Debug)]
pub struct Sequencer<P> {
    provider: P,
    config: Config,
    visibility: watch::Receiver<Visibility>,
    ctx: FlowContext,
    flow: Option<Flow>,
    completed: BTreeMap<String, DateTime<Utc>>,
    onboarded: Option<DateTime<Utc>>,
}

impl<P: Provider> Sequencer<P> {
    /// Create a sequencer with no flow in progress.
    #[must_use]
    pub fn new(provider: P, config: Config, visibility: watch::Receiver<Visibility>) -> Self {
        Self {
            provider,
            config,
            visibility,
            ctx: FlowContext::new(false),
            flow: None,
            completed: BTreeMap::new(),
            onboarded: None,
        }
    }

    /// Start `kind` from its first step with fresh flow state. Any flow in
    /// progress is abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] if the flow has no steps.
    pub fn start_flow(&mut self, kind: FlowKind) -> Result<()> {
        let flow = Flow::from(kind);
        if flow.steps.is_empty() {
            return Err(Error::Precondition {
                step: "start".into(),
                missing: "at least one step",
            });
        }
        match &flow.completion {
            Completion::UseCase(slug) => tracing::info!(%slug, "starting use case"),
            Completion::Onboarding => tracing::info!("starting onboarding"),
        }

        self.ctx.restart(self.ctx.connection().is_deep_link());
        self.flow = Some(flow);
        Ok(())
    }

    /// The step awaiting activation or advance.
    #[must_use]
    pub fn current_step(&self) -> Option<&Step> {
        self.flow.as_ref().map(|f| &f.steps[f.index].1)
    }

    /// Index of the current step.
    #[must_use]
    pub fn step_index(&self) -> Option<usize> {
        self.flow.as_ref().map(|f| f.index)
    }

    /// Whether the current step has completed.
    #[must_use]
    pub fn step_completed(&self) -> bool {
        self.flow.as_ref().is_some_and(|f| f.step_done)
    }

    /// Whether the host may offer a "back" control. Advisory only.
    #[must_use]
    pub fn back_enabled(&self) -> bool {
        self.flow.as_ref().is_some_and(|f| f.index > 0 && !f.steps[f.index].1.back_disabled)
    }

    /// Move to the next step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StepPending`] if the current step has not completed,
    /// [`Error::FlowFinished`] if there is no next step, and
    /// [`Error::NoFlow`] if no flow has been started.
    pub fn advance(&mut self) -> Result<&Step> {
        let flow = self.flow.as_mut().ok_or(Error::NoFlow)?;
        if flow.finished || flow.index + 1 >= flow.steps.len() {
            return Err(Error::FlowFinished);
        }
        if !flow.step_done {
            return Err(Error::StepPending(flow.steps[flow.index].1.id.clone()));
        }

        flow.index += 1;
        flow.step_done = false;
        let step = &flow.steps[flow.index].1;
        tracing::debug!(index = flow.index, step = %step.id, "advanced");

        if matches!(step.type_, StepType::Proof | StepType::ProofOob) {
            self.ctx.clear_proof();
        }
        self.ctx.step = flow.index;
        self.ctx.publish();
        Ok(step)
    }

    /// Restart the current flow from its first step with fresh flow state.
    pub fn reset(&mut self) {
        if let Some(flow) = self.flow.as_mut() {
            flow.index = 0;
            flow.step_done = false;
            flow.finished = false;
        }
        tracing::info!(flow = %self.ctx.flow_id(), "resetting flow");
        self.ctx.restart(self.ctx.connection().is_deep_link());
    }

    /// Choose whether the holder is reached through deep links rather than
    /// scanned codes. Applies only until the flow's invitation is created;
    /// returns whether the choice took effect.
    pub fn use_deep_link(&mut self, deep_link: bool) -> bool {
        let applied = self.ctx.connection.choose_deep_link(deep_link);
        if applied {
            self.ctx.publish();
        }
        applied
    }

    /// Run the current step. Resolves when the step completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFlow`] if no flow has been started, or any error
    /// raised by the step's coordinator.
    pub async fn activate(&mut self) -> Result<Activation> {
        let flow = self.flow.as_mut().ok_or(Error::NoFlow)?;
        if flow.finished {
            return Ok(Activation::Finished);
        }
        let (section, step) = &flow.steps[flow.index];
        let section = &flow.sections[*section];
        tracing::debug!(step = %step.id, kind = %step.type_, "activating step");

        match step.type_ {
            StepType::Start | StepType::Info | StepType::StepEnd | StepType::End => {}
            StepType::Connection => {
                let visibility = self.visibility.clone();
                let mut establisher =
                    ConnectionEstablisher::new(&self.provider, &self.config, visibility);
                establisher.establish(&mut self.ctx, &section.entity).await?;
            }
            StepType::Credential => {
                let mut issuer =
                    IssuanceCoordinator::new(&self.provider, &self.config, self.visibility.clone());
                issuer.issue(&mut self.ctx, &section.issue_credentials).await?;
            }
            StepType::Proof | StepType::ProofOob => {
                let mut verifier =
                    ProofCoordinator::new(&self.provider, &self.config, self.visibility.clone());
                let out_of_band = step.type_ == StepType::ProofOob;
                verifier
                    .request_and_await(
                        &mut self.ctx,
                        &section.requested_credentials,
                        step.request_options.clone(),
                        out_of_band,
                    )
                    .await?;
            }
        }
        flow.step_done = true;

        let step_type = flow.steps[flow.index].1.type_;
        let last = flow.index + 1 == flow.steps.len();
        if !step_type.is_completion() && !last {
            return Ok(Activation::Completed);
        }

        let now = Utc::now();
        match &flow.completion {
            Completion::UseCase(slug) => {
                self.completed.entry(slug.clone()).or_insert(now);
                tracing::info!(%slug, "use case completed");
            }
            Completion::Onboarding => {
                self.onboarded.get_or_insert(now);
                tracing::info!("onboarding completed");
            }
        }
        if step_type == StepType::End || last {
            flow.finished = true;
        }
        self.ctx.clear();
        Ok(Activation::Finished)
    }

    /// Delete and reissue the current section's credentials that have not
    /// been issued. The issuance window restarts; activate the step again to
    /// wait for the new records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFlow`] if no flow has been started, or any error
    /// raised while reissuing.
    pub async fn recover(&mut self) -> Result<Reissue> {
        let flow = self.flow.as_ref().ok_or(Error::NoFlow)?;
        let section = &flow.sections[flow.steps[flow.index].0];
        let issuer =
            IssuanceCoordinator::new(&self.provider, &self.config, self.visibility.clone());
        issuer.reissue_pending(&mut self.ctx, &section.issue_credentials).await
    }

    /// Current connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        self.ctx.connection()
    }

    /// The connection invitation as an app-launch URI, when the holder is
    /// reached through deep links.
    #[must_use]
    pub fn connection_deep_link(&self) -> Option<String> {
        self.ctx.connection().deep_link(&self.config.wallet_scheme)
    }

    /// Credential exchanges of the current batch.
    #[must_use]
    pub fn credentials(&self) -> &[CredentialExchange] {
        self.ctx.credentials()
    }

    /// Current proof exchange.
    #[must_use]
    pub fn proof(&self) -> Option<&ProofExchange> {
        self.ctx.proof()
    }

    /// Scannable payload for the current out-of-band proof request.
    #[must_use]
    pub fn proof_scan_payload(&self) -> Option<String> {
        presentation::scan_payload(&self.ctx)
    }

    /// The current out-of-band proof request as an app-launch URI.
    #[must_use]
    pub fn proof_deep_link(&self) -> Option<String> {
        presentation::deep_link(&self.ctx, &self.config.wallet_scheme)
    }

    /// The latest snapshot of flow state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.ctx.snapshot()
    }

    /// Subscribe to flow state snapshots. Subscriptions survive resets.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.ctx.subscribe()
    }

    /// Completed use cases, by slug, with when each was first completed.
    #[must_use]
    pub const fn completed_use_cases(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.completed
    }

    /// Whether onboarding has been completed.
    #[must_use]
    pub const fn onboarding_complete(&self) -> bool {
        self.onboarded.is_some()
    }
}
