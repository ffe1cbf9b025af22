//! # Credibil Showcase
//!
//! An SDK for driving verifiable credential demonstrations. A showcase walks
//! a holder through use cases made of ordered steps: connect to an issuer or
//! verifier agent, accept credentials, and present proofs from them.
//!
//! Cryptographic protocol execution happens between the remote agent and the
//! holder's wallet. This crate only initiates exchanges, observes their
//! progress by polling the agent, and reacts to terminal and failure states.
//!
//! The crate does not provide a user or service interface - that is the job of
//! an application implementer. See the `demos` directory for a simple command
//! line host.
//!
//! # Design
//!
//! ** Flow State **
//!
//! A [`Sequencer`] owns the state of one flow instance (connection, credential
//! and proof exchanges) and lends it to one coordinator at a time. Every
//! change is published as a [`context::Snapshot`] for presentation
//! collaborators to render.
//!
//! ** Polling **
//!
//! Coordinators issue a create command, then poll the agent at a fixed
//! interval until the exchange reaches a terminal state. Polling pauses while
//! the host is hidden (see [`poll::VisibilityHandle`]) and stops when the
//! activation future is dropped.
//!
//! ** Provider **
//!
//! Implementors supply access to the remote agent through the `Provider`
//! traits in the [`provider`] module. The library performs no I/O itself.
//!
//! # Example
//!
//! See the `demos` directory for a command line host that implements the
//! provider traits over HTTP.

pub mod catalog;
pub mod config;
pub mod connection;
pub mod context;
mod error;
pub mod flow;
pub mod issuance;
pub mod link;
pub mod poll;
pub mod presentation;
pub mod provider;

pub use crate::config::Config;
pub use crate::error::{Error, Exchange, Result};
pub use crate::flow::{Activation, FlowKind, Sequencer};
pub use crate::poll::{Visibility, VisibilityHandle};
