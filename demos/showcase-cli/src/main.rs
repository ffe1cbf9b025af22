//! # Showcase CLI
//!
//! Runs a showcase use case, or onboarding, against a live agent. Invitation
//! and proof request links are printed as they are created for the holder to
//! open in their wallet.
//!
//! Settings are read from the environment (and a `.env` file, if present),
//! then from command-line flags:
//!
//! - `SHOWCASE_AGENT_URL`: agent base URL
//! - `SHOWCASE_POLL_MS`: poll interval in milliseconds
//! - `SHOWCASE_TIMEOUT_MS`: issuance timeout in milliseconds

mod agent;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use credibil_showcase::catalog::{Character, Step, UseCase};
use credibil_showcase::context::Snapshot;
use credibil_showcase::{Activation, Config, Error, FlowKind, Sequencer, VisibilityHandle, link};
use serde::Deserialize;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::agent::HttpAgent;

#[derive(Parser)]
#[command(name = "showcase")]
#[command(about = "Run a verifiable credential showcase flow against an agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Catalog file (JSON) with use cases, characters and onboarding steps
    catalog: PathBuf,

    /// Use case to run, by slug. Runs onboarding when omitted
    #[arg(short, long)]
    use_case: Option<String>,

    /// Character to onboard, by id. Defaults to the first character
    #[arg(short, long)]
    character: Option<String>,

    /// Positions of the starter credentials to issue during onboarding
    #[arg(short, long, value_delimiter = ',')]
    select: Vec<usize>,

    /// Agent base URL
    #[arg(long, env = "SHOWCASE_AGENT_URL")]
    agent_url: Url,

    /// Interval between status polls, in milliseconds
    #[arg(long, env = "SHOWCASE_POLL_MS")]
    poll_ms: Option<u64>,

    /// Issuance timeout, in milliseconds
    #[arg(long, env = "SHOWCASE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Reach the wallet through deep links instead of scanned codes
    #[arg(long)]
    deep_link: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Catalog file contents.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Catalog {
    config: Config,
    use_cases: Vec<UseCase>,
    characters: Vec<Character>,
    onboarding: Vec<Step>,
}

impl Catalog {
    fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    fn flow(self, cli: &Cli) -> Result<FlowKind> {
        if let Some(slug) = &cli.use_case {
            let use_case = self
                .use_cases
                .into_iter()
                .find(|u| &u.slug == slug)
                .ok_or_else(|| anyhow!("no use case {slug} in catalog"))?;
            return Ok(FlowKind::UseCase(use_case));
        }

        let mut characters = self.characters.into_iter();
        let character = match &cli.character {
            Some(id) => characters.find(|c| &c.id == id),
            None => characters.next(),
        }
        .ok_or_else(|| anyhow!("no character to onboard"))?;

        let selection = if cli.select.is_empty() {
            character.starter_credentials.keys().copied().collect()
        } else {
            cli.select.clone()
        };

        Ok(FlowKind::Onboarding {
            character,
            steps: self.onboarding,
            selection,
        })
    }
}

// Apply command-line overrides to the catalog configuration. Zero intervals
// would leave polling unscheduled or time issuance out immediately.
fn settings(mut config: Config, cli: &Cli) -> Result<Config> {
    if let Some(ms) = cli.poll_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = cli.timeout_ms {
        config.issuance_timeout_ms = ms;
    }
    ensure!(config.poll_interval_ms > 0, "poll interval must be at least 1 ms");
    ensure!(config.issuance_timeout_ms > 0, "issuance timeout must be at least 1 ms");
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        "showcase=debug,credibil_showcase=debug"
    } else {
        "showcase=info,credibil_showcase=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let catalog = Catalog::load(&cli.catalog)?;
    let config = settings(catalog.config.clone(), &cli)?;
    let kind = catalog.flow(&cli)?;

    let visibility = VisibilityHandle::new();
    let scheme = config.wallet_scheme.clone();
    let agent = HttpAgent::new(cli.agent_url.clone());
    let mut sequencer = Sequencer::new(agent, config, visibility.subscribe());
    sequencer.start_flow(kind)?;
    sequencer.use_deep_link(cli.deep_link);

    tokio::spawn(show_links(sequencer.subscribe(), scheme, cli.deep_link));

    tokio::select! {
        outcome = run(&mut sequencer) => outcome?,
        _ = signal::ctrl_c() => {
            tracing::info!("interrupted");
            return Ok(());
        }
    }

    for (slug, at) in sequencer.completed_use_cases() {
        println!("completed {slug} at {at}");
    }
    if sequencer.onboarding_complete() {
        println!("onboarding complete");
    }
    Ok(())
}

// Activate each step in turn until the flow finishes. An issuance timeout is
// recovered once per step by reissuing stuck credentials.
async fn run(sequencer: &mut Sequencer<HttpAgent>) -> Result<()> {
    loop {
        let Some(step) = sequencer.current_step() else {
            return Err(anyhow!("flow has no current step"));
        };
        println!("\n[{}] {}", step.id, step.title);
        if let Some(description) = &step.description {
            println!("{description}");
        }

        let mut recovered = false;
        let activation = loop {
            match sequencer.activate().await {
                Err(Error::Timeout { after }) if !recovered => {
                    tracing::warn!(?after, "issuance timed out, reissuing");
                    let reissue = sequencer.recover().await?;
                    if !reissue.unmatched.is_empty() {
                        tracing::warn!(unmatched = ?reissue.unmatched, "deleted unmatched records");
                    }
                    recovered = true;
                }
                outcome => break outcome?,
            }
        };

        if activation == Activation::Completed {
            for credential in sequencer.credentials() {
                println!("credential {} {:?}", credential.id, credential.state);
            }
            if let Some(proof) = sequencer.proof() {
                println!("proof {} {:?}", proof.id, proof.state);
            }
        }

        match sequencer.advance() {
            Ok(_) => {}
            Err(Error::FlowFinished) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

// Print invitation and proof request links once each, as they appear.
async fn show_links(mut snapshots: watch::Receiver<Snapshot>, scheme: String, deep_link: bool) {
    let mut shown: Vec<String> = Vec::new();

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();

        let mut links = Vec::new();
        if let Some(url) = snapshot.connection.invitation_url() {
            links.push(("invitation", url.to_string()));
        }
        if let (Some(url), Some(proof)) = (&snapshot.proof_url, &snapshot.proof) {
            let payload =
                if deep_link { url.clone() } else { link::scan_payload(url, &proof.id) };
            links.push(("proof request", payload));
        }

        for (label, url) in links {
            if shown.contains(&url) {
                continue;
            }
            let display = if deep_link {
                link::deep_link(&url, &scheme).unwrap_or_else(|| url.clone())
            } else {
                url.clone()
            };
            println!("{label}: {display}");
            shown.push(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let base = ["showcase", "catalog.json", "--agent-url", "https://agent.example.com"];
        Cli::try_parse_from(base.iter().chain(args)).expect("should parse")
    }

    #[test]
    fn overrides_apply() {
        let config = settings(Config::default(), &cli(&["--poll-ms", "250", "--timeout-ms", "500"]))
            .expect("should accept");
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.issuance_timeout_ms, 500);

        let max = u64::MAX.to_string();
        let config = settings(Config::default(), &cli(&["--timeout-ms", max.as_str()]))
            .expect("should accept");
        assert_eq!(config.issuance_timeout_ms, u64::MAX);
    }

    #[test]
    fn zero_intervals_rejected() {
        let err = settings(Config::default(), &cli(&["--poll-ms", "0"])).expect_err("zero poll");
        assert!(err.to_string().contains("poll interval"));

        let err =
            settings(Config::default(), &cli(&["--timeout-ms", "0"])).expect_err("zero timeout");
        assert!(err.to_string().contains("issuance timeout"));

        let catalog = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        assert!(settings(catalog, &cli(&[])).is_err());
    }
}
