//! Tests for issuing a batch of credentials over an established connection,
//! including the issuance timeout and the reissue recovery path.
mod provider;

use std::collections::HashSet;
use std::time::Duration;

use credibil_showcase::catalog::{Entity, StarterCredential};
use credibil_showcase::connection::ConnectionEstablisher;
use credibil_showcase::context::FlowContext;
use credibil_showcase::issuance::{CredentialState, IssuanceCoordinator};
use credibil_showcase::{Config, Error, VisibilityHandle};
use tokio::time::{self, Instant};

use crate::provider::Agent;

const STUDENT_CARD: &str = "Ui6HA36FvN83cEtmYYHxrn:3:CL:25:student_card";
const TRANSCRIPT: &str = "Ui6HA36FvN83cEtmYYHxrn:3:CL:26:transcript";

fn templates() -> Vec<StarterCredential> {
    vec![
        StarterCredential {
            id: "1".into(),
            name: "Student Card".into(),
            credential_definition_id: Some(STUDENT_CARD.into()),
            ..StarterCredential::default()
        },
        StarterCredential {
            id: "2".into(),
            name: "Transcript".into(),
            credential_definition_id: Some(TRANSCRIPT.into()),
            ..StarterCredential::default()
        },
    ]
}

async fn connected(agent: &Agent, visibility: &VisibilityHandle, deep_link: bool) -> FlowContext {
    let config = Config::default();
    let mut ctx = FlowContext::new(deep_link);
    let mut establisher = ConnectionEstablisher::new(agent, &config, visibility.subscribe());
    establisher.establish(&mut ctx, &Entity::default()).await.expect("should connect");
    ctx
}

// A batch of N templates yields N records, one per credential definition,
// and polling stops once all are issued.
#[tokio::test(start_paused = true)]
async fn batch_issued() {
    let agent = Agent::new();
    let config = Config::default();
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, false).await;

    let mut issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    issuer.issue(&mut ctx, &templates()).await.expect("should issue");

    let records = ctx.credentials();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.state == CredentialState::CredentialIssued));
    let definitions: HashSet<_> =
        records.iter().filter_map(|r| r.credential_definition_id.as_deref()).collect();
    assert_eq!(definitions, HashSet::from([STUDENT_CARD, TRANSCRIPT]));

    let calls = agent.calls();
    assert_eq!(calls.issue, 2);
    assert_eq!(calls.issue_deep, 0);

    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(agent.calls().credentials, calls.credentials);
}

// Deep-link connections use the deep issue variant.
#[tokio::test(start_paused = true)]
async fn deep_link_batch() {
    let agent = Agent::new();
    let config = Config::default();
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, true).await;

    let mut issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    issuer.issue(&mut ctx, &templates()).await.expect("should issue");

    assert_eq!(agent.calls().issue, 0);
    assert_eq!(agent.calls().issue_deep, 2);
}

// Two templates that never reach issued state time out once, ten seconds
// after dispatch, and polling stops.
#[tokio::test(start_paused = true)]
async fn timeout_fires_once() {
    let agent = Agent::new().accept_credentials_after(None);
    let config = Config::default();
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, false).await;

    let mut issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    let dispatched = Instant::now();
    let Err(err) = issuer.issue(&mut ctx, &templates()).await else {
        panic!("expected timeout");
    };
    let elapsed = dispatched.elapsed();

    assert!(matches!(err, Error::Timeout { after } if after == Duration::from_secs(10)));
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    assert_eq!(agent.records().len(), 2);

    let polls = agent.calls().credentials;
    assert!(polls >= 9);
    time::sleep(Duration::from_secs(15)).await;
    assert_eq!(agent.calls().credentials, polls);
}

// Once the batch is issued the timeout never fires, and activating again
// does not dispatch a second batch.
#[tokio::test(start_paused = true)]
async fn issued_batch_never_times_out() {
    let agent = Agent::new().accept_credentials_after(Some(3));
    let config = Config::default();
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, false).await;

    let mut issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    issuer.issue(&mut ctx, &templates()).await.expect("should issue");

    time::sleep(Duration::from_secs(20)).await;
    issuer.issue(&mut ctx, &templates()).await.expect("should stay issued");
    assert_eq!(agent.calls().issue, 2);
    assert_eq!(agent.calls().credentials, 3);
}

// A window too large to represent behaves as no deadline at all.
#[tokio::test(start_paused = true)]
async fn unbounded_window() {
    let agent = Agent::new().accept_credentials_after(Some(3));
    let config = Config {
        issuance_timeout_ms: u64::MAX,
        ..Config::default()
    };
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, false).await;

    let mut issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    issuer.issue(&mut ctx, &templates()).await.expect("should issue");
    assert!(ctx.credentials().iter().all(|r| r.state.is_issued()));
}

// A transport failure while polling is reported as a request error, not as
// a timeout.
#[tokio::test(start_paused = true)]
async fn transport_error_is_not_timeout() {
    let agent = Agent::new().failing_credentials();
    let config = Config::default();
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, false).await;

    let mut issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    let Err(err) = issuer.issue(&mut ctx, &templates()).await else {
        panic!("expected request error");
    };
    assert!(matches!(err, Error::Request(_)));
    assert_eq!(agent.calls().credentials, 1);
}

// Reissuing stuck records never leaves more than one live record per
// credential definition, however often it runs.
#[tokio::test(start_paused = true)]
async fn reissue_is_idempotent() {
    let agent = Agent::new().accept_credentials_after(None);
    let config = Config::default();
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, false).await;

    let issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    issuer.issue_batch(&mut ctx, &templates()).await.expect("should dispatch");

    for _ in 0..2 {
        let outcome =
            issuer.reissue_pending(&mut ctx, &templates()).await.expect("should reissue");
        assert_eq!(outcome.deleted.len(), 2);
        assert_eq!(outcome.reissued.len(), 2);
        assert!(outcome.unmatched.is_empty());

        let records = agent.records();
        assert_eq!(records.len(), 2);
        let definitions: HashSet<_> =
            records.iter().filter_map(|r| r.credential_definition_id.clone()).collect();
        assert_eq!(definitions.len(), 2);
    }
    assert_eq!(agent.calls().delete, 4);
    assert_eq!(ctx.credentials().len(), 2);
}

// A stuck record with no matching template is deleted and reported, and
// nothing is reissued for it.
#[tokio::test(start_paused = true)]
async fn reissue_reports_unmatched() {
    let agent = Agent::new().accept_credentials_after(None);
    let config = Config::default();
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, false).await;
    let library = "Ui6HA36FvN83cEtmYYHxrn:3:CL:9:library";
    agent.seed_record("stray", CredentialState::Offered, Some(library));

    let issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    issuer.issue_batch(&mut ctx, &templates()).await.expect("should dispatch");
    issuer.poll_credentials(&mut ctx, 1, 2).await.expect("should poll");
    assert_eq!(ctx.credentials().len(), 3);

    let outcome = issuer.reissue_pending(&mut ctx, &templates()).await.expect("should reissue");
    assert_eq!(outcome.deleted.len(), 3);
    assert_eq!(outcome.unmatched, vec!["stray".to_string()]);
    assert_eq!(outcome.reissued.len(), 2);
    assert_eq!(agent.calls().issue, 4);
}

// A definition that already has an issued record is not reissued.
#[tokio::test(start_paused = true)]
async fn reissue_skips_issued_definition() {
    let agent = Agent::new().accept_credentials_after(None);
    let config = Config::default();
    let visibility = VisibilityHandle::new();
    let mut ctx = connected(&agent, &visibility, false).await;
    agent.seed_record("a1", CredentialState::CredentialIssued, Some(STUDENT_CARD));
    agent.seed_record("a2", CredentialState::Offered, Some(STUDENT_CARD));

    let issuer = IssuanceCoordinator::new(&agent, &config, visibility.subscribe());
    issuer.poll_credentials(&mut ctx, 1, 1).await.expect("should poll");

    let outcome = issuer.reissue_pending(&mut ctx, &templates()).await.expect("should reissue");
    assert_eq!(outcome.deleted, vec!["a2".to_string()]);
    assert!(outcome.reissued.is_empty());
    assert_eq!(agent.records().len(), 1);
    assert_eq!(agent.calls().issue, 0);
}
