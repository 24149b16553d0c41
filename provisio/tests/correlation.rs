//! Token correlation through the public correlator API.

mod common;

use common::HeldSurface;
use provisio::correlator::CommandCorrelator;
use provisio::{CommandOutcome, CommandResult, ProvisionError};
use std::collections::BTreeMap;
use std::time::Duration;

#[tokio::test]
async fn test_each_token_resolves_once() {
    let surface = HeldSurface::new();
    let correlator = CommandCorrelator::new(surface.clone());

    let first = correlator.dispatch("echo one", "/tmp", BTreeMap::new()).unwrap();
    let second = correlator.dispatch("echo two", "/tmp", BTreeMap::new()).unwrap();
    assert!(second.token() > first.token());
    assert_eq!(correlator.pending_count(), 2);

    let result = CommandResult::exited(0, "two", "");
    correlator
        .on_result_delivered(second.token(), result.clone())
        .unwrap();
    let err = correlator
        .on_result_delivered(second.token(), CommandResult::exited(1, "", "late"))
        .unwrap_err();
    assert_eq!(err, ProvisionError::UnknownCorrelationToken(second.token().as_u64()));

    assert_eq!(second.wait().await, CommandOutcome::Completed(result));
    assert_eq!(correlator.pending_count(), 1);
    assert_eq!(correlator.stale_deliveries(), 1);

    let held = surface.held();
    assert_eq!(held.len(), 2);
    assert_eq!(held[0].0.command, "echo one");
    assert!(held[0].1.deliver(CommandResult::exited(0, "one", "")));
    assert!(!held[0].1.deliver(CommandResult::exited(0, "again", "")));
    assert!(matches!(first.wait().await, CommandOutcome::Completed(r) if r.stdout == "one"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_delivery() {
    let surface = HeldSurface::new();
    let correlator = CommandCorrelator::new(surface.clone());

    let outcome = correlator
        .run("sleep 1000", "/tmp", BTreeMap::new(), Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::TimedOut);
    assert_eq!(surface.cancelled().len(), 1);

    let (_request, reply) = surface.held().remove(0);
    assert!(!reply.deliver(CommandResult::exited(0, "finally", "")));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn test_evict_all_cancels_waiters() {
    let surface = HeldSurface::new();
    let correlator = CommandCorrelator::new(surface.clone());
    let pending = correlator.dispatch("sleep 5", "/tmp", BTreeMap::new()).unwrap();
    let token = pending.token();

    assert_eq!(correlator.evict_all(), 1);
    assert_eq!(pending.wait().await, CommandOutcome::Cancelled);
    assert_eq!(surface.cancelled(), vec![token]);
}
