//! Commit-path scenarios.

use std::sync::Arc;
use std::time::Duration;

use fleet_coordinator::orchestration::local::{Behavior, InProcessFleet};
use fleet_coordinator::orchestration::{FailureKind, Phase};
use fleet_coordinator::topology::ParticipantId;

use crate::common::*;

#[tokio::test]
async fn test_all_success_has_entry_per_participant() {
    let fleet = Arc::new(InProcessFleet::new());
    let topology = fleet_topology(&["host-a", "host-b", "host-c"]);

    let outcome = coordinator(&fleet)
        .execute(&request(), &topology)
        .await
        .unwrap();

    assert!(outcome.overall_success);
    assert!(outcome.failure_domains.is_empty());
    assert!(outcome.withheld_servers.is_empty());

    let assembled = &outcome.assembled_result;
    assert!(assembled.is_success());
    let hosts = assembled_hosts(assembled);
    assert_eq!(hosts.len(), 3);
    for name in ["host-a", "host-b", "host-c"] {
        assert_eq!(answered_phase(&hosts[name]), Some("finalize"));
        let servers = assembled_servers(assembled, name);
        assert_eq!(servers.len(), 2, "servers of {}", name);
        assert!(servers.values().all(|v| v.is_success()));
    }
    assert!(fleet.contacted(Phase::Rollback).await.is_empty());
}

#[tokio::test]
async fn test_commit_timeout_is_post_commit_inconsistency() {
    let fleet = Arc::new(InProcessFleet::new());
    fleet
        .script(host("host-2"), Phase::Commit, Behavior::Hang)
        .await;
    let topology = fleet_topology(&["host-1", "host-2"]);

    let outcome = coordinator(&fleet)
        .execute(&request(), &topology)
        .await
        .unwrap();

    assert!(!outcome.overall_success);
    assert!(!outcome.requires_rollback);

    let failure = outcome.failure_of(&host("host-2")).unwrap();
    assert_eq!(failure.kind, FailureKind::PostCommitInconsistency);
    assert_eq!(failure.phase, Phase::Commit);
    assert!(failure.description.as_deref().unwrap().contains("timed out"));

    // host-1 stays committed: never rolled back, finalized with its servers
    assert!(outcome.failure_of(&host("host-1")).is_none());
    assert!(fleet.contacted(Phase::Rollback).await.is_empty());
    let hosts = assembled_hosts(&outcome.assembled_result);
    assert_eq!(answered_phase(&hosts["host-1"]), Some("finalize"));
    assert_eq!(assembled_servers(&outcome.assembled_result, "host-1").len(), 2);

    // host-2 was never finalized, its servers withheld
    assert!(!fleet
        .contacted(Phase::Finalize)
        .await
        .iter()
        .any(|p| p.host_name() == "host-2"));
    assert!(assembled_servers(&outcome.assembled_result, "host-2").is_empty());
    assert!(outcome.withheld_servers.contains(&server("host-2", 1)));
    assert!(outcome.withheld_servers.contains(&server("host-2", 2)));
}

#[tokio::test]
async fn test_server_finalize_failure_reported() {
    let fleet = Arc::new(InProcessFleet::new());
    fleet
        .script(
            server("host-a", 2).into(),
            Phase::Finalize,
            Behavior::reject("restart required"),
        )
        .await;
    let topology = fleet_topology(&["host-a"]);

    let outcome = coordinator(&fleet)
        .execute(&request(), &topology)
        .await
        .unwrap();

    assert!(!outcome.overall_success);
    let failed = ParticipantId::from(server("host-a", 2));
    assert_eq!(outcome.failure_domains.len(), 1);
    assert!(outcome.failure_domains.contains(&failed));
    assert_eq!(
        outcome.failure_of(&failed).unwrap().kind,
        FailureKind::PostCommitInconsistency
    );

    let servers = assembled_servers(&outcome.assembled_result, "host-a");
    assert_eq!(
        servers["host-a-2"].failure_description().as_deref(),
        Some("restart required")
    );
    assert!(servers["host-a-1"].is_success());
}

#[tokio::test]
async fn test_transient_commit_failure_recovered() {
    let fleet = Arc::new(InProcessFleet::new());
    fleet
        .script(host("host-a"), Phase::Commit, Behavior::Flaky(1))
        .await;

    let outcome = coordinator(&fleet)
        .execute(&request(), &fleet_topology(&["host-a", "host-b"]))
        .await
        .unwrap();

    assert!(outcome.overall_success);
    assert_eq!(fleet.call_count(&host("host-a"), Phase::Commit).await, 2);
}

#[tokio::test]
async fn test_slow_hosts_do_not_serialize_phases() {
    let fleet = Arc::new(InProcessFleet::new());
    let names: Vec<String> = (0..8).map(|i| format!("host-{}", i)).collect();
    for name in &names {
        fleet
            .script_all_phases(
                host(name),
                Behavior::delayed(Duration::from_millis(40), Behavior::Accept),
            )
            .await;
    }
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let started = std::time::Instant::now();
    let outcome = coordinator(&fleet)
        .execute(&request(), &fleet_topology(&refs))
        .await
        .unwrap();

    assert!(outcome.overall_success);
    // three host rounds of 40ms each; sequential dispatch would take ~1s
    assert!(started.elapsed() < Duration::from_millis(600));
}
