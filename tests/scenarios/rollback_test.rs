//! Prepare-failure and rollback scenarios.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_coordinator::orchestration::local::{Behavior, InProcessFleet};
use fleet_coordinator::orchestration::{FailureKind, LocalStep, OperationRequest, Phase};
use fleet_coordinator::StructuredValue;

use crate::common::*;

#[tokio::test]
async fn test_one_prepare_failure_rolls_back_the_others() {
    let fleet = Arc::new(InProcessFleet::new());
    fleet
        .script(host("B"), Phase::Prepare, Behavior::reject("duplicate resource"))
        .await;
    let topology = fleet_topology(&["A", "B", "C"]);

    let outcome = coordinator(&fleet)
        .execute(&request(), &topology)
        .await
        .unwrap();

    assert!(!outcome.overall_success);
    assert!(outcome.requires_rollback);
    assert_eq!(outcome.failure_domains, [host("B")].into_iter().collect());
    assert_eq!(
        outcome.failure_of(&host("B")).map(|f| f.kind),
        Some(FailureKind::PrepareFailure)
    );

    assert_eq!(fleet.contacted(Phase::Rollback).await, vec![host("A"), host("C")]);
    assert!(fleet.contacted(Phase::Commit).await.is_empty());
    assert!(fleet.contacted(Phase::Finalize).await.is_empty());
    assert_eq!(outcome.withheld_servers.len(), 6);
    for name in ["A", "B", "C"] {
        assert!(assembled_servers(&outcome.assembled_result, name).is_empty());
    }
}

#[tokio::test]
async fn test_rollback_is_final_recorded_outcome() {
    let fleet = Arc::new(InProcessFleet::new());
    fleet
        .script(host("B"), Phase::Prepare, Behavior::reject("invalid value"))
        .await;

    let outcome = coordinator(&fleet)
        .execute(&request(), &fleet_topology(&["A", "B"]))
        .await
        .unwrap();

    let hosts = assembled_hosts(&outcome.assembled_result);
    assert_eq!(answered_phase(&hosts["A"]), Some("rollback"));
    // B never prepared, so its PREPARE failure stays its final outcome
    assert_eq!(
        hosts["B"].failure_description().as_deref(),
        Some("invalid value")
    );
}

#[tokio::test]
async fn test_unreachable_host_has_no_server_entries() {
    let fleet = Arc::new(InProcessFleet::new());
    fleet
        .script_all_phases(host("down"), Behavior::Unreachable)
        .await;

    let outcome = coordinator(&fleet)
        .execute(&request(), &fleet_topology(&["up", "down"]))
        .await
        .unwrap();

    assert_eq!(
        outcome.failure_of(&host("down")).map(|f| f.kind),
        Some(FailureKind::Unreachable)
    );
    assert!(assembled_servers(&outcome.assembled_result, "down").is_empty());
    assert!(outcome.withheld_servers.contains(&server("down", 1)));
    assert!(fleet
        .calls()
        .await
        .iter()
        .all(|(p, _)| p.host_name() != "down" || *p == host("down")));
}

#[tokio::test]
async fn test_prepare_timeout_triggers_rollback() {
    let fleet = Arc::new(InProcessFleet::new());
    fleet.script(host("slow"), Phase::Prepare, Behavior::Hang).await;

    let outcome = coordinator(&fleet)
        .execute(&request(), &fleet_topology(&["fast", "slow"]))
        .await
        .unwrap();

    assert_eq!(
        outcome.failure_of(&host("slow")).map(|f| f.kind),
        Some(FailureKind::TimedOut)
    );
    assert_eq!(fleet.contacted(Phase::Rollback).await, vec![host("fast")]);
}

#[tokio::test]
async fn test_rollback_failure_reported() {
    let fleet = Arc::new(InProcessFleet::new());
    fleet
        .script(host("B"), Phase::Prepare, Behavior::reject("rejected"))
        .await;
    fleet
        .script(host("A"), Phase::Rollback, Behavior::reject("could not restore"))
        .await;

    let outcome = coordinator(&fleet)
        .execute(&request(), &fleet_topology(&["A", "B"]))
        .await
        .unwrap();

    assert!(!outcome.overall_success);
    assert_eq!(
        outcome.failure_of(&host("A")).map(|f| f.kind),
        Some(FailureKind::RollbackFailure)
    );
    assert_eq!(outcome.inconsistent(), vec![&host("A")]);
}

struct RejectingStep;

#[async_trait]
impl LocalStep for RejectingStep {
    async fn prepare(&self, _request: &OperationRequest) -> StructuredValue {
        StructuredValue::failed("Operation not valid on the coordinator")
    }

    async fn complete(&self, _request: &OperationRequest, _commit: bool) {}
}

#[tokio::test]
async fn test_local_failure_short_circuits() {
    let fleet = Arc::new(InProcessFleet::new());

    let outcome = coordinator_with_step(&fleet, Arc::new(RejectingStep))
        .execute(&request(), &fleet_topology(&["A", "B"]))
        .await
        .unwrap();

    assert!(!outcome.overall_success);
    assert!(outcome.coordinator_failed);
    assert!(fleet.calls().await.is_empty());
    assert!(assembled_hosts(&outcome.assembled_result).is_empty());
}
