use super::*;
use std::sync::Arc;

use tokio::sync::Barrier;

fn context() -> DomainOperationContext {
    DomainOperationContext::new(LocalHostInfo::coordinator("primary"))
}

fn server(host: &str, name: &str) -> ServerIdentity {
    ServerIdentity::new(host, "main-server-group", name)
}

#[test]
fn test_coordinator_result_is_write_once() {
    let ctx = context();
    assert!(!ctx.coordinator_result().is_defined());

    ctx.set_coordinator_result(StructuredValue::success("first"))
        .unwrap();
    let err = ctx
        .set_coordinator_result(StructuredValue::success("second"))
        .unwrap_err();

    assert_eq!(err, CoordinationError::DuplicateCoordinatorResult);
    assert_eq!(ctx.coordinator_result(), StructuredValue::success("first"));
}

#[test]
fn test_undefined_results_rejected() {
    let ctx = context();
    assert!(matches!(
        ctx.set_coordinator_result(StructuredValue::Undefined),
        Err(CoordinationError::UndefinedResult { .. })
    ));
    assert!(matches!(
        ctx.add_host_result(Phase::Prepare, "a", StructuredValue::Undefined),
        Err(CoordinationError::UndefinedResult { .. })
    ));
    assert!(ctx.host_results(Phase::Prepare).is_empty());
}

#[test]
fn test_second_host_write_fails_and_keeps_first() {
    let ctx = context();
    ctx.add_host_result(Phase::Prepare, "a", StructuredValue::success(1))
        .unwrap();

    let err = ctx
        .add_host_result(Phase::Prepare, "a", StructuredValue::failed("late"))
        .unwrap_err();

    assert_eq!(
        err,
        CoordinationError::DuplicateResult {
            participant: ParticipantId::host("a"),
            phase: Phase::Prepare,
        }
    );
    assert_eq!(
        ctx.host_results(Phase::Prepare).get("a"),
        Some(&StructuredValue::success(1))
    );
}

#[test]
fn test_second_server_write_names_server() {
    let ctx = context();
    let id = server("a", "one");
    ctx.add_server_result(Phase::Finalize, id.clone(), StructuredValue::success(1))
        .unwrap();

    let err = ctx
        .add_server_result(Phase::Finalize, id.clone(), StructuredValue::success(2))
        .unwrap_err();

    assert!(err.to_string().contains("host=a/server-group=main-server-group/server=one"));
    assert_eq!(
        ctx.server_results(Phase::Finalize).get(&id),
        Some(&StructuredValue::success(1))
    );
}

#[test]
fn test_same_host_in_different_phases() {
    let ctx = context();
    ctx.add_host_result(Phase::Prepare, "a", StructuredValue::success("prepared"))
        .unwrap();
    ctx.add_host_result(Phase::Rollback, "a", StructuredValue::success("rolled-back"))
        .unwrap();

    let (phase, value) = ctx.final_result(&ParticipantId::host("a")).unwrap();
    assert_eq!(phase, Phase::Rollback);
    assert_eq!(value, StructuredValue::success("rolled-back"));

    let finals = ctx.final_host_results();
    assert_eq!(finals["a"].0, Phase::Rollback);
}

#[test]
fn test_snapshot_is_not_live() {
    let ctx = context();
    ctx.add_host_result(Phase::Prepare, "a", StructuredValue::success(1))
        .unwrap();

    let snapshot = ctx.host_results(Phase::Prepare);
    ctx.add_host_result(Phase::Prepare, "b", StructuredValue::success(2))
        .unwrap();

    assert_eq!(snapshot.len(), 1);
    assert!(!snapshot.contains_key("b"));
    assert_eq!(ctx.host_results(Phase::Prepare).len(), 2);
}

#[test]
fn test_seal_fills_pending_and_rejects_late_writes() {
    let ctx = context();
    ctx.add_host_result(Phase::Commit, "a", StructuredValue::success(1))
        .unwrap();

    let pending = vec![ParticipantId::host("a"), ParticipantId::host("b")];
    let recorded = ctx.seal_phase(Phase::Commit, &pending, |_| {
        StructuredValue::failed("timed out")
    });

    assert!(ctx.is_sealed(Phase::Commit));
    assert_eq!(recorded[&ParticipantId::host("a")], StructuredValue::success(1));
    assert_eq!(
        recorded[&ParticipantId::host("b")],
        StructuredValue::failed("timed out")
    );

    let late = ctx
        .add_host_result(Phase::Commit, "b", StructuredValue::success(2))
        .unwrap_err();
    assert!(late.is_late_write());
    assert_eq!(
        ctx.host_results(Phase::Commit)["b"],
        StructuredValue::failed("timed out")
    );

    // Other phases stay open.
    assert!(!ctx.is_sealed(Phase::Finalize));
    ctx.add_host_result(Phase::Finalize, "a", StructuredValue::success(3))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_on_disjoint_keys() {
    let ctx = Arc::new(context());
    let hosts = 32;
    let barrier = Arc::new(Barrier::new(hosts));
    let mut handles = Vec::new();

    for i in 0..hosts {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            ctx.add_host_result(
                Phase::Prepare,
                format!("host-{}", i),
                StructuredValue::success(i as i64),
            )
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let results = ctx.host_results(Phase::Prepare);
    assert_eq!(results.len(), hosts);
    assert_eq!(results["host-7"], StructuredValue::success(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_completion_race_has_one_winner() {
    let ctx = Arc::new(context());
    let writers = 16;
    let barrier = Arc::new(Barrier::new(writers));
    let mut handles = Vec::new();

    for i in 0..writers {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            ctx.add_host_result(Phase::Prepare, "contended", StructuredValue::success(i as i64))
                .map(|_| i as i64)
        }));
    }

    let mut winners = Vec::new();
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(i) => winners.push(i),
            Err(CoordinationError::DuplicateResult { .. }) => duplicates += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(duplicates, writers - 1);
    assert_eq!(
        ctx.host_results(Phase::Prepare)["contended"],
        StructuredValue::success(winners[0])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seal_racing_writer_never_loses_a_value() {
    for _ in 0..50 {
        let ctx = Arc::new(context());
        let writer_ctx = Arc::clone(&ctx);
        let writer = tokio::spawn(async move {
            writer_ctx.add_host_result(Phase::Prepare, "racer", StructuredValue::success("arrived"))
        });

        let recorded = ctx.seal_phase(Phase::Prepare, &[ParticipantId::host("racer")], |_| {
            StructuredValue::failed("timed out")
        });
        let write = writer.await.unwrap();

        let stored = ctx.host_results(Phase::Prepare)["racer"].clone();
        assert_eq!(recorded[&ParticipantId::host("racer")], stored);
        match write {
            Ok(()) => assert_eq!(stored, StructuredValue::success("arrived")),
            Err(e) => {
                assert!(e.is_late_write());
                assert_eq!(stored, StructuredValue::failed("timed out"));
            }
        }
    }
}

#[test]
fn test_local_host_identity() {
    let ctx = context();
    assert!(ctx.is_local_host("primary"));
    assert!(!ctx.is_local_host("secondary"));
    assert!(ctx.local_host().is_coordinator);
}
