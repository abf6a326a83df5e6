//! End-to-end migration lifecycle tests against the durable flag store.

use std::sync::Arc;

use relay::migration::{
    AuditLog, MigrationPhase, MigrationStateMachine, RedbFlagStore, TransitionError,
};
use relay::routing;

fn machine_at(path: &std::path::Path) -> MigrationStateMachine {
    let store = RedbFlagStore::open(path).unwrap();
    MigrationStateMachine::new(Arc::new(store), AuditLog::new())
}

// =============================================================================
// FULL LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_full_ramp_and_completion() {
    let dir = tempfile::tempdir().unwrap();
    let machine = machine_at(&dir.path().join("flags.redb"));

    let status = machine.status().await.unwrap();
    assert_eq!(status.phase, MigrationPhase::NotStarted);
    assert!(status.can_start());
    assert!(!status.can_rollback());

    let status = machine.start(10, "canary cohort").await.unwrap();
    assert_eq!(status.phase, MigrationPhase::InProgress);
    assert_eq!(status.effective_percentage(), 10);

    for pct in [25, 50, 75] {
        let status = machine
            .set_traffic_percentage(pct, "gradual ramp")
            .await
            .unwrap();
        assert_eq!(status.phase, MigrationPhase::InProgress);
        assert_eq!(status.traffic_percentage, pct);
    }

    let status = machine
        .set_traffic_percentage(100, "final step")
        .await
        .unwrap();
    assert_eq!(status.phase, MigrationPhase::ReadyForCompletion);
    assert!(status.can_complete());

    let status = machine.complete("cutover").await.unwrap();
    assert_eq!(status.phase, MigrationPhase::Completed);
    assert!(!status.legacy_enabled);
    assert!(status.new_provider_enabled);
    assert_eq!(status.effective_percentage(), 100);
}

#[tokio::test]
async fn test_migration_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flags.redb");

    {
        let machine = machine_at(&path);
        machine.start(40, "ramp").await.unwrap();
    }

    // A fresh process sees the same mid-migration state.
    let machine = machine_at(&path);
    let status = machine.status().await.unwrap();
    assert_eq!(status.phase, MigrationPhase::InProgress);
    assert_eq!(status.traffic_percentage, 40);

    // And can keep operating on it.
    let status = machine.set_traffic_percentage(60, "resume").await.unwrap();
    assert_eq!(status.traffic_percentage, 60);
}

#[tokio::test]
async fn test_rollback_after_restart_reaches_all_legacy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flags.redb");

    {
        let machine = machine_at(&path);
        machine.start(100, "ramp").await.unwrap();
        machine.complete("cutover").await.unwrap();
    }

    let machine = machine_at(&path);
    let status = machine.rollback("incident").await.unwrap();
    assert_eq!(status.phase, MigrationPhase::NotStarted);
    assert!(status.legacy_enabled);
    assert_eq!(status.traffic_percentage, 0);
}

// =============================================================================
// GUARDS END TO END
// =============================================================================

#[tokio::test]
async fn test_guard_violations_leave_durable_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flags.redb");
    let machine = machine_at(&path);

    machine.start(80, "ramp").await.unwrap();

    let err = machine.complete("too early").await.unwrap_err();
    assert!(matches!(
        err,
        TransitionError::NotReadyForCompletion { percentage: 80 }
    ));
    let err = machine.start(5, "again").await.unwrap_err();
    assert!(matches!(err, TransitionError::AlreadyStarted { .. }));

    // Reopen to prove nothing was persisted by the failed transitions.
    drop(machine);
    let machine = machine_at(&path);
    let status = machine.status().await.unwrap();
    assert_eq!(status.phase, MigrationPhase::InProgress);
    assert_eq!(status.traffic_percentage, 80);
}

// =============================================================================
// ROUTING AGAINST THE LIVE PERCENTAGE
// =============================================================================

#[tokio::test]
async fn test_routing_distribution_tracks_ramp() {
    let dir = tempfile::tempdir().unwrap();
    let machine = machine_at(&dir.path().join("flags.redb"));
    machine.start(30, "ramp").await.unwrap();

    let status = machine.status().await.unwrap();
    let keys: Vec<String> = (0..100).map(|i| format!("caller-{i}")).collect();
    let stats = routing::statistics(&keys, status.effective_percentage());

    assert_eq!(stats.total, 100);
    assert_eq!(stats.expected_pct, 30.0);
    assert!(stats.deviation < 10.0, "deviation {}", stats.deviation);
}

#[tokio::test]
async fn test_ramp_is_monotonic_for_every_caller() {
    let dir = tempfile::tempdir().unwrap();
    let machine = machine_at(&dir.path().join("flags.redb"));
    machine.start(0, "dark launch").await.unwrap();

    let keys: Vec<String> = (0..50).map(|i| format!("caller-{i}")).collect();
    let mut migrated: Vec<bool> = vec![false; keys.len()];

    for pct in [0, 20, 40, 60, 80, 100] {
        let status = machine
            .set_traffic_percentage(pct, "step")
            .await
            .unwrap();
        for (i, key) in keys.iter().enumerate() {
            let on_new = routing::route(key, status.effective_percentage()).provider
                == relay::provider::ProviderKind::New;
            // Once a caller moves to the new provider it never moves back.
            assert!(on_new || !migrated[i], "caller {key} regressed at {pct}%");
            migrated[i] = on_new;
        }
    }
    assert!(migrated.iter().all(|m| *m));
}

// =============================================================================
// AUDIT TRAIL
// =============================================================================

#[tokio::test]
async fn test_lifecycle_emits_complete_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let machine = machine_at(&dir.path().join("flags.redb"));
    let mut rx = machine.audit().subscribe();

    machine.start(50, "ramp").await.unwrap();
    machine.set_traffic_percentage(100, "full").await.unwrap();
    machine.complete("cutover").await.unwrap();

    let fields: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|record| format!("{}={}", record.field, record.new_value))
        .collect();
    assert_eq!(
        fields,
        vec![
            "migration_mode=true",
            "traffic_percentage=50",
            "traffic_percentage=100",
            "new_provider=true",
            "migration_mode=false",
        ]
    );
}
