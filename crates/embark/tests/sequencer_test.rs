// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the bootstrap sequencer using mock steps.

use std::sync::Arc;
use std::time::Duration;

use embark::report::{StartupReport, StepStatus};
use embark::sequencer::{BootstrapSequencer, GatePolicy, MIGRATE_STEP, Phase, SERVE_STEP};
use embark::signals::SignalRelay;
use embark::step::mock::{Journal, JournalEvent};
use embark::step::{ExitStatus, MockStep};
use embark::ContainerContext;
use nix::sys::signal::Signal;

fn sequencer(
    migrate: &Arc<MockStep>,
    serve: &Arc<MockStep>,
    policy: GatePolicy,
) -> BootstrapSequencer {
    BootstrapSequencer::builder()
        .migrate(migrate.clone())
        .serve(serve.clone())
        .gate_policy(policy)
        .build()
        .unwrap()
}

async fn run(
    migrate: MockStep,
    serve: MockStep,
) -> (StartupReport, Arc<MockStep>, Arc<MockStep>) {
    let migrate = Arc::new(migrate);
    let serve = Arc::new(serve);
    let report = sequencer(&migrate, &serve, GatePolicy::Unconditional)
        .run()
        .await;
    (report, migrate, serve)
}

// ============================================================================
// Exit Status Scenarios
// ============================================================================

#[tokio::test]
async fn test_migrate_ok_serve_ok_exits_zero() {
    let (report, migrate, serve) =
        run(MockStep::succeeding("migrate"), MockStep::succeeding("serve")).await;

    assert_eq!(report.exit_code, Some(0));
    assert_eq!(migrate.invocations(), 1);
    assert_eq!(serve.invocations(), 1);
}

#[tokio::test]
async fn test_failed_migration_is_masked_by_serve() {
    let (report, migrate, serve) =
        run(MockStep::exiting("migrate", 1), MockStep::succeeding("serve")).await;

    assert_eq!(report.exit_code, Some(0));
    assert_eq!(migrate.invocations(), 1);
    assert_eq!(serve.invocations(), 1);

    // The masked failure is still on record
    let migration = report.step(MIGRATE_STEP).unwrap();
    assert_eq!(migration.status, StepStatus::Exited { code: 1 });
}

#[tokio::test]
async fn test_killed_serve_exit_code_propagates() {
    let (report, _, serve) = run(
        MockStep::succeeding("migrate"),
        MockStep::exiting("serve", 137),
    )
    .await;

    assert_eq!(report.exit_code, Some(137));
    assert_eq!(report.process_exit_code(), 137);
    assert_eq!(serve.invocations(), 1);
}

#[tokio::test]
async fn test_serve_killed_by_signal_maps_to_137() {
    let (report, _, _) = run(
        MockStep::succeeding("migrate"),
        MockStep::with_status("serve", ExitStatus::signaled(Signal::SIGKILL)),
    )
    .await;

    assert_eq!(report.exit_code, Some(137));
    assert_eq!(
        report.step(SERVE_STEP).unwrap().status,
        StepStatus::Signaled { signal: 9 }
    );
}

#[tokio::test]
async fn test_exit_code_always_equals_serve_status() {
    for migrate_code in [0, 1, 2, 64, 255] {
        for serve_code in [0, 1, 3, 137, 143] {
            let (report, _, serve) = run(
                MockStep::exiting("migrate", migrate_code),
                MockStep::exiting("serve", serve_code),
            )
            .await;

            assert_eq!(serve.invocations(), 1, "migrate exited {migrate_code}");
            assert_eq!(report.exit_code, Some(serve_code));
        }
    }
}

#[tokio::test]
async fn test_migration_not_found_still_serves() {
    let (report, migrate, serve) =
        run(MockStep::not_found("migrate"), MockStep::exiting("serve", 4)).await;

    assert_eq!(migrate.invocations(), 1);
    assert_eq!(serve.invocations(), 1);
    assert_eq!(report.exit_code, Some(4));
    assert_eq!(report.step(MIGRATE_STEP).unwrap().status.exit_code(), 127);
}

#[tokio::test]
async fn test_serve_not_found_exits_127() {
    let (report, _, _) =
        run(MockStep::succeeding("migrate"), MockStep::not_found("serve")).await;

    assert_eq!(report.exit_code, Some(127));
    assert!(matches!(
        report.step(SERVE_STEP).unwrap().status,
        StepStatus::FailedToStart { exit_code: 127, .. }
    ));
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_serve_starts_after_migration_terminates() {
    let journal = Journal::new();
    let (report, _, _) = run(
        MockStep::exiting("migrate", 1)
            .delay(Duration::from_secs(5))
            .journal(&journal),
        MockStep::succeeding("serve").journal(&journal),
    )
    .await;

    assert_eq!(
        journal.events().await,
        vec![
            JournalEvent::Started("migrate".to_string()),
            JournalEvent::Finished("migrate".to_string()),
            JournalEvent::Started("serve".to_string()),
            JournalEvent::Finished("serve".to_string()),
        ]
    );

    let names: Vec<_> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec![MIGRATE_STEP, SERVE_STEP]);
    assert!(report.steps[0].started_at <= report.steps[1].started_at);
}

#[tokio::test(start_paused = true)]
async fn test_phase_transitions() {
    let migrate = Arc::new(MockStep::succeeding("migrate").delay(Duration::from_secs(1)));
    let serve = Arc::new(MockStep::succeeding("serve").delay(Duration::from_secs(1)));
    let sequencer = sequencer(&migrate, &serve, GatePolicy::Unconditional);
    let phase = sequencer.phase();
    assert_eq!(*phase.borrow(), Phase::NotStarted);

    let task = tokio::spawn(sequencer.run());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(*phase.borrow(), Phase::Migrating);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(*phase.borrow(), Phase::Serving);

    let report = task.await.unwrap();
    assert_eq!(*phase.borrow(), Phase::Terminated);
    assert_eq!(report.exit_code, Some(0));
}

// ============================================================================
// Gate Policy
// ============================================================================

#[tokio::test]
async fn test_gated_policy_blocks_serve_on_failed_migration() {
    let migrate = Arc::new(MockStep::exiting("migrate", 3));
    let serve = Arc::new(MockStep::succeeding("serve"));
    let sequencer = sequencer(&migrate, &serve, GatePolicy::RequireMigrationSuccess);
    let phase = sequencer.phase();

    let report = sequencer.run().await;

    assert_eq!(serve.invocations(), 0);
    assert_eq!(report.exit_code, Some(3));
    assert_eq!(report.steps.len(), 1);
    assert_eq!(*phase.borrow(), Phase::Terminated);
}

#[tokio::test]
async fn test_gated_policy_serves_after_successful_migration() {
    let migrate = Arc::new(MockStep::succeeding("migrate"));
    let serve = Arc::new(MockStep::exiting("serve", 0));
    let report = sequencer(&migrate, &serve, GatePolicy::RequireMigrationSuccess)
        .run()
        .await;

    assert_eq!(serve.invocations(), 1);
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(report.gate_policy, GatePolicy::RequireMigrationSuccess);
}

// ============================================================================
// Signals
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_signal_during_migration_skips_serve() {
    let relay = SignalRelay::new();
    let migrate = Arc::new(MockStep::succeeding("migrate").delay(Duration::from_secs(60)));
    let serve = Arc::new(MockStep::succeeding("serve"));
    let sequencer = BootstrapSequencer::builder()
        .migrate(migrate.clone())
        .serve(serve.clone())
        .signals(relay.subscribe())
        .build()
        .unwrap();

    let task = tokio::spawn(sequencer.run());
    tokio::time::sleep(Duration::from_secs(1)).await;
    relay.relay(Signal::SIGTERM);

    let report = task.await.unwrap();
    assert_eq!(serve.invocations(), 0);
    assert_eq!(report.exit_code, Some(143));

    let migration = report.step(MIGRATE_STEP).unwrap();
    assert_eq!(migration.interrupted_by.as_deref(), Some("SIGTERM"));
}

#[tokio::test(start_paused = true)]
async fn test_signal_during_serve_terminates_with_serve_status() {
    let relay = SignalRelay::new();
    let migrate = Arc::new(MockStep::succeeding("migrate"));
    let serve = Arc::new(MockStep::succeeding("serve").delay(Duration::from_secs(3600)));
    let sequencer = BootstrapSequencer::builder()
        .migrate(migrate.clone())
        .serve(serve.clone())
        .signals(relay.subscribe())
        .build()
        .unwrap();
    let phase = sequencer.phase();

    let task = tokio::spawn(sequencer.run());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*phase.borrow(), Phase::Serving);
    relay.relay(Signal::SIGINT);

    let report = task.await.unwrap();
    assert_eq!(serve.invocations(), 1);
    assert_eq!(report.exit_code, Some(130));
}

// ============================================================================
// Context and Report
// ============================================================================

#[tokio::test]
async fn test_context_is_passed_to_both_steps() {
    let migrate = Arc::new(MockStep::succeeding("migrate"));
    let serve = Arc::new(MockStep::succeeding("serve"));
    BootstrapSequencer::builder()
        .migrate(migrate.clone())
        .serve(serve.clone())
        .context(ContainerContext::containerized())
        .build()
        .unwrap()
        .run()
        .await;

    assert_eq!(migrate.contexts().await, vec![ContainerContext { is_docker: true }]);
    assert_eq!(serve.contexts().await, vec![ContainerContext { is_docker: true }]);
}

#[tokio::test]
async fn test_report_file_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("startup.json");

    let report = BootstrapSequencer::builder()
        .migrate(Arc::new(MockStep::exiting("migrate", 1)))
        .serve(Arc::new(MockStep::succeeding("serve")))
        .report_file(&path)
        .build()
        .unwrap()
        .run()
        .await;

    let written = StartupReport::read_from(&path).await.unwrap();
    assert_eq!(written.invocation_id, report.invocation_id);
    assert_eq!(written.exit_code, Some(0));
    assert_eq!(written.steps.len(), 2);
    assert_eq!(written.steps[0].status, StepStatus::Exited { code: 1 });
}

#[tokio::test]
async fn test_unwritable_report_file_does_not_fail_sequence() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where a directory is expected
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();

    let report = BootstrapSequencer::builder()
        .migrate(Arc::new(MockStep::succeeding("migrate")))
        .serve(Arc::new(MockStep::exiting("serve", 2)))
        .report_file(blocker.join("startup.json"))
        .build()
        .unwrap()
        .run()
        .await;

    assert_eq!(report.exit_code, Some(2));
}
