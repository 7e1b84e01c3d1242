// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bootstrap sequencer.
//!
//! Runs the migration step to completion, then the serve step, and reports
//! the serve step's status as the container's exit status.
//!
//! # Phase State Machine
//!
//! ```text
//!   ┌─────────────┐
//!   │ NOT_STARTED │
//!   └──────┬──────┘
//!          │ run
//!          ▼
//!   ┌─────────────┐   gated failure / host signal   ┌────────────┐
//!   │  MIGRATING  │────────────────────────────────▶│ TERMINATED │
//!   └──────┬──────┘                                 └────────────┘
//!          │ migration terminated (any status)             ▲
//!          ▼                                               │
//!   ┌─────────────┐        service exits / killed          │
//!   │   SERVING   │────────────────────────────────────────┘
//!   └─────────────┘
//! ```
//!
//! With [`GatePolicy::Unconditional`] (the default) a failed migration does
//! not stop the service from starting; it is logged and recorded in the
//! [`StartupReport`] but never reaches the container's exit status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::context::ContainerContext;
use crate::error::{Error, Result};
use crate::report::{StartupReport, StepRecord};
use crate::signals::{self, SignalReceiver};
use crate::step::Step;

/// Name of the migration step.
pub const MIGRATE_STEP: &str = "migrate";

/// Name of the serve step.
pub const SERVE_STEP: &str = "serve";

/// Whether the serve step depends on the migration outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Serve always runs after migration terminates, whatever its status.
    #[default]
    Unconditional,
    /// Serve runs only if migration succeeded; otherwise the container exits
    /// with the migration's status.
    RequireMigrationSuccess,
}

/// Lifecycle phase of the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Sequencer built, nothing started.
    NotStarted,
    /// Migration step is running.
    Migrating,
    /// Serve step is running.
    Serving,
    /// Sequence resolved; the exit code is final.
    Terminated,
}

/// Builder for a [`BootstrapSequencer`].
#[derive(Default)]
pub struct BootstrapSequencerBuilder {
    migrate: Option<Arc<dyn Step>>,
    serve: Option<Arc<dyn Step>>,
    context: ContainerContext,
    gate_policy: GatePolicy,
    signals: Option<SignalReceiver>,
    report_file: Option<PathBuf>,
}

impl BootstrapSequencerBuilder {
    /// Set the migration step.
    pub fn migrate(mut self, step: Arc<dyn Step>) -> Self {
        self.migrate = Some(step);
        self
    }

    /// Set the serve step.
    pub fn serve(mut self, step: Arc<dyn Step>) -> Self {
        self.serve = Some(step);
        self
    }

    /// Set the context passed to both steps.
    pub fn context(mut self, context: ContainerContext) -> Self {
        self.context = context;
        self
    }

    /// Set the gate policy.
    pub fn gate_policy(mut self, policy: GatePolicy) -> Self {
        self.gate_policy = policy;
        self
    }

    /// Receive host signals from this channel.
    pub fn signals(mut self, signals: SignalReceiver) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Write the startup report to this path.
    pub fn report_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_file = Some(path.into());
        self
    }

    /// Build the sequencer.
    pub fn build(self) -> Result<BootstrapSequencer> {
        let migrate = self.migrate.ok_or(Error::MissingStep(MIGRATE_STEP))?;
        let serve = self.serve.ok_or(Error::MissingStep(SERVE_STEP))?;
        let (phase, _) = watch::channel(Phase::NotStarted);

        Ok(BootstrapSequencer {
            migrate,
            serve,
            context: self.context,
            gate_policy: self.gate_policy,
            signals: self.signals.unwrap_or_else(signals::detached),
            report_file: self.report_file,
            phase,
        })
    }
}

/// Orders the migration and serve steps for one container start.
pub struct BootstrapSequencer {
    migrate: Arc<dyn Step>,
    serve: Arc<dyn Step>,
    context: ContainerContext,
    gate_policy: GatePolicy,
    signals: SignalReceiver,
    report_file: Option<PathBuf>,
    phase: watch::Sender<Phase>,
}

impl BootstrapSequencer {
    /// Create a builder.
    pub fn builder() -> BootstrapSequencerBuilder {
        BootstrapSequencerBuilder::default()
    }

    /// Subscribe to phase transitions.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Gate policy in effect.
    pub fn gate_policy(&self) -> GatePolicy {
        self.gate_policy
    }

    /// Run the sequence to termination.
    ///
    /// Consumes the sequencer: each step runs at most once per sequencer.
    /// The container exit code is in the returned report.
    pub async fn run(self) -> StartupReport {
        let mut report = StartupReport::new(self.gate_policy);
        let span = info_span!("startup", invocation_id = %report.invocation_id);

        async {
            info!(
                gate_policy = ?self.gate_policy,
                is_docker = self.context.is_docker,
                "Starting bootstrap sequence"
            );

            self.transition(Phase::Migrating);
            let migration = self.run_step(MIGRATE_STEP, self.migrate.as_ref()).await;
            let migration_ok = migration.status.success();
            let migration_code = migration.status.exit_code();
            report.record(migration);
            self.persist(&report).await;

            let shutdown = *self.signals.borrow();
            if let Some(sig) = shutdown {
                warn!(
                    signal = %sig,
                    exit_code = migration_code,
                    "Shutdown requested during migration, not starting service"
                );
                return self.terminate(&mut report, migration_code).await;
            }

            if !migration_ok {
                match self.gate_policy {
                    GatePolicy::Unconditional => {
                        warn!(
                            exit_code = migration_code,
                            "Migration failed, starting service anyway"
                        );
                    }
                    GatePolicy::RequireMigrationSuccess => {
                        error!(
                            exit_code = migration_code,
                            "Migration failed, service will not start"
                        );
                        return self.terminate(&mut report, migration_code).await;
                    }
                }
            }

            self.transition(Phase::Serving);
            let serve = self.run_step(SERVE_STEP, self.serve.as_ref()).await;
            let serve_code = serve.status.exit_code();
            report.record(serve);

            self.terminate(&mut report, serve_code).await;
        }
        .instrument(span)
        .await;

        report
    }

    async fn run_step(&self, name: &str, step: &dyn Step) -> StepRecord {
        let command = step.describe();
        info!(step = name, command = %command, "Running step");

        let started_at = Utc::now();
        let start = Instant::now();
        let result = step.invoke(&self.context, self.signals.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) if outcome.status.success() => {
                info!(step = name, duration_ms, "Step completed successfully");
            }
            Ok(outcome) => {
                warn!(
                    step = name,
                    exit_code = outcome.status.exit_code(),
                    interrupted_by = ?outcome.interrupted_by,
                    duration_ms,
                    "Step exited with failure"
                );
            }
            Err(e) => {
                error!(step = name, error = %e, exit_code = e.exit_code(), "Step failed to run");
            }
        }

        StepRecord::from_result(name, command, &result, started_at, duration_ms)
    }

    async fn terminate(&self, report: &mut StartupReport, exit_code: i32) {
        report.finish(exit_code);
        self.transition(Phase::Terminated);
        self.persist(report).await;
        info!(exit_code, "Bootstrap sequence terminated");
    }

    fn transition(&self, next: Phase) {
        let previous = self.phase.send_replace(next);
        debug!(from = ?previous, to = ?next, "Phase transition");
    }

    /// Write the report if a path is configured. Failures are only logged.
    async fn persist(&self, report: &StartupReport) {
        let Some(ref path) = self.report_file else {
            return;
        };
        if let Err(e) = report.write_to(path).await {
            warn!(path = %path.display(), error = %e, "Failed to write startup report");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::MockStep;

    #[test]
    fn test_build_requires_both_steps() {
        let err = BootstrapSequencer::builder()
            .serve(Arc::new(MockStep::succeeding("serve")))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingStep("migrate")));

        let err = BootstrapSequencer::builder()
            .migrate(Arc::new(MockStep::succeeding("migrate")))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingStep("serve")));
    }

    #[test]
    fn test_default_policy_is_unconditional() {
        let sequencer = BootstrapSequencer::builder()
            .migrate(Arc::new(MockStep::succeeding("migrate")))
            .serve(Arc::new(MockStep::succeeding("serve")))
            .build()
            .unwrap();
        assert_eq!(sequencer.gate_policy(), GatePolicy::Unconditional);
        assert_eq!(*sequencer.phase().borrow(), Phase::NotStarted);
    }

    #[tokio::test]
    async fn test_run_reaches_terminated() {
        let sequencer = BootstrapSequencer::builder()
            .migrate(Arc::new(MockStep::succeeding("migrate")))
            .serve(Arc::new(MockStep::succeeding("serve")))
            .build()
            .unwrap();
        let phase = sequencer.phase();

        let report = sequencer.run().await;

        assert_eq!(*phase.borrow(), Phase::Terminated);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.steps.len(), 2);
        assert!(report.finished_at.is_some());
    }
}
