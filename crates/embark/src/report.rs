// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Startup report.
//!
//! The report is the record of one startup invocation: which steps ran, how
//! they ended, and the exit code the container reports. A failed migration
//! does not show up in the container's exit status when serve runs anyway, so
//! the report can be written to a file for operators to inspect.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::sequencer::GatePolicy;
use crate::step::{ExitStatus, StepError, StepOutcome};

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepStatus {
    /// The process exited with a status code.
    Exited {
        /// Exit code.
        code: i32,
    },
    /// The process was terminated by a signal.
    Signaled {
        /// Signal number.
        signal: i32,
    },
    /// The step never produced an exit status.
    FailedToStart {
        /// Error description.
        error: String,
        /// Shell-compatible exit code standing in for the missing status.
        exit_code: i32,
    },
}

impl StepStatus {
    /// Whether the step succeeded.
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }

    /// Exit code the container would report for this step.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited { code } => *code,
            Self::Signaled { signal } => 128 + signal,
            Self::FailedToStart { exit_code, .. } => *exit_code,
        }
    }
}

impl From<ExitStatus> for StepStatus {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Exited { code } => Self::Exited { code },
            ExitStatus::Signaled { signal } => Self::Signaled { signal },
        }
    }
}

impl From<&StepError> for StepStatus {
    fn from(error: &StepError) -> Self {
        Self::FailedToStart {
            error: error.to_string(),
            exit_code: error.exit_code(),
        }
    }
}

/// One executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name ("migrate" or "serve")
    pub name: String,
    /// What the step ran
    pub command: String,
    /// How it ended
    pub status: StepStatus,
    /// Host signal forwarded to the step, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_by: Option<String>,
    /// When the step started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl StepRecord {
    /// Build a record from a step's result.
    pub fn from_result(
        name: &str,
        command: String,
        result: &std::result::Result<StepOutcome, StepError>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        let (status, interrupted_by) = match result {
            Ok(outcome) => (
                StepStatus::from(outcome.status),
                outcome.interrupted_by.map(|s| s.to_string()),
            ),
            Err(e) => (StepStatus::from(e), None),
        };
        Self {
            name: name.to_string(),
            command,
            status,
            interrupted_by,
            started_at,
            duration_ms,
        }
    }
}

/// Record of a single startup invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupReport {
    /// Unique id for this startup
    pub invocation_id: Uuid,
    /// Gate policy in effect
    pub gate_policy: GatePolicy,
    /// When the sequence started
    pub started_at: DateTime<Utc>,
    /// When the sequence terminated (unset while still running)
    pub finished_at: Option<DateTime<Utc>>,
    /// Steps in execution order
    pub steps: Vec<StepRecord>,
    /// Exit code of the container (unset while still running)
    pub exit_code: Option<i32>,
}

impl StartupReport {
    /// Start a new report.
    pub fn new(gate_policy: GatePolicy) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            gate_policy,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            exit_code: None,
        }
    }

    /// Append a step record.
    pub fn record(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    /// Mark the sequence terminated with `exit_code`.
    pub fn finish(&mut self, exit_code: i32) {
        self.finished_at = Some(Utc::now());
        self.exit_code = Some(exit_code);
    }

    /// Record for the step called `name`.
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Exit code for the entry process, clamped to what a process can return.
    pub fn process_exit_code(&self) -> u8 {
        self.exit_code
            .map(|code| u8::try_from(code).unwrap_or(u8::MAX))
            .unwrap_or(1)
    }

    /// Write the report as pretty JSON, replacing any previous version.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        // Write-then-rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read a report written by [`StartupReport::write_to`].
    pub async fn read_from(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
