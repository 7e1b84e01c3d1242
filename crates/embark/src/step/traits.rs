// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step trait definitions.
//!
//! Defines the abstract interface for startup steps.

use async_trait::async_trait;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ContainerContext;
use crate::signals::SignalReceiver;

/// Errors from step operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StepError {
    /// Program was not found.
    #[error("Program not found: {0}")]
    NotFound(String),

    /// Program exists but could not be executed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Process failed to start for another reason.
    #[error("Failed to start {program}: {source}")]
    SpawnFailed {
        /// Program that was being started.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child process failed.
    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    /// Delivering a signal to the child failed.
    #[error("Failed to deliver {signal}: {source}")]
    Signal {
        /// Signal being delivered.
        signal: Signal,
        /// Errno from kill(2).
        #[source]
        source: nix::errno::Errno,
    },
}

impl StepError {
    /// Container exit code that stands in for a step that never produced one.
    ///
    /// Mirrors what a POSIX shell reports for the same situation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 127,
            Self::PermissionDenied(_) => 126,
            _ => 1,
        }
    }
}

/// Result type for step operations.
pub type Result<T> = std::result::Result<T, StepError>;

/// How a step's process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitStatus {
    /// Normal exit with a status code.
    Exited {
        /// Exit code.
        code: i32,
    },
    /// Terminated by a signal.
    Signaled {
        /// Signal number.
        signal: i32,
    },
}

impl ExitStatus {
    /// Successful exit (code 0).
    pub const SUCCESS: Self = Self::Exited { code: 0 };

    /// Normal exit with `code`.
    pub fn code(code: i32) -> Self {
        Self::Exited { code }
    }

    /// Termination by `signal`.
    pub fn signaled(signal: Signal) -> Self {
        Self::Signaled {
            signal: signal as i32,
        }
    }

    /// Whether the step succeeded.
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }

    /// Exit code as the container runtime reports it (`128 + n` for signals).
    pub fn exit_code(&self) -> i32 {
        match *self {
            Self::Exited { code } => code,
            Self::Signaled { signal } => 128 + signal,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited { code },
            (None, Some(signal)) => Self::Signaled { signal },
            // Neither code nor signal: treat as a generic failure
            (None, None) => Self::Exited { code: 1 },
        }
    }
}

/// Result of a completed step invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// How the step terminated.
    pub status: ExitStatus,
    /// Signal that was forwarded to the step while it ran, if any.
    pub interrupted_by: Option<Signal>,
}

impl StepOutcome {
    /// Outcome of a step that ran without host interference.
    pub fn new(status: ExitStatus) -> Self {
        Self {
            status,
            interrupted_by: None,
        }
    }
}

/// Trait for startup steps.
///
/// A step is an external action the sequencer invokes once and waits on.
/// Implementations can spawn processes, call into embedded code, or return
/// canned outcomes in tests.
#[async_trait]
pub trait Step: Send + Sync {
    /// Step type identifier (e.g., "process", "mock")
    fn step_type(&self) -> &'static str;

    /// Human-readable description of what the step runs.
    fn describe(&self) -> String {
        self.step_type().to_string()
    }

    /// Run the step to completion.
    ///
    /// Signals published on `signals` while the step runs must be passed on
    /// to whatever the step is executing so it can shut down cleanly.
    async fn invoke(
        &self,
        context: &ContainerContext,
        signals: SignalReceiver,
    ) -> Result<StepOutcome>;
}
