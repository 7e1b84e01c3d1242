// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process step implementation.
//!
//! Runs the delegated application as a child process and waits for it to
//! exit. Stdout and stderr are inherited so the application's logs land in the
//! container log stream. Signals relayed by the host are forwarded to the
//! child; a child that outlives the grace period is killed.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::ContainerContext;
use crate::signals::SignalReceiver;
use crate::step::{Result, Step, StepError, StepOutcome};

/// Step that runs an external program.
#[derive(Debug, Clone)]
pub struct ProcessStep {
    program: String,
    args: Vec<OsString>,
    workdir: Option<PathBuf>,
    env: HashMap<String, String>,
    stop_grace: Duration,
}

impl ProcessStep {
    /// Create a step running `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: HashMap::new(),
            stop_grace: Duration::from_secs(10),
        }
    }

    /// Migration step for the configured application (`run.py migrate`).
    pub fn migrate(config: &Config) -> Self {
        Self::from_config(config, config.migrate_args())
    }

    /// Serve step for the configured application (`run.py`).
    pub fn serve(config: &Config) -> Self {
        Self::from_config(config, config.serve_args())
    }

    fn from_config(config: &Config, args: Vec<OsString>) -> Self {
        let mut step = Self::new(&config.program)
            .args(args)
            .stop_grace(config.stop_grace);
        if let Some(ref dir) = config.workdir {
            step = step.current_dir(dir);
        }
        step
    }

    /// Append arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Set an extra environment variable (applied after the context vars).
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the grace period between a forwarded signal and SIGKILL.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Program this step runs.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, context: &ContainerContext) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.workdir {
            cmd.current_dir(dir);
        }
        for (key, value) in context.env_vars() {
            cmd.env(key, value);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        // Never leave the child behind if the sequencer itself goes away
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> StepError {
        match e.kind() {
            std::io::ErrorKind::NotFound => StepError::NotFound(self.program.clone()),
            std::io::ErrorKind::PermissionDenied => {
                StepError::PermissionDenied(self.program.clone())
            }
            _ => StepError::SpawnFailed {
                program: self.program.clone(),
                source: e,
            },
        }
    }
}

/// Send `signal` to `pid`. A process that is already gone is not an error.
fn forward_signal(pid: Option<Pid>, signal: Signal) -> Result<()> {
    let Some(pid) = pid else {
        return Ok(());
    };
    match signal::kill(pid, signal) {
        Ok(()) => {
            debug!(pid = %pid, signal = %signal, "Forwarded signal to step");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pid = %pid, "Step already exited (ESRCH)");
            Ok(())
        }
        Err(source) => Err(StepError::Signal { signal, source }),
    }
}

#[async_trait]
impl Step for ProcessStep {
    fn step_type(&self) -> &'static str {
        "process"
    }

    fn describe(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    async fn invoke(
        &self,
        context: &ContainerContext,
        mut signals: SignalReceiver,
    ) -> Result<StepOutcome> {
        let mut child = self
            .command(context)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let pid = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw);
        info!(
            command = %self.describe(),
            pid = ?pid.map(Pid::as_raw),
            is_docker = context.is_docker,
            "Step started"
        );

        let mut interrupted_by = None;
        let mut kill_deadline: Option<Instant> = None;
        let mut signals_open = true;

        // A signal that arrived before the child existed still applies to it
        let pending = *signals.borrow_and_update();
        if let Some(sig) = pending {
            if let Err(e) = forward_signal(pid, sig) {
                warn!(error = %e, "Failed to forward pending signal");
            }
            interrupted_by = Some(sig);
            kill_deadline = Some(Instant::now() + self.stop_grace);
        }

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(StepError::Wait)?;
                    debug!(command = %self.describe(), status = ?status, "Step exited");
                    return Ok(StepOutcome {
                        status: status.into(),
                        interrupted_by,
                    });
                }

                changed = signals.changed(), if signals_open => {
                    if changed.is_err() {
                        signals_open = false;
                        continue;
                    }
                    let received = *signals.borrow_and_update();
                    if let Some(sig) = received {
                        if let Err(e) = forward_signal(pid, sig) {
                            warn!(error = %e, "Failed to forward signal");
                        }
                        interrupted_by = Some(sig);
                        kill_deadline.get_or_insert_with(|| Instant::now() + self.stop_grace);
                    }
                }

                _ = tokio::time::sleep_until(kill_deadline.unwrap_or_else(Instant::now)),
                    if kill_deadline.is_some() =>
                {
                    warn!(
                        command = %self.describe(),
                        grace_secs = self.stop_grace.as_secs_f64(),
                        "Step did not exit within grace period, killing"
                    );
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "Failed to kill step");
                    }
                    kill_deadline = None;
                }
            }
        }
    }
}
