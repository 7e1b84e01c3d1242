// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock step for testing.
//!
//! A step implementation that returns controlled outcomes without spawning
//! processes. Every invocation is written to a shared [`Journal`] so tests can
//! assert on ordering across steps.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::context::ContainerContext;
use crate::signals::SignalReceiver;

/// Journal event recorded by a mock step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    /// Step `name` began running.
    Started(String),
    /// Step `name` reached a terminal state.
    Finished(String),
}

/// Shared, ordered record of mock step activity.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<JournalEvent>>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, event: JournalEvent) {
        self.events.lock().await.push(event);
    }

    /// Snapshot of all events so far.
    pub async fn events(&self) -> Vec<JournalEvent> {
        self.events.lock().await.clone()
    }
}

/// What the mock does when invoked.
#[derive(Debug, Clone)]
enum Behavior {
    Exit(ExitStatus),
    NotFound,
}

/// Mock step for testing.
pub struct MockStep {
    name: String,
    behavior: Behavior,
    journal: Journal,
    invocations: AtomicUsize,
    contexts: Mutex<Vec<ContainerContext>>,
    delay: Duration,
}

impl MockStep {
    /// Create a mock step that exits with `code`.
    pub fn exiting(name: impl Into<String>, code: i32) -> Self {
        Self::with_behavior(name, Behavior::Exit(ExitStatus::code(code)))
    }

    /// Create a mock step that exits successfully.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::exiting(name, 0)
    }

    /// Create a mock step that terminates with `status`.
    pub fn with_status(name: impl Into<String>, status: ExitStatus) -> Self {
        Self::with_behavior(name, Behavior::Exit(status))
    }

    /// Create a mock step whose program cannot be found.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::with_behavior(name, Behavior::NotFound)
    }

    fn with_behavior(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            journal: Journal::new(),
            invocations: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Record activity into `journal` (share one journal across steps).
    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    /// Take `delay` to complete.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times the step was invoked.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Contexts the step was invoked with.
    pub async fn contexts(&self) -> Vec<ContainerContext> {
        self.contexts.lock().await.clone()
    }
}

#[async_trait]
impl Step for MockStep {
    fn step_type(&self) -> &'static str {
        "mock"
    }

    fn describe(&self) -> String {
        format!("mock:{}", self.name)
    }

    async fn invoke(
        &self,
        context: &ContainerContext,
        mut signals: SignalReceiver,
    ) -> Result<StepOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().await.push(context.clone());

        let status = match self.behavior {
            Behavior::Exit(status) => status,
            Behavior::NotFound => return Err(StepError::NotFound(self.name.clone())),
        };

        self.journal
            .push(JournalEvent::Started(self.name.clone()))
            .await;

        // Simulate execution; a relayed signal ends it early, as if the
        // process took the default action for that signal.
        let mut outcome = None;
        if !self.delay.is_zero() {
            let sleep = tokio::time::sleep(self.delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = signals.changed() => {
                        if changed.is_err() {
                            (&mut sleep).await;
                            break;
                        }
                        let received = *signals.borrow_and_update();
                        if let Some(sig) = received {
                            outcome = Some(StepOutcome {
                                status: ExitStatus::signaled(sig),
                                interrupted_by: Some(sig),
                            });
                            break;
                        }
                    }
                }
            }
        }

        self.journal
            .push(JournalEvent::Finished(self.name.clone()))
            .await;

        Ok(outcome.unwrap_or_else(|| StepOutcome::new(status)))
    }
}
