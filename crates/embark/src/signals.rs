// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host signal relay.
//!
//! The container runtime stops a container by signalling its entry process.
//! [`SignalRelay`] catches those signals and republishes them on a watch
//! channel; whichever step is active at the time forwards them to its child.

use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Receiving side of the relay. Holds the last signal received, if any.
pub type SignalReceiver = watch::Receiver<Option<Signal>>;

/// Publishes host termination signals to the steps.
#[derive(Debug, Clone)]
pub struct SignalRelay {
    tx: Arc<watch::Sender<Option<Signal>>>,
}

impl Default for SignalRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRelay {
    /// Create a relay with no signal recorded.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Get a receiver for relayed signals.
    pub fn subscribe(&self) -> SignalReceiver {
        self.tx.subscribe()
    }

    /// Publish a signal to all receivers.
    pub fn relay(&self, signal: Signal) {
        debug!(signal = %signal, "Relaying signal");
        self.tx.send_replace(Some(signal));
    }

    /// Last signal relayed, if any.
    pub fn last(&self) -> Option<Signal> {
        *self.tx.borrow()
    }

    /// Install OS handlers for SIGTERM, SIGINT, SIGQUIT and SIGHUP and relay
    /// them until the process exits.
    pub fn listen(&self) -> std::io::Result<JoinHandle<()>> {
        let mut term = signal(SignalKind::terminate())?;
        let mut int = signal(SignalKind::interrupt())?;
        let mut quit = signal(SignalKind::quit())?;
        let mut hup = signal(SignalKind::hangup())?;
        let relay = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = term.recv() => Signal::SIGTERM,
                    Some(()) = int.recv() => Signal::SIGINT,
                    Some(()) = quit.recv() => Signal::SIGQUIT,
                    Some(()) = hup.recv() => Signal::SIGHUP,
                    else => break,
                };
                info!(signal = %received, "Received host signal");
                relay.relay(received);
            }
        }))
    }
}

/// A receiver that never yields a signal. Useful when no relay is wired up.
pub fn detached() -> SignalReceiver {
    let (tx, rx) = watch::channel(None);
    // Dropping the sender makes `changed()` resolve with an error, which
    // steps treat as "no more signals".
    drop(tx);
    rx
}
