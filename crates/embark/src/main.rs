// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embark - container entry point.
//!
//! Runs the application's migration step, then its serve step, and exits
//! with the serve step's status.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use embark::config::Config;
use embark::sequencer::BootstrapSequencer;
use embark::signals::SignalRelay;
use embark::step::ProcessStep;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "embark=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        program = %config.program,
        entry = ?config.entry,
        gate_policy = ?config.gate_policy,
        is_docker = config.context.is_docker,
        "Starting Embark"
    );

    // Relay host signals to whichever step is running
    let relay = SignalRelay::new();
    let _listener = relay
        .listen()
        .context("Failed to install signal handlers")?;

    let mut builder = BootstrapSequencer::builder()
        .migrate(Arc::new(ProcessStep::migrate(&config)))
        .serve(Arc::new(ProcessStep::serve(&config)))
        .context(config.context.clone())
        .gate_policy(config.gate_policy)
        .signals(relay.subscribe());
    if let Some(ref path) = config.report_file {
        builder = builder.report_file(path);
    }

    let report = builder.build()?.run().await;

    Ok(ExitCode::from(report.process_exit_code()))
}
