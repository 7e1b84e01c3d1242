// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embark - Container Bootstrap Sequencer
//!
//! Embark is the entry process of an application container. It runs the
//! application's migration step to completion and then starts the service,
//! replacing a shell composition like `python run.py migrate; python run.py`.
//!
//! # Startup Sequence
//!
//! ```text
//!  image build (external)        embark (this crate)              application (external)
//! ┌──────────────────────┐   ┌──────────────────────────┐   ┌─────────────────────────────┐
//! │ install dependencies │──▶│ 1. migrate step          │──▶│ python run.py migrate       │
//! └──────────────────────┘   │    wait for termination  │   └─────────────────────────────┘
//!                            │ 2. serve step            │──▶┌─────────────────────────────┐
//!                            │    wait for termination  │   │ python run.py  (long-lived) │
//!                            │ 3. exit with serve status│   └─────────────────────────────┘
//!                            └──────────────────────────┘
//! ```
//!
//! Host signals (`SIGTERM`, `SIGINT`, `SIGQUIT`, `SIGHUP`) are forwarded to
//! whichever step is running. A step still alive after the grace period is
//! killed.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `EMBARK_APP_PROGRAM` | No | `python` | Program that runs both steps |
//! | `EMBARK_APP_ENTRY` | No | `run.py` | Entry point argument (empty disables) |
//! | `EMBARK_MIGRATE_ARG` | No | `migrate` | Subcommand of the migration step |
//! | `EMBARK_WORKDIR` | No | inherited | Working directory of both steps |
//! | `EMBARK_IS_DOCKER` | No | `true` | Exported to the steps as `IS_DOCKER` |
//! | `EMBARK_GATE_ON_MIGRATION` | No | `false` | Skip serve when migration fails |
//! | `EMBARK_STOP_GRACE_SECS` | No | `10` | Seconds between forwarded signal and SIGKILL |
//! | `EMBARK_REPORT_FILE` | No | - | Path of the JSON startup report |
//!
//! # Modules
//!
//! - [`config`]: Sequencer configuration from environment variables
//! - [`context`]: Typed container context handed to each step
//! - [`error`]: Error types
//! - [`report`]: Startup report (step records and final exit code)
//! - [`sequencer`]: The bootstrap sequencer and its phase state machine
//! - [`signals`]: Host signal relay
//! - [`step`]: Step trait plus process and mock implementations

#![deny(missing_docs)]

/// Sequencer configuration loaded from environment variables.
pub mod config;

/// Container context passed to every step.
pub mod context;

/// Error types for sequencer operations.
pub mod error;

/// Startup report.
pub mod report;

/// Bootstrap sequencer.
pub mod sequencer;

/// Host signal relay.
pub mod signals;

/// Startup steps (process, mock).
pub mod step;

pub use config::Config;
pub use context::ContainerContext;
pub use error::Error;
pub use sequencer::{BootstrapSequencer, GatePolicy, Phase};
