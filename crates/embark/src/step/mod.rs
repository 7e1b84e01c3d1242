// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step module - the actions the sequencer runs.

pub mod mock;
pub mod process;
mod traits;

pub use mock::MockStep;
pub use process::ProcessStep;
pub use traits::*;
