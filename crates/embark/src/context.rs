// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container context handed to every step.
//!
//! The delegated application learns that it runs inside the image through the
//! `IS_DOCKER` environment variable. Inside the sequencer that fact is a typed
//! value passed into each step invocation; only the process step renders it
//! back into the child's environment.

use serde::{Deserialize, Serialize};

/// Environment variable read by the delegated application.
pub const IS_DOCKER_VAR: &str = "IS_DOCKER";

/// Facts about the runtime environment that steps receive explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerContext {
    /// Whether the application runs inside the container image.
    pub is_docker: bool,
}

impl Default for ContainerContext {
    fn default() -> Self {
        Self::containerized()
    }
}

impl ContainerContext {
    /// Context for the containerized entry point (`IS_DOCKER=true`).
    pub fn containerized() -> Self {
        Self { is_docker: true }
    }

    /// Context for running the steps outside a container.
    pub fn host() -> Self {
        Self { is_docker: false }
    }

    /// Environment variables that carry this context to a child process.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![(IS_DOCKER_VAR, self.is_docker.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_containerized() {
        assert!(ContainerContext::default().is_docker);
    }

    #[test]
    fn test_env_vars() {
        let vars = ContainerContext::containerized().env_vars();
        assert_eq!(vars, vec![("IS_DOCKER", "true".to_string())]);

        let vars = ContainerContext::host().env_vars();
        assert_eq!(vars, vec![("IS_DOCKER", "false".to_string())]);
    }
}
