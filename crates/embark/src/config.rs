// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for embark.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::context::ContainerContext;
use crate::sequencer::GatePolicy;

/// Sequencer configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Program that runs both steps (interpreter or binary)
    pub program: String,
    /// Entry point passed as the first argument to both steps, if any
    pub entry: Option<String>,
    /// Subcommand appended for the migration step
    pub migrate_arg: String,
    /// Working directory for both steps (inherited when unset)
    pub workdir: Option<PathBuf>,
    /// Context exported to the delegated application
    pub context: ContainerContext,
    /// Whether serve depends on migration success
    pub gate_policy: GatePolicy,
    /// Time a step gets after a forwarded signal before SIGKILL
    pub stop_grace: Duration,
    /// Where to write the startup report, if anywhere
    pub report_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            entry: Some("run.py".to_string()),
            migrate_arg: "migrate".to_string(),
            workdir: None,
            context: ContainerContext::containerized(),
            gate_policy: GatePolicy::Unconditional,
            stop_grace: Duration::from_secs(10),
            report_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let program = match lookup("EMBARK_APP_PROGRAM") {
            Some(p) if p.trim().is_empty() => return Err(ConfigError::EmptyProgram),
            Some(p) => p.trim().to_string(),
            None => defaults.program,
        };

        // An explicitly empty entry means "call the program directly"
        let entry = match lookup("EMBARK_APP_ENTRY") {
            Some(e) if e.trim().is_empty() => None,
            Some(e) => Some(e.trim().to_string()),
            None => defaults.entry,
        };

        let migrate_arg = lookup("EMBARK_MIGRATE_ARG")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.migrate_arg);

        let workdir = lookup("EMBARK_WORKDIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let is_docker = parse_bool(&lookup, "EMBARK_IS_DOCKER", true)?;

        let gate_policy = if parse_bool(&lookup, "EMBARK_GATE_ON_MIGRATION", false)? {
            GatePolicy::RequireMigrationSuccess
        } else {
            GatePolicy::Unconditional
        };

        let stop_grace = match lookup("EMBARK_STOP_GRACE_SECS") {
            Some(v) => Duration::from_secs(v.trim().parse().map_err(|_| {
                ConfigError::InvalidNumber {
                    var: "EMBARK_STOP_GRACE_SECS",
                    value: v.clone(),
                }
            })?),
            None => defaults.stop_grace,
        };

        let report_file = lookup("EMBARK_REPORT_FILE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            program,
            entry,
            migrate_arg,
            workdir,
            context: ContainerContext { is_docker },
            gate_policy,
            stop_grace,
            report_file,
        })
    }

    /// Arguments for the migration step (`run.py migrate`).
    pub fn migrate_args(&self) -> Vec<OsString> {
        let mut args = self.entry_args();
        args.push(OsString::from(&self.migrate_arg));
        args
    }

    /// Arguments for the serve step (`run.py`).
    pub fn serve_args(&self) -> Vec<OsString> {
        self.entry_args()
    }

    fn entry_args(&self) -> Vec<OsString> {
        self.entry.iter().map(OsString::from).collect()
    }
}

/// Parse a boolean env var. Unset means `default`.
fn parse_bool<F>(lookup: &F, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { var, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A boolean variable holds something other than a recognised flag.
    #[error("Invalid boolean for {var}: {value:?}")]
    InvalidBool {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    /// A numeric variable could not be parsed.
    #[error("Invalid number for {var}: {value:?}")]
    InvalidNumber {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    /// The step program is set but empty.
    #[error("EMBARK_APP_PROGRAM must not be empty")]
    EmptyProgram,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.program, "python");
        assert_eq!(config.entry.as_deref(), Some("run.py"));
        assert_eq!(config.migrate_arg, "migrate");
        assert!(config.context.is_docker);
        assert_eq!(config.gate_policy, GatePolicy::Unconditional);
        assert_eq!(config.stop_grace, Duration::from_secs(10));
        assert!(config.workdir.is_none());
        assert!(config.report_file.is_none());
    }

    #[test]
    fn test_step_arguments() {
        let config = load(&[]).unwrap();
        assert_eq!(config.migrate_args(), vec!["run.py", "migrate"]);
        assert_eq!(config.serve_args(), vec!["run.py"]);
    }

    #[test]
    fn test_empty_entry_calls_program_directly() {
        let config = load(&[("EMBARK_APP_PROGRAM", "/app/server"), ("EMBARK_APP_ENTRY", "")])
            .unwrap();
        assert!(config.entry.is_none());
        assert_eq!(config.migrate_args(), vec!["migrate"]);
        assert!(config.serve_args().is_empty());
    }

    #[test]
    fn test_gate_on_migration() {
        let config = load(&[("EMBARK_GATE_ON_MIGRATION", "Yes")]).unwrap();
        assert_eq!(config.gate_policy, GatePolicy::RequireMigrationSuccess);

        let config = load(&[("EMBARK_GATE_ON_MIGRATION", "off")]).unwrap();
        assert_eq!(config.gate_policy, GatePolicy::Unconditional);
    }

    #[test]
    fn test_is_docker_can_be_disabled() {
        let config = load(&[("EMBARK_IS_DOCKER", "0")]).unwrap();
        assert!(!config.context.is_docker);
    }

    #[test]
    fn test_invalid_bool() {
        let err = load(&[("EMBARK_IS_DOCKER", "maybe")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidBool {
                var: "EMBARK_IS_DOCKER",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_grace() {
        let err = load(&[("EMBARK_STOP_GRACE_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("EMBARK_STOP_GRACE_SECS"));
    }

    #[test]
    fn test_empty_program() {
        let err = load(&[("EMBARK_APP_PROGRAM", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyProgram));
    }

    #[test]
    fn test_paths() {
        let config = load(&[
            ("EMBARK_WORKDIR", "/app"),
            ("EMBARK_REPORT_FILE", "/tmp/startup.json"),
            ("EMBARK_STOP_GRACE_SECS", "3"),
        ])
        .unwrap();
        assert_eq!(config.workdir, Some(PathBuf::from("/app")));
        assert_eq!(config.report_file, Some(PathBuf::from("/tmp/startup.json")));
        assert_eq!(config.stop_grace, Duration::from_secs(3));
    }
}
