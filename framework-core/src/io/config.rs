//! Configuration: `.claude/framework-core.toml` plus environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::lock::{UnknownPidPolicy, normalize_agent};

pub const ENV_AGENT_NAME: &str = "FRAMEWORK_AGENT_NAME";
pub const ENV_OWNER_PID: &str = "FRAMEWORK_OWNER_PID";
pub const ENV_LOCK_TTL_SECONDS: &str = "FRAMEWORK_LOCK_TTL_SECONDS";

pub const DEFAULT_LOCK_TTL_SECS: u64 = 30 * 60;

/// Tool configuration (TOML).
///
/// Missing fields default to the values the tool has always used, so an absent
/// file and an empty file behave the same.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// Lock time-to-live in seconds. `FRAMEWORK_LOCK_TTL_SECONDS` overrides it.
    pub lock_ttl_secs: u64,

    /// Worker pool size for the task batch.
    pub max_workers: usize,

    /// How an inconclusive pid probe (e.g. permission denied) counts toward staleness.
    pub unknown_pid: UnknownPidPolicy,

    /// Timeout for each git subprocess.
    pub git_timeout_secs: u64,

    /// Default timeout for external tasks without their own `timeout_secs`.
    pub task_timeout_secs: u64,

    /// Bytes of stdout/stderr kept per subprocess.
    pub output_limit_bytes: usize,

    /// External tasks added to the `cold-start` batch.
    pub cold_start: Vec<ExternalTaskConfig>,

    /// External tasks added to the `completion` batch.
    pub completion: Vec<ExternalTaskConfig>,

    /// Workspace files the agent should load after a successful `cold-start`,
    /// listed in the report as `CONTEXT:<path>,<path>`.
    pub context_files: Vec<String>,
}

/// A collaborator invoked as a command; the core only sees its exit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalTaskConfig {
    pub name: String,
    /// Program and arguments, run from the workspace root.
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Skip the task (successfully) when this workspace-relative path is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let hook_script = ".claude/scripts/install-git-hooks.sh";
        Self {
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            max_workers: 10,
            unknown_pid: UnknownPidPolicy::Dead,
            git_timeout_secs: 30,
            task_timeout_secs: 60,
            output_limit_bytes: 100_000,
            cold_start: vec![ExternalTaskConfig {
                name: "git_hooks".to_string(),
                command: vec!["bash".to_string(), hook_script.to_string()],
                timeout_secs: None,
                requires: Some(PathBuf::from(hook_script)),
            }],
            completion: Vec::new(),
            context_files: [
                ".claude/SNAPSHOT.md",
                ".claude/BACKLOG.md",
                ".claude/ARCHITECTURE.md",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl_secs == 0 {
            return Err(anyhow!("lock_ttl_secs must be > 0"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be > 0"));
        }
        if self.git_timeout_secs == 0 {
            return Err(anyhow!("git_timeout_secs must be > 0"));
        }
        if self.task_timeout_secs == 0 {
            return Err(anyhow!("task_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        for task in self.cold_start.iter().chain(&self.completion) {
            if task.name.trim().is_empty() {
                return Err(anyhow!("external task name must be non-empty"));
            }
            if task.command.is_empty() || task.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "task '{}': command must be a non-empty array",
                    task.name
                ));
            }
            if task.timeout_secs == Some(0) {
                return Err(anyhow!("task '{}': timeout_secs must be > 0", task.name));
            }
        }
        Ok(())
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CoreConfig::default()`.
pub fn load_config(path: &Path) -> Result<CoreConfig> {
    if !path.exists() {
        let cfg = CoreConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CoreConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Caller identity and lock TTL, resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Lower-cased agent name, `"unknown"` when unset or blank.
    pub agent: String,
    /// Caller-supplied owner id, or this process id.
    pub owner_pid: i64,
    pub lock_ttl: Duration,
}

impl SessionSettings {
    pub fn from_env(cfg: &CoreConfig) -> Self {
        Self::from_lookup(cfg, |key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup` instead of the process environment.
    ///
    /// Numeric variables must be plain decimal digits; anything else falls back
    /// to the default. A zero TTL falls back too, as it would make every lock stale.
    pub fn from_lookup(cfg: &CoreConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let agent = normalize_agent(&lookup(ENV_AGENT_NAME).unwrap_or_default());
        let owner_pid = lookup(ENV_OWNER_PID)
            .as_deref()
            .and_then(parse_digits)
            .and_then(|value| i64::try_from(value).ok())
            .unwrap_or_else(|| i64::from(std::process::id()));
        let ttl_secs = lookup(ENV_LOCK_TTL_SECONDS)
            .as_deref()
            .and_then(parse_digits)
            .filter(|&secs| secs > 0)
            .unwrap_or(cfg.lock_ttl_secs);
        Self {
            agent,
            owner_pid,
            lock_ttl: Duration::from_secs(ttl_secs),
        }
    }
}

fn parse_digits(raw: &str) -> Option<u64> {
    let value = raw.trim();
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CoreConfig::default());
        assert_eq!(cfg.lock_ttl_secs, 1800);
    }

    #[test]
    fn load_parses_partial_file_with_external_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("framework-core.toml");
        fs::write(
            &path,
            r#"
max_workers = 4
unknown_pid = "alive"

[[completion]]
name = "export_dialogs"
command = ["node", ".claude/dist/export.js"]
timeout_secs = 15
"#,
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.unknown_pid, UnknownPidPolicy::Alive);
        assert_eq!(cfg.lock_ttl_secs, DEFAULT_LOCK_TTL_SECS);
        assert_eq!(cfg.completion.len(), 1);
        assert_eq!(cfg.completion[0].timeout_secs, Some(15));
        assert_eq!(cfg.cold_start, CoreConfig::default().cold_start);
    }

    #[test]
    fn load_rejects_zero_workers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("framework-core.toml");
        fs::write(&path, "max_workers = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_workers"));
    }

    #[test]
    fn settings_default_to_unknown_agent_and_own_pid() {
        let settings = SessionSettings::from_lookup(&CoreConfig::default(), |_| None);
        assert_eq!(settings.agent, "unknown");
        assert_eq!(settings.owner_pid, i64::from(std::process::id()));
        assert_eq!(settings.lock_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn settings_read_overrides_and_ignore_non_numeric_values() {
        let cfg = CoreConfig::default();
        let settings = SessionSettings::from_lookup(
            &cfg,
            lookup_from(&[
                (ENV_AGENT_NAME, "  Build-Bot "),
                (ENV_OWNER_PID, "4821"),
                (ENV_LOCK_TTL_SECONDS, "60"),
            ]),
        );
        assert_eq!(settings.agent, "build-bot");
        assert_eq!(settings.owner_pid, 4821);
        assert_eq!(settings.lock_ttl, Duration::from_secs(60));

        let settings = SessionSettings::from_lookup(
            &cfg,
            lookup_from(&[(ENV_OWNER_PID, "-1"), (ENV_LOCK_TTL_SECONDS, "soon")]),
        );
        assert_eq!(settings.owner_pid, i64::from(std::process::id()));
        assert_eq!(settings.lock_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn zero_ttl_override_falls_back_to_config() {
        let cfg = CoreConfig {
            lock_ttl_secs: 600,
            ..CoreConfig::default()
        };
        let settings =
            SessionSettings::from_lookup(&cfg, lookup_from(&[(ENV_LOCK_TTL_SECONDS, "0")]));
        assert_eq!(settings.lock_ttl, Duration::from_secs(600));
    }
}
