//! Configured collaborators run as child processes.
//!
//! The core only looks at how the command exits; anything it prints is kept for
//! error messages and otherwise ignored.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::debug;

use crate::core::types::TaskResult;
use crate::io::config::ExternalTaskConfig;
use crate::io::paths::WorkspacePaths;
use crate::io::process::{Limits, run_bounded};
use crate::tasks::{Task, timed};

const STDERR_TAIL_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct CommandTask {
    name: String,
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    requires: Option<PathBuf>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandTask {
    /// Build from config; relative `requires` paths resolve against the workspace root.
    ///
    /// `default_timeout` applies when the entry has no `timeout_secs` of its own.
    pub fn from_config(
        cfg: &ExternalTaskConfig,
        paths: &WorkspacePaths,
        default_timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        let Some((program, args)) = cfg.command.split_first() else {
            bail!("task '{}': command is empty", cfg.name);
        };
        Ok(Self {
            name: cfg.name.clone(),
            program: program.clone(),
            args: args.to_vec(),
            workdir: paths.root.clone(),
            requires: cfg.requires.as_deref().map(|p| paths.resolve(p)),
            timeout: cfg
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
            output_limit_bytes,
        })
    }

    fn execute(&self) -> Result<String> {
        if let Some(required) = &self.requires
            && !required.exists()
        {
            debug!(task = %self.name, required = %required.display(), "requirement missing, skipping");
            return Ok("COMMAND:skipped".to_string());
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.workdir);
        let limits = Limits {
            timeout: self.timeout,
            output_bytes: self.output_limit_bytes,
        };
        let out = run_bounded(cmd, limits)?;
        if out.timed_out {
            bail!(
                "{} timed out after {}s",
                self.program,
                self.timeout.as_secs()
            );
        }
        if !out.status.success() {
            let code = out.exit_label();
            let tail = out.stderr.tail(STDERR_TAIL_CHARS);
            if tail.is_empty() {
                bail!("{} exited with {code}", self.program);
            }
            bail!("{} exited with {code}: {tail}", self.program);
        }
        Ok("COMMAND:ok".to_string())
    }
}

impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> TaskResult {
        timed(&self.name, || self.execute())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::TestWorkspace;

    fn task(ws: &TestWorkspace, script: &str, requires: Option<&str>, timeout: u64) -> CommandTask {
        let cfg = ExternalTaskConfig {
            name: "hooks".to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs: Some(timeout),
            requires: requires.map(PathBuf::from),
        };
        CommandTask::from_config(&cfg, &ws.paths(), Duration::from_secs(60), 10_000)
            .expect("task")
    }

    #[test]
    fn zero_exit_is_success() {
        let ws = TestWorkspace::new().expect("workspace");
        let result = task(&ws, "exit 0", None, 10).run();
        assert_eq!(result.status(), TaskStatus::Success);
        assert_eq!(result.result(), "COMMAND:ok");
    }

    #[test]
    fn runs_in_workspace_root() {
        let ws = TestWorkspace::new().expect("workspace");
        let result = task(&ws, "touch ran-here", None, 10).run();
        assert_eq!(result.status(), TaskStatus::Success);
        assert!(ws.root().join("ran-here").exists());
    }

    #[test]
    fn nonzero_exit_reports_code_and_stderr() {
        let ws = TestWorkspace::new().expect("workspace");
        let result = task(&ws, "echo broken >&2; exit 4", None, 10).run();
        assert_eq!(result.status(), TaskStatus::Error);
        assert_eq!(result.error_message(), Some("sh exited with 4: broken"));
    }

    #[test]
    fn missing_requirement_skips() {
        let ws = TestWorkspace::new().expect("workspace");
        let result = task(&ws, "exit 1", Some(".claude/scripts/install-git-hooks.sh"), 10).run();
        assert_eq!(result.status(), TaskStatus::Success);
        assert_eq!(result.result(), "COMMAND:skipped");
    }

    #[test]
    fn timeout_is_an_error() {
        let ws = TestWorkspace::new().expect("workspace");
        let result = task(&ws, "exec sleep 5", None, 1).run();
        assert_eq!(result.status(), TaskStatus::Error);
        assert!(
            result
                .error_message()
                .is_some_and(|m| m.contains("timed out"))
        );
    }

    #[test]
    fn background_process_cannot_stretch_the_timeout() {
        let ws = TestWorkspace::new().expect("workspace");
        let started = std::time::Instant::now();
        let result = task(&ws, "sleep 5 & exit 0", None, 1).run();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(result.status(), TaskStatus::Error);
        assert_eq!(result.error_message(), Some("sh timed out after 1s"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let cfg = ExternalTaskConfig {
            name: "empty".to_string(),
            command: Vec::new(),
            timeout_secs: None,
            requires: None,
        };
        let ws = TestWorkspace::new().expect("workspace");
        assert!(CommandTask::from_config(&cfg, &ws.paths(), Duration::from_secs(1), 10).is_err());
    }
}
