//! Per-invocation context shared by `cold-start` and `completion`.
//!
//! A [`Session`] owns the workspace paths, effective configuration, caller
//! identity and the two pluggable oracles (process liveness, workspace
//! changes). Each phase method returns both the typed phase outcome for the
//! aggregator and the `TaskResult` that goes into the report.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::aggregate::{CrashPhase, LockPhase, Verdict};
use crate::core::crash::CrashVerdict;
use crate::core::lock::LockOutcome;
use crate::core::types::{TaskResult, task_names};
use crate::io::config::{CoreConfig, ExternalTaskConfig, SessionSettings, load_config};
use crate::io::crash_detector::{CrashDetector, WorkspaceInspector};
use crate::io::git::Git;
use crate::io::liveness::{ProcessProbe, SignalProbe};
use crate::io::marker::MarkerStore;
use crate::io::paths::WorkspacePaths;
use crate::io::session_lock::SessionLock;
use crate::report::CommandReport;
use crate::tasks::{CommandTask, Task, timed};

#[derive(Debug)]
pub struct Session<P: ProcessProbe = SignalProbe, I: WorkspaceInspector = Git> {
    paths: WorkspacePaths,
    config: CoreConfig,
    settings: SessionSettings,
    lock: SessionLock<P>,
    markers: MarkerStore,
    inspector: I,
}

impl Session {
    /// Open a session for the workspace at `root` using the on-disk config,
    /// the process environment, signal probing and git.
    pub fn open(root: &Path) -> Result<Self> {
        let paths = WorkspacePaths::new(root);
        let config = load_config(&paths.config_path).context("load framework-core config")?;
        let settings = SessionSettings::from_env(&config);
        let git = Git::new(&paths.root).with_timeout(config.git_timeout());
        Ok(Self::with_parts(paths, config, settings, SignalProbe, git))
    }
}

impl<P: ProcessProbe, I: WorkspaceInspector> Session<P, I> {
    pub fn with_parts(
        paths: WorkspacePaths,
        config: CoreConfig,
        settings: SessionSettings,
        probe: P,
        inspector: I,
    ) -> Self {
        let markers = MarkerStore::new(&paths.marker_path);
        let lock = SessionLock::with_probe(&paths.lock_path, markers.clone(), probe)
            .unknown_pid_policy(config.unknown_pid);
        Self {
            paths,
            config,
            settings,
            lock,
            markers,
            inspector,
        }
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn git(&self) -> Git {
        Git::new(&self.paths.root).with_timeout(self.config.git_timeout())
    }

    pub fn acquire_lock(&self) -> (LockPhase, TaskResult) {
        let mut outcome = None;
        let result = timed(task_names::SESSION_LOCK, || {
            let acquired = self.lock.acquire(
                &self.settings.agent,
                self.settings.owner_pid,
                self.settings.lock_ttl,
            )?;
            let token = acquired.token();
            outcome = Some(acquired);
            Ok(token)
        });
        match outcome {
            Some(held @ LockOutcome::Held { .. }) => {
                let result = TaskResult::needs_input(task_names::SESSION_LOCK, held.token())
                    .with_duration(result.duration());
                (LockPhase::Outcome(held), result)
            }
            Some(outcome) => (LockPhase::Outcome(outcome), result),
            None => {
                let message = result.error_message().unwrap_or_default().to_string();
                (LockPhase::Failed(message), result)
            }
        }
    }

    pub fn check_crash(&self) -> (CrashPhase, TaskResult) {
        let detector = CrashDetector::new(self.markers.clone(), &self.inspector);
        let mut verdict = None;
        let result = timed(task_names::CRASH_DETECTION, || {
            let checked = detector.check()?;
            let token = checked.token();
            verdict = Some(checked);
            Ok(token)
        });
        match verdict {
            Some(crashed @ CrashVerdict::NeedsInput { .. }) => {
                let result = TaskResult::needs_input(task_names::CRASH_DETECTION, crashed.token())
                    .with_duration(result.duration());
                (CrashPhase::Verdict(crashed), result)
            }
            Some(verdict) => (CrashPhase::Verdict(verdict), result),
            None => {
                let message = result.error_message().unwrap_or_default().to_string();
                (CrashPhase::Failed(message), result)
            }
        }
    }

    pub fn release_lock(&self) -> TaskResult {
        let result = timed(task_names::SESSION_LOCK_RELEASE, || {
            let released = self
                .lock
                .release(&self.settings.agent, self.settings.lock_ttl)?;
            Ok(released.token())
        });
        if result.is_error() {
            warn!(error = result.error_message().unwrap_or_default(), "session lock release failed");
        } else {
            info!(result = result.result(), "session lock released");
        }
        result
    }

    pub fn mark_active(&self) -> TaskResult {
        timed(task_names::MARK_ACTIVE, || {
            self.markers.mark_active()?;
            Ok("SESSION:active".to_string())
        })
    }

    pub fn mark_clean(&self) -> TaskResult {
        timed(task_names::MARK_CLEAN, || {
            self.markers.mark_clean()?;
            Ok("SESSION:clean".to_string())
        })
    }

    /// Context files to load next, as a report entry.
    pub fn context_files(&self) -> TaskResult {
        let token = format!("CONTEXT:{}", self.config.context_files.join(","));
        TaskResult::success(task_names::CONTEXT_FILES, token)
    }

    /// Give the lock back when the verdict requires it, then render the report.
    pub fn finish(
        &self,
        command: &str,
        verdict: Verdict,
        mut tasks: Vec<TaskResult>,
        started: Instant,
    ) -> CommandReport {
        if let Verdict::Error {
            release_lock: true,
            ..
        } = verdict
        {
            tasks.push(self.release_lock());
        }
        let report = CommandReport::from_verdict(command, &verdict, tasks, started.elapsed());
        info!(command, status = ?report.status, "command finished");
        report
    }

    /// Configured collaborators as runnable tasks.
    pub fn external_tasks(&self, entries: &[ExternalTaskConfig]) -> Result<Vec<Box<dyn Task>>> {
        entries
            .iter()
            .map(|entry| {
                CommandTask::from_config(
                    entry,
                    &self.paths,
                    self.config.task_timeout(),
                    self.config.output_limit_bytes,
                )
                .map(|task| Box::new(task) as Box<dyn Task>)
            })
            .collect()
    }
}
