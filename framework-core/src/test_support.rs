//! Test-only helpers: throwaway workspaces and deterministic oracles.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::core::crash::WorkspaceChanges;
use crate::core::lock::{Liveness, LockRecord, normalize_agent};
use crate::io::atomic::write_json_atomic;
use crate::io::config::{CoreConfig, SessionSettings};
use crate::io::crash_detector::WorkspaceInspector;
use crate::io::liveness::ProcessProbe;
use crate::io::paths::WorkspacePaths;
use crate::session::Session;

/// Liveness probe that answers the same for every pid.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub Liveness);

impl ProcessProbe for FixedProbe {
    fn probe(&self, _pid: i64) -> Liveness {
        self.0
    }
}

/// Workspace inspector with a canned answer.
#[derive(Debug, Clone)]
pub struct FixedInspector(Result<WorkspaceChanges, String>);

impl FixedInspector {
    pub fn new(changes: WorkspaceChanges) -> Self {
        Self(Ok(changes))
    }

    pub fn failing(message: &str) -> Self {
        Self(Err(message.to_string()))
    }
}

impl WorkspaceInspector for FixedInspector {
    fn changes(&self) -> Result<WorkspaceChanges> {
        self.0.clone().map_err(|message| anyhow!(message))
    }
}

/// A temporary workspace root, optionally a git repository.
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Empty directory, not under version control.
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp workspace")?;
        Ok(Self { dir })
    }

    /// Git repository with `files` committed.
    pub fn with_git(files: &[&str]) -> Result<Self> {
        let ws = Self::new()?;
        ws.git(&["init", "-q"])?;
        ws.git(&["config", "user.email", "tests@example.com"])?;
        ws.git(&["config", "user.name", "Tests"])?;
        ws.git(&["config", "commit.gpgsign", "false"])?;
        for file in files {
            ws.write(file, "original\n")?;
        }
        ws.git(&["add", "-A"])?;
        ws.git(&["commit", "-q", "--allow-empty", "-m", "initial"])?;
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> WorkspacePaths {
        WorkspacePaths::new(self.root())
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Append a line to each of `files`.
    pub fn modify(&self, files: &[&str]) -> Result<()> {
        for file in files {
            let path = self.root().join(file);
            let mut contents =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            contents.push_str("changed\n");
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }

    /// Run git in the workspace and return stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Write a lock record as another process would have.
    pub fn write_lock(&self, agent: &str, pid: i64, timestamp: DateTime<Utc>) -> Result<()> {
        let record = LockRecord::new(agent, pid, timestamp);
        write_json_atomic(&self.paths().lock_path, &record.to_json())
    }

    /// Session with default config and a fixed identity (this process id, 30 minute TTL).
    pub fn session<P: ProcessProbe, I: WorkspaceInspector>(
        &self,
        agent: &str,
        probe: P,
        inspector: I,
    ) -> Session<P, I> {
        self.session_with_config(agent, CoreConfig::default(), probe, inspector)
    }

    pub fn session_with_config<P: ProcessProbe, I: WorkspaceInspector>(
        &self,
        agent: &str,
        config: CoreConfig,
        probe: P,
        inspector: I,
    ) -> Session<P, I> {
        let settings = SessionSettings {
            agent: normalize_agent(agent),
            owner_pid: i64::from(std::process::id()),
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
        };
        Session::with_parts(self.paths(), config, settings, probe, inspector)
    }
}
