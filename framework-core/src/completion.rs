//! Orchestration for `framework-core completion`: close out the session.
//!
//! The caller re-enters its own lock (`reused`) or takes a free or stale one.
//! The completion batch summarizes the repository and runs the configured
//! collaborators. Only a fully successful batch marks the session `clean` and
//! releases the lock; on error the lock is released and the marker is left as is.

use std::time::Instant;

use anyhow::Result;
use tracing::instrument;

use crate::core::aggregate::{Verdict, aggregate};
use crate::core::types::TaskResult;
use crate::io::crash_detector::WorkspaceInspector;
use crate::io::liveness::ProcessProbe;
use crate::report::CommandReport;
use crate::session::Session;
use crate::task_runner::run_tasks;
use crate::tasks::{GitDiffTask, GitStatusTask, Task};

pub const COMMAND: &str = "completion";

#[instrument(skip_all, fields(agent = %session.settings().agent))]
pub fn completion<P: ProcessProbe, I: WorkspaceInspector>(
    session: &Session<P, I>,
) -> Result<CommandReport> {
    let started = Instant::now();
    let mut batch: Vec<Box<dyn Task>> = vec![
        Box::new(GitStatusTask::new(session.git())),
        Box::new(GitDiffTask::new(session.git())),
    ];
    batch.extend(session.external_tasks(&session.config().completion)?);

    let mut tasks = Vec::new();
    let (lock, lock_result) = session.acquire_lock();
    tasks.push(lock_result);
    let verdict = aggregate(&lock, None, &[]);
    if !verdict.allows_batch() {
        return Ok(session.finish(COMMAND, verdict, tasks, started));
    }

    let mut results = run_tasks(batch, session.config().max_workers);
    if !has_errors(&results) {
        results.push(session.mark_clean());
    }
    let released = !has_errors(&results);
    if released {
        results.push(session.release_lock());
    }
    let verdict = aggregate(&lock, None, &results);
    tasks.extend(results);

    // The lock was already given back on the success path.
    let verdict = match verdict {
        Verdict::Error { failures, .. } if released => Verdict::Error {
            failures,
            release_lock: false,
        },
        other => other,
    };
    Ok(session.finish(COMMAND, verdict, tasks, started))
}

fn has_errors(results: &[TaskResult]) -> bool {
    results.iter().any(TaskResult::is_error)
}
