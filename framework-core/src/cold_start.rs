//! Orchestration for `framework-core cold-start`.
//!
//! Phases run strictly in order: lock, crash check, task batch, marker. Lock
//! contention and a crashed previous session stop the run before any task
//! starts. A failed run gives the lock back so the next attempt can proceed; a
//! successful run keeps it and leaves the marker `active` until `completion`.

use std::time::Instant;

use anyhow::Result;
use tracing::instrument;

use crate::core::aggregate::aggregate;
use crate::io::crash_detector::WorkspaceInspector;
use crate::io::liveness::ProcessProbe;
use crate::report::CommandReport;
use crate::session::Session;
use crate::task_runner::run_tasks;

pub const COMMAND: &str = "cold-start";

/// Run the cold-start protocol.
///
/// `Err` is only returned before the lock is touched (invalid task configuration).
#[instrument(skip_all, fields(agent = %session.settings().agent))]
pub fn cold_start<P: ProcessProbe, I: WorkspaceInspector>(
    session: &Session<P, I>,
) -> Result<CommandReport> {
    let started = Instant::now();
    let batch = session.external_tasks(&session.config().cold_start)?;

    let mut tasks = Vec::new();
    let (lock, lock_result) = session.acquire_lock();
    tasks.push(lock_result);
    let verdict = aggregate(&lock, None, &[]);
    if !verdict.allows_batch() {
        return Ok(session.finish(COMMAND, verdict, tasks, started));
    }

    let (crash, crash_result) = session.check_crash();
    tasks.push(crash_result);
    let verdict = aggregate(&lock, Some(&crash), &[]);
    if !verdict.allows_batch() {
        return Ok(session.finish(COMMAND, verdict, tasks, started));
    }

    let mut results = run_tasks(batch, session.config().max_workers);
    if !results.iter().any(|r| r.is_error()) {
        results.push(session.mark_active());
    }
    results.push(session.context_files());
    let verdict = aggregate(&lock, Some(&crash), &results);
    tasks.extend(results);
    Ok(session.finish(COMMAND, verdict, tasks, started))
}
