//! The task contract: a named, zero-argument operation that reports a
//! [`TaskResult`] within bounded time.
//!
//! Tasks never return `Err`; failures are folded into an `error` result so one
//! broken operation cannot abort the rest of a batch.

pub mod external;
pub mod git;

use std::time::Instant;

use anyhow::Result;

use crate::core::types::TaskResult;

pub use external::CommandTask;
pub use git::{GitDiffTask, GitStatusTask};

pub trait Task: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self) -> TaskResult;
}

/// Run `op` and stamp its outcome with the elapsed time.
///
/// `Ok(token)` becomes a success carrying the token; `Err` becomes an error
/// carrying the full context chain.
pub fn timed(name: &str, op: impl FnOnce() -> Result<String>) -> TaskResult {
    let started = Instant::now();
    let result = match op() {
        Ok(token) => TaskResult::success(name, token),
        Err(err) => TaskResult::error(name, format!("{err:#}")),
    };
    result.with_duration(started.elapsed())
}

/// A task backed by a closure.
pub struct FnTask<F> {
    name: String,
    op: F,
}

impl<F> FnTask<F>
where
    F: Fn() -> Result<String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, op: F) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn() -> Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> TaskResult {
        timed(&self.name, &self.op)
    }
}
