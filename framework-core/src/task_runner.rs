//! Bounded worker pool for a task batch.
//!
//! A fixed number of scoped threads pull tasks from a shared index and send
//! each outcome back over a channel, so results arrive in completion order.
//! A panicking task is reported as an `error` result under its own name; the
//! other tasks keep running. Tasks bound their own run time.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::core::types::{TaskResult, TaskStatus};
use crate::tasks::Task;

/// Run every task with at most `max_concurrency` in flight.
///
/// Always returns exactly one result per task.
#[instrument(skip_all, fields(tasks = tasks.len(), max_concurrency))]
pub fn run_tasks(tasks: Vec<Box<dyn Task>>, max_concurrency: usize) -> Vec<TaskResult> {
    if tasks.is_empty() {
        return Vec::new();
    }
    let workers = max_concurrency.clamp(1, tasks.len());
    debug!(workers, "starting task batch");

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, TaskResult)>();
    let mut received: Vec<(usize, TaskResult)> = thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let tasks = &tasks;
            let next = &next;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(task) = tasks.get(index) else {
                        break;
                    };
                    let result = run_guarded(task.as_ref());
                    log_completion(&result);
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);
        rx.iter().collect()
    });

    // A worker that died outside a task would leave holes; report them.
    if received.len() < tasks.len() {
        let mut seen = vec![false; tasks.len()];
        for (index, _) in &received {
            seen[*index] = true;
        }
        for (index, task) in tasks.iter().enumerate() {
            if !seen[index] {
                warn!(task = task.name(), "task produced no result");
                received.push((
                    index,
                    TaskResult::error(task.name(), "task did not report a result"),
                ));
            }
        }
    }

    received.into_iter().map(|(_, result)| result).collect()
}

fn run_guarded(task: &dyn Task) -> TaskResult {
    let started = Instant::now();
    catch_unwind(AssertUnwindSafe(|| task.run())).unwrap_or_else(|payload| {
        let message = format!("task panicked: {}", panic_message(payload.as_ref()));
        TaskResult::error(task.name(), message).with_duration(started.elapsed())
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn log_completion(result: &TaskResult) {
    let duration_ms = u64::try_from(result.duration().as_millis()).unwrap_or(u64::MAX);
    match result.status() {
        TaskStatus::Error => warn!(
            task = result.name(),
            status = "error",
            duration_ms,
            error = result.error_message().unwrap_or_default(),
            "task finished"
        ),
        TaskStatus::Success | TaskStatus::NeedsInput => info!(
            task = result.name(),
            status = ?result.status(),
            result = result.result(),
            duration_ms,
            "task finished"
        ),
    }
}
