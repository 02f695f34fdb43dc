//! Merge lock, crash and task-batch phases into one overall verdict.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::core::crash::CrashVerdict;
use crate::core::lock::{LockOutcome, display_pid, display_timestamp};
use crate::core::types::{OverallStatus, TaskResult, TaskStatus, task_names};

/// Result of the lock phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockPhase {
    Outcome(LockOutcome),
    /// Infrastructure failure (lock file unreadable/unwritable).
    Failed(String),
}

impl LockPhase {
    pub fn holds_lock(&self) -> bool {
        matches!(self, Self::Outcome(outcome) if outcome.holds_lock())
    }
}

/// Result of the crash-check phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashPhase {
    Verdict(CrashVerdict),
    Failed(String),
}

/// Why a run stopped for an operator decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedsInput {
    SessionLocked {
        agent: String,
        pid: Option<i64>,
        timestamp: Option<DateTime<Utc>>,
    },
    CrashDetected { uncommitted_files: usize },
}

impl NeedsInput {
    /// Report `data` payload. Values are strings so callers can parse them uniformly.
    pub fn data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        match self {
            Self::SessionLocked {
                agent,
                pid,
                timestamp,
            } => {
                data.insert("reason".to_string(), "session_locked".to_string());
                data.insert("locked_by".to_string(), agent.clone());
                data.insert("locked_pid".to_string(), display_pid(*pid));
                data.insert("locked_at".to_string(), display_timestamp(*timestamp));
                data.insert(
                    "message".to_string(),
                    format!("Workspace session is held by agent '{agent}'"),
                );
            }
            Self::CrashDetected { uncommitted_files } => {
                data.insert("reason".to_string(), "crash_detected".to_string());
                data.insert(
                    "uncommitted_files".to_string(),
                    uncommitted_files.to_string(),
                );
                data.insert(
                    "message".to_string(),
                    "Previous session crashed with uncommitted changes".to_string(),
                );
            }
        }
        data
    }
}

/// One failed operation, as listed under `errors` in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: String,
    pub message: String,
}

/// Overall decision for one command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    NeedsInput(NeedsInput),
    /// `release_lock` is set when this run holds the lock and must give it back.
    Error {
        failures: Vec<TaskFailure>,
        release_lock: bool,
    },
    Success,
}

impl Verdict {
    pub fn status(&self) -> OverallStatus {
        match self {
            Self::NeedsInput(_) => TaskStatus::NeedsInput,
            Self::Error { .. } => TaskStatus::Error,
            Self::Success => TaskStatus::Success,
        }
    }

    /// True when the phases so far allow the task batch to run.
    pub fn allows_batch(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Combine the phases. `crash` is `None` for commands without a crash check;
/// `tasks` is empty when the batch has not run.
///
/// Precedence: lock failure, lock contention, crash-check failure, detected crash,
/// task errors. The first matching rule decides.
pub fn aggregate(lock: &LockPhase, crash: Option<&CrashPhase>, tasks: &[TaskResult]) -> Verdict {
    let outcome = match lock {
        LockPhase::Failed(message) => {
            return Verdict::Error {
                failures: vec![TaskFailure {
                    task: task_names::SESSION_LOCK.to_string(),
                    message: message.clone(),
                }],
                release_lock: false,
            };
        }
        LockPhase::Outcome(outcome) => outcome,
    };
    if let LockOutcome::Held {
        agent,
        pid,
        timestamp,
    } = outcome
    {
        return Verdict::NeedsInput(NeedsInput::SessionLocked {
            agent: agent.clone(),
            pid: *pid,
            timestamp: *timestamp,
        });
    }

    match crash {
        Some(CrashPhase::Failed(message)) => {
            return Verdict::Error {
                failures: vec![TaskFailure {
                    task: task_names::CRASH_DETECTION.to_string(),
                    message: message.clone(),
                }],
                release_lock: lock.holds_lock(),
            };
        }
        Some(CrashPhase::Verdict(CrashVerdict::NeedsInput { uncommitted_files })) => {
            return Verdict::NeedsInput(NeedsInput::CrashDetected {
                uncommitted_files: *uncommitted_files,
            });
        }
        Some(CrashPhase::Verdict(_)) | None => {}
    }

    let failures: Vec<TaskFailure> = tasks
        .iter()
        .filter(|task| task.is_error())
        .map(|task| TaskFailure {
            task: task.name().to_string(),
            message: task
                .error_message()
                .unwrap_or("Unknown error")
                .to_string(),
        })
        .collect();
    if !failures.is_empty() {
        return Verdict::Error {
            failures,
            release_lock: lock.holds_lock(),
        };
    }
    Verdict::Success
}
