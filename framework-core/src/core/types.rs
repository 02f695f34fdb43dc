//! Shared deterministic types for the session core.
//!
//! These types define stable contracts between the lock, crash detection,
//! task runner and aggregation phases. They must not depend on I/O.

use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

/// Status of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
    NeedsInput,
}

/// Overall status of a command run. Shares the wire names of [`TaskStatus`].
pub type OverallStatus = TaskStatus;

/// Task names of the session phases, as they appear in reports.
pub mod task_names {
    pub const SESSION_LOCK: &str = "session_lock";
    pub const SESSION_LOCK_RELEASE: &str = "session_lock_release";
    pub const CRASH_DETECTION: &str = "crash_detection";
    pub const MARK_ACTIVE: &str = "mark_active";
    pub const MARK_CLEAN: &str = "mark_clean";
    pub const CONTEXT_FILES: &str = "context_files";
}

/// Immutable outcome record produced by every operation.
///
/// `error` is present iff `status == Error`. Construct through
/// [`TaskResult::success`], [`TaskResult::needs_input`] or [`TaskResult::error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    name: String,
    status: TaskStatus,
    result: String,
    #[serde(
        rename = "duration_ms",
        serialize_with = "serialize_millis",
        skip_serializing_if = "Duration::is_zero"
    )]
    duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TaskResult {
    pub fn success(name: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Success,
            result: result.into(),
            duration: Duration::ZERO,
            error: None,
        }
    }

    pub fn needs_input(name: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::NeedsInput,
            result: result.into(),
            duration: Duration::ZERO,
            error: None,
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Error,
            result: String::new(),
            duration: Duration::ZERO,
            error: Some(message.into()),
        }
    }

    /// Stamp the measured duration. Consumes the builder value before it is shared.
    pub fn with_duration(self, duration: Duration) -> Self {
        Self { duration, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.status == TaskStatus::Error
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    serializer.serialize_u64(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_result_carries_message_and_empty_token() {
        let result = TaskResult::error("git_status", "boom");
        assert!(result.is_error());
        assert_eq!(result.error_message(), Some("boom"));
        assert_eq!(result.result(), "");
    }

    #[test]
    fn success_result_has_no_error() {
        let result = TaskResult::success("session_lock", "LOCK:acquired");
        assert_eq!(result.status(), TaskStatus::Success);
        assert_eq!(result.error_message(), None);
    }

    #[test]
    fn serializes_duration_as_millis_and_skips_absent_fields() {
        let fast = TaskResult::success("mark_active", "SESSION:active");
        let json = serde_json::to_value(&fast).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "name": "mark_active",
                "status": "success",
                "result": "SESSION:active",
            })
        );

        let slow = TaskResult::needs_input("crash_detection", "CRASH:needs_input:3")
            .with_duration(Duration::from_millis(42));
        let json = serde_json::to_value(&slow).expect("serialize");
        assert_eq!(json["status"], "needs_input");
        assert_eq!(json["duration_ms"], 42);
        assert!(json.get("error").is_none());
    }
}
