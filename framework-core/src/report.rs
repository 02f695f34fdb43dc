//! The single JSON report each command prints to stdout.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::aggregate::Verdict;
use crate::core::types::{OverallStatus, TaskResult, TaskStatus};
use crate::exit_codes;

/// One entry of the report's `errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub status: OverallStatus,
    pub command: String,
    #[serde(with = "crate::core::timestamp::serde_utc")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ReportError>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_total_ms: Option<u64>,
}

impl CommandReport {
    /// Render an aggregated verdict together with every task result of the run.
    pub fn from_verdict(
        command: &str,
        verdict: &Verdict,
        tasks: Vec<TaskResult>,
        elapsed: Duration,
    ) -> Self {
        let (errors, data) = match verdict {
            Verdict::NeedsInput(reason) => (Vec::new(), reason.data()),
            Verdict::Error { failures, .. } => (
                failures
                    .iter()
                    .map(|f| ReportError {
                        task: Some(f.task.clone()),
                        message: f.message.clone(),
                    })
                    .collect(),
                BTreeMap::new(),
            ),
            Verdict::Success => (Vec::new(), BTreeMap::new()),
        };
        Self {
            status: verdict.status(),
            command: command.to_string(),
            timestamp: Utc::now(),
            tasks,
            errors,
            data,
            duration_total_ms: Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Report for a failure that happened before any phase could run.
    pub fn fatal(command: &str, err: &anyhow::Error) -> Self {
        Self {
            status: TaskStatus::Error,
            command: command.to_string(),
            timestamp: Utc::now(),
            tasks: Vec::new(),
            errors: vec![ReportError {
                task: None,
                message: format!("{err:#}"),
            }],
            data: BTreeMap::new(),
            duration_total_ms: None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            TaskStatus::Success => exit_codes::OK,
            TaskStatus::Error => exit_codes::ERROR,
            TaskStatus::NeedsInput => exit_codes::NEEDS_INPUT,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize command report")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregate::{NeedsInput, TaskFailure};
    use anyhow::anyhow;
    use serde_json::Value;

    fn json(report: &CommandReport) -> Value {
        serde_json::from_str(&report.to_json().expect("json")).expect("parse")
    }

    #[test]
    fn success_report_omits_empty_sections() {
        let report = CommandReport::from_verdict(
            "cold-start",
            &Verdict::Success,
            vec![TaskResult::success("session_lock", "LOCK:acquired")],
            Duration::from_millis(12),
        );
        assert_eq!(report.exit_code(), exit_codes::OK);
        let value = json(&report);
        assert_eq!(value["status"], "success");
        assert_eq!(value["command"], "cold-start");
        assert_eq!(value["tasks"][0]["result"], "LOCK:acquired");
        assert_eq!(value["duration_total_ms"], 12);
        assert!(value.get("errors").is_none());
        assert!(value.get("data").is_none());
        assert!(value["timestamp"].as_str().expect("ts").ends_with('Z'));
    }

    #[test]
    fn needs_input_report_carries_string_data() {
        let verdict = Verdict::NeedsInput(NeedsInput::CrashDetected {
            uncommitted_files: 3,
        });
        let report = CommandReport::from_verdict("cold-start", &verdict, Vec::new(), Duration::ZERO);
        assert_eq!(report.exit_code(), exit_codes::NEEDS_INPUT);
        let value = json(&report);
        assert_eq!(value["status"], "needs_input");
        assert_eq!(value["data"]["reason"], "crash_detected");
        assert_eq!(value["data"]["uncommitted_files"], "3");
    }

    #[test]
    fn error_report_lists_failures() {
        let verdict = Verdict::Error {
            failures: vec![TaskFailure {
                task: "git_hooks".to_string(),
                message: "bash exited with 1".to_string(),
            }],
            release_lock: true,
        };
        let report = CommandReport::from_verdict("completion", &verdict, Vec::new(), Duration::ZERO);
        assert_eq!(report.exit_code(), exit_codes::ERROR);
        let value = json(&report);
        assert_eq!(value["errors"][0]["task"], "git_hooks");
        assert_eq!(value["errors"][0]["message"], "bash exited with 1");
    }

    #[test]
    fn fatal_report_has_untasked_error() {
        let err = anyhow!("permission denied").context("load config");
        let value = json(&CommandReport::fatal("completion", &err));
        assert_eq!(value["status"], "error");
        assert_eq!(value["errors"][0]["message"], "load config: permission denied");
        assert!(value["errors"][0].get("task").is_none());
        assert!(value.get("duration_total_ms").is_none());
    }
}
