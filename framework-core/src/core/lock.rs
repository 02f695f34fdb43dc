//! Lock record model and the pure staleness predicate.
//!
//! The predicate takes every input explicitly (record, TTL, clock, marker state,
//! liveness oracle) so the same record always yields the same verdict.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::marker::MarkerStatus;
use crate::core::timestamp::{format_utc, parse_utc};

pub const DEFAULT_AGENT: &str = "unknown";

/// Current holder of the workspace lock.
///
/// `pid` and `timestamp` are optional because records are read from a file other
/// processes (or humans) may have written; records written by this crate always
/// carry both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub agent: String,
    pub pid: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl LockRecord {
    pub fn new(agent: &str, pid: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            agent: normalize_agent(agent),
            pid: Some(pid),
            timestamp: Some(timestamp),
        }
    }

    /// Interpret a parsed lock file. Returns `None` when it is not a JSON object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let agent = match obj.get("agent") {
            Some(Value::String(raw)) => normalize_agent(raw),
            Some(Value::Null) | None => DEFAULT_AGENT.to_string(),
            Some(other) => normalize_agent(&other.to_string()),
        };
        let pid = obj.get("pid").and_then(parse_pid);
        let timestamp = obj
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_utc);
        Some(Self {
            agent,
            pid,
            timestamp,
        })
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "agent": self.agent,
            "pid": self.pid,
            "timestamp": self.timestamp.map(format_utc),
        })
    }

    /// True when this record belongs to exactly `(agent, pid)`.
    pub fn is_owned_by(&self, agent: &str, pid: i64) -> bool {
        self.agent == normalize_agent(agent) && self.pid == Some(pid)
    }
}

/// Trim and lowercase an agent identity; blank becomes `"unknown"`.
pub fn normalize_agent(raw: &str) -> String {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        DEFAULT_AGENT.to_string()
    } else {
        value
    }
}

/// Accept JSON numbers and all-digit strings, like the lock files older tools wrote.
fn parse_pid(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
}

/// Result of probing whether a process exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The probe could not decide (e.g. permission denied).
    Unknown,
}

/// How an [`Liveness::Unknown`] probe counts toward staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPidPolicy {
    /// Treat as not alive: the lock may be taken over.
    #[default]
    Dead,
    /// Treat as alive: the lock keeps blocking until the TTL expires.
    Alive,
}

/// Why a lock record was considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// File content was not a JSON object.
    Corrupt,
    MissingTimestamp,
    Expired { age_secs: u64 },
    MissingPid,
    ProcessDead,
    ProcessUnknown,
    /// The session marker says the previous owner finished normally.
    SessionClean,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt => write!(f, "corrupt"),
            Self::MissingTimestamp => write!(f, "missing_timestamp"),
            Self::Expired { age_secs } => write!(f, "expired ({age_secs}s)"),
            Self::MissingPid => write!(f, "missing_pid"),
            Self::ProcessDead => write!(f, "process_dead"),
            Self::ProcessUnknown => write!(f, "process_unknown"),
            Self::SessionClean => write!(f, "session_clean"),
        }
    }
}

/// Inputs to [`stale_reason`] besides the record and the liveness oracle.
#[derive(Debug, Clone, Copy)]
pub struct StalenessContext {
    pub now: DateTime<Utc>,
    pub ttl: Duration,
    pub marker: Option<MarkerStatus>,
    pub unknown_pid: UnknownPidPolicy,
}

/// Return the first reason `record` is stale, or `None` if it still blocks.
///
/// Checks run cheapest first; the liveness oracle is only consulted when the
/// record is young enough and carries a pid.
pub fn stale_reason(
    record: &LockRecord,
    ctx: &StalenessContext,
    probe: impl Fn(i64) -> Liveness,
) -> Option<StaleReason> {
    let Some(timestamp) = record.timestamp else {
        return Some(StaleReason::MissingTimestamp);
    };
    // A timestamp in the future (clock skew) has no age yet.
    if let Ok(age) = (ctx.now - timestamp).to_std()
        && age > ctx.ttl
    {
        return Some(StaleReason::Expired {
            age_secs: age.as_secs(),
        });
    }
    let Some(pid) = record.pid else {
        return Some(StaleReason::MissingPid);
    };
    match probe(pid) {
        Liveness::Alive => {}
        Liveness::Dead => return Some(StaleReason::ProcessDead),
        Liveness::Unknown => {
            if ctx.unknown_pid == UnknownPidPolicy::Dead {
                return Some(StaleReason::ProcessUnknown);
            }
        }
    }
    if ctx.marker == Some(MarkerStatus::Clean) {
        return Some(StaleReason::SessionClean);
    }
    None
}

/// Outcome of `acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// No lock existed; a new one was written for the caller.
    Acquired,
    /// The caller already owned a fresh lock.
    Reused,
    /// A stale or corrupt lock was replaced by one for the caller.
    RecoveredStale { reason: StaleReason },
    /// Another owner holds a fresh lock.
    Held {
        agent: String,
        pid: Option<i64>,
        timestamp: Option<DateTime<Utc>>,
    },
}

impl LockOutcome {
    /// True when the caller owns the lock after this outcome.
    pub fn holds_lock(&self) -> bool {
        !matches!(self, Self::Held { .. })
    }

    /// Report token, e.g. `LOCK:held:build-bot:4821:2026-01-01T00:00:00Z`.
    pub fn token(&self) -> String {
        match self {
            Self::Acquired => "LOCK:acquired".to_string(),
            Self::Reused => "LOCK:reused".to_string(),
            Self::RecoveredStale { .. } => "LOCK:recovered_stale".to_string(),
            Self::Held {
                agent,
                pid,
                timestamp,
            } => format!(
                "LOCK:held:{agent}:{}:{}",
                display_pid(*pid),
                display_timestamp(*timestamp)
            ),
        }
    }
}

/// Outcome of `release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// There was no lock.
    None,
    /// The lock file was unreadable or corrupt and has been removed.
    ReleasedInvalid,
    /// Another agent holds a fresh lock; it was left in place.
    Preserved { agent: String },
    Released,
}

impl ReleaseOutcome {
    pub fn token(&self) -> String {
        match self {
            Self::None => "LOCK:none".to_string(),
            Self::ReleasedInvalid => "LOCK:released_invalid".to_string(),
            Self::Preserved { agent } => format!("LOCK:preserved:{agent}"),
            Self::Released => "LOCK:released".to_string(),
        }
    }
}

pub fn display_pid(pid: Option<i64>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
}

pub fn display_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp.map_or_else(|| "unknown".to_string(), format_utc)
}
