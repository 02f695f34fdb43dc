//! Session marker record: whether the workspace was last left consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last recorded session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerStatus {
    /// A session started work and has not confirmed completion.
    Active,
    /// The last session finished normally (or was verified to have nothing pending).
    Clean,
}

impl MarkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Clean => "clean",
        }
    }
}

/// Persisted singleton (`.claude/.last_session`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub status: MarkerStatus,
    #[serde(with = "crate::core::timestamp::serde_utc")]
    pub timestamp: DateTime<Utc>,
}

impl SessionMarker {
    pub fn new(status: MarkerStatus, timestamp: DateTime<Utc>) -> Self {
        Self { status, timestamp }
    }
}
