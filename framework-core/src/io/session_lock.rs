//! Cross-process workspace lock backed by `.claude/.session-owner`.
//!
//! # Acquire protocol
//!
//! 1. Create-exclusive: the record is written to a private temp file and
//!    hard-linked into place. Linking fails if the lock exists, so readers never
//!    observe a half-written record.
//! 2. If a lock exists it is read and classified with the pure staleness
//!    predicate. Fresh locks are reported as `reused` (same owner) or `held`.
//! 3. Stale or corrupt locks are taken over with temp-file + rename, then read
//!    back. If the read-back shows another owner, that owner won the takeover and
//!    the loop re-evaluates.
//!
//! Residual race: the takeover is check-then-write. If process B reads the stale
//! record, then A renames and reads back its own record, then B renames, both A
//! and B believe they own the lock. The window is the gap between B's staleness
//! read and B's rename (microseconds on a local filesystem).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::lock::{
    LockOutcome, LockRecord, ReleaseOutcome, StaleReason, StalenessContext, UnknownPidPolicy,
    normalize_agent, stale_reason,
};
use crate::io::atomic::{temp_sibling, write_atomic};
use crate::io::liveness::{ProcessProbe, SignalProbe};
use crate::io::marker::MarkerStore;

const MAX_ACQUIRE_ATTEMPTS: usize = 4;

/// What the lock file currently contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredLock {
    Missing,
    /// Present but not a JSON object.
    Corrupt,
    Record(LockRecord),
}

/// Workspace session lock.
#[derive(Debug, Clone)]
pub struct SessionLock<P: ProcessProbe = SignalProbe> {
    path: PathBuf,
    markers: MarkerStore,
    probe: P,
    unknown_pid: UnknownPidPolicy,
}

impl SessionLock<SignalProbe> {
    pub fn new(path: impl Into<PathBuf>, markers: MarkerStore) -> Self {
        Self::with_probe(path, markers, SignalProbe)
    }
}

impl<P: ProcessProbe> SessionLock<P> {
    pub fn with_probe(path: impl Into<PathBuf>, markers: MarkerStore, probe: P) -> Self {
        Self {
            path: path.into(),
            markers,
            probe,
            unknown_pid: UnknownPidPolicy::default(),
        }
    }

    pub fn unknown_pid_policy(mut self, policy: UnknownPidPolicy) -> Self {
        self.unknown_pid = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock for `(agent, owner_pid)`.
    #[instrument(skip_all, fields(agent = %agent, owner_pid = owner_pid, ttl_secs = ttl.as_secs()))]
    pub fn acquire(&self, agent: &str, owner_pid: i64, ttl: Duration) -> Result<LockOutcome> {
        let agent = normalize_agent(agent);
        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let record = LockRecord::new(&agent, owner_pid, Utc::now());
            if self.try_create(&record)? {
                info!(agent = %agent, owner_pid, "session lock acquired");
                return Ok(LockOutcome::Acquired);
            }

            let reason = match self.read()? {
                StoredLock::Missing => {
                    debug!(attempt, "lock vanished between create and read, retrying");
                    continue;
                }
                StoredLock::Corrupt => StaleReason::Corrupt,
                StoredLock::Record(existing) => match self.stale_reason(&existing, ttl) {
                    None if existing.is_owned_by(&agent, owner_pid) => {
                        debug!(agent = %agent, owner_pid, "session lock re-entered");
                        return Ok(LockOutcome::Reused);
                    }
                    None => {
                        info!(
                            holder = %existing.agent,
                            holder_pid = ?existing.pid,
                            "session lock held by another owner"
                        );
                        return Ok(LockOutcome::Held {
                            agent: existing.agent,
                            pid: existing.pid,
                            timestamp: existing.timestamp,
                        });
                    }
                    Some(reason) => reason,
                },
            };

            warn!(reason = %reason, "replacing stale session lock");
            self.write_record(&record)?;
            match self.read()? {
                StoredLock::Record(current) if current.is_owned_by(&agent, owner_pid) => {
                    return Ok(LockOutcome::RecoveredStale { reason });
                }
                _ => {
                    debug!(attempt, "lost stale-lock takeover race, re-evaluating");
                }
            }
        }
        Err(anyhow!(
            "session lock {} kept changing after {MAX_ACQUIRE_ATTEMPTS} attempts",
            self.path.display()
        ))
    }

    /// Release the lock on behalf of `agent`, unless another agent's fresh lock
    /// is in place.
    #[instrument(skip_all, fields(agent = %agent))]
    pub fn release(&self, agent: &str, ttl: Duration) -> Result<ReleaseOutcome> {
        let agent = normalize_agent(agent);
        let stored = match self.read() {
            Ok(stored) => stored,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "unreadable session lock, removing");
                StoredLock::Corrupt
            }
        };
        let outcome = match stored {
            StoredLock::Missing => ReleaseOutcome::None,
            StoredLock::Corrupt => {
                self.remove()?;
                ReleaseOutcome::ReleasedInvalid
            }
            StoredLock::Record(existing) => {
                if existing.agent != agent && self.stale_reason(&existing, ttl).is_none() {
                    ReleaseOutcome::Preserved {
                        agent: existing.agent,
                    }
                } else {
                    self.remove()?;
                    ReleaseOutcome::Released
                }
            }
        };
        info!(outcome = %outcome.token(), "session lock release");
        Ok(outcome)
    }

    /// Read and interpret the lock file.
    pub fn read(&self) -> Result<StoredLock> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoredLock::Missing),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read session lock {}", self.path.display()));
            }
        };
        let record = serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|value| LockRecord::from_json(&value));
        Ok(record.map_or(StoredLock::Corrupt, StoredLock::Record))
    }

    fn stale_reason(&self, record: &LockRecord, ttl: Duration) -> Option<StaleReason> {
        let ctx = StalenessContext {
            now: Utc::now(),
            ttl,
            marker: self.markers.status_lenient(),
            unknown_pid: self.unknown_pid,
        };
        stale_reason(record, &ctx, |pid| self.probe.probe(pid))
    }

    /// Create the lock only if none exists. Returns `false` when one already does.
    fn try_create(&self, record: &LockRecord) -> Result<bool> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("lock path missing parent {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;

        let tmp_path = temp_sibling(&self.path, "new")?;
        fs::write(&tmp_path, render(record)?)
            .with_context(|| format!("write temp lock {}", tmp_path.display()))?;
        let linked = fs::hard_link(&tmp_path, &self.path);
        let cleanup = fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => {
                if let Err(err) = cleanup {
                    warn!(err = %err, path = %tmp_path.display(), "failed to remove temp lock");
                }
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("create session lock {}", self.path.display()))
            }
        }
    }

    fn write_record(&self, record: &LockRecord) -> Result<()> {
        write_atomic(&self.path, &render(record)?)
            .with_context(|| format!("replace session lock {}", self.path.display()))
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("remove session lock {}", self.path.display()))
            }
        }
    }
}

fn render(record: &LockRecord) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(&record.to_json()).context("serialize lock")?;
    buf.push('\n');
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lock::Liveness;
    use crate::core::timestamp::format_utc;
    use crate::test_support::FixedProbe;
    use chrono::TimeDelta;

    const TTL: Duration = Duration::from_secs(1800);

    struct Fixture {
        _temp: tempfile::TempDir,
        lock: SessionLock<FixedProbe>,
        markers: MarkerStore,
    }

    fn fixture(liveness: Liveness) -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let claude = temp.path().join(".claude");
        let markers = MarkerStore::new(claude.join(".last_session"));
        let lock = SessionLock::with_probe(
            claude.join(".session-owner"),
            markers.clone(),
            FixedProbe(liveness),
        );
        Fixture {
            _temp: temp,
            lock,
            markers,
        }
    }

    fn write_raw(lock: &SessionLock<FixedProbe>, value: serde_json::Value) {
        let path = lock.path();
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, value.to_string()).expect("write lock");
    }

    fn write_holder(lock: &SessionLock<FixedProbe>, agent: &str, pid: i64, age_secs: i64) {
        let ts = Utc::now() - TimeDelta::seconds(age_secs);
        write_raw(
            lock,
            serde_json::json!({"agent": agent, "pid": pid, "timestamp": format_utc(ts)}),
        );
    }

    fn holder(lock: &SessionLock<FixedProbe>) -> LockRecord {
        match lock.read().expect("read") {
            StoredLock::Record(record) => record,
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn acquire_creates_record_when_missing() {
        let f = fixture(Liveness::Alive);
        let outcome = f.lock.acquire("Claude", 100, TTL).expect("acquire");
        assert_eq!(outcome, LockOutcome::Acquired);

        let record = holder(&f.lock);
        assert_eq!(record.agent, "claude");
        assert_eq!(record.pid, Some(100));
        assert!(record.timestamp.is_some());
        let leftovers: Vec<_> = fs::read_dir(f.lock.path().parent().expect("parent"))
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec![".session-owner".to_string()]);
    }

    #[test]
    fn same_owner_reenters_fresh_lock() {
        let f = fixture(Liveness::Alive);
        f.lock.acquire("claude", 100, TTL).expect("first");
        let outcome = f.lock.acquire("claude", 100, TTL).expect("second");
        assert_eq!(outcome, LockOutcome::Reused);
    }

    #[test]
    fn different_owner_is_blocked_by_fresh_lock() {
        let f = fixture(Liveness::Alive);
        f.lock.acquire("claude", 100, TTL).expect("first");

        let other_agent = f.lock.acquire("codex", 100, TTL).expect("other agent");
        assert!(matches!(other_agent, LockOutcome::Held { ref agent, pid: Some(100), .. } if agent == "claude"));

        let other_pid = f.lock.acquire("claude", 200, TTL).expect("other pid");
        assert!(matches!(other_pid, LockOutcome::Held { .. }));
        assert_eq!(holder(&f.lock).pid, Some(100));
    }

    #[test]
    fn dead_holder_is_reclaimed_regardless_of_age() {
        let f = fixture(Liveness::Dead);
        write_holder(&f.lock, "build-bot", 4821, 5);

        let outcome = f.lock.acquire("claude", 100, TTL).expect("acquire");
        assert_eq!(
            outcome,
            LockOutcome::RecoveredStale {
                reason: StaleReason::ProcessDead
            }
        );
        assert!(holder(&f.lock).is_owned_by("claude", 100));
    }

    #[test]
    fn expired_lock_is_reclaimed_even_if_holder_alive() {
        let f = fixture(Liveness::Alive);
        write_holder(&f.lock, "build-bot", 4821, 3600);

        let outcome = f.lock.acquire("claude", 100, TTL).expect("acquire");
        assert!(matches!(
            outcome,
            LockOutcome::RecoveredStale {
                reason: StaleReason::Expired { .. }
            }
        ));
    }

    #[test]
    fn clean_marker_releases_vestigial_lock() {
        let f = fixture(Liveness::Alive);
        write_holder(&f.lock, "build-bot", 4821, 5);
        f.markers.mark_clean().expect("clean");

        let outcome = f.lock.acquire("claude", 100, TTL).expect("acquire");
        assert_eq!(
            outcome,
            LockOutcome::RecoveredStale {
                reason: StaleReason::SessionClean
            }
        );
    }

    #[test]
    fn corrupt_lock_is_replaced() {
        let f = fixture(Liveness::Alive);
        fs::create_dir_all(f.lock.path().parent().expect("parent")).expect("mkdir");
        fs::write(f.lock.path(), "not json").expect("write");

        let outcome = f.lock.acquire("claude", 100, TTL).expect("acquire");
        assert_eq!(
            outcome,
            LockOutcome::RecoveredStale {
                reason: StaleReason::Corrupt
            }
        );
    }

    #[test]
    fn unknown_liveness_respects_policy() {
        let f = fixture(Liveness::Unknown);
        write_holder(&f.lock, "build-bot", 4821, 5);
        let strict = f.lock.clone().unknown_pid_policy(UnknownPidPolicy::Alive);
        assert!(matches!(
            strict.acquire("claude", 100, TTL).expect("acquire"),
            LockOutcome::Held { .. }
        ));
        assert!(matches!(
            f.lock.acquire("claude", 100, TTL).expect("acquire"),
            LockOutcome::RecoveredStale {
                reason: StaleReason::ProcessUnknown
            }
        ));
    }

    #[test]
    fn release_without_lock_is_noop() {
        let f = fixture(Liveness::Alive);
        assert_eq!(f.lock.release("claude", TTL).expect("release"), ReleaseOutcome::None);
    }

    #[test]
    fn release_by_other_agent_preserves_fresh_lock() {
        let f = fixture(Liveness::Alive);
        f.lock.acquire("build-bot", 4821, TTL).expect("acquire");

        let outcome = f.lock.release("claude", TTL).expect("release");
        assert_eq!(
            outcome,
            ReleaseOutcome::Preserved {
                agent: "build-bot".to_string()
            }
        );
        assert!(f.lock.path().exists());
        // Idempotent: a second attempt observes the same thing.
        assert_eq!(f.lock.release("claude", TTL).expect("release"), outcome);
    }

    #[test]
    fn release_by_owner_or_of_stale_lock_deletes() {
        let f = fixture(Liveness::Alive);
        f.lock.acquire("claude", 100, TTL).expect("acquire");
        assert_eq!(
            f.lock.release("CLAUDE", TTL).expect("release"),
            ReleaseOutcome::Released
        );
        assert!(!f.lock.path().exists());

        let dead = fixture(Liveness::Dead);
        write_holder(&dead.lock, "build-bot", 4821, 5);
        assert_eq!(
            dead.lock.release("claude", TTL).expect("release"),
            ReleaseOutcome::Released
        );
    }

    #[test]
    fn release_removes_corrupt_lock() {
        let f = fixture(Liveness::Alive);
        write_raw(&f.lock, serde_json::json!("just a string"));
        assert_eq!(
            f.lock.release("claude", TTL).expect("release"),
            ReleaseOutcome::ReleasedInvalid
        );
        assert!(!f.lock.path().exists());
    }

    #[test]
    fn concurrent_acquires_in_one_process_elect_one_owner() {
        for _ in 0..20 {
            let f = fixture(Liveness::Alive);
            let outcomes: Vec<LockOutcome> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|i| {
                        let lock = &f.lock;
                        scope.spawn(move || lock.acquire(&format!("agent-{i}"), 1000 + i, TTL))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("join").expect("acquire"))
                    .collect()
            });

            let acquired = outcomes
                .iter()
                .filter(|o| **o == LockOutcome::Acquired)
                .count();
            assert_eq!(acquired, 1, "{outcomes:?}");
            assert!(
                outcomes
                    .iter()
                    .all(|o| matches!(o, LockOutcome::Acquired | LockOutcome::Held { .. }))
            );
            let leftovers = fs::read_dir(f.lock.path().parent().expect("parent"))
                .expect("read dir")
                .count();
            assert_eq!(leftovers, 1);
        }
    }
}
