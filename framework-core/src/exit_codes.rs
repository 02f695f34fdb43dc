//! Stable exit codes for the session commands.

/// Every phase succeeded.
pub const OK: i32 = 0;
/// A phase failed, or the tool could not start.
pub const ERROR: i32 = 1;
/// An operator decision is required (lock contention or a crashed session).
pub const NEEDS_INPUT: i32 = 2;
