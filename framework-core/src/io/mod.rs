//! I/O adapters for the session commands.

pub mod atomic;
pub mod config;
pub mod crash_detector;
pub mod git;
pub mod liveness;
pub mod marker;
pub mod paths;
pub mod process;
pub mod session_lock;
