//! Deterministic, pure logic shared by the session commands.
//!
//! Core modules must be free of I/O side effects. Clocks and process probes are
//! passed in so every decision is reproducible in tests.

pub mod aggregate;
pub mod crash;
pub mod lock;
pub mod marker;
pub mod timestamp;
pub mod types;
