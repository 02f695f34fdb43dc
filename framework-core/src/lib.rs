//! Session coordination for repeated, short-lived CLI invocations sharing one
//! workspace.
//!
//! - **[`core`]**: Pure, deterministic logic (lock staleness, crash
//!   classification, aggregation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (lock and marker files, process
//!   probing, git, child processes, configuration).
//! - **[`tasks`]** and **[`task_runner`]**: the task contract and the bounded
//!   worker pool that runs a batch.
//!
//! Orchestration modules ([`cold_start`], [`completion`]) drive a [`session::Session`]
//! through its phases and render one [`report::CommandReport`] per invocation.

pub mod cold_start;
pub mod completion;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod session;
pub mod task_runner;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
