//! # Error Taxonomy
//!
//! The harness distinguishes three kinds of failure:
//!
//! - **Configuration errors** (`ConfigError`): invalid counts or a mismatched
//!   argument list. These are fatal and are always raised before the first
//!   worker thread is spawned, so a run never starts partially.
//! - **Harness errors** (`HarnessError`): configuration errors plus the rare case
//!   where the operating system refuses to create a worker thread.
//! - **Invocation errors** (`InvocationError`): a single call of the target
//!   operation failed. These are never returned to the caller of the harness;
//!   they travel as data inside an `InvocationSample` and surface only through
//!   the failure counts of the statistics aggregator.
//!
//! Hook failures have no type of their own. They are logged and dropped at the
//! hook boundary.

use std::time::Duration;
use thiserror::Error;

/// Invalid run configuration, detected before any worker starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("loop count must be at least 1")]
    ZeroLoops,

    #[error("round count must be at least 1")]
    ZeroRounds,

    /// Per-worker arguments must number 0, 1 or exactly the worker count.
    #[error(
        "{supplied} worker arguments supplied for {workers} workers (expected 0, 1 or {workers})"
    )]
    ArgumentCount { supplied: usize, workers: usize },

    /// A one-argument target was configured without any worker arguments.
    #[error("operation '{operation}' takes an argument but no worker arguments were supplied")]
    MissingArgument { operation: String },

    #[error("workload contains no operations")]
    EmptyWorkload,

    #[error("invocation timeout must be greater than zero")]
    ZeroTimeout,
}

/// Errors that prevent a round from running at all.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Why a single invocation of the target operation did not succeed.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The operation returned an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// The operation panicked. The payload message is kept when it is a string.
    #[error("operation panicked: {0}")]
    Panicked(String),

    /// The operation did not return within the configured invocation timeout.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

impl InvocationError {
    /// Short, stable label used when grouping failures in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::Failed(_) => "error",
            InvocationError::Panicked(_) => "panic",
            InvocationError::TimedOut(_) => "timeout",
        }
    }
}
