//! # Parabench
//!
//! A concurrent micro-benchmark harness. A user-supplied operation is run by
//! many workers at once, each worker repeating it for a fixed number of loop
//! iterations, and the whole thing optionally repeated over several rounds.
//! Every invocation is timed and its outcome recorded, so a round yields
//! per-operation counts, failure rates, extremes and descending tail
//! thresholds.
//!
//! ## Architecture Overview
//!
//! - `operation`: the benchmark subject (`Target`, `Workload`) and its hooks
//! - `invocation`: times one call and captures its outcome, panics included
//! - `executor`: one worker's sequence of loop iterations
//! - `coordinator`: launches the workers of one round and joins them
//! - `rounds`: repeats rounds sequentially and hands them to a reporter
//! - `stats`: pure aggregation over finished samples
//! - `results`: text and JSON rendering of rounds
//! - `config`, `cli`, `logging`, `error`, `cancel`, `utils`: supporting pieces
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use parabench::{HarnessConfig, RoundController, Target, Workload};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let workload = Workload::new(Target::new("sleep", || {
//!         std::thread::sleep(Duration::from_micros(200));
//!         Ok(())
//!     }));
//!
//!     let config = HarnessConfig {
//!         worker_count: 4,
//!         loop_count: 1000,
//!         ..Default::default()
//!     };
//!
//!     let outcome = RoundController::new(config)?.run(&workload, &[])?;
//!     if let Some(round) = outcome.final_round() {
//!         let stats = round.statistics();
//!         println!("avg: {:.3}ms", stats.avg_elapsed("sleep"));
//!         println!("failures: {}%", stats.failure_percent("sleep"));
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;

/// Command-line interface for the bundled demo workloads
pub mod cli;

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod invocation;
pub mod logging;

/// Benchmark subjects and lifecycle hooks
pub mod operation;

/// Round rendering and JSON result output
///
/// - Plain-text tables through `tracing`
/// - A consolidated JSON results file with run metadata
/// - Optional streaming of each round as it completes
pub mod results;

pub mod rounds;

/// Statistics over invocation samples
pub mod stats;

pub mod utils;

pub use cancel::CancelToken;
pub use config::HarnessConfig;
pub use coordinator::{RoundResult, WorkerCoordinator};
pub use error::{ConfigError, HarnessError, InvocationError};
pub use executor::{LoopExecutor, LoopRecord};
pub use invocation::{InvocationRunner, InvocationSample, Outcome};
pub use operation::{Hooks, InvocationContext, Target, Workload};
pub use results::{ConsoleReporter, ResultsManager, RoundReport};
pub use rounds::{RoundController, RoundReporter, RunOutcome};
pub use stats::{OperationSummary, Statistics, TAIL_FRACTIONS};

/// The current version of the harness
///
/// Populated from Cargo.toml and written into every results file.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default number of concurrent workers
    ///
    /// A single worker measures the operation without contention; raise it
    /// with `--workers` to look at behaviour under load.
    pub const WORKER_COUNT: usize = 1;

    /// Default loop iterations per worker
    pub const LOOP_COUNT: usize = 100;

    /// Default number of rounds
    pub const ROUND_COUNT: usize = 1;

    /// Default output file name
    pub const OUTPUT_FILE: &str = "parabench_results.json";

    /// Default time one demo invocation takes
    pub const WORK_TIME: &str = "500us";

    /// Default failure probability of the `flaky` demo workload
    pub const FAILURE_RATE: f64 = 0.05;
}
