//! # Worker Coordinator
//!
//! Runs one round: launches a fixed number of worker threads, each driving its
//! own `LoopExecutor`, and waits for all of them to finish.
//!
//! ## Launch
//!
//! Workers are submitted one after another with `worker_start_delay` between
//! submissions. Each worker gets a dedicated OS thread, so the pool is exactly
//! `worker_count` wide with no queuing. In dry-run mode a single worker is
//! launched.
//!
//! ## Collection
//!
//! Every worker buffers its own loop records and appends them to the round's
//! shared, mutex-guarded collection when it finishes. Within a worker the
//! records stay in loop order; across workers they interleave arbitrarily.
//! Nothing reads the collection until every worker has been joined.
//!
//! ## Completion
//!
//! Completion is detected by joining the scoped worker threads; there is no
//! polling. The round's wall-clock span runs from the first submission to the
//! last join.

use crate::cancel::CancelToken;
use crate::config::{resolve_worker_args, HarnessConfig};
use crate::error::HarnessError;
use crate::executor::{LoopExecutor, LoopRecord, MAX_PREALLOCATED_RECORDS};
use crate::invocation::{InvocationRunner, InvocationSample};
use crate::operation::Workload;
use crate::stats::Statistics;
use crate::utils;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Everything produced by one round, frozen once all workers have joined.
#[derive(Debug)]
pub struct RoundResult<T> {
    round_index: usize,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    elapsed: Duration,
    worker_count: usize,
    loop_records: Vec<LoopRecord<T>>,
    cancelled: bool,
    lost_workers: usize,
}

impl<T> RoundResult<T> {
    /// Zero-based position of this round in the run.
    pub fn round_index(&self) -> usize {
        self.round_index
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Monotonic time from first submission to last completion.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of workers launched.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn loop_records(&self) -> &[LoopRecord<T>] {
        &self.loop_records
    }

    /// Whether cancellation cut this round short.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Workers whose thread terminated abnormally. Their records are lost.
    pub fn lost_workers(&self) -> usize {
        self.lost_workers
    }

    pub fn samples(&self) -> impl Iterator<Item = &InvocationSample<T>> + '_ {
        self.loop_records.iter().flat_map(|r| r.samples())
    }

    pub fn sample_count(&self) -> usize {
        self.loop_records.iter().map(|r| r.samples().len()).sum()
    }

    pub fn statistics(&self) -> Statistics<'_, T> {
        Statistics::new(self)
    }
}

/// Launches and joins the workers of a round.
#[derive(Debug, Clone)]
pub struct WorkerCoordinator {
    config: HarnessConfig,
    cancel: CancelToken,
}

impl WorkerCoordinator {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Validate the configuration against `workload` and `args` without
    /// running anything.
    pub fn check<A: Clone, T>(
        &self,
        workload: &Workload<A, T>,
        args: &[A],
    ) -> Result<(), HarnessError> {
        self.config.validate()?;
        resolve_worker_args(args, self.config.worker_count)?;
        workload.validate(!args.is_empty())?;
        Ok(())
    }

    /// Run a single round.
    ///
    /// Configuration problems are reported before any worker is launched.
    pub fn run_round<A, T>(
        &self,
        round_index: usize,
        workload: &Workload<A, T>,
        args: &[A],
    ) -> Result<RoundResult<T>, HarnessError>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.check(workload, args)?;
        let worker_args = resolve_worker_args(args, self.config.worker_count)?;

        let workers = self.config.effective_workers();
        let loops = self.config.effective_loops();
        let start_delay = self.config.worker_start_delay;
        let loop_delay = self.config.loop_delay;
        let runner = InvocationRunner::new(self.config.invocation_timeout);
        let cores = if self.config.pin_workers {
            utils::available_cores()
        } else {
            Vec::new()
        };

        info!(
            "Round {}: launching {} workers x {} loops",
            round_index + 1,
            workers,
            loops
        );

        let collected: Mutex<Vec<LoopRecord<T>>> =
            Mutex::new(Vec::with_capacity(
                workers.saturating_mul(loops).min(MAX_PREALLOCATED_RECORDS),
            ));
        let mut lost_workers = 0;

        let started_at = Utc::now();
        let start = Instant::now();

        let launch: Result<(), std::io::Error> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            let mut spawn_error = None;

            for (worker_index, arg) in worker_args.into_iter().take(workers).enumerate() {
                if self.cancel.is_cancelled() {
                    debug!("Round {}: cancelled during launch", round_index + 1);
                    break;
                }
                if worker_index > 0 && !start_delay.is_zero() {
                    thread::sleep(start_delay);
                }

                let collected = &collected;
                let cancel = self.cancel.clone();
                let core = if cores.is_empty() {
                    None
                } else {
                    Some(cores[worker_index % cores.len()])
                };

                let spawned = thread::Builder::new()
                    .name(format!("bench-worker-{}", worker_index))
                    .spawn_scoped(scope, move || {
                        if let Some(core) = core {
                            utils::pin_current_thread(core, worker_index);
                        }
                        let records = LoopExecutor::new(worker_index, workload, arg)
                            .loops(loops, loop_delay)
                            .runner(runner)
                            .cancel_token(cancel)
                            .run_loop();
                        collected.lock().extend(records);
                    });

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        error!("Failed to spawn worker {}: {}", worker_index, e);
                        spawn_error = Some(e);
                        break;
                    }
                }
            }

            for handle in handles {
                if handle.join().is_err() {
                    lost_workers += 1;
                    error!("Round {}: a worker thread panicked", round_index + 1);
                }
            }

            match spawn_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        });

        let elapsed = start.elapsed();
        let finished_at = Utc::now();
        launch?;

        let result = RoundResult {
            round_index,
            started_at,
            finished_at,
            elapsed,
            worker_count: workers,
            loop_records: collected.into_inner(),
            cancelled: self.cancel.is_cancelled(),
            lost_workers,
        };

        info!(
            "Round {}: {} samples in {}",
            round_index + 1,
            result.sample_count(),
            utils::format_duration(elapsed)
        );
        Ok(result)
    }
}
