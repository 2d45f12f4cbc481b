//! # Loop Executor
//!
//! Runs the bounded sequence of loop iterations owned by one worker. Each
//! iteration:
//!
//! 1. runs the `setup_loop` hook
//! 2. records the loop start instant
//! 3. invokes every target of the workload in order, each wrapped by the
//!    `setup_invocation` / `teardown_invocation` hooks
//! 4. records the loop end instant
//! 5. runs the `teardown_loop` hook
//! 6. sleeps the loop delay (between iterations only)
//!
//! Hook failures are logged and never stop the iteration. Invocation failures
//! are data. The only thing that cuts a worker short is cancellation, which is
//! checked before each iteration and between invocations.

use crate::cancel::CancelToken;
use crate::invocation::{InvocationRunner, InvocationSample};
use crate::operation::{run_hook, InvocationContext, Workload};
use chrono::{DateTime, Utc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Upper bound on records reserved up front; larger runs grow on demand.
pub(crate) const MAX_PREALLOCATED_RECORDS: usize = 4096;

/// The samples produced by one loop iteration of one worker.
#[derive(Debug)]
pub struct LoopRecord<T> {
    worker_index: usize,
    loop_index: usize,
    started_at: DateTime<Utc>,
    start: Instant,
    end: Instant,
    samples: Vec<InvocationSample<T>>,
}

impl<T> LoopRecord<T> {
    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn loop_index(&self) -> usize {
        self.loop_index
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn start_instant(&self) -> Instant {
        self.start
    }

    pub fn end_instant(&self) -> Instant {
        self.end
    }

    /// Time from loop start to loop end, including invocation hooks.
    pub fn elapsed(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    pub fn samples(&self) -> &[InvocationSample<T>] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<InvocationSample<T>> {
        self.samples
    }
}

/// Drives the loop iterations of a single worker.
pub struct LoopExecutor<'w, A, T> {
    worker_index: usize,
    workload: &'w Workload<A, T>,
    arg: Option<A>,
    loop_count: usize,
    loop_delay: Duration,
    runner: InvocationRunner,
    cancel: CancelToken,
}

impl<'w, A, T> LoopExecutor<'w, A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new(worker_index: usize, workload: &'w Workload<A, T>, arg: Option<A>) -> Self {
        Self {
            worker_index,
            workload,
            arg,
            loop_count: 1,
            loop_delay: Duration::ZERO,
            runner: InvocationRunner::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn loops(mut self, loop_count: usize, loop_delay: Duration) -> Self {
        self.loop_count = loop_count;
        self.loop_delay = loop_delay;
        self
    }

    pub fn runner(mut self, runner: InvocationRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run all iterations, returning one record per completed iteration in
    /// loop order.
    pub fn run_loop(&self) -> Vec<LoopRecord<T>> {
        let hooks = self.workload.hooks();
        let mut records = Vec::with_capacity(self.loop_count.min(MAX_PREALLOCATED_RECORDS));

        debug!(
            "Worker {} starting {} loops",
            self.worker_index, self.loop_count
        );

        for loop_index in 0..self.loop_count {
            if self.cancel.is_cancelled() {
                debug!(
                    "Worker {} cancelled before loop {}",
                    self.worker_index, loop_index
                );
                break;
            }

            run_hook("setup_loop", hooks.setup_loop.as_ref(), self.worker_index);

            let started_at = Utc::now();
            let start = Instant::now();
            let samples = self.run_invocations(loop_index);
            let end = Instant::now();

            run_hook("teardown_loop", hooks.teardown_loop.as_ref(), self.worker_index);

            trace!(
                "Worker {} loop {} finished with {} samples",
                self.worker_index,
                loop_index,
                samples.len()
            );
            records.push(LoopRecord {
                worker_index: self.worker_index,
                loop_index,
                started_at,
                start,
                end,
                samples,
            });

            let is_last = loop_index + 1 == self.loop_count;
            if !is_last && !self.loop_delay.is_zero() && !self.cancel.is_cancelled() {
                thread::sleep(self.loop_delay);
            }
        }

        debug!(
            "Worker {} finished {} loops",
            self.worker_index,
            records.len()
        );
        records
    }

    fn run_invocations(&self, loop_index: usize) -> Vec<InvocationSample<T>> {
        let hooks = self.workload.hooks();
        let targets = self.workload.targets();
        let mut samples = Vec::with_capacity(targets.len());

        let ctx = InvocationContext {
            worker_index: self.worker_index,
            loop_index,
            arg: self.arg.as_ref(),
            cancel: &self.cancel,
        };

        for (i, target) in targets.iter().enumerate() {
            if i > 0 && self.cancel.is_cancelled() {
                break;
            }
            run_hook(
                "setup_invocation",
                hooks.setup_invocation.as_ref(),
                self.worker_index,
            );
            samples.push(self.runner.run(target, &ctx));
            run_hook(
                "teardown_invocation",
                hooks.teardown_invocation.as_ref(),
                self.worker_index,
            );
        }

        samples
    }
}
