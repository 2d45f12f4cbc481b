//! # Invocation Runner
//!
//! Executes exactly one call of a target and turns whatever happens into an
//! immutable `InvocationSample`. Errors and panics raised by the target become
//! `Outcome::Failure` data; nothing escapes this layer, so one failing call
//! never aborts the surrounding loop.
//!
//! ## Timing
//!
//! Elapsed time is always computed from a pair of monotonic `Instant`s taken
//! immediately around the call. The wall-clock `DateTime<Utc>` pair is recorded
//! outside that window and is for display only: clock adjustments must never
//! leak into latency math.
//!
//! ## Timeouts
//!
//! With a timeout configured, the call runs on its own thread and the runner
//! waits on a channel. If the deadline passes the sample is recorded as
//! `InvocationError::TimedOut` and the worker moves on. The stalled call's
//! thread is detached and left to finish (or hang) on its own.

use crate::error::InvocationError;
use crate::operation::{panic_message, InvocationContext, Target};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, RecvTimeoutError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of a single invocation.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failure(InvocationError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&InvocationError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }
}

/// One measured call of a named operation.
#[derive(Debug)]
pub struct InvocationSample<T> {
    operation: Arc<str>,
    worker_index: usize,
    loop_index: usize,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    start: Instant,
    end: Instant,
    outcome: Outcome<T>,
}

impl<T> InvocationSample<T> {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn loop_index(&self) -> usize {
        self.loop_index
    }

    /// Wall-clock time just before the call. Display only.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock time just after the call. Display only.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn start_instant(&self) -> Instant {
        self.start
    }

    pub fn end_instant(&self) -> Instant {
        self.end
    }

    pub fn elapsed(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    /// Elapsed time in fractional milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1_000.0
    }

    pub fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_failure()
    }

    pub fn into_outcome(self) -> Outcome<T> {
        self.outcome
    }
}

/// Runs single invocations, optionally bounded by a timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvocationRunner {
    timeout: Option<Duration>,
}

type CallResult<T> = thread::Result<anyhow::Result<T>>;

impl InvocationRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Invoke `target` once and record the outcome.
    pub fn run<A, T>(
        &self,
        target: &Target<A, T>,
        ctx: &InvocationContext<'_, A>,
    ) -> InvocationSample<T>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        let started_at = Utc::now();
        let (start, end, outcome) = match self.timeout {
            None => {
                let start = Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(|| target.call(ctx)));
                let end = Instant::now();
                (start, end, classify(result))
            }
            Some(timeout) => run_bounded(target, ctx, timeout),
        };
        let finished_at = Utc::now();

        InvocationSample {
            operation: target.shared_name(),
            worker_index: ctx.worker_index,
            loop_index: ctx.loop_index,
            started_at,
            finished_at,
            start,
            end,
            outcome,
        }
    }
}

fn classify<T>(result: CallResult<T>) -> Outcome<T> {
    match result {
        Ok(Ok(value)) => Outcome::Success(value),
        Ok(Err(e)) => Outcome::Failure(InvocationError::Failed(e)),
        Err(payload) => {
            Outcome::Failure(InvocationError::Panicked(panic_message(payload.as_ref())))
        }
    }
}

fn run_bounded<A, T>(
    target: &Target<A, T>,
    ctx: &InvocationContext<'_, A>,
    timeout: Duration,
) -> (Instant, Instant, Outcome<T>)
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    let (tx, rx) = channel::bounded::<(Instant, Instant, CallResult<T>)>(1);
    let target = target.clone();
    let arg = ctx.arg.cloned();
    let cancel = ctx.cancel.clone();
    let worker_index = ctx.worker_index;
    let loop_index = ctx.loop_index;

    let submitted = Instant::now();
    let spawned = thread::Builder::new()
        .name(format!("invocation-w{}-l{}", worker_index, loop_index))
        .spawn(move || {
            let ctx = InvocationContext {
                worker_index,
                loop_index,
                arg: arg.as_ref(),
                cancel: &cancel,
            };
            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| target.call(&ctx)));
            let end = Instant::now();
            // The receiver is gone if the runner already gave up on this call.
            let _ = tx.send((start, end, result));
        });

    if let Err(e) = spawned {
        warn!(
            "Worker {}: could not spawn invocation thread: {}",
            worker_index, e
        );
        let failure =
            InvocationError::Failed(anyhow!(e).context("failed to spawn invocation thread"));
        return (submitted, Instant::now(), Outcome::Failure(failure));
    }

    match rx.recv_timeout(timeout) {
        Ok((start, end, result)) => (start, end, classify(result)),
        Err(RecvTimeoutError::Timeout) => {
            debug!(
                "Worker {}: invocation {} exceeded {:?}, detaching",
                worker_index, loop_index, timeout
            );
            (
                submitted,
                Instant::now(),
                Outcome::Failure(InvocationError::TimedOut(timeout)),
            )
        }
        Err(RecvTimeoutError::Disconnected) => (
            submitted,
            Instant::now(),
            Outcome::Failure(InvocationError::Panicked(
                "invocation thread exited without reporting".to_string(),
            )),
        ),
    }
}
