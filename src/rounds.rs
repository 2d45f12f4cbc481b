//! # Round Controller
//!
//! Repeats the worker-coordinator run `round_count` times, strictly one round
//! after another so that rounds never overlap in time.
//!
//! ```text
//! Idle -> Running(0) -> Reporting(0) -> Running(1) -> ... -> Running(n-1) -> Done
//! ```
//!
//! Every round except the last is handed to the `RoundReporter` as soon as it
//! finishes and dropped once the next round starts, which keeps memory bounded
//! for long multi-round sessions. The final round is returned to the caller.
//! When cancellation stops the run between rounds, the last completed round is
//! returned instead and flagged as already reported. With `retain_rounds` set,
//! reported rounds are kept in the outcome's history instead of being dropped.
//!
//! Before each round an optional cooldown runs: the pre-round hook (if any)
//! followed by `settle_delay`. Both are advisory.

use crate::cancel::CancelToken;
use crate::config::HarnessConfig;
use crate::coordinator::{RoundResult, WorkerCoordinator};
use crate::error::{ConfigError, HarnessError};
use crate::operation::{panic_message, Hook, Workload};
use crate::results::ConsoleReporter;
use crate::stats::Statistics;
use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Receives each completed non-final round.
///
/// This is the seam for text, JSON or any other rendering. Errors are logged by
/// the controller and never abort the run.
pub trait RoundReporter<T> {
    fn report_round(&mut self, round: &RoundResult<T>) -> Result<()>;
}

impl<T, F> RoundReporter<T> for F
where
    F: FnMut(&RoundResult<T>) -> Result<()>,
{
    fn report_round(&mut self, round: &RoundResult<T>) -> Result<()> {
        self(round)
    }
}

/// What a multi-round run leaves behind.
#[derive(Debug)]
pub struct RunOutcome<T> {
    final_round: Option<RoundResult<T>>,
    final_reported: bool,
    history: Vec<RoundResult<T>>,
    rounds_run: usize,
    cancelled: bool,
}

impl<T> RunOutcome<T> {
    /// The last round that ran. `None` only when cancellation arrived before
    /// the first round.
    pub fn final_round(&self) -> Option<&RoundResult<T>> {
        self.final_round.as_ref()
    }

    /// Whether the final round already went through the reporter. True when
    /// cancellation arrived between rounds.
    pub fn final_round_reported(&self) -> bool {
        self.final_reported
    }

    pub fn into_final_round(self) -> Option<RoundResult<T>> {
        self.final_round
    }

    /// Earlier rounds, kept only when `retain_rounds` is enabled.
    pub fn history(&self) -> &[RoundResult<T>] {
        &self.history
    }

    /// Retained history followed by the final round.
    pub fn all_rounds(&self) -> impl Iterator<Item = &RoundResult<T>> + '_ {
        self.history.iter().chain(self.final_round.iter())
    }

    pub fn rounds_run(&self) -> usize {
        self.rounds_run
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Statistics rolled up across every round still held by this outcome.
    pub fn statistics(&self) -> Statistics<'_, T> {
        Statistics::from_samples(self.all_rounds().flat_map(|r| r.samples()))
    }
}

/// Drives rounds sequentially.
#[derive(Clone)]
pub struct RoundController {
    coordinator: WorkerCoordinator,
    pre_round: Option<Hook>,
}

impl RoundController {
    /// Create a controller, rejecting an invalid configuration up front.
    pub fn new(config: HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            coordinator: WorkerCoordinator::new(config),
            pre_round: None,
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.coordinator = self.coordinator.with_cancel_token(cancel);
        self
    }

    /// Run `f` before every round, ahead of the settle delay.
    pub fn with_pre_round<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.pre_round = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        self.coordinator.config()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.coordinator.cancel_token()
    }

    /// Run every round, rendering intermediate rounds to the log.
    pub fn run<A, T>(
        &self,
        workload: &Workload<A, T>,
        args: &[A],
    ) -> Result<RunOutcome<T>, HarnessError>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        let mut reporter = ConsoleReporter::new();
        self.run_with_reporter(workload, args, &mut reporter)
    }

    /// Run every round, handing each non-final round to `reporter`.
    pub fn run_with_reporter<A, T>(
        &self,
        workload: &Workload<A, T>,
        args: &[A],
        reporter: &mut dyn RoundReporter<T>,
    ) -> Result<RunOutcome<T>, HarnessError>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.coordinator.check(workload, args)?;

        let config = self.coordinator.config();
        let rounds = config.round_count;
        let cancel = self.coordinator.cancel_token();

        let mut outcome = RunOutcome {
            final_round: None,
            final_reported: false,
            history: Vec::new(),
            rounds_run: 0,
            cancelled: false,
        };
        // Held only until the next round starts, in case the run stops first.
        let mut last_reported: Option<RoundResult<T>> = None;

        for round_index in 0..rounds {
            if cancel.is_cancelled() {
                info!(
                    "Cancelled before round {}; {} rounds skipped",
                    round_index + 1,
                    rounds - round_index
                );
                break;
            }

            self.cooldown(round_index);
            if cancel.is_cancelled() {
                info!("Cancelled during cooldown before round {}", round_index + 1);
                break;
            }
            drop(last_reported.take());

            let result = self.coordinator.run_round(round_index, workload, args)?;
            outcome.rounds_run += 1;

            let is_final = round_index + 1 == rounds;
            if is_final || result.was_cancelled() {
                outcome.final_round = Some(result);
                break;
            }

            if let Err(e) = reporter.report_round(&result) {
                warn!("Failed to report round {}: {:#}", round_index + 1, e);
            }
            if config.retain_rounds {
                outcome.history.push(result);
            } else {
                debug!("Discarding round {} after the next one starts", round_index + 1);
                last_reported = Some(result);
            }
        }

        if outcome.final_round.is_none() {
            outcome.final_round = if config.retain_rounds {
                outcome.history.pop()
            } else {
                last_reported
            };
            outcome.final_reported = outcome.final_round.is_some();
        }

        outcome.cancelled = cancel.is_cancelled();
        Ok(outcome)
    }

    fn cooldown(&self, round_index: usize) {
        if let Some(hook) = &self.pre_round {
            match panic::catch_unwind(AssertUnwindSafe(|| hook())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Pre-round hook failed before round {}: {:#}",
                    round_index + 1,
                    e
                ),
                Err(payload) => warn!(
                    "Pre-round hook panicked before round {}: {}",
                    round_index + 1,
                    panic_message(payload.as_ref())
                ),
            }
        }

        let settle = self.coordinator.config().settle_delay;
        if !settle.is_zero() {
            debug!("Settling for {:?} before round {}", settle, round_index + 1);
            thread::sleep(settle);
        }
    }
}
