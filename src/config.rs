//! # Run Configuration
//!
//! `HarnessConfig` is the authoritative description of one benchmark run: how
//! many workers, how many loops per worker, how many rounds, and the pacing
//! delays between them. It is validated once, before any worker is launched,
//! so an invalid configuration never produces a partially started round.
//!
//! Per-worker arguments follow a simple rule: 0 arguments (none), 1 argument
//! (shared by every worker), or exactly one per worker. Anything else is a
//! `ConfigError::ArgumentCount`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a benchmark run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Number of concurrent workers per round
    pub worker_count: usize,

    /// Delay between successive worker submissions
    ///
    /// Staggers worker start so that all workers do not hit the target at the
    /// same instant. Measured between submissions, not between actual starts.
    pub worker_start_delay: Duration,

    /// Number of sequential loop iterations per worker
    pub loop_count: usize,

    /// Delay between successive loop iterations of one worker
    pub loop_delay: Duration,

    /// Number of rounds to run sequentially
    pub round_count: usize,

    /// Debug short-circuit: run 1 worker x 1 loop regardless of the counts above
    pub dry_run: bool,

    /// Keep every round's result instead of only the most recent one
    ///
    /// Off by default: very large loop counts over many rounds can otherwise
    /// exhaust memory.
    pub retain_rounds: bool,

    /// Upper bound on a single invocation; `None` waits forever
    pub invocation_timeout: Option<Duration>,

    /// Sleep before each round, after the optional pre-round hook
    pub settle_delay: Duration,

    /// Pin worker `i` to CPU core `i % cores`
    pub pin_workers: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::defaults::WORKER_COUNT,
            worker_start_delay: Duration::ZERO,
            loop_count: crate::defaults::LOOP_COUNT,
            loop_delay: Duration::ZERO,
            round_count: crate::defaults::ROUND_COUNT,
            dry_run: false,
            retain_rounds: false,
            invocation_timeout: None,
            settle_delay: Duration::ZERO,
            pin_workers: false,
        }
    }
}

impl HarnessConfig {
    /// Check the count invariants.
    ///
    /// Delays are `Duration`s and therefore never negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.loop_count == 0 {
            return Err(ConfigError::ZeroLoops);
        }
        if self.round_count == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.invocation_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Number of workers actually launched per round.
    pub fn effective_workers(&self) -> usize {
        if self.dry_run {
            1
        } else {
            self.worker_count
        }
    }

    /// Number of loop iterations each worker actually runs.
    pub fn effective_loops(&self) -> usize {
        if self.dry_run {
            1
        } else {
            self.loop_count
        }
    }
}

/// Map the supplied arguments onto `worker_count` workers.
///
/// Returns one entry per worker: `None` when no arguments were supplied, the
/// shared argument when exactly one was supplied, otherwise the positional one.
pub fn resolve_worker_args<A: Clone>(
    args: &[A],
    worker_count: usize,
) -> Result<Vec<Option<A>>, ConfigError> {
    match args.len() {
        0 => Ok(vec![None; worker_count]),
        1 => Ok(vec![Some(args[0].clone()); worker_count]),
        n if n == worker_count => Ok(args.iter().cloned().map(Some).collect()),
        n => Err(ConfigError::ArgumentCount {
            supplied: n,
            workers: worker_count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_count, crate::defaults::WORKER_COUNT);
        assert!(!config.retain_rounds);
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        let config = HarnessConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));

        let config = HarnessConfig {
            loop_count: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroLoops));

        let config = HarnessConfig {
            round_count: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRounds));

        let config = HarnessConfig {
            invocation_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_dry_run_short_circuits_counts() {
        let config = HarnessConfig {
            worker_count: 8,
            loop_count: 100,
            dry_run: true,
            ..Default::default()
        };
        assert_eq!(config.effective_workers(), 1);
        assert_eq!(config.effective_loops(), 1);
    }

    #[test]
    fn test_resolve_worker_args() {
        let none: Vec<Option<u32>> = resolve_worker_args(&[], 3).unwrap();
        assert_eq!(none, vec![None, None, None]);

        let shared = resolve_worker_args(&["db"], 4).unwrap();
        assert_eq!(shared, vec![Some("db"); 4]);

        let positional = resolve_worker_args(&[1, 2, 3, 4], 4).unwrap();
        assert_eq!(positional, vec![Some(1), Some(2), Some(3), Some(4)]);

        assert_eq!(
            resolve_worker_args(&[1, 2, 3], 4),
            Err(ConfigError::ArgumentCount {
                supplied: 3,
                workers: 4
            })
        );
    }
}
