//! # Statistics Aggregator
//!
//! A read-only view over the samples of one round (or several retained rounds)
//! grouped by operation name. All figures are in fractional milliseconds and
//! derived from the monotonic elapsed time of each sample.
//!
//! ## Tail thresholds
//!
//! `percentile_threshold(name, fraction)` is *not* a conventional ascending
//! percentile. Samples are sorted slowest first and the value at index
//! `floor(count * fraction)` (clamped to the last index) is returned: roughly
//! `fraction` of all calls took at least this long. Small fractions therefore
//! describe the slow tail, large fractions the fast end.
//!
//! Conventional latency percentiles (p50/p95/p99) are also available, computed
//! from an HDR histogram over nanosecond latencies.
//!
//! Nothing in this module fails: unknown operations and empty sample sets
//! yield zeros and empty lists.

use crate::coordinator::RoundResult;
use crate::invocation::InvocationSample;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// The tail fractions included in every operation summary.
pub const TAIL_FRACTIONS: [f64; 11] = [
    0.0001, 0.001, 0.01, 0.1, 0.2, 0.5, 0.8, 0.9, 0.99, 0.999, 0.9999,
];

/// Tail-latency threshold for one fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TailThreshold {
    pub fraction: f64,
    pub elapsed_ms: f64,
}

/// Conventional latency distribution from the HDR histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyDistribution {
    pub mean_ns: f64,
    pub std_dev_ns: f64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
}

/// Aggregate figures for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation: String,
    pub count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failure_percent: f64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub tail_thresholds: Vec<TailThreshold>,
    pub latency: Option<LatencyDistribution>,
    /// Failure counts keyed by `InvocationError::kind`
    pub failure_kinds: BTreeMap<String, usize>,
}

struct OperationSamples<'a, T> {
    name: &'a str,
    samples: Vec<&'a InvocationSample<T>>,
    /// Elapsed milliseconds, slowest first
    elapsed_desc: Vec<f64>,
}

/// Read-only statistics over a frozen set of samples.
pub struct Statistics<'a, T> {
    operations: Vec<OperationSamples<'a, T>>,
    index: HashMap<&'a str, usize>,
}

impl<'a, T> Statistics<'a, T> {
    /// Statistics over a single round.
    pub fn new(round: &'a RoundResult<T>) -> Self {
        Self::from_samples(round.samples())
    }

    /// Statistics rolled up across several rounds.
    pub fn from_rounds(rounds: &'a [RoundResult<T>]) -> Self {
        Self::from_samples(rounds.iter().flat_map(|r| r.samples()))
    }

    pub fn from_samples<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a InvocationSample<T>>,
    {
        let mut operations: Vec<OperationSamples<'a, T>> = Vec::new();
        let mut index: HashMap<&'a str, usize> = HashMap::new();

        for sample in samples {
            let name = sample.operation();
            let slot = *index.entry(name).or_insert_with(|| {
                operations.push(OperationSamples {
                    name,
                    samples: Vec::new(),
                    elapsed_desc: Vec::new(),
                });
                operations.len() - 1
            });
            operations[slot].samples.push(sample);
        }

        for op in &mut operations {
            op.elapsed_desc = op.samples.iter().map(|s| s.elapsed_ms()).collect();
            op.elapsed_desc
                .sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        }

        Self { operations, index }
    }

    fn operation(&self, name: &str) -> Option<&OperationSamples<'a, T>> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    /// Every operation observed, in first-seen order.
    pub fn operation_names(&self) -> Vec<&'a str> {
        self.operations.iter().map(|op| op.name).collect()
    }

    pub fn samples_for(&self, name: &str) -> &[&'a InvocationSample<T>] {
        match self.operation(name) {
            Some(op) => &op.samples,
            None => &[],
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.samples_for(name).len()
    }

    pub fn total_count(&self) -> usize {
        self.operations.iter().map(|op| op.samples.len()).sum()
    }

    pub fn total_elapsed(&self, name: &str) -> f64 {
        self.samples_for(name).iter().map(|s| s.elapsed_ms()).sum()
    }

    pub fn min_elapsed(&self, name: &str) -> f64 {
        self.operation(name)
            .and_then(|op| op.elapsed_desc.last().copied())
            .unwrap_or(0.0)
    }

    pub fn max_elapsed(&self, name: &str) -> f64 {
        self.operation(name)
            .and_then(|op| op.elapsed_desc.first().copied())
            .unwrap_or(0.0)
    }

    /// Mean elapsed time; 0 when there are no samples.
    pub fn avg_elapsed(&self, name: &str) -> f64 {
        let count = self.count(name);
        if count == 0 {
            0.0
        } else {
            self.total_elapsed(name) / count as f64
        }
    }

    /// The elapsed time that roughly `fraction` of samples met or exceeded.
    ///
    /// `fraction` is clamped to `[0, 1]`. Returns 0 when there are no samples.
    pub fn percentile_threshold(&self, name: &str, fraction: f64) -> f64 {
        let Some(op) = self.operation(name) else {
            return 0.0;
        };
        let len = op.elapsed_desc.len();
        if len == 0 {
            return 0.0;
        }
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let idx = ((len as f64 * fraction).floor() as usize).min(len - 1);
        op.elapsed_desc[idx]
    }

    pub fn tail_thresholds(&self, name: &str) -> Vec<TailThreshold> {
        TAIL_FRACTIONS
            .iter()
            .map(|&fraction| TailThreshold {
                fraction,
                elapsed_ms: self.percentile_threshold(name, fraction),
            })
            .collect()
    }

    pub fn failed_samples(&self, name: &str) -> Vec<&'a InvocationSample<T>> {
        self.samples_for(name)
            .iter()
            .copied()
            .filter(|s| s.is_failure())
            .collect()
    }

    pub fn all_failed_samples(&self) -> Vec<&'a InvocationSample<T>> {
        self.operations
            .iter()
            .flat_map(|op| op.samples.iter().copied())
            .filter(|s| s.is_failure())
            .collect()
    }

    pub fn failure_count(&self, name: &str) -> usize {
        self.samples_for(name).iter().filter(|s| s.is_failure()).count()
    }

    /// Failed share of calls as a percentage; 0 when there are no samples.
    pub fn failure_percent(&self, name: &str) -> f64 {
        let count = self.count(name);
        if count == 0 {
            0.0
        } else {
            self.failure_count(name) as f64 * 100.0 / count as f64
        }
    }

    /// HDR histogram of nanosecond latencies for `name`.
    pub fn latency_histogram(&self, name: &str) -> Option<Histogram<u64>> {
        let samples = self.samples_for(name);
        if samples.is_empty() {
            return None;
        }

        let mut histogram = match Histogram::<u64>::new(3) {
            Ok(h) => h,
            Err(e) => {
                debug!("Could not create latency histogram: {}", e);
                return None;
            }
        };
        for sample in samples {
            let ns = u64::try_from(sample.elapsed().as_nanos()).unwrap_or(u64::MAX);
            if let Err(e) = histogram.record(ns) {
                debug!("Dropping latency {}ns from histogram: {}", ns, e);
            }
        }
        Some(histogram)
    }

    pub fn summary(&self, name: &str) -> OperationSummary {
        let count = self.count(name);
        let failure_count = self.failure_count(name);

        let mut failure_kinds = BTreeMap::new();
        for sample in self.failed_samples(name) {
            if let Some(err) = sample.outcome().error() {
                *failure_kinds.entry(err.kind().to_string()).or_insert(0) += 1;
            }
        }

        let latency = self.latency_histogram(name).map(|h| LatencyDistribution {
            mean_ns: h.mean(),
            std_dev_ns: h.stdev(),
            p50_ns: h.value_at_percentile(50.0),
            p95_ns: h.value_at_percentile(95.0),
            p99_ns: h.value_at_percentile(99.0),
        });

        OperationSummary {
            operation: name.to_string(),
            count,
            success_count: count - failure_count,
            failure_count,
            failure_percent: self.failure_percent(name),
            total_ms: self.total_elapsed(name),
            min_ms: self.min_elapsed(name),
            max_ms: self.max_elapsed(name),
            avg_ms: self.avg_elapsed(name),
            tail_thresholds: self.tail_thresholds(name),
            latency,
            failure_kinds,
        }
    }

    /// Summaries for every operation, in first-seen order.
    pub fn summaries(&self) -> Vec<OperationSummary> {
        self.operation_names()
            .into_iter()
            .map(|name| self.summary(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::invocation::InvocationRunner;
    use crate::operation::{InvocationContext, Target};
    use anyhow::anyhow;
    use std::thread;
    use std::time::Duration;

    fn sample(target: &Target<(), ()>) -> InvocationSample<()> {
        let cancel = CancelToken::new();
        let ctx = InvocationContext {
            worker_index: 0,
            loop_index: 0,
            arg: None,
            cancel: &cancel,
        };
        InvocationRunner::default().run(target, &ctx)
    }

    fn sleeping(name: &str, ms: u64) -> Target<(), ()> {
        Target::new(name, move || {
            thread::sleep(Duration::from_millis(ms));
            Ok(())
        })
    }

    #[test]
    fn test_empty_statistics_are_zero() {
        let stats: Statistics<'_, ()> = Statistics::from_samples(Vec::new());

        assert!(stats.operation_names().is_empty());
        assert!(stats.samples_for("missing").is_empty());
        assert_eq!(stats.total_elapsed("missing"), 0.0);
        assert_eq!(stats.min_elapsed("missing"), 0.0);
        assert_eq!(stats.max_elapsed("missing"), 0.0);
        assert_eq!(stats.avg_elapsed("missing"), 0.0);
        assert_eq!(stats.percentile_threshold("missing", 0.5), 0.0);
        assert_eq!(stats.failure_percent("missing"), 0.0);
        assert!(stats.latency_histogram("missing").is_none());
        assert!(stats.all_failed_samples().is_empty());
    }

    #[test]
    fn test_grouping_preserves_first_seen_order() {
        let b = Target::new("b", || Ok(()));
        let a = Target::new("a", || Ok(()));
        let samples = vec![sample(&b), sample(&a), sample(&b)];
        let stats = Statistics::from_samples(&samples);

        assert_eq!(stats.operation_names(), vec!["b", "a"]);
        assert_eq!(stats.count("b"), 2);
        assert_eq!(stats.count("a"), 1);
        assert_eq!(stats.total_count(), 3);
    }

    #[test]
    fn test_extrema_average_and_thresholds() {
        let samples = vec![
            sample(&sleeping("op", 1)),
            sample(&sleeping("op", 40)),
            sample(&sleeping("op", 10)),
            sample(&sleeping("op", 25)),
        ];
        let stats = Statistics::from_samples(&samples);

        let min = stats.min_elapsed("op");
        let max = stats.max_elapsed("op");
        let avg = stats.avg_elapsed("op");
        assert!(min >= 1.0);
        assert!(max >= 40.0);
        assert!(min <= avg && avg <= max);
        assert_eq!(avg, stats.total_elapsed("op") / 4.0);

        // Slowest first: fraction 0 is the max, fraction 1 clamps to the min.
        assert_eq!(stats.percentile_threshold("op", 0.0), max);
        assert_eq!(stats.percentile_threshold("op", 1.0), min);
        // floor(4 * 0.5) = 2 -> third slowest, the 10ms call.
        let mid = stats.percentile_threshold("op", 0.5);
        assert!(mid >= 10.0 && mid < stats.percentile_threshold("op", 0.25));

        let thresholds = stats.tail_thresholds("op");
        assert_eq!(thresholds.len(), TAIL_FRACTIONS.len());
        assert!(thresholds
            .windows(2)
            .all(|w| w[0].elapsed_ms >= w[1].elapsed_ms));
        assert!(thresholds.iter().all(|t| t.elapsed_ms <= max && t.elapsed_ms >= min));
    }

    #[test]
    fn test_failures_are_counted_per_operation() {
        let ok = Target::new("op", || Ok(()));
        let bad: Target<(), ()> = Target::new("op", || Err(anyhow!("nope")));
        let other: Target<(), ()> = Target::new("other", || panic!("kaput"));
        let samples = vec![sample(&ok), sample(&bad), sample(&bad), sample(&other)];
        let stats = Statistics::from_samples(&samples);

        assert_eq!(stats.failed_samples("op").len(), 2);
        assert_eq!(stats.failed_samples("other").len(), 1);
        assert_eq!(stats.all_failed_samples().len(), 3);
        assert!((stats.failure_percent("op") - 200.0 / 3.0).abs() < 1e-9);

        let summary = stats.summary("op");
        assert_eq!(summary.count, 3);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failure_count, 2);
        assert_eq!(summary.failure_kinds.get("error"), Some(&2));

        let summary = stats.summary("other");
        assert_eq!(summary.failure_kinds.get("panic"), Some(&1));
        assert_eq!(summary.failure_percent, 100.0);
    }

    #[test]
    fn test_reads_are_idempotent() {
        let samples = vec![sample(&sleeping("op", 2)), sample(&sleeping("op", 4))];
        let stats = Statistics::from_samples(&samples);

        let first = stats.summaries();
        let second = stats.summaries();
        assert_eq!(first, second);
        assert_eq!(
            stats.percentile_threshold("op", 0.01),
            stats.percentile_threshold("op", 0.01)
        );
    }

    #[test]
    fn test_histogram_distribution() {
        let samples = vec![sample(&sleeping("op", 1)), sample(&sleeping("op", 3))];
        let stats = Statistics::from_samples(&samples);
        let latency = stats.summary("op").latency.unwrap();

        assert!(latency.mean_ns >= 1_000_000.0);
        assert!(latency.p99_ns >= latency.p50_ns);
    }

    #[test]
    fn test_from_rounds_rolls_up_every_round() {
        use crate::config::HarnessConfig;
        use crate::coordinator::WorkerCoordinator;
        use crate::operation::Workload;

        let coordinator = WorkerCoordinator::new(HarnessConfig {
            worker_count: 2,
            loop_count: 3,
            ..Default::default()
        });
        let passing = Workload::new(Target::new("op", || Ok(())));
        let failing: Workload<(), ()> = Workload::new(Target::new("op", || Err(anyhow!("down"))));
        let rounds = vec![
            coordinator.run_round(0, &passing, &[]).unwrap(),
            coordinator.run_round(1, &failing, &[]).unwrap(),
            coordinator.run_round(2, &passing, &[]).unwrap(),
        ];
        let stats = Statistics::from_rounds(&rounds);

        assert_eq!(stats.count("op"), 18);
        assert_eq!(stats.failure_count("op"), 6);
        assert!((stats.failure_percent("op") - 100.0 / 3.0).abs() < 1e-9);
        let (min, avg, max) = (
            stats.min_elapsed("op"),
            stats.avg_elapsed("op"),
            stats.max_elapsed("op"),
        );
        assert!(min <= avg && avg <= max);
        assert_eq!(stats.summary("op").count, 18);
    }
}
