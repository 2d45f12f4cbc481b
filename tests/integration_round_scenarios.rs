use anyhow::{anyhow, Result};
use parabench::{
    CancelToken, ConfigError, HarnessConfig, HarnessError, Hooks, InvocationError, RoundController,
    RoundResult, Target, WorkerCoordinator, Workload, TAIL_FRACTIONS,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(workers: usize, loops: usize) -> HarnessConfig {
    HarnessConfig {
        worker_count: workers,
        loop_count: loops,
        ..Default::default()
    }
}

/// Every worker runs every loop once, whatever the shape.
#[test]
fn sample_count_is_workers_times_loops() -> Result<()> {
    let workload = Workload::new(Target::new("noop", || Ok(())));

    for (workers, loops) in [(1, 1), (1, 7), (3, 1), (4, 25), (8, 3)] {
        let round = WorkerCoordinator::new(config(workers, loops)).run_round(0, &workload, &[])?;
        assert_eq!(round.sample_count(), workers * loops, "{}x{}", workers, loops);
        assert_eq!(round.loop_records().len(), workers * loops);
        assert_eq!(round.worker_count(), workers);
    }
    Ok(())
}

#[test]
fn two_workers_three_loops_all_succeed() -> Result<()> {
    let workload = Workload::new(Target::new("instant", || Ok(42u64)));
    let round = WorkerCoordinator::new(config(2, 3)).run_round(0, &workload, &[])?;
    let stats = round.statistics();

    assert_eq!(round.sample_count(), 6);
    assert_eq!(stats.count("instant"), 6);
    assert_eq!(stats.failure_count("instant"), 0);
    assert!(round.samples().all(|s| s.outcome().value() == Some(&42)));

    let (min, avg, max) = (
        stats.min_elapsed("instant"),
        stats.avg_elapsed("instant"),
        stats.max_elapsed("instant"),
    );
    assert!(min <= avg && avg <= max, "min {} avg {} max {}", min, avg, max);
    Ok(())
}

#[test]
fn failures_on_second_and_fourth_iteration() -> Result<()> {
    let workload = Workload::new(Target::<(), ()>::with_context("sometimes", |ctx| {
        // loop_index is zero-based
        if ctx.loop_index == 1 || ctx.loop_index == 3 {
            Err(anyhow!("iteration {} failed", ctx.loop_index + 1))
        } else {
            Ok(())
        }
    }));
    let round = WorkerCoordinator::new(config(1, 5)).run_round(0, &workload, &[])?;
    let stats = round.statistics();

    assert_eq!(stats.samples_for("sometimes").len(), 5);
    let failed: Vec<usize> = stats
        .failed_samples("sometimes")
        .iter()
        .map(|s| s.loop_index())
        .collect();
    assert_eq!(failed, vec![1, 3]);
    assert_eq!(stats.failure_percent("sometimes"), 40.0);
    Ok(())
}

#[test]
fn always_failing_operation_is_isolated() -> Result<()> {
    let workload = Workload::new(Target::<(), ()>::new("broken", || Err(anyhow!("boom"))));
    let round = WorkerCoordinator::new(config(3, 4)).run_round(0, &workload, &[])?;
    let stats = round.statistics();

    assert_eq!(round.sample_count(), 12);
    assert_eq!(stats.failure_count("broken"), 12);
    assert_eq!(stats.failure_percent("broken"), 100.0);
    assert!(round.elapsed() > Duration::ZERO);
    assert!(round.finished_at() >= round.started_at());
    Ok(())
}

#[test]
fn panicking_operation_is_recorded_as_failure() -> Result<()> {
    let workload = Workload::new(Target::<(), ()>::new("panics", || panic!("operation exploded")));
    let round = WorkerCoordinator::new(config(2, 2)).run_round(0, &workload, &[])?;

    assert_eq!(round.sample_count(), 4);
    assert_eq!(round.lost_workers(), 0);
    for sample in round.samples() {
        match sample.outcome().error() {
            Some(InvocationError::Panicked(msg)) => assert!(msg.contains("operation exploded")),
            other => panic!("expected a panic failure, got {:?}", other),
        }
    }
    Ok(())
}

fn record_args(workers: usize, args: &[u32]) -> Result<Vec<(usize, u32)>, HarnessError> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let workload = Workload::new(Target::<u32, ()>::with_context("echo", move |ctx| {
        let arg = ctx.arg.copied().ok_or_else(|| anyhow!("no argument"))?;
        sink.lock().push((ctx.worker_index, arg));
        Ok(())
    }));

    WorkerCoordinator::new(config(workers, 1)).run_round(0, &workload, args)?;
    let mut seen = seen.lock().clone();
    seen.sort_unstable();
    Ok(seen)
}

#[test]
fn single_argument_is_shared_by_every_worker() {
    let seen = record_args(4, &[7]).unwrap();
    assert_eq!(seen, vec![(0, 7), (1, 7), (2, 7), (3, 7)]);
}

#[test]
fn one_argument_per_worker_is_positional() {
    let seen = record_args(4, &[10, 11, 12, 13]).unwrap();
    assert_eq!(seen, vec![(0, 10), (1, 11), (2, 12), (3, 13)]);
}

#[test]
fn mismatched_argument_count_starts_nothing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let workload = Workload::new(Target::<u32, ()>::with_arg("echo", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    let err = WorkerCoordinator::new(config(4, 1))
        .run_round(0, &workload, &[1, 2, 3])
        .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::Config(ConfigError::ArgumentCount {
            supplied: 3,
            workers: 4
        })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn thresholds_are_bounded_by_extremes() -> Result<()> {
    let workload = Workload::new(Target::<(), ()>::with_context("varied", |ctx| {
        std::thread::sleep(Duration::from_micros(50 * (ctx.loop_index as u64 % 5)));
        Ok(())
    }));
    let round = WorkerCoordinator::new(config(2, 20)).run_round(0, &workload, &[])?;
    let stats = round.statistics();

    let min = stats.min_elapsed("varied");
    let max = stats.max_elapsed("varied");
    let thresholds = stats.tail_thresholds("varied");
    assert_eq!(thresholds.len(), TAIL_FRACTIONS.len());
    for t in &thresholds {
        assert!(t.elapsed_ms >= min && t.elapsed_ms <= max, "{:?}", t);
    }
    // Larger fractions reach further into the fast end.
    for pair in thresholds.windows(2) {
        assert!(pair[0].elapsed_ms >= pair[1].elapsed_ms);
    }
    assert_eq!(stats.percentile_threshold("varied", 0.0), max);
    assert_eq!(stats.percentile_threshold("missing", 0.5), 0.0);
    Ok(())
}

#[test]
fn average_is_total_over_count() -> Result<()> {
    let workload = Workload::new(Target::new("noop", || Ok(())));
    let round = WorkerCoordinator::new(config(3, 10)).run_round(0, &workload, &[])?;
    let stats = round.statistics();

    let expected = stats.total_elapsed("noop") / stats.count("noop") as f64;
    assert!((stats.avg_elapsed("noop") - expected).abs() < 1e-12);
    assert_eq!(stats.avg_elapsed("unknown"), 0.0);
    assert_eq!(stats.count("unknown"), 0);
    Ok(())
}

#[test]
fn reading_statistics_is_idempotent() -> Result<()> {
    let workload = Workload::new(Target::new("noop", || Ok(())));
    let round = WorkerCoordinator::new(config(2, 10)).run_round(0, &workload, &[])?;

    let first = round.statistics().summaries();
    let second = round.statistics().summaries();
    assert_eq!(first, second);

    let stats = round.statistics();
    assert_eq!(stats.max_elapsed("noop"), stats.max_elapsed("noop"));
    assert_eq!(stats.tail_thresholds("noop"), stats.tail_thresholds("noop"));
    Ok(())
}

#[test]
fn multi_target_workload_with_hooks() -> Result<()> {
    let setups = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&setups);
    let workload = Workload::new(Target::new("read", || Ok(())))
        .then(Target::new("write", || Ok(())))
        .with_hooks(Hooks::default().setup_loop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("setup is advisory"))
        }));

    let round = WorkerCoordinator::new(config(2, 5)).run_round(0, &workload, &[])?;
    let stats = round.statistics();

    assert_eq!(setups.load(Ordering::SeqCst), 10);
    assert_eq!(stats.operation_names(), vec!["read", "write"]);
    assert_eq!(stats.count("read"), 10);
    assert_eq!(stats.count("write"), 10);
    assert!(round.loop_records().iter().all(|r| r.samples().len() == 2));
    Ok(())
}

#[test]
fn timed_out_invocations_fail_and_the_loop_continues() -> Result<()> {
    let workload = Workload::new(Target::<(), ()>::with_context("slow-first", |ctx| {
        if ctx.loop_index == 0 {
            std::thread::sleep(Duration::from_millis(300));
        }
        Ok(())
    }));
    let round = WorkerCoordinator::new(HarnessConfig {
        invocation_timeout: Some(Duration::from_millis(50)),
        ..config(1, 3)
    })
    .run_round(0, &workload, &[])?;

    let stats = round.statistics();
    assert_eq!(stats.count("slow-first"), 3);
    let failed = stats.failed_samples("slow-first");
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0].outcome().error(),
        Some(InvocationError::TimedOut(_))
    ));
    Ok(())
}

#[test]
fn rounds_run_sequentially_and_only_non_final_are_reported() -> Result<()> {
    let workload = Workload::new(Target::new("noop", || Ok(())));
    let mut spans = Vec::new();

    let outcome = RoundController::new(HarnessConfig {
        round_count: 4,
        ..config(2, 3)
    })?
    .run_with_reporter(&workload, &[], &mut |round: &RoundResult<()>| -> Result<()> {
        spans.push((round.round_index(), round.started_at(), round.finished_at()));
        Ok(())
    })?;

    assert_eq!(outcome.rounds_run(), 4);
    assert_eq!(spans.iter().map(|s| s.0).collect::<Vec<_>>(), vec![0, 1, 2]);
    for pair in spans.windows(2) {
        assert!(pair[0].2 <= pair[1].1, "rounds overlapped");
    }
    let last = outcome.final_round().expect("final round");
    assert_eq!(last.round_index(), 3);
    assert!(spans[2].2 <= last.started_at());
    Ok(())
}

#[test]
fn dry_run_runs_one_worker_one_loop() -> Result<()> {
    let workload = Workload::new(Target::new("noop", || Ok(())));
    let outcome = RoundController::new(HarnessConfig {
        dry_run: true,
        round_count: 2,
        ..config(8, 100)
    })?
    .run(&workload, &[])?;

    assert_eq!(outcome.final_round().expect("final round").sample_count(), 1);
    Ok(())
}

#[test]
fn cancellation_mid_round_returns_partial_result() -> Result<()> {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let workload = Workload::new(Target::<(), ()>::with_context("cancel-at-3", move |ctx| {
        if ctx.loop_index == 2 {
            trigger.cancel();
        }
        Ok(())
    }));

    let outcome = RoundController::new(HarnessConfig {
        round_count: 3,
        ..config(1, 100)
    })?
    .with_cancel_token(cancel)
    .run(&workload, &[])?;

    assert!(outcome.was_cancelled());
    assert_eq!(outcome.rounds_run(), 1);
    let round = outcome.final_round().expect("cancelled round is returned");
    assert!(round.was_cancelled());
    assert_eq!(round.sample_count(), 3);
    Ok(())
}
