use crate::config::HarnessConfig;
use crate::operation::{InvocationContext, Target, Workload};
use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, ValueEnum};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Parabench - run an operation concurrently and measure every invocation
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Demo operation to benchmark
    #[clap(long, value_enum, default_value_t = DemoWorkload::Sleep, help_heading = "Workload")]
    pub workload: DemoWorkload,

    /// Time one demo invocation takes (e.g. 500us, 2ms; bare numbers are milliseconds)
    #[clap(
        long,
        value_parser = parse_duration,
        default_value = crate::defaults::WORK_TIME,
        help_heading = "Workload",
    )]
    pub work_time: Duration,

    /// Probability that a `flaky` invocation fails
    #[clap(
        long,
        value_parser = parse_probability,
        default_value_t = crate::defaults::FAILURE_RATE,
        help_heading = "Workload",
    )]
    pub failure_rate: f64,

    /// Per-worker work time; give once to share, or once per worker
    #[clap(
        long = "worker-arg",
        value_parser = parse_duration,
        action = ArgAction::Append,
        help_heading = "Workload",
    )]
    pub worker_args: Vec<Duration>,

    /// Number of concurrent workers per round
    #[clap(
        short = 'w',
        long,
        default_value_t = crate::defaults::WORKER_COUNT,
        help_heading = "Harness",
    )]
    pub workers: usize,

    /// Delay between successive worker launches
    #[clap(long, value_parser = parse_duration, default_value = "0", help_heading = "Harness")]
    pub worker_start_delay: Duration,

    /// Loop iterations per worker
    #[clap(
        short = 'l',
        long,
        default_value_t = crate::defaults::LOOP_COUNT,
        help_heading = "Harness",
    )]
    pub loops: usize,

    /// Delay between successive loop iterations of one worker
    #[clap(long, value_parser = parse_duration, default_value = "0", help_heading = "Harness")]
    pub loop_delay: Duration,

    /// Number of sequential rounds
    #[clap(
        short = 'r',
        long,
        default_value_t = crate::defaults::ROUND_COUNT,
        help_heading = "Harness",
    )]
    pub rounds: usize,

    /// Run a single worker for a single loop, ignoring the counts above
    #[clap(long, default_value_t = false, help_heading = "Harness")]
    pub dry_run: bool,

    /// Keep every round in memory instead of only the last one
    #[clap(long, default_value_t = false, help_heading = "Harness")]
    pub retain_rounds: bool,

    /// Abandon an invocation that runs longer than this
    #[clap(long, value_parser = parse_duration, help_heading = "Harness")]
    pub timeout: Option<Duration>,

    /// Sleep before each round
    #[clap(long, value_parser = parse_duration, default_value = "0", help_heading = "Harness")]
    pub settle_delay: Duration,

    /// Pin each worker thread to a CPU core
    #[clap(long, default_value_t = false, help_heading = "Harness")]
    pub pin_workers: bool,

    /// Output file for results (JSON format)
    #[clap(
        short = 'o',
        long,
        default_value = crate::defaults::OUTPUT_FILE,
        help_heading = "Output",
    )]
    pub output_file: PathBuf,

    /// JSON file receiving each round as soon as it is reported
    #[clap(long, help_heading = "Output")]
    pub streaming_output: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[clap(short = 'q', long, default_value_t = false, help_heading = "Output")]
    pub quiet: bool,

    /// Also write the log to this file
    #[clap(long, help_heading = "Output")]
    pub log_file: Option<PathBuf>,
}

/// Built-in operations for exercising the harness from the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum DemoWorkload {
    /// Sleep for the work time, with a little jitter
    #[clap(name = "sleep")]
    Sleep,

    /// Busy-wait for the work time
    #[clap(name = "spin")]
    Spin,

    /// Sleep like `sleep`, then fail at random with the failure rate
    #[clap(name = "flaky")]
    Flaky,
}

impl std::fmt::Display for DemoWorkload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DemoWorkload::Sleep => write!(f, "sleep"),
            DemoWorkload::Spin => write!(f, "spin"),
            DemoWorkload::Flaky => write!(f, "flaky"),
        }
    }
}

impl DemoWorkload {
    /// Build the workload. A worker argument, when present, replaces
    /// `work_time` for that worker.
    pub fn build(self, work_time: Duration, failure_rate: f64) -> Workload<Duration, ()> {
        let name = self.to_string();
        let target = match self {
            DemoWorkload::Sleep => Target::<Duration, ()>::with_context(name, move |ctx| {
                std::thread::sleep(jitter(busy_time(ctx, work_time)));
                Ok(())
            }),
            DemoWorkload::Spin => Target::<Duration, ()>::with_context(name, move |ctx| {
                let deadline = Instant::now() + busy_time(ctx, work_time);
                while Instant::now() < deadline {
                    if ctx.cancel.is_cancelled() {
                        return Err(anyhow!("cancelled while spinning"));
                    }
                    std::hint::spin_loop();
                }
                Ok(())
            }),
            DemoWorkload::Flaky => Target::<Duration, ()>::with_context(name, move |ctx| {
                std::thread::sleep(jitter(busy_time(ctx, work_time)));
                if rand::thread_rng().gen_bool(failure_rate) {
                    Err(anyhow!(
                        "worker {} loop {}: injected failure",
                        ctx.worker_index,
                        ctx.loop_index
                    ))
                } else {
                    Ok(())
                }
            }),
        };
        Workload::new(target)
    }
}

fn busy_time(ctx: &InvocationContext<'_, Duration>, default: Duration) -> Duration {
    ctx.arg.copied().unwrap_or(default)
}

/// +/- 10% so that sleeps do not line up across workers
fn jitter(base: Duration) -> Duration {
    base.mul_f64(rand::thread_rng().gen_range(0.9..=1.1))
}

impl From<&Args> for HarnessConfig {
    fn from(args: &Args) -> Self {
        Self {
            worker_count: args.workers,
            worker_start_delay: args.worker_start_delay,
            loop_count: args.loops,
            loop_delay: args.loop_delay,
            round_count: args.rounds,
            dry_run: args.dry_run,
            retain_rounds: args.retain_rounds,
            invocation_timeout: args.timeout,
            settle_delay: args.settle_delay,
            pin_workers: args.pin_workers,
        }
    }
}

/// Parse duration from string (e.g., "250us", "500ms", "2s", "1m")
///
/// A bare number is taken as milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix("us") {
        (stripped, "us")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "ms")
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let seconds = match unit {
        "us" => num / 1_000_000.0,
        "ms" => num / 1_000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(seconds)
        .map_err(|e| format!("Duration out of range: {}: {}", s, e))
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid probability: {}", s))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("Probability must be between 0 and 1, got {}", p))
    }
}
