use crate::config::HarnessConfig;
use crate::coordinator::RoundResult;
use crate::rounds::RoundReporter;
use crate::stats::OperationSummary;
use crate::utils::{format_duration, format_millis, generate_run_id, get_cpu_cores};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Aggregate view of one round, ready for rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub run_id: String,
    /// One-based round number
    pub round: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub elapsed_ms: f64,
    pub worker_count: usize,
    pub sample_count: usize,
    pub failure_count: usize,
    pub failure_percent: f64,
    pub cancelled: bool,
    pub lost_workers: usize,
    pub operations: Vec<OperationSummary>,
}

impl RoundReport {
    /// Summarize a finished round
    pub fn from_round<T>(run_id: &str, round: &RoundResult<T>) -> Self {
        let stats = round.statistics();
        let operations = stats.summaries();
        let sample_count = stats.total_count();
        let failure_count = operations.iter().map(|op| op.failure_count).sum();
        let failure_percent = if sample_count == 0 {
            0.0
        } else {
            failure_count as f64 * 100.0 / sample_count as f64
        };

        Self {
            run_id: run_id.to_string(),
            round: round.round_index() + 1,
            started_at: round.started_at(),
            finished_at: round.finished_at(),
            elapsed_ms: round.elapsed().as_secs_f64() * 1_000.0,
            worker_count: round.worker_count(),
            sample_count,
            failure_count,
            failure_percent,
            cancelled: round.was_cancelled(),
            lost_workers: round.lost_workers(),
            operations,
        }
    }

    /// Plain-text table, one line per operation plus its tail thresholds
    ///
    /// Failure counts and percentages are always shown, even when zero.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Round {} | {} workers | {} samples | {} elapsed | failures: {} ({:.2}%){}",
            self.round,
            self.worker_count,
            self.sample_count,
            format_millis(self.elapsed_ms),
            self.failure_count,
            self.failure_percent,
            if self.cancelled { " | CANCELLED" } else { "" }
        );
        if self.lost_workers > 0 {
            let _ = writeln!(
                out,
                "  {} worker(s) lost, their samples are missing",
                self.lost_workers
            );
        }
        let _ = writeln!(
            out,
            "  {:<24} {:>8} {:>8} {:>8} {:>10} {:>10} {:>10}",
            "operation", "count", "failed", "fail%", "min", "avg", "max"
        );
        for op in &self.operations {
            let _ = writeln!(
                out,
                "  {:<24} {:>8} {:>8} {:>7.2}% {:>10} {:>10} {:>10}",
                op.operation,
                op.count,
                op.failure_count,
                op.failure_percent,
                format_millis(op.min_ms),
                format_millis(op.avg_ms),
                format_millis(op.max_ms)
            );
            let thresholds: Vec<String> = op
                .tail_thresholds
                .iter()
                .map(|t| format!("{}%>={}", t.fraction * 100.0, format_millis(t.elapsed_ms)))
                .collect();
            let _ = writeln!(out, "    slowest: {}", thresholds.join(" "));
            if !op.failure_kinds.is_empty() {
                let kinds: Vec<String> = op
                    .failure_kinds
                    .iter()
                    .map(|(kind, n)| format!("{}={}", kind, n))
                    .collect();
                let _ = writeln!(out, "    failures by kind: {}", kinds.join(" "));
            }
        }
        out
    }
}

/// Writes each round's text report to the log
pub struct ConsoleReporter {
    run_id: String,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            run_id: generate_run_id(),
        }
    }

    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RoundReporter<T> for ConsoleReporter {
    fn report_round(&mut self, round: &RoundResult<T>) -> Result<()> {
        let report = RoundReport::from_round(&self.run_id, round);
        for line in report.render_text().lines() {
            if report.failure_count > 0 && line.starts_with("Round") {
                warn!("{}", line);
            } else {
                info!("{}", line);
            }
        }
        Ok(())
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub harness_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: get_cpu_cores(),
            harness_version: crate::VERSION.to_string(),
        }
    }
}

/// Final results file structure
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalResults {
    pub metadata: RunMetadata,
    pub rounds: Vec<RoundReport>,
    pub summary: OverallSummary,
}

/// Run metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub config: HarnessConfig,
    pub system_info: SystemInfo,
}

/// Totals across every reported round
#[derive(Debug, Serialize, Deserialize)]
pub struct OverallSummary {
    pub rounds: usize,
    pub total_samples: usize,
    pub total_failures: usize,
    pub failure_percent: f64,
    pub slowest_round: Option<usize>,
}

/// Results manager for JSON output and per-round streaming
///
/// Every round handed to it is summarized into a `RoundReport`. Reports are
/// small, so all of them are kept for the final file even when the rounds
/// themselves are discarded.
pub struct ResultsManager {
    output_file: PathBuf,
    streaming_file: Option<PathBuf>,
    run_id: String,
    config: HarnessConfig,
    reports: Vec<RoundReport>,
}

impl ResultsManager {
    /// Create a new results manager
    pub fn new(output_file: &Path, config: HarnessConfig) -> Result<Self> {
        Ok(Self {
            output_file: output_file.to_path_buf(),
            streaming_file: None,
            run_id: generate_run_id(),
            config,
            reports: Vec::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn reports(&self) -> &[RoundReport] {
        &self.reports
    }

    /// Stream every round to `streaming_file` as soon as it is added
    ///
    /// The file holds a JSON array that is closed by `finalize`.
    pub fn enable_streaming<P: AsRef<Path>>(&mut self, streaming_file: P) -> Result<()> {
        let path = streaming_file.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to create streaming file {:?}", path))?;

        writeln!(file, "[")?;

        debug!("Enabled streaming to: {:?}", path);
        self.streaming_file = Some(path);
        Ok(())
    }

    /// Summarize and record a finished round
    pub fn add_round<T>(&mut self, round: &RoundResult<T>) -> Result<()> {
        let report = RoundReport::from_round(&self.run_id, round);
        debug!("Adding results for round {}", report.round);

        if self.streaming_file.is_some() {
            self.stream_report(&report)?;
        }

        self.reports.push(report);
        Ok(())
    }

    fn stream_report(&self, report: &RoundReport) -> Result<()> {
        if let Some(ref streaming_file) = self.streaming_file {
            let mut file = OpenOptions::new().append(true).open(streaming_file)?;

            if !self.reports.is_empty() {
                writeln!(file, ",")?;
            }

            let json = serde_json::to_string_pretty(report)?;
            write!(file, "{}", json)?;
            file.flush()?;
        }

        Ok(())
    }

    /// Close the stream and write the consolidated results file
    pub fn finalize(&mut self) -> Result<()> {
        info!("Finalizing benchmark results");

        if let Some(ref streaming_file) = self.streaming_file {
            let mut file = OpenOptions::new().append(true).open(streaming_file)?;
            writeln!(file, "\n]")?;
            file.flush()?;
        }

        let final_results = FinalResults {
            metadata: RunMetadata {
                version: crate::VERSION.to_string(),
                run_id: self.run_id.clone(),
                timestamp: chrono::Utc::now(),
                config: self.config.clone(),
                system_info: SystemInfo::default(),
            },
            rounds: self.reports.clone(),
            summary: self.calculate_overall_summary(),
        };

        let json = serde_json::to_string_pretty(&final_results)?;
        std::fs::write(&self.output_file, json)
            .with_context(|| format!("Failed to write results to {:?}", self.output_file))?;

        info!(
            "Results for {} rounds written to: {:?}",
            self.reports.len(),
            self.output_file
        );
        Ok(())
    }

    fn calculate_overall_summary(&self) -> OverallSummary {
        let total_samples: usize = self.reports.iter().map(|r| r.sample_count).sum();
        let total_failures: usize = self.reports.iter().map(|r| r.failure_count).sum();
        let failure_percent = if total_samples == 0 {
            0.0
        } else {
            total_failures as f64 * 100.0 / total_samples as f64
        };

        OverallSummary {
            rounds: self.reports.len(),
            total_samples,
            total_failures,
            failure_percent,
            slowest_round: self
                .reports
                .iter()
                .max_by(|a, b| {
                    a.elapsed_ms
                        .partial_cmp(&b.elapsed_ms)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|r| r.round),
        }
    }
}

impl<T> RoundReporter<T> for ResultsManager {
    fn report_round(&mut self, round: &RoundResult<T>) -> Result<()> {
        self.add_round(round)
    }
}

/// One-line summary used by the command-line driver after the final round
pub fn describe_round<T>(round: &RoundResult<T>) -> String {
    format!(
        "round {} finished: {} samples from {} workers in {}",
        round.round_index() + 1,
        round.sample_count(),
        round.worker_count(),
        format_duration(round.elapsed())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::WorkerCoordinator;
    use crate::operation::{Target, Workload};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::{NamedTempFile, TempDir};

    fn run_round(index: usize, fail_every: usize) -> RoundResult<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let workload = Workload::new(Target::new("op", move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if fail_every > 0 && n % fail_every == 0 {
                Err(anyhow!("call {} failed", n))
            } else {
                Ok(())
            }
        }));
        let config = HarnessConfig {
            worker_count: 1,
            loop_count: 4,
            ..Default::default()
        };
        WorkerCoordinator::new(config)
            .run_round(index, &workload, &[])
            .unwrap()
    }

    #[test]
    fn test_round_report_counts_failures() {
        let round = run_round(0, 2);
        let report = RoundReport::from_round("run", &round);

        assert_eq!(report.round, 1);
        assert_eq!(report.sample_count, 4);
        assert_eq!(report.failure_count, 2);
        assert_eq!(report.failure_percent, 50.0);
        assert_eq!(report.operations.len(), 1);
        assert_eq!(report.operations[0].tail_thresholds.len(), 11);
    }

    #[test]
    fn test_render_text_shows_failures_even_when_zero() {
        let report = RoundReport::from_round("run", &run_round(0, 0));
        let text = report.render_text();

        assert!(text.starts_with("Round 1 | 1 workers | 4 samples"));
        assert!(text.contains("failures: 0 (0.00%)"));
        assert!(text.contains("op"));
        assert!(text.contains("slowest:"));
        assert!(!text.contains("failures by kind"));

        let failing = RoundReport::from_round("run", &run_round(0, 1)).render_text();
        assert!(failing.contains("failures: 4 (100.00%)"));
        assert!(failing.contains("failures by kind: error=4"));
    }

    #[test]
    fn test_results_manager_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        let manager = ResultsManager::new(temp_file.path(), HarnessConfig::default()).unwrap();

        assert_eq!(manager.output_file, temp_file.path());
        assert!(manager.streaming_file.is_none());
        assert!(manager.reports().is_empty());
    }

    #[test]
    fn test_finalize_writes_all_rounds() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("results.json");
        let stream = dir.path().join("stream.json");

        let mut manager = ResultsManager::new(&output, HarnessConfig::default()).unwrap();
        manager.enable_streaming(&stream).unwrap();
        manager.add_round(&run_round(0, 0)).unwrap();
        manager.add_round(&run_round(1, 2)).unwrap();
        manager.finalize().unwrap();

        let final_results: FinalResults =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(final_results.metadata.run_id, manager.run_id());
        assert_eq!(final_results.rounds.len(), 2);
        assert_eq!(final_results.summary.rounds, 2);
        assert_eq!(final_results.summary.total_samples, 8);
        assert_eq!(final_results.summary.total_failures, 2);
        assert_eq!(final_results.summary.failure_percent, 25.0);

        let streamed: Vec<RoundReport> =
            serde_json::from_str(&std::fs::read_to_string(&stream).unwrap()).unwrap();
        assert_eq!(streamed, final_results.rounds);
    }

    #[test]
    fn test_system_info_default() {
        let info = SystemInfo::default();

        assert!(!info.os.is_empty());
        assert!(!info.architecture.is_empty());
        assert!(info.cpu_cores > 0);
        assert_eq!(info.harness_version, crate::VERSION);
    }
}
