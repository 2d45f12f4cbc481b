//! # Utility Functions and Helper Module
//!
//! Small helpers shared by the harness, the reporters and the command-line
//! driver.
//!
//! ## Key Functionality Categories
//!
//! - **Formatting**: Human-readable display of durations and millisecond figures
//! - **Identification**: Unique run identifiers for result files
//! - **System Information**: Core counts and platform detection
//! - **Thread Placement**: Best-effort pinning of worker threads to CPU cores
//!
//! ## Usage Examples
//!
//! ```rust
//! use parabench::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_millis(0.0015), "1.50μs");
//! ```

use core_affinity::CoreId;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Generate a unique identifier for a benchmark run
///
/// Used to tag every round report written by the same process so that
/// streamed results from concurrent runs cannot be confused.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// Automatically selects the most appropriate unit based on the magnitude:
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use parabench::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_nanos(1250)), "1.25μs");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a fractional millisecond figure with a suitable unit
///
/// Statistics are kept in fractional milliseconds; this renders them the same
/// way `format_duration` renders a `Duration`. Negative and non-finite inputs
/// are treated as zero.
pub fn format_millis(ms: f64) -> String {
    if !ms.is_finite() || ms <= 0.0 {
        return "0ns".to_string();
    }
    let ns = (ms * 1_000_000.0).round();
    if ns >= u64::MAX as f64 {
        return format_duration(Duration::from_nanos(u64::MAX));
    }
    format_duration(Duration::from_nanos(ns as u64))
}

/// Get the number of logical CPU cores
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// CPU cores the current process may run on
///
/// Returns an empty list when the platform does not expose core ids, in which
/// case worker pinning is silently skipped.
pub fn available_cores() -> Vec<CoreId> {
    match core_affinity::get_core_ids() {
        Some(ids) => ids,
        None => {
            warn!("Core ids unavailable on this platform; worker pinning disabled");
            Vec::new()
        }
    }
}

/// Pin the calling thread to `core`
///
/// Best effort: a refusal from the OS is logged and the worker keeps running
/// unpinned.
pub fn pin_current_thread(core: CoreId, worker_index: usize) -> bool {
    if core_affinity::set_for_current(core) {
        debug!("Worker {} pinned to core {}", worker_index, core.id);
        true
    } else {
        warn!(
            "Worker {}: failed to pin to core {}, continuing unpinned",
            worker_index, core.id
        );
        false
    }
}
