//! # Parabench Command-Line Driver
//!
//! Runs one of the bundled demo operations through the harness:
//!
//! 1. **Initialize logging**: colored console output, optional log file
//! 2. **Parse arguments**: harness counts, delays and the demo workload
//! 3. **Run rounds**: every non-final round is printed and recorded as it ends
//! 4. **Report the final round**: the controller hands it back to us
//! 5. **Finalize**: write the consolidated JSON results file

use anyhow::Result;
use clap::Parser;
use parabench::{
    cli::Args,
    logging::init_logging,
    results::{describe_round, ConsoleReporter, ResultsManager},
    HarnessConfig, RoundController, RoundReporter, RoundResult, VERSION,
};
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the file writer flushes.
    let _log_guard = init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    info!("Starting parabench {}", VERSION);
    debug!("Configuration: {:?}", args);

    let config = HarnessConfig::from(&args);
    let workload = args.workload.build(args.work_time, args.failure_rate);
    let controller = RoundController::new(config.clone())?;

    let mut results_manager = ResultsManager::new(&args.output_file, config)?;
    if let Some(ref streaming_file) = args.streaming_output {
        info!("Streaming rounds to: {:?}", streaming_file);
        results_manager.enable_streaming(streaming_file)?;
    }
    let mut console = ConsoleReporter::with_run_id(results_manager.run_id());

    info!(
        "Running '{}' with {} workers x {} loops for {} rounds",
        args.workload, args.workers, args.loops, args.rounds
    );

    let outcome = {
        let mut reporter = |round: &RoundResult<()>| -> Result<()> {
            console.report_round(round)?;
            results_manager.add_round(round)
        };
        controller.run_with_reporter(&workload, &args.worker_args, &mut reporter)?
    };

    match outcome.final_round() {
        Some(round) => {
            if !outcome.final_round_reported() {
                console.report_round(round)?;
                results_manager.add_round(round)?;
            }
            info!("{}", describe_round(round));
        }
        None => warn!("Cancelled before the first round; nothing to report"),
    }

    results_manager.finalize()?;

    info!("parabench completed");
    Ok(())
}
