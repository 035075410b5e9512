use anyhow::Result;
use chrono::Local;
use clap::Parser;
use cutover_verifier::presentation::cli_summary::{print_perf_summary, print_run_summary};
use cutover_verifier::presentation::writers::{write_to_file, writer_for};
use cutover_verifier::{
    build_verifier, init_tracing, AppConfig, LogLevel, LogReporter, PerfReport, StatusPublisher,
};
use std::path::Path;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "cutover-verifier",
    about = "Verify that a migrated database matches its source before cutover."
)]
struct Cli {
    #[arg(short, long, default_value = "verifier.toml")]
    config: String,

    /// Report format written to the output directory: "json" or "none".
    #[arg(short, long, default_value = "json")]
    format: String,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log SQL and per-batch spans.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(match (cli.quiet, cli.verbose) {
        (true, _) => LogLevel::Error,
        (_, true) => LogLevel::Debug,
        _ => LogLevel::Info,
    });

    let writer = match cli.format.as_str() {
        "none" => None,
        fmt => Some(writer_for(fmt).ok_or_else(|| anyhow::anyhow!("Unknown format: {}", fmt))?),
    };

    let cfg = AppConfig::load(&cli.config)?;
    let publisher = StatusPublisher::default();
    let log_reporter = LogReporter::spawn(&publisher);

    // Writes are assumed frozen: this binary runs only the cutover pass.
    let (verifier, perf) = build_verifier(&cfg, publisher).await?;
    let verdict = verifier.verify_before_cutover().await;
    let runs = verifier.runs();
    drop(verifier);
    if let Err(e) = log_reporter.await {
        eprintln!("status log reporter stopped abnormally: {}", e);
    }

    for run in &runs {
        print_run_summary(run);
    }
    print_perf_summary(&PerfReport::snapshot(&perf));

    if let Some(writer) = writer {
        if !runs.is_empty() {
            let name = format!("{}_cutover", Local::now().format("%Y%m%d_%H%M%S"));
            let path = write_to_file(&*writer, &runs, Path::new(&cfg.output.dir), &name)?;
            println!("Report written to {}", path.display());
        }
    }

    match verdict {
        Ok(Some(_)) => Ok(ExitCode::SUCCESS),
        Ok(None) => {
            println!("Verification disabled; cutover not checked.");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            Ok(ExitCode::FAILURE)
        }
    }
}
