//! bulkload - Main entry point

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

use bulkload_cli::{Cli, Commands};
use bulkload_common::logging::{init_logging, LogConfig, LogLevel};
use bulkload_core::scheduler::BatchReport;
use bulkload_core::{
    BatchScheduler, LoadDefaults, LoadJob, NotifyEvent, NotifySink, PgTargetFactory,
    ProviderRegistry,
};

#[tokio::main]
async fn main() {
    // Pick up .env before anything reads the environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_config = LogConfig::from_env().unwrap_or_default();
    let log_config = if cli.verbose {
        log_config.with_level(LogLevel::Debug)
    } else {
        log_config
    };
    // The CLI still works without logging
    let _ = init_logging(&log_config);

    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let database_url = cli.database_url.clone().context(
        "no database connection configured (set DATABASE_URL or pass --database-url)",
    )?;
    let factory = Arc::new(PgTargetFactory::new(database_url));

    let (sink, rx) = NotifySink::channel();
    let printer = tokio::spawn(print_notifications(rx));

    let result = execute_command(&cli, factory, sink).await;

    // The scheduler is gone; once the last sink clone drops the printer
    // drains and exits.
    let _ = printer.await;
    result
}

async fn execute_command(
    cli: &Cli,
    factory: Arc<PgTargetFactory>,
    sink: NotifySink,
) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Load { path, options } => {
            let mut defaults = LoadDefaults::from_env();
            options.apply_to_defaults(&mut defaults);
            let scheduler = BatchScheduler::new(
                defaults.clone(),
                factory,
                ProviderRegistry::builtin(),
                sink,
            );

            if path.is_dir() {
                // Directory sweeps are batches: per-file failures are
                // recorded, not escalated.
                let report = scheduler.run_directory(path).await?;
                report_batch(&report);
                return Ok(());
            }

            let mut job = LoadJob::from_defaults(&defaults, path.clone())?;
            options.apply_to_job(&mut job);
            let summary = scheduler.run_single(job).await?;
            info!(
                source = %path.display(),
                tables = summary.tables.len(),
                rows = summary.rows_loaded(),
                "load complete"
            );
            println!(
                "Loaded {} row(s) into {} table(s) from {}",
                summary.rows_loaded(),
                summary.tables.len(),
                path.display()
            );
            Ok(())
        }

        Commands::Queue { path, max_parallel } => {
            let mut defaults = LoadDefaults::from_env();
            if let Some(parallel) = max_parallel {
                defaults.max_parallel = *parallel;
            }
            let scheduler =
                BatchScheduler::new(defaults, factory, ProviderRegistry::builtin(), sink);

            let report = scheduler.run_queue_file(path).await?;
            report_batch(&report);
            // A batch run exits zero even when individual jobs failed; the
            // error records carry per-job status.
            Ok(())
        }
    }
}

fn report_batch(report: &BatchReport) {
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!(
                "ok    {} -> {} ({} rows)",
                outcome.source_path.display(),
                outcome.target_table,
                outcome.rows_loaded.unwrap_or(0)
            ),
            Some(message) => println!(
                "FAIL  {} -> {}: {}",
                outcome.source_path.display(),
                outcome.target_table,
                message
            ),
        }
    }
    println!(
        "{} succeeded, {} failed",
        report.succeeded_count(),
        report.failed_count()
    );
}

async fn print_notifications(mut rx: UnboundedReceiver<NotifyEvent>) {
    while let Some(event) = rx.recv().await {
        info!(
            table = %event.target_table,
            source = %event.source_path.display(),
            "{}",
            event.message
        );
    }
}
