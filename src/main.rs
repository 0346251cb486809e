//! app-inventory CLI: writes the service principal inventory report.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app_inventory::{run_report, AppError, CliArgs};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("app-inventory starting");

    let config = match args.resolve() {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    match run_report(&config).await {
        Ok(stats) => {
            info!("Report written to {}", stats.output_path.display());
            info!("  Service principals: {}", stats.entities);
            info!("  Sign-in records: {}", stats.telemetry_records);
            info!("  Batch calls: {}", stats.batch_calls);
            info!("  Failed lookups: {}", stats.sub_request_errors);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn fail(error: &AppError) -> ExitCode {
    let presentation = error.to_presentation();
    eprintln!("{}: {}", presentation.title, presentation.message);
    if let Some(action) = presentation.action {
        eprintln!("{}", action);
    }
    ExitCode::FAILURE
}
