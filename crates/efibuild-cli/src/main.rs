//! efibuild - reproducible OpenCore EFI builds

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use efibuild_cli::Cli;
use efibuild_cli::cmd;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // --verbose wins over RUST_LOG
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Errors are already rendered by the reporter
    match cmd::execute(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
