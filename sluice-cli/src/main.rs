//! Sluice CLI - Command-line interface for the Sluice change engine.

use clap::Parser;

use sluice_cli::cli::{Cli, OutputFormat};
use sluice_cli::error::CliError;
use sluice_cli::{logging, output};

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = sluice_cli::run(cli).await {
        report(&e, format);
        std::process::exit(e.exit_code());
    }
}

fn report(error: &CliError, format: OutputFormat) {
    match (format, error) {
        // The batch result was already printed
        (OutputFormat::Json, CliError::BatchFailed(_)) => {}
        (OutputFormat::Json, _) => println!("{}", error.to_json()),
        (OutputFormat::Text, _) => {
            output::newline();
            output::error(&error.to_string());
        }
    }
}
