//! Sluice CLI - Command-line interface for the Sluice change engine.
//!
//! This crate provides the `sluice` binary: it loads `sluice.toml`, resolves
//! the actor identity, opens the configured database and dispatches to the
//! engine in `sluice-migrate`.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod output;

use crate::cli::{Cli, Command};
use crate::commands::Context;
use crate::error::CliResult;

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> CliResult<()> {
    let ctx = Context::load(&cli)?;

    match cli.command {
        Command::Init(args) => commands::init::run(&ctx, args).await,
        Command::Bootstrap => commands::bootstrap::run(&ctx).await,
        Command::Run(args) => commands::run::run(&ctx, args).await,
        Command::Changeset(args) => commands::changeset::run(&ctx, args).await,
        Command::Lock(args) => commands::lock::run(&ctx, args).await,
        Command::History(args) => commands::history::run(&ctx, args).await,
        Command::Version => commands::version::run(&ctx).await,
    }
}
