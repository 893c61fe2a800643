//! `sluice bootstrap` command - Create the tracking tables.

use sluice_migrate::VERSION;

use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the bootstrap command
pub async fn run(ctx: &Context) -> CliResult<()> {
    let engine = ctx.engine().await?;
    engine.bootstrap().await?;

    if ctx.json() {
        return output::json(&serde_json::json!({ "bootstrapped": true, "version": VERSION }));
    }

    success(&format!("Tracking tables ready (sluice {})", VERSION));
    Ok(())
}
