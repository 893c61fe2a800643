//! `sluice run` command - Run changed SQL files.

use crate::cli::RunArgs;
use crate::commands::{Context, batch_outcome, until_interrupted};
use crate::error::CliResult;
use crate::output;

/// Run the run command
pub async fn run(ctx: &Context, args: RunArgs) -> CliResult<()> {
    let engine = ctx.engine().await?;

    let mut rules = ctx.config.rules();
    if !args.include.is_empty() {
        rules.include = args.include;
    }
    rules.exclude.extend(args.exclude);

    let files = engine.discover(&rules).await?;
    let options = ctx.run_options(&engine, &args.exec).force(args.force);

    let result = until_interrupted(&engine, engine.run_files(&ctx.actor, &files, &options)).await?;

    if ctx.json() {
        output::json(&result)?;
    } else {
        output::header(if options.dry_run { "Run (dry run)" } else { "Run" });
        output::batch(&result);
    }

    batch_outcome(result.status, result.summary())
}
