//! `sluice changeset` commands - Create, apply and revert changesets.

use sluice_migrate::{BatchChangeResult, ChangeResult, ChangesetState, ChangesetStatus, scaffold};

use crate::cli::{ChangesetArgs, ChangesetSubcommand};
use crate::commands::{Context, batch_outcome, until_interrupted};
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the changeset command
pub async fn run(ctx: &Context, args: ChangesetArgs) -> CliResult<()> {
    match args.command {
        ChangesetSubcommand::New { name } => run_new(ctx, &name).await,
        ChangesetSubcommand::Apply { name, force, exec } => {
            let engine = ctx.engine().await?;
            let options = ctx.run_options(&engine, &exec).force(force);
            let result =
                until_interrupted(&engine, engine.apply(&ctx.actor, &name, &options)).await?;
            report_one(ctx, &result)
        }
        ChangesetSubcommand::Revert { name, exec } => {
            let engine = ctx.engine().await?;
            let options = ctx.run_options(&engine, &exec);
            let result =
                until_interrupted(&engine, engine.revert(&ctx.actor, &name, &options)).await?;
            report_one(ctx, &result)
        }
        ChangesetSubcommand::FastForward { exec } => {
            let engine = ctx.engine().await?;
            let options = ctx.run_options(&engine, &exec);
            let result =
                until_interrupted(&engine, engine.fast_forward(&ctx.actor, &options)).await?;
            report_many(ctx, "Fast-forward", &result)
        }
        ChangesetSubcommand::Rewind { count, exec } => {
            let engine = ctx.engine().await?;
            let options = ctx.run_options(&engine, &exec);
            let result =
                until_interrupted(&engine, engine.rewind(&ctx.actor, count, &options)).await?;
            report_many(ctx, "Rewind", &result)
        }
        ChangesetSubcommand::Status => run_status(ctx).await,
    }
}

/// `sluice changeset new` works without a database.
async fn run_new(ctx: &Context, name: &str) -> CliResult<()> {
    let dir = ctx.project_root.join(&ctx.config.paths.changesets);
    let path = scaffold(&dir, name).await?;

    if ctx.json() {
        return output::json(&serde_json::json!({ "path": path }));
    }

    success(&format!("Created {}", path.display()));
    output::list_item("Add SQL to change/ and the matching undo to revert/");
    Ok(())
}

fn report_one(ctx: &Context, result: &ChangeResult) -> CliResult<()> {
    if ctx.json() {
        output::json(result)?;
    } else {
        output::change(result);
    }
    batch_outcome(result.batch.status, result.batch.summary())
}

fn report_many(ctx: &Context, title: &str, result: &BatchChangeResult) -> CliResult<()> {
    if ctx.json() {
        output::json(result)?;
    } else {
        output::header(title);
        if result.results.is_empty() {
            output::info("Nothing to do");
        }
        for change in &result.results {
            output::change(change);
        }
        output::newline();
        output::kv("Summary", &result.summary());
    }
    batch_outcome(result.status, result.summary())
}

async fn run_status(ctx: &Context) -> CliResult<()> {
    let engine = ctx.engine().await?;
    let status = engine.changeset_status().await?;

    if ctx.json() {
        return output::json(&status);
    }

    output::header("Changesets");
    if status.is_empty() {
        output::dim(&format!(
            "No changesets in {}",
            engine.changesets_path().display()
        ));
    }
    for entry in &status {
        println!("  {}", status_line(entry));
    }
    Ok(())
}

fn status_line(entry: &ChangesetStatus) -> String {
    let state = format!("{:<10}", entry.state.to_string());
    let state = match entry.state {
        ChangesetState::Applied => output::style_success(&state),
        ChangesetState::Unapplied | ChangesetState::Reverted => output::style_pending(&state),
        ChangesetState::Orphaned => output::style_error(&state),
    };
    let when = match (entry.state, &entry.applied_at, &entry.reverted_at) {
        (ChangesetState::Reverted, _, Some(at)) => format!(" (reverted {})", output::timestamp(at)),
        (_, Some(at), _) => format!(" (applied {})", output::timestamp(at)),
        _ => String::new(),
    };
    format!("{} {}{}", state, entry.name, when)
}
