//! `sluice lock` commands - Inspect and manage the deployment lock.

use sluice_migrate::{Lock, LockStatus};

use crate::cli::{LockArgs, LockSubcommand};
use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the lock command
pub async fn run(ctx: &Context, args: LockArgs) -> CliResult<()> {
    let engine = ctx.engine().await?;

    match args.command {
        LockSubcommand::Status => {
            let status = engine.lock_status().await?;
            if ctx.json() {
                return output::json(&status);
            }
            match status {
                LockStatus::Free => output::info("Lock is free"),
                LockStatus::Held {
                    holder,
                    acquired_at,
                    expires_at,
                } => {
                    output::warn(&format!("Lock is held by {}", holder));
                    output::kv("Since", &output::timestamp(&acquired_at));
                    output::kv("Expires", &output::timestamp(&expires_at));
                }
            }
        }
        LockSubcommand::Acquire => {
            let lock = engine.acquire_lock(&ctx.actor).await?;
            if ctx.json() {
                return output::json(&lock);
            }
            success(&format!("Lock acquired by {}", lock.holder));
            print_lock(&lock);
        }
        LockSubcommand::Release { token } => {
            match token {
                Some(token) => engine.release_lock(&token).await?,
                None => engine.release_own_lock(&ctx.actor).await?,
            }
            if ctx.json() {
                return output::json(&serde_json::json!({ "released": true }));
            }
            success("Lock released");
        }
        LockSubcommand::ForceRelease => {
            let previous = engine.force_release_lock(&ctx.actor).await?;
            if ctx.json() {
                return output::json(&serde_json::json!({ "previous": previous }));
            }
            match previous {
                Some(lock) => success(&format!("Removed lock held by {}", lock.holder)),
                None => output::info("Lock was already free"),
            }
        }
    }

    Ok(())
}

fn print_lock(lock: &Lock) {
    output::kv("Token", &lock.token);
    output::kv("Since", &output::timestamp(&lock.acquired_at));
    output::kv("Expires", &output::timestamp(&lock.expires_at));
}
