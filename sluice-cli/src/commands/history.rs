//! `sluice history` command - Show execution history.

use sluice_migrate::ExecutionStatus;

use crate::cli::HistoryArgs;
use crate::commands::Context;
use crate::error::CliResult;
use crate::output;

/// Run the history command
pub async fn run(ctx: &Context, args: HistoryArgs) -> CliResult<()> {
    let engine = ctx.engine().await?;

    if let Some(operation_id) = args.operation_id {
        let records = engine.operation(&operation_id).await?;
        if ctx.json() {
            return output::json(&records);
        }

        output::header(&format!("Operation {}", operation_id));
        if records.is_empty() {
            output::dim("No records");
        }
        for record in &records {
            let status = match record.status {
                ExecutionStatus::Success => output::style_success(record.status.as_str()),
                ExecutionStatus::Skipped => output::style_pending(record.status.as_str()),
                ExecutionStatus::Failed => output::style_error(record.status.as_str()),
            };
            println!(
                "  {} {} ({} ms, {})",
                status,
                record.filepath,
                record.duration_ms,
                output::timestamp(&record.executed_at)
            );
            if let Some(error) = &record.error_message {
                println!("      {}", output::style_error(error));
            }
        }
        return Ok(());
    }

    let operations = engine.recent_operations(args.limit).await?;
    if ctx.json() {
        return output::json(&operations);
    }

    output::header("History");
    if operations.is_empty() {
        output::dim("No operations recorded");
    }
    for op in &operations {
        output::section(&op.operation_id);
        output::kv("By", &op.executed_by);
        output::kv("Started", &output::timestamp(&op.started_at));
        output::kv(
            "Files",
            &format!(
                "{} ({} succeeded, {} failed, {} skipped)",
                op.files, op.succeeded, op.failed, op.skipped
            ),
        );
    }
    Ok(())
}
