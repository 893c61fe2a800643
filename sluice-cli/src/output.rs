//! Styled terminal output utilities.

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;

use sluice_migrate::{BatchResult, BatchStatus, ChangeResult, FileOutcome, FileResult};

use crate::error::CliResult;

/// Print a header/title
pub fn header(text: &str) {
    println!();
    println!("{}", text.bold().cyan());
    println!("{}", "─".repeat(text.chars().count()).dimmed());
    println!();
}

/// Print a section header
pub fn section(text: &str) {
    println!("{}", text.bold().white());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a success message
pub fn success(text: &str) {
    println!("{} {}", "✔".green().bold(), text.green());
}

/// Print an info message
pub fn info(text: &str) {
    println!("{} {}", "ℹ".blue().bold(), text);
}

/// Print a warning message
pub fn warn(text: &str) {
    println!("{} {}", "⚠".yellow().bold(), text.yellow());
}

/// Print an error message
pub fn error(text: &str) {
    eprintln!("{} {}", "✖".red().bold(), text.red());
}

/// Print a list item
pub fn list_item(text: &str) {
    println!("  {} {}", "•".dimmed(), text);
}

/// Print a newline
pub fn newline() {
    println!();
}

/// Print dimmed text
pub fn dim(text: &str) {
    println!("{}", text.dimmed());
}

/// Style text as success (green)
pub fn style_success(text: &str) -> String {
    text.green().to_string()
}

/// Style text as pending (yellow)
pub fn style_pending(text: &str) -> String {
    text.yellow().to_string()
}

/// Style text as error (red)
pub fn style_error(text: &str) -> String {
    text.red().to_string()
}

/// Print `value` as pretty JSON on stdout.
pub fn json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Human-readable UTC timestamp.
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn file_line(result: &FileResult) -> String {
    match &result.outcome {
        FileOutcome::Success { duration_ms } => format!(
            "{} {} {}",
            style_success("✔"),
            result.filepath,
            format!("({} ms)", duration_ms).dimmed()
        ),
        FileOutcome::Skipped { reason } => format!(
            "{} {} {}",
            "-".dimmed(),
            result.filepath.dimmed(),
            format!("(skipped: {})", reason).dimmed()
        ),
        FileOutcome::DryRun { output_path } => format!(
            "{} {} -> {}",
            style_pending("○"),
            result.filepath,
            output_path.display()
        ),
        FileOutcome::Failed { error, .. } => format!(
            "{} {}\n      {}",
            style_error("✖"),
            result.filepath,
            style_error(error)
        ),
    }
}

/// Style a batch status word.
pub fn status_word(status: BatchStatus) -> String {
    match status {
        BatchStatus::Success => style_success(status.as_str()),
        BatchStatus::Partial => style_pending(status.as_str()),
        BatchStatus::Failed => style_error(status.as_str()),
    }
}

/// Print every file of a batch and its summary line.
pub fn batch(result: &BatchResult) {
    if result.file_results.is_empty() {
        dim("  no files");
    }
    for file in &result.file_results {
        println!("  {}", file_line(file));
    }
    newline();
    kv("Operation", &result.operation_id);
    kv("Status", &status_word(result.status));
    kv("Summary", &result.summary());
}

/// Print one changeset result.
pub fn change(result: &ChangeResult) {
    section(&format!("{} {}", result.direction, result.name));
    for warning in &result.warnings {
        warn(warning);
    }
    for file in &result.batch.file_results {
        println!("  {}", file_line(file));
    }
    kv("Status", &status_word(result.batch.status));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn result(outcome: FileOutcome) -> FileResult {
        FileResult {
            filepath: "schema/users.sql".into(),
            checksum: None,
            outcome,
        }
    }

    #[test]
    fn test_file_lines_name_the_file() {
        let lines = [
            file_line(&result(FileOutcome::Success { duration_ms: 12 })),
            file_line(&result(FileOutcome::Skipped {
                reason: "unchanged".into(),
            })),
            file_line(&result(FileOutcome::DryRun {
                output_path: PathBuf::from(".sluice/dry-run/schema/users.sql"),
            })),
            file_line(&result(FileOutcome::Failed {
                error: "syntax error".into(),
                duration_ms: 3,
            })),
        ];
        for line in &lines {
            assert!(line.contains("schema/users.sql"));
        }
        assert!(lines[1].contains("unchanged"));
        assert!(lines[3].contains("syntax error"));
    }

    #[test]
    fn test_timestamp_format() {
        let at = DateTime::from_timestamp_millis(0).unwrap();
        assert_eq!(timestamp(&at), "1970-01-01 00:00:00 UTC");
    }
}
