//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::CONFIG_FILE_NAME;

/// Sluice - tracked SQL files and changesets under a database lock
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version)]
#[command(
    about = "Sluice - tracked SQL files and changesets under a database lock",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Identity recorded as lock holder and executor
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Output format for command results.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a new Sluice project
    Init(InitArgs),

    /// Create the tracking tables in the target database
    Bootstrap,

    /// Run SQL files whose content changed since their last success
    Run(RunArgs),

    /// Changeset commands
    Changeset(ChangesetArgs),

    /// Lock commands
    Lock(LockArgs),

    /// Show execution history
    History(HistoryArgs),

    /// Display version information
    Version,
}

// =============================================================================
// Init Command
// =============================================================================

/// Arguments for the `init` command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path to initialize the project (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Database provider to use
    #[arg(short, long, default_value = "sqlite")]
    pub provider: DatabaseProvider,

    /// Database connection URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

/// Supported database providers
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DatabaseProvider {
    #[default]
    Sqlite,
    Postgresql,
    Mysql,
    Mssql,
}

impl std::fmt::Display for DatabaseProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseProvider::Sqlite => write!(f, "sqlite"),
            DatabaseProvider::Postgresql => write!(f, "postgresql"),
            DatabaseProvider::Mysql => write!(f, "mysql"),
            DatabaseProvider::Mssql => write!(f, "mssql"),
        }
    }
}

// =============================================================================
// Run Command
// =============================================================================

/// Flags shared by every command that executes SQL
#[derive(Args, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Write rendered SQL to the output directory instead of executing it
    #[arg(long)]
    pub dry_run: bool,

    /// Fail files whose content drifted from their last successful run
    #[arg(long)]
    pub strict: bool,

    /// Keep going after a failed file
    #[arg(long)]
    pub continue_on_error: bool,
}

/// Arguments for the `run` command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Files or directories to run (overrides `[paths] include`)
    #[arg(value_name = "PATH")]
    pub include: Vec<PathBuf>,

    /// Regex of relative paths to leave out (added to `[paths] exclude`)
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Run files even when unchanged
    #[arg(short, long)]
    pub force: bool,

    #[command(flatten)]
    pub exec: ExecArgs,
}

// =============================================================================
// Changeset Command
// =============================================================================

/// Arguments for the `changeset` command
#[derive(Args, Debug)]
pub struct ChangesetArgs {
    #[command(subcommand)]
    pub command: ChangesetSubcommand,
}

/// Changeset subcommands
#[derive(Subcommand, Debug)]
pub enum ChangesetSubcommand {
    /// Scaffold a new changeset folder
    New {
        /// Changeset name (letters, digits, '_' or '-')
        name: String,
    },

    /// Apply one changeset
    Apply {
        /// Changeset folder name
        name: String,

        /// Apply even if already applied
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Revert one changeset
    Revert {
        /// Changeset folder name
        name: String,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Apply every pending changeset in name order
    #[command(name = "ff", alias = "fast-forward")]
    FastForward {
        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Revert the most recently named applied changesets
    Rewind {
        /// How many changesets to revert
        #[arg(default_value_t = 1)]
        count: usize,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Show the state of every changeset
    Status,
}

// =============================================================================
// Lock Command
// =============================================================================

/// Arguments for the `lock` command
#[derive(Args, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockSubcommand,
}

/// Lock subcommands
#[derive(Subcommand, Debug)]
pub enum LockSubcommand {
    /// Show who holds the lock
    Status,

    /// Take or renew the lock for this actor
    Acquire,

    /// Release the lock held by this actor
    Release {
        /// Release by token instead of by actor
        #[arg(long)]
        token: Option<String>,
    },

    /// Remove the lock whoever holds it
    ForceRelease,
}

// =============================================================================
// History Command
// =============================================================================

/// Arguments for the `history` command
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Show every record of one operation
    pub operation_id: Option<String>,

    /// Number of operations to list
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,
}
