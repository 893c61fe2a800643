//! `sluice version` command - Display version information.

use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, kv};

/// Package version
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn drivers() -> Vec<&'static str> {
    let mut drivers = Vec::new();

    #[cfg(feature = "sqlite")]
    drivers.push("sqlite");

    #[cfg(feature = "postgres")]
    drivers.push("postgresql");

    drivers
}

/// Run the version command
pub async fn run(ctx: &Context) -> CliResult<()> {
    #[cfg(debug_assertions)]
    let build_mode = "debug";
    #[cfg(not(debug_assertions))]
    let build_mode = "release";

    if ctx.json() {
        return output::json(&serde_json::json!({
            "version": VERSION,
            "engine": sluice_migrate::VERSION,
            "build": build_mode,
            "drivers": drivers(),
        }));
    }

    kv("Version", VERSION);
    kv("Engine", sluice_migrate::VERSION);
    kv("Build", build_mode);

    let drivers = drivers();
    kv(
        "Drivers",
        &if drivers.is_empty() {
            "none".to_string()
        } else {
            drivers.join(", ")
        },
    );

    output::newline();
    output::dim("Dialects: sqlite, postgresql, mysql, mssql");

    Ok(())
}
