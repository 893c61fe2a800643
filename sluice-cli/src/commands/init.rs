//! `sluice init` command - Initialize a new Sluice project.

use std::path::Path;

use crate::cli::{DatabaseProvider, InitArgs};
use crate::commands::Context;
use crate::config::{CHANGESETS_DIR, CONFIG_FILE_NAME, Config, SCHEMA_DIR};
use crate::error::{CliError, CliResult};
use crate::output::{self, success};

/// Run the init command
pub async fn run(ctx: &Context, args: InitArgs) -> CliResult<()> {
    let project_path = args.path.as_path();
    std::fs::create_dir_all(project_path)?;

    let config_path = project_path.join(CONFIG_FILE_NAME);
    if config_path.exists() && !args.force {
        return Err(CliError::Config(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )));
    }

    create_project_structure(project_path)?;

    let mut config = Config::default_for_provider(&args.provider.to_string());
    config.database.url = Some(args.url.unwrap_or_else(|| default_url(args.provider)));
    config.save(&config_path)?;

    if ctx.json() {
        return output::json(&serde_json::json!({
            "config": config_path,
            "provider": config.database.provider,
        }));
    }

    output::header("Initialize Sluice Project");
    success("Project initialized");
    output::newline();

    output::section("Created files");
    output::kv(CONFIG_FILE_NAME, "Sluice configuration");
    output::kv(&format!("{}/", SCHEMA_DIR), "SQL files run by `sluice run`");
    output::kv(&format!("{}/", CHANGESETS_DIR), "Changeset folders");
    output::newline();

    output::section("Next steps");
    output::list_item("Point [database] url at your database");
    output::list_item("Run `sluice bootstrap` to create the tracking tables");
    output::list_item("Run `sluice changeset new <name>` to start a changeset");

    Ok(())
}

fn default_url(provider: DatabaseProvider) -> String {
    match provider {
        DatabaseProvider::Sqlite => "sqlite://sluice.db",
        DatabaseProvider::Postgresql => "postgresql://postgres@localhost:5432/app",
        DatabaseProvider::Mysql => "mysql://root@localhost:3306/app",
        DatabaseProvider::Mssql => "mssql://sa@localhost:1433/app",
    }
    .to_string()
}

/// Create the project directory structure
fn create_project_structure(path: &Path) -> CliResult<()> {
    for dir in [SCHEMA_DIR, CHANGESETS_DIR] {
        let dir = path.join(dir);
        std::fs::create_dir_all(&dir)?;
        let gitkeep = dir.join(".gitkeep");
        if !gitkeep.exists() {
            std::fs::write(gitkeep, "")?;
        }
    }
    Ok(())
}
