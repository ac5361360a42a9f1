//! # Bourbon CLI
//!
//! The `bourbon` command: create projects, run the server, scaffold
//! applications, generate migrations from model changes and apply or roll
//! them back.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod commands;
pub mod prompt;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

pub use prompt::Prompt;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "bourbon")]
#[command(about = "Bourbon - web framework with model-driven migrations")]
#[command(version)]
pub struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = bourbon_core::config::DEFAULT_CONFIG_FILE, env = "BOURBON_CONFIG")]
    pub config: PathBuf,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new project in the current directory
    New {
        /// Project name
        name: String,

        /// Database the settings are written for
        #[arg(long, alias = "db", default_value = "sqlite", value_parser = commands::DATABASES)]
        database: String,
    },

    /// Start the HTTP server
    Serve,

    /// Scaffold a new application under the apps directory
    #[command(name = "create:app")]
    CreateApp {
        /// Application name
        name: String,
    },

    /// Generate migrations from model changes
    #[command(name = "make:migration")]
    MakeMigration {
        /// Migration name, defaults to `initial` or `auto`
        name: Option<String>,

        /// Only this application
        #[arg(long)]
        app: Option<String>,

        /// Accept destructive changes without asking
        #[arg(short, long)]
        yes: bool,

        /// Print the SQL without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply pending migrations
    Migrate {
        /// Stop after this migration id
        #[arg(long)]
        to: Option<String>,
    },

    /// List migrations and whether they are applied
    #[command(name = "migrate:status")]
    MigrateStatus,

    /// Roll back applied migrations (the newest one by default)
    #[command(name = "migrate:rollback")]
    MigrateRollback {
        /// Roll back everything applied after this id
        #[arg(long, conflicts_with = "id")]
        to: Option<String>,

        /// Roll back exactly this id
        #[arg(long)]
        id: Option<String>,
    },
}

/// Run the parsed command
///
/// # Errors
///
/// Returns the command's error with context for the user.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = || commands::load_config(&cli.config, cli.verbose);
    match cli.command {
        Command::New { name, database } => {
            commands::new_project(Path::new("."), &name, &database).map(|_| ())
        }
        Command::Serve => commands::serve(config()?).await,
        Command::CreateApp { name } => {
            commands::create_app(&config()?.migrations.apps_dir, &name).map(|_| ())
        }
        Command::MakeMigration {
            name,
            app,
            yes,
            dry_run,
        } => commands::make_migration(&config()?, name.as_deref(), app.as_deref(), yes, dry_run),
        Command::Migrate { to } => commands::migrate(config()?, to.as_deref()).await,
        Command::MigrateStatus => commands::status(config()?).await,
        Command::MigrateRollback { to, id } => {
            commands::rollback(config()?, to.as_deref(), id.as_deref()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_colon_commands() {
        let cli = Cli::parse_from(["bourbon", "make:migration", "add_age", "--app", "blog", "--yes"]);
        match cli.command {
            Command::MakeMigration { name, app, yes, dry_run } => {
                assert_eq!(name.as_deref(), Some("add_age"));
                assert_eq!(app.as_deref(), Some("blog"));
                assert!(yes);
                assert!(!dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_rollback_flags_conflict() {
        let parsed = Cli::try_parse_from(["bourbon", "migrate:rollback", "--to", "a", "--id", "b"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_new_command_database_flag() {
        let cli = Cli::parse_from(["bourbon", "new", "shop", "--database", "mysql"]);
        assert!(matches!(
            cli.command,
            Command::New { ref name, ref database } if name == "shop" && database == "mysql"
        ));

        let default = Cli::parse_from(["bourbon", "new", "shop"]);
        assert!(matches!(default.command, Command::New { ref database, .. } if database == "sqlite"));

        let alias = Cli::parse_from(["bourbon", "new", "shop", "--db", "postgres"]);
        assert!(matches!(alias.command, Command::New { ref database, .. } if database == "postgres"));

        assert!(Cli::try_parse_from(["bourbon", "new", "shop", "--database", "oracle"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["bourbon", "migrate:status", "--config", "conf/app.toml"]);
        assert_eq!(cli.config, PathBuf::from("conf/app.toml"));
        assert!(matches!(cli.command, Command::MigrateStatus));
    }
}
