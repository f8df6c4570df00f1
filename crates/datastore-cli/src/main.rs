//! Datastore CLI - maintenance commands for the scoped data store.
//!
//! Opens the persistent entry table named by the configuration and runs one
//! command against it: sweep expired entries, export or import a scope as
//! JSON, or list keys.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;
pub mod config_bridge;
mod context;
mod theme;

use commands::{cleanup, keys, transfer};
use context::{ScopeArgs, StoreContext};
use theme::Theme;

/// Datastore - scoped key-value storage maintenance
#[derive(Parser)]
#[command(name = "datastore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file layered over ~/.datastore/config.toml
    #[arg(short, long, global = true, env = "DATASTORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete expired entries
    Cleanup {
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,

        /// Only entries in this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Only entries whose owner is of this kind (e.g. user)
        #[arg(short = 't', long = "type")]
        owner_type: Option<String>,

        /// Delete without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Keep sweeping every cleanup.interval_secs until Ctrl-C
        #[arg(long, conflicts_with = "dry_run")]
        watch: bool,
    },

    /// Export the live entries of a scope to a JSON file
    Export {
        /// Target file; relative paths resolve against export.path
        file: PathBuf,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Import entries from a JSON export into a scope
    Import {
        /// Source file; relative paths resolve against export.path
        file: PathBuf,

        /// Keep keys that already have a live entry
        #[arg(long)]
        no_overwrite: bool,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List the live keys of a scope
    Keys {
        /// Only keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Print values next to keys
        #[arg(long)]
        values: bool,

        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{}", Theme::error(&format!("{e:#}")));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let resolved = datastore_config::Config::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    let config = resolved.config;

    let mut log_config = config_bridge::to_log_config(&config);
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = datastore_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }
    for file in &resolved.loaded_files {
        tracing::debug!(file = %file, "configuration file merged");
    }

    let ctx = StoreContext::open(config)?;
    let result = match cli.command {
        Commands::Cleanup {
            dry_run,
            namespace,
            owner_type,
            yes,
            watch,
        } => {
            cleanup::run_cleanup(
                &ctx,
                cleanup::CleanupArgs {
                    dry_run,
                    namespace,
                    owner_type,
                    yes,
                    watch,
                },
            )
            .await
        },
        Commands::Export { file, scope } => transfer::run_export(&ctx, &file, &scope).await,
        Commands::Import {
            file,
            no_overwrite,
            scope,
        } => transfer::run_import(&ctx, &file, &scope, !no_overwrite).await,
        Commands::Keys {
            prefix,
            values,
            scope,
        } => keys::run_keys(&ctx, &scope, prefix.as_deref(), values).await,
    };
    ctx.close().await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cleanup() {
        let cli = Cli::try_parse_from([
            "datastore", "cleanup", "--dry-run", "--namespace", "cache", "--type", "user",
        ])
        .unwrap();
        match cli.command {
            Commands::Cleanup {
                dry_run,
                namespace,
                owner_type,
                yes,
                watch,
            } => {
                assert!(dry_run);
                assert_eq!(namespace.as_deref(), Some("cache"));
                assert_eq!(owner_type.as_deref(), Some("user"));
                assert!(!yes);
                assert!(!watch);
            },
            _ => panic!("expected cleanup"),
        }
    }

    #[test]
    fn test_owner_flags_go_together() {
        assert!(Cli::try_parse_from(["datastore", "keys", "--owner-type", "user"]).is_err());
        let cli = Cli::try_parse_from([
            "datastore", "export", "out.json", "--owner-type", "user", "--owner-id", "7",
        ])
        .unwrap();
        match cli.command {
            Commands::Export { file, scope } => {
                assert_eq!(file, PathBuf::from("out.json"));
                assert_eq!(scope.owner_type.as_deref(), Some("user"));
                assert_eq!(scope.owner_id, Some(7));
                assert_eq!(scope.namespace, None);
            },
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_import_overwrites_by_default() {
        let cli = Cli::try_parse_from(["datastore", "import", "in.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Import {
                no_overwrite: false,
                ..
            }
        ));
    }
}
