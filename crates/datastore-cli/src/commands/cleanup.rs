//! Cleanup command: delete expired entries.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use datastore_storage::{SweepOutcome, spawn_auto_cleanup};

use crate::config_bridge;
use crate::context::StoreContext;
use crate::theme::{Theme, entry_table};

/// Options of `datastore cleanup`.
#[derive(Debug, Clone, Default)]
pub(crate) struct CleanupArgs {
    pub(crate) dry_run: bool,
    pub(crate) namespace: Option<String>,
    pub(crate) owner_type: Option<String>,
    pub(crate) yes: bool,
    pub(crate) watch: bool,
}

/// Run one sweep, or keep sweeping with `--watch`.
pub(crate) async fn run_cleanup(ctx: &StoreContext, args: CleanupArgs) -> Result<()> {
    if args.watch {
        return watch(ctx).await;
    }

    println!("{}", Theme::info("Searching for expired entries..."));

    let mut options = config_bridge::to_sweep_options(&ctx.config);
    options.dry_run = args.dry_run;
    options.namespace = args.namespace;
    options.owner_type = args.owner_type;

    let yes = args.yes;
    let outcome = ctx.sweep().run(&options, |count| confirm(count, yes)).await?;

    match outcome {
        SweepOutcome::NothingToDo => {
            println!("{}", Theme::success("No expired entries found."));
        },
        SweepOutcome::DryRun { count, sample } => {
            println!(
                "{}",
                Theme::warning(&format!("Found {count} expired entries (dry run)"))
            );
            println!("{}", Theme::separator());
            println!("{}", entry_table(&sample));
            let shown = u64::try_from(sample.len()).unwrap_or(u64::MAX);
            if count > shown {
                println!(
                    "{}",
                    Theme::dimmed(&format!("... and {} more", count.saturating_sub(shown)))
                );
            }
            println!("{}", Theme::separator());
            println!("{}", Theme::info("Run without --dry-run to delete them."));
        },
        SweepOutcome::Cancelled { count } => {
            println!(
                "{}",
                Theme::info(&format!("Cleanup cancelled; {count} expired entries kept."))
            );
        },
        SweepOutcome::Deleted { count } => {
            println!(
                "{}",
                Theme::success(&format!("Deleted {count} expired entries."))
            );
        },
    }
    Ok(())
}

fn confirm(count: u64, yes: bool) -> bool {
    if yes {
        return true;
    }
    println!(
        "{}",
        Theme::warning(&format!("Found {count} expired entries."))
    );
    dialoguer::Confirm::new()
        .with_prompt("Delete them?")
        .default(false)
        .interact()
        .unwrap_or_else(|e| {
            warn!(error = %e, "confirmation prompt failed; keeping entries");
            false
        })
}

/// Sweep every `cleanup.interval_secs` until Ctrl-C.
async fn watch(ctx: &StoreContext) -> Result<()> {
    let interval = Duration::from_secs(ctx.config.cleanup.interval_secs);
    println!(
        "{}",
        Theme::info(&format!(
            "Sweeping expired entries every {}s; press Ctrl-C to stop.",
            interval.as_secs()
        ))
    );
    let handle = spawn_auto_cleanup(ctx.store(), interval);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    handle.abort();
    println!("{}", Theme::dimmed("Stopped."));
    Ok(())
}
