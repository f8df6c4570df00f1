//! Export and import commands.

use std::path::Path;

use anyhow::{Context, Result};

use crate::context::{ScopeArgs, StoreContext};
use crate::theme::Theme;

/// Export the live entries of a scope to `file`.
pub(crate) async fn run_export(ctx: &StoreContext, file: &Path, scope: &ScopeArgs) -> Result<()> {
    ctx.auto_cleanup().await?;
    let (sink, name) = ctx.sink_for(file)?;
    let root = sink.root().to_path_buf();
    let service = ctx.service(scope, Some(sink));

    let count = service
        .export(&name)
        .await
        .with_context(|| format!("export of {} failed", service.scope()))?;

    println!(
        "{}",
        Theme::success(&format!(
            "Exported {count} entries from {} to {}",
            service.scope(),
            root.join(&name).display()
        ))
    );
    Ok(())
}

/// Import entries from `file` into a scope.
pub(crate) async fn run_import(
    ctx: &StoreContext,
    file: &Path,
    scope: &ScopeArgs,
    overwrite: bool,
) -> Result<()> {
    ctx.auto_cleanup().await?;
    let (sink, name) = ctx.sink_for(file)?;
    let service = ctx.service(scope, Some(sink));

    let imported = service
        .import(&name, overwrite)
        .await
        .with_context(|| format!("import of {} failed", file.display()))?;

    println!(
        "{}",
        Theme::success(&format!(
            "Imported {imported} entries into {}",
            service.scope()
        ))
    );
    if !overwrite {
        println!(
            "{}",
            Theme::dimmed("Existing keys were kept (--no-overwrite).")
        );
    }
    Ok(())
}
