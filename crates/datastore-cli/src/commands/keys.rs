//! Keys command: list live keys of a scope.

use anyhow::Result;

use crate::context::{ScopeArgs, StoreContext};
use crate::theme::Theme;

/// Print the live keys of a scope, optionally filtered by prefix.
pub(crate) async fn run_keys(
    ctx: &StoreContext,
    scope: &ScopeArgs,
    prefix: Option<&str>,
    with_values: bool,
) -> Result<()> {
    ctx.auto_cleanup().await?;
    let service = ctx.service(scope, None);

    let entries = match prefix {
        Some(p) => service.starting_with(p).await?,
        None => service.all().await?,
    };

    println!("{}", Theme::header(&format!("Keys in {}", service.scope())));
    if entries.is_empty() {
        println!("{}", Theme::dimmed("(none)"));
        return Ok(());
    }
    for (key, value) in &entries {
        if with_values {
            println!("  {key} = {}", serde_json::to_string(value)?);
        } else {
            println!("  {key}");
        }
    }
    println!(
        "{}",
        Theme::dimmed(&format!("{} keys", entries.len()))
    );
    Ok(())
}
