//! Resolve command

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use rvbuild_core::AcquireRequest;
use rvbuild_schema::{Arch, Version};

use super::attempts_table;
use crate::GlobalArgs;

/// Resolve a download URL for `app` and print it
pub async fn resolve(
    global: &GlobalArgs,
    app: &str,
    arch: Option<Arch>,
    version: Option<Version>,
    json: bool,
) -> Result<()> {
    let acquirer = global.acquirer()?;
    let request = AcquireRequest::new(app)
        .with_arch(arch)
        .with_version(version);
    let acquisition = acquirer.acquire(&request).await?;
    let candidate = &acquisition.candidate;

    if json {
        let out = serde_json::to_string_pretty(candidate).context("Failed to encode candidate")?;
        println!("{out}");
        return Ok(());
    }

    let lw = 10;
    println!();
    println!(
        "  {} {}",
        app.white().bold(),
        candidate.version.as_str().dark_grey()
    );
    println!();
    println!("  {:<lw$}{}", "backend", candidate.backend);
    println!("  {:<lw$}{}", "arch", candidate.arch);
    println!("  {:<lw$}{}", "url", candidate.url);

    if !acquisition.failed.is_empty() {
        println!();
        println!("{}", "  Skipped".dark_grey());
        println!("{}", attempts_table(&acquisition.failed));
    }
    Ok(())
}
