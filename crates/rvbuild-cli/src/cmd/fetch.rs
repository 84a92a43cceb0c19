//! Fetch command

use std::path::Path;

use anyhow::{Context, Result, bail};
use crossterm::style::Stylize;
use rvbuild_core::io::download::output_stem;
use rvbuild_core::{AcquireRequest, load_arch_matrix};
use rvbuild_schema::{Arch, Version};

use super::{attempts_table, table};
use crate::GlobalArgs;

/// Download `app` for `arch`, or for every architecture in the matrix
pub async fn fetch(
    global: &GlobalArgs,
    app: &str,
    arch: Option<Arch>,
    version: Option<Version>,
    out: &Path,
) -> Result<()> {
    // `None` leaves the choice to the per-backend config
    let targets: Vec<Option<Arch>> = if let Some(arch) = arch {
        vec![Some(arch)]
    } else {
        let matrix = load_arch_matrix(&global.arch_config).with_context(|| {
            format!("Failed to load {}", global.arch_config.display())
        })?;
        matrix
            .lookup(app, global.source.as_deref())
            .map_or_else(|| vec![None], |arches| arches.iter().copied().map(Some).collect())
    };

    let acquirer = global.acquirer()?;
    let mut produced = table(["arch", "file", "format", "sha256"]);
    let mut failures = Vec::new();
    let mut count = 0usize;

    for target in targets {
        let label = target.map_or_else(|| "default".to_string(), |a| a.to_string());
        let request = AcquireRequest::new(app)
            .with_arch(target)
            .with_version(version.clone());

        let acquisition = match acquirer.acquire(&request).await {
            Ok(acquisition) => acquisition,
            Err(e) => {
                failures.push((label, e.to_string()));
                continue;
            }
        };
        if !acquisition.failed.is_empty() {
            println!("{}", format!("  {label}: skipped mirrors").dark_grey());
            println!("{}", attempts_table(&acquisition.failed));
        }

        let candidate = &acquisition.candidate;
        let stem = output_stem(
            app,
            candidate.arch,
            global.source.as_deref(),
            &candidate.version,
        );
        match acquirer.download(&acquisition, out, &stem).await {
            Ok(saved) => {
                count += 1;
                let format = if saved.format.needs_merge() {
                    format!("{} (merge before patching)", saved.format)
                } else {
                    saved.format.to_string()
                };
                produced.add_row(vec![
                    candidate.arch.to_string(),
                    saved.path.display().to_string(),
                    format,
                    saved.sha256.chars().take(12).collect(),
                ]);
            }
            Err(e) => failures.push((
                label,
                format!("{} from {}: {e}", candidate.url, candidate.backend),
            )),
        }
    }

    if count > 0 {
        println!();
        println!("  {} {}", app.white().bold(), format!("{count} file(s)").dark_grey());
        println!("{produced}");
    }
    for (label, reason) in &failures {
        eprintln!();
        eprintln!("  {} {label}", "failed".red());
        for line in reason.lines() {
            eprintln!("    {line}");
        }
    }

    if count == 0 {
        bail!("Nothing fetched for {app}");
    }
    Ok(())
}
