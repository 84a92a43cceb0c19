//! Latest command

use anyhow::{Result, bail};
use crossterm::style::Stylize;
use rvbuild_core::AttemptFailure;

use super::table;
use crate::GlobalArgs;

/// Ask every enabled mirror for its latest stable version of `app`
pub async fn latest(global: &GlobalArgs, app: &str) -> Result<()> {
    let acquirer = global.acquirer()?;
    let rows = acquirer.latest_versions(app).await;

    let mut out = table(["backend", "latest"]);

    let mut found = 0;
    for (backend, result) in &rows {
        let cell = match result {
            Ok(version) => {
                found += 1;
                version.to_string()
            }
            Err(AttemptFailure::ConfigMissing { .. }) => "not configured".to_string(),
            Err(failure) => failure.to_string(),
        };
        out.add_row(vec![backend.clone(), cell]);
    }

    println!();
    println!("  {}", app.white().bold());
    println!("{out}");

    if found == 0 {
        bail!(
            "No mirror reported a version for {app} (configs are read from {})",
            global.apps_dir.display()
        );
    }
    Ok(())
}
