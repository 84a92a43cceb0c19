//! rvbuild - fetch source APKs for patching

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rvbuild_cli::cmd;
use rvbuild_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    match cli.command {
        Commands::Latest { app } => cmd::latest::latest(&global, &app).await,
        Commands::Resolve {
            app,
            arch,
            version,
            json,
        } => cmd::resolve::resolve(&global, &app, arch, version, json).await,
        Commands::Fetch {
            app,
            arch,
            version,
            out,
        } => cmd::fetch::fetch(&global, &app, arch, version, &out).await,
    }
}
