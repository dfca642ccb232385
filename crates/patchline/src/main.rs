//! patchline CLI - keeps a mod payload up to date
//!
//! This is the main entry point for the patchline command-line interface.

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is opened
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = commands::load_config(cli.config.as_deref(), cli.base_dir.as_deref())?;

    match cli.command {
        Commands::Check(args) => commands::check::run(args, config).await,
        Commands::Update(args) => commands::update::run(args, config).await,
        Commands::Version(args) => commands::version::run(args, &config),
        Commands::Config(args) => commands::config::run(args, &config),
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr so `--json` output stays machine-readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
