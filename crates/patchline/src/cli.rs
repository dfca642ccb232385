//! CLI argument definitions

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// patchline - keep a mod payload up to date
#[derive(Parser, Debug)]
#[command(name = "patchline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a patchline.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Directory that relative paths in the config are resolved against
    #[arg(long, global = true)]
    pub base_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare the installed version with the update feed
    Check(CheckArgs),

    /// Download and install the latest payload
    Update(UpdateArgs),

    /// Show the CLI version and the installed payload version
    Version(VersionArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Print every session event as a JSON line instead of progress bars
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output as JSON instead of YAML
    #[arg(long)]
    pub json: bool,
}
