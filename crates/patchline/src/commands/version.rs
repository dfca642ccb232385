//! Version command

use anyhow::Result;
use patchline_core::RuntimeConfig;
use patchline_update::{VersionStore, VERSION};
use serde::Serialize;

use crate::cli::VersionArgs;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionReport {
    cli: &'static str,
    installed: String,
    marker_file: String,
}

pub fn run(args: VersionArgs, config: &RuntimeConfig) -> Result<()> {
    let store = VersionStore::from_paths(&config.paths);
    let report = VersionReport {
        cli: VERSION,
        installed: store.read_local_version()?.to_string(),
        marker_file: store.local_path().to_string(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("patchline {}", report.cli);
        println!("Installed:  {}", report.installed);
        println!("Marker:     {}", report.marker_file);
    }
    Ok(())
}
