//! Check command

use anyhow::{Context, Result};
use patchline_core::RuntimeConfig;
use patchline_update::UpdateOrchestrator;

use crate::cli::CheckArgs;
use crate::output;

pub async fn run(args: CheckArgs, config: RuntimeConfig) -> Result<()> {
    let orchestrator =
        UpdateOrchestrator::from_config(config).context("Failed to set up the update feed")?;

    let spinner = (!args.json).then(|| output::spinner("Checking for updates..."));
    let result = orchestrator.check().await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let check = result.context("Version check failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&check)?);
        return Ok(());
    }

    output::kv("Installed", &check.local);
    output::kv("Latest", &check.remote);
    if check.update_available {
        output::success(&format!("Update available: {}", check.remote));
        output::info("Run 'patchline update' to install it");
    } else {
        output::success("Already on the latest version");
    }
    Ok(())
}
