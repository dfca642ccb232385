//! Config command

use anyhow::Result;
use patchline_core::RuntimeConfig;

use crate::cli::ConfigArgs;

pub fn run(args: ConfigArgs, config: &RuntimeConfig) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", serde_yaml_ng::to_string(config)?);
    }
    Ok(())
}
