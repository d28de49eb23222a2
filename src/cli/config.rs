// ABOUTME: CLI config command - print (and optionally save) the effective configuration

use anyhow::{Context, Result};

use super::{ConfigArgs, OutputFormat};
use paysock::config::AppConfig;

/// Execute the config command
pub fn execute(config: &AppConfig, args: &ConfigArgs, format: OutputFormat) -> Result<()> {
    if let Some(ref path) = args.write {
        config.save_to(path)?;
        eprintln!("Wrote configuration to {}", path.display());
    }

    match format {
        OutputFormat::Json => super::report::output_json(config)?,
        OutputFormat::Text => {
            let toml = toml::to_string_pretty(config).context("Failed to render configuration")?;
            print!("{toml}");
        }
    }

    Ok(())
}
