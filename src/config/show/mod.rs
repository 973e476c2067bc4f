use anyhow::{Context, Result};
use console::style;

use super::Config;

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Encoder:").bold().yellow());
    eprintln!("  Backend: {}", style(config.encoder.backend).cyan());
    eprintln!("  Model: {}", style(&config.encoder.model).cyan());
    eprintln!("  Device: {}", style(config.encoder.device).cyan());
    eprintln!("  Batch Size: {}", style(config.encoder.batch_size).cyan());
    eprintln!("  Max Tokens: {}", style(config.encoder.max_tokens).cyan());
    match config.encoder_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Retriever:").bold().yellow());
    eprintln!("  Batch Size: {}", style(config.retriever.batch_size).cyan());
    eprintln!("  Save Every: {}", style(config.retriever.save_every).cyan());
    eprintln!("  Oversample: {}x", style(config.retriever.oversample).cyan());
    eprintln!("  Default Top-k: {}", style(config.retriever.default_topk).cyan());

    eprintln!();
    eprintln!("{}", style("Generation Service:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.generation.endpoint).cyan());
    eprintln!("  Model: {}", style(&config.generation.model_name).cyan());
    eprintln!("  Timeout: {}s", style(config.generation.timeout_secs).cyan());
    eprintln!(
        "  Retries: {} attempts, {}ms apart",
        style(config.generation.max_attempts).cyan(),
        style(config.generation.backoff_ms).cyan()
    );
    eprintln!(
        "  API Key: {}",
        if config.generation.api_key.is_some() {
            style("set").green()
        } else {
            style("not set").dim()
        }
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Write the current configuration to disk so it can be edited by hand
#[inline]
pub fn write_default_config(config: &Config) -> Result<()> {
    let config_path = config.config_file_path();
    if config_path.exists() {
        eprintln!(
            "{} {}",
            style("Configuration already exists:").yellow(),
            config_path.display()
        );
        return Ok(());
    }

    config.save().context("Failed to save configuration")?;

    eprintln!("{}", style("Configuration saved successfully!").green());
    eprintln!("Edit {} to change settings.", style(config_path.display()).cyan());
    Ok(())
}
