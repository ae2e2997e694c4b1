//! Configuration inspection.

use console::style;

use crate::cli::icons::arrow;
use crate::config::Config;

pub fn cmd_config_show(config: &Config) -> anyhow::Result<()> {
    let source = config
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults (no config file found)".to_string());
    let settings = config.settings()?;

    eprintln!("{} Source: {}", arrow(), style(source).bold());
    eprintln!("{} Cache store: {}", arrow(), settings.store.describe());
    println!("{}", config.to_pretty_string());
    Ok(())
}
