//! Config command handler.

use crate::config::{config_path, Config};
use crate::error::{Result, RunwatchError};
use crate::output::{BOLD, GRAY, RESET};

/// Display the effective configuration (file values plus overrides) as TOML.
pub fn config_display_command(config: &Config) -> Result<()> {
    println!("{BOLD}# Effective config{RESET}");
    println!("{GRAY}# {}{RESET}", config_path()?.display());
    println!("{GRAY}# state: {}{RESET}", config.state_dir()?.display());
    println!();
    println!("{}", render_config(config)?);
    Ok(())
}

fn render_config(config: &Config) -> Result<String> {
    toml::to_string(config)
        .map_err(|e| RunwatchError::Config(format!("Failed to serialize config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_config_lists_sections() {
        let rendered = render_config(&Config::default()).unwrap();
        assert!(rendered.contains("[server]"));
        assert!(rendered.contains("[tracker]"));
        assert!(rendered.contains("max_consecutive_errors = 5"));
    }
}
