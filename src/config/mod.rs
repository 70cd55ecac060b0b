pub mod types;

use anyhow::{Context, Result};
use std::path::Path;

pub use types::{CheckMode, ConfigLayer, PolicyConfig, UserMatch};

/// Read a YAML configuration layer from disk.
pub fn load_layer(path: &str) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("read config file {}", path))?;
    parse_layer(&content).with_context(|| format!("parse config file {}", path))
}

pub fn parse_layer(content: &str) -> Result<ConfigLayer> {
    if content.trim().is_empty() {
        return Ok(ConfigLayer::default());
    }
    Ok(serde_yml::from_str(content)?)
}

/// Build the effective policy: defaults, then each layer in order.
pub fn build_config(layers: &[ConfigLayer]) -> Result<PolicyConfig> {
    let mut config = PolicyConfig::default();
    for layer in layers {
        config.apply_layer(layer)?;
    }
    config.validate()?;
    Ok(config)
}
