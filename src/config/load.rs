use std::path::Path;

use tracing::info;

use super::{ConfigError, PipelineConfig};

/// Load and validate a TOML config; relative paths resolve against its directory.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let config = parse_at(&text, base, path)?;
    info!(
        "Loaded config {} ({} sources, {} folds)",
        path.display(),
        config.sources.len(),
        config.folds.count
    );
    Ok(config)
}

/// Parse and validate config text, resolving relative paths against `base`.
pub fn parse_config(text: &str, base: &Path) -> Result<PipelineConfig, ConfigError> {
    parse_at(text, base, base)
}

fn parse_at(text: &str, base: &Path, origin: &Path) -> Result<PipelineConfig, ConfigError> {
    let mut config: PipelineConfig =
        toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: origin.to_path_buf(),
            source,
        })?;
    config.rebase_paths(base);
    config.validate()?;
    Ok(config)
}
