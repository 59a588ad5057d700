//! Configuration loading and discovery for `site.toml`
//!
//! Provides functions to find the site root, load the site and asset
//! configuration, and merge command-line overrides.

use super::schema::{AssetSpec, AssetsFile, SiteConfig};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Site configuration file name.
pub const SITE_CONFIG: &str = "site.toml";
/// Asset configuration file name.
pub const ASSETS_CONFIG: &str = "assets.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse site.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// TOML parsing error in the asset configuration
    #[error("Failed to parse assets.toml: {0}")]
    Assets(toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override the base URL (e.g. when serving locally)
    pub url: Option<String>,
    /// Remove the output directory before building
    pub clean: Option<bool>,
}

/// Find the site root by walking up from the current working directory.
///
/// # Returns
/// - `Some(dir)` for the first directory containing `site.toml`
/// - `None` if no site root is found
pub fn find_site_root() -> Option<PathBuf> {
    env::current_dir().ok().and_then(find_site_root_from)
}

/// Find the site root by walking up from a specific directory.
///
/// This is the internal implementation that allows specifying the start directory,
/// useful for testing.
pub fn find_site_root_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        if current.join(SITE_CONFIG).exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load `site.toml` from a site root.
///
/// # Example
/// ```ignore
/// let config = load_config(Path::new("my-site"))?;
/// println!("Building {}", config.name);
/// ```
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    let path = root.join(SITE_CONFIG);
    debug!(path = %path.display(), "loading site config");
    let contents = fs::read_to_string(&path)?;
    let config: SiteConfig = toml::from_str(&contents)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    Ok(config)
}

/// Load the `[[asset]]` declarations from `assets.toml` in a site root.
///
/// A missing file means the site declares no assets.
pub fn load_assets(root: &Path) -> Result<Vec<AssetSpec>, ConfigError> {
    let path = root.join(ASSETS_CONFIG);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no asset config");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    let file: AssetsFile = toml::from_str(&contents).map_err(ConfigError::Assets)?;
    Ok(file.assets)
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut SiteConfig, overrides: &CliOverrides) {
    if let Some(ref url) = overrides.url {
        config.url = url.clone();
    }

    if let Some(clean) = overrides.clean {
        config.clean_before_building = clean;
    }
}

/// Resolve a path relative to the site root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the site root.
pub fn resolve_path(site_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        site_root.join(path)
    }
}
