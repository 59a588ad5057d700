//! Configuration module for the kiln site builder
//!
//! Provides types and parsing for `site.toml` and `assets.toml`.

pub mod loader;
pub mod schema;

pub use loader::{
    find_site_root, find_site_root_from, load_assets, load_config, merge_cli_overrides,
    resolve_path, CliOverrides, ConfigError, ASSETS_CONFIG, SITE_CONFIG,
};
pub use schema::*;
