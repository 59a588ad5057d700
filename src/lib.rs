//! Kiln - incremental static site builder
//!
//! This library provides functionality to:
//! - Resolve and content-hash assets declared in `assets.toml`
//! - Render pages and dated posts through layouts, with per-tag index pages
//! - Write outputs with gzip and brotli siblings
//! - Rebuild on change with a polling watcher and a single-flight coordinator

pub mod build;
pub mod cli;
pub mod config;
pub mod content;
pub mod filters;
pub mod fingerprint;
pub mod layouts;
pub mod markup;
#[cfg(feature = "serve")]
pub mod serve;
pub mod sitemap;
pub mod urls;
pub mod watch;
