//! Build context containing the site location and per-run options.

use crate::config::{CliOverrides, StaticConfig};
use std::path::{Path, PathBuf};

/// Output directory, relative to the site root. Owned entirely by the build.
pub const OUT_DIR: &str = "out";
/// Pages directory, relative to the site root.
pub const PAGES_DIR: &str = "pages";
/// Posts directory, relative to the site root.
pub const POSTS_DIR: &str = "posts";
/// Layouts directory, relative to the site root.
pub const LAYOUTS_DIR: &str = "layouts";
/// Include texts for the `include` template function.
pub const INCLUDES_DIR: &str = "includes";

/// Build context containing the site root and options for a build operation.
///
/// Configuration itself is reloaded from `site.toml` on every pass, so a
/// watch process picks up edits to it. The context only carries what the
/// command line decided.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Site root directory (where site.toml is located)
    site_root: PathBuf,
    /// Dev builds skip compression and use `static.dev_url`
    dev: bool,
    /// Whether parsed pages and posts are cached between passes
    cache: bool,
    /// Overrides applied on top of each freshly loaded config
    overrides: CliOverrides,
}

impl BuildContext {
    pub fn new(site_root: PathBuf) -> Self {
        Self { site_root, dev: false, cache: false, overrides: CliOverrides::default() }
    }

    pub fn site_root(&self) -> &Path {
        &self.site_root
    }

    pub fn out_dir(&self) -> PathBuf {
        self.site_root.join(OUT_DIR)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.site_root.join(PAGES_DIR)
    }

    pub fn posts_dir(&self) -> PathBuf {
        self.site_root.join(POSTS_DIR)
    }

    pub fn layouts_dir(&self) -> PathBuf {
        self.site_root.join(LAYOUTS_DIR)
    }

    pub fn includes_dir(&self) -> PathBuf {
        self.site_root.join(INCLUDES_DIR)
    }

    pub fn is_dev(&self) -> bool {
        self.dev
    }

    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Whether the staleness caches are enabled.
    pub fn cache_enabled(&self) -> bool {
        self.cache
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_overrides(mut self, overrides: CliOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn overrides(&self) -> &CliOverrides {
        &self.overrides
    }

    /// Resolve a path relative to the site root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        crate::config::resolve_path(&self.site_root, path)
    }

    /// Directory receiving materialized assets.
    pub fn assets_dir(&self, static_files: Option<&StaticConfig>) -> PathBuf {
        match static_files {
            Some(s) if s.assets => self.out_dir().join(&s.path),
            _ => self.out_dir(),
        }
    }

    /// URL prefix of the `static` template function. In dev builds a
    /// non-empty `dev_url` replaces `url`.
    pub fn static_url(&self, static_files: Option<&StaticConfig>) -> String {
        match static_files {
            Some(s) if self.dev && !s.dev_url.is_empty() => s.dev_url.clone(),
            Some(s) => s.url.clone(),
            None => String::new(),
        }
    }

    /// URL prefix of materialized assets.
    pub fn asset_url(&self, static_files: Option<&StaticConfig>) -> String {
        match static_files {
            Some(s) if s.assets => self.static_url(static_files),
            _ => String::new(),
        }
    }
}
