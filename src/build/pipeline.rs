//! Build pipeline orchestration.
//!
//! A [`Site`] runs one complete pass over a site root: assets, posts, pages,
//! tag pages and the sitemap. Parsed pages and posts survive between passes
//! in staleness caches when the context enables caching.

use crate::build::{
    AssetCollection, AssetError, BuildContext, BuildSummary, CacheStats, FileWriter, Pool,
    StalenessCache, WriteError,
};
use crate::config::{load_assets, load_config, merge_cli_overrides, ConfigError, SiteConfig, SITE_CONFIG};
use crate::content::{is_ignored, ContentError, Page, PageLoader, Post, PostLoader, TagIndex};
use crate::content::tags::{tag_page, tag_permalink};
use crate::filters::{FilterCollection, FilterError, FilterRegistry};
use crate::fingerprint::Fingerprint;
use crate::layouts::{load_includes, LayoutCollection, RenderError};
use crate::markup::{Markup, MarkupProcessor};
use crate::sitemap::{Sitemap, SitemapError};
use crate::urls::clean_permalink;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Layout wrapping pages that name none.
pub const DEFAULT_LAYOUT: &str = "default";
/// Layout wrapping posts that name none.
pub const POST_LAYOUT: &str = "post";

/// Output extensions of pages listed in the sitemap.
const SITEMAP_EXTENSIONS: &[&str] = &[".htm", ".html", ".xml"];

/// Error during a build pass.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("page filters: {0}")]
    Filters(#[from] FilterError),
    #[error("{path}: {source}")]
    Filter {
        path: String,
        #[source]
        source: FilterError,
    },
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Layouts(#[from] RenderError),
    #[error("{path}: {source}")]
    Render {
        path: String,
        #[source]
        source: RenderError,
    },
    #[error(transparent)]
    Sitemap(#[from] SitemapError),
    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The coordinator thread has exited and can take no more requests.
    #[error("build coordinator stopped")]
    CoordinatorStopped,
}

impl BuildError {
    fn io(path: &Path, source: io::Error) -> Self {
        BuildError::Io { path: path.to_path_buf(), source }
    }
}

/// A site root plus the state kept between build passes.
pub struct Site {
    context: BuildContext,
    registry: FilterRegistry,
    page_cache: Arc<StalenessCache<Page>>,
    post_cache: Arc<StalenessCache<Post>>,
    /// Fingerprint of `site.toml` at the last pass
    config_fingerprint: Option<Fingerprint>,
}

impl Site {
    /// Open the site described by `context`.
    pub fn open(context: BuildContext) -> Self {
        let cache = context.cache_enabled();
        Self {
            context,
            registry: FilterRegistry::default(),
            page_cache: Arc::new(StalenessCache::new(cache)),
            post_cache: Arc::new(StalenessCache::new(cache)),
            config_fingerprint: None,
        }
    }

    /// Replace the filter registry used for assets and page filters.
    pub fn with_filters(mut self, registry: FilterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Combined page and post cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.page_cache.stats() + self.post_cache.stats()
    }

    /// Remove the output directory.
    pub fn clean(&self) -> Result<bool, BuildError> {
        clean_output(self.context.site_root())
    }

    /// Run one build pass.
    pub fn build(&mut self) -> Result<BuildSummary, BuildError> {
        let start = Instant::now();
        let before = self.cache_stats();
        let root = self.context.site_root().to_path_buf();

        let mut config = load_config(&root)?;
        merge_cli_overrides(&mut config, self.context.overrides());
        self.invalidate_on_config_change(&root);

        if config.clean_before_building {
            self.clean()?;
        }
        let out_dir = self.context.out_dir();
        fs::create_dir_all(&out_dir).map_err(|e| BuildError::io(&out_dir, e))?;

        let compress = if self.context.is_dev() { None } else { config.compress.as_ref() };
        let writer = Arc::new(FileWriter::new(compress)?);
        let filters = self.registry.build_all(&config.filters)?;
        let markup: Arc<dyn Markup> = Arc::new(MarkupProcessor::new(&config.markup));
        let static_files = config.static_files.as_ref();

        let specs = load_assets(&root)?;
        let mut assets = AssetCollection::load(&root, &specs, &self.registry)?;
        assets.process()?;
        let asset_count = assets.render(Arc::clone(&writer), &self.context.assets_dir(static_files))?;
        let index = Arc::new(assets.index(&self.context.asset_url(static_files)));

        let posts = PostLoader::new(Arc::clone(&markup), Arc::clone(&self.post_cache), &config.permalink)
            .load_dir(&self.context.posts_dir())?;
        let tags = TagIndex::build(&posts);

        let layouts = LayoutCollection::load(
            &self.context.layouts_dir(),
            site_vars(&config, &posts, &tags),
            index,
            &self.context.static_url(static_files),
        )?
        .with_includes(load_includes(&self.context.includes_dir())?);

        let job = Arc::new(RenderJob {
            layouts,
            filters,
            writer,
            sitemap: config.sitemap.as_ref().map(|_| Sitemap::new()),
            out_dir: out_dir.clone(),
            pages: AtomicUsize::new(0),
            copied: AtomicUsize::new(0),
        });

        info!("Rendering {} posts", posts.len());
        let pool: Pool<BuildError> = Pool::new()?;
        for post in &posts {
            let job = Arc::clone(&job);
            let post = Arc::clone(post);
            if !pool.add(move || job.render(&post.page, POST_LAYOUT, true)) {
                break;
            }
        }
        pool.wait()?;

        self.render_pages(&job, &markup)?;

        let mut tag_pages = 0;
        if let Some(tag_config) = &config.tag_index {
            info!("Rendering {} tag pages", tags.len());
            let pool: Pool<BuildError> = Pool::new()?;
            for tag in tags.tags() {
                let page = tag_page(tag, tags.posts(tag), &tag_config.permalink);
                let layout = tag_config.layout.clone();
                let job = Arc::clone(&job);
                tag_pages += 1;
                if !pool.add(move || job.render(&page, &layout, true)) {
                    break;
                }
            }
            pool.wait()?;
        }

        let mut sitemap_entries = None;
        if let (Some(name), Some(sitemap)) = (&config.sitemap, &job.sitemap) {
            let path = out_dir.join(name);
            info!("S {}", name);
            job.writer.write_file(&path, sitemap.render(&config.url).as_bytes())?;
            sitemap_entries = Some(sitemap.len());
        }

        let summary = BuildSummary {
            assets: asset_count,
            posts: posts.len(),
            pages: job.pages.load(Ordering::Relaxed),
            copied: job.copied.load(Ordering::Relaxed),
            tags: tag_pages,
            sitemap_entries,
            ..Default::default()
        };
        Ok(summary.with_cache_delta(before, self.cache_stats()).with_duration(start.elapsed()))
    }

    /// Render every page under `pages/` and copy files without front matter.
    fn render_pages(&self, job: &Arc<RenderJob>, markup: &Arc<dyn Markup>) -> Result<(), BuildError> {
        let pages_dir = self.context.pages_dir();
        if !pages_dir.is_dir() {
            debug!(path = %pages_dir.display(), "no pages directory");
            return Ok(());
        }

        let loader = PageLoader::new(Arc::clone(markup), Arc::clone(&self.page_cache));
        let pool: Pool<BuildError> = Pool::new()?;
        for entry in WalkDir::new(&pages_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&pages_dir).to_path_buf();
                BuildError::io(&path, e.into())
            })?;
            if !entry.file_type().is_file() || is_ignored(entry.path()) {
                continue;
            }
            let path = entry.into_path();
            let job = Arc::clone(job);
            let loader = loader.clone();
            let base = pages_dir.clone();
            if !pool.add(move || job.render_source(&loader, &base, &path)) {
                break;
            }
        }
        pool.wait()
    }

    /// Clear both caches when `site.toml` changed since the last pass.
    fn invalidate_on_config_change(&mut self, root: &Path) {
        let current = Fingerprint::of(&root.join(SITE_CONFIG)).ok();
        if let (Some(previous), Some(now)) = (&self.config_fingerprint, &current) {
            if previous.differs(now) {
                debug!("site config changed, clearing caches");
                self.page_cache.clear();
                self.post_cache.clear();
            }
        }
        self.config_fingerprint = current;
    }
}

/// Remove `<root>/out`. Returns whether there was anything to remove.
pub fn clean_output(root: &Path) -> Result<bool, BuildError> {
    let out_dir = root.join(crate::build::OUT_DIR);
    match fs::remove_dir_all(&out_dir) {
        Ok(()) => {
            info!("Removed {}", out_dir.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::io(&out_dir, e)),
    }
}

/// State shared by the render tasks of one pass.
struct RenderJob {
    layouts: LayoutCollection,
    filters: FilterCollection,
    writer: Arc<FileWriter>,
    sitemap: Option<Sitemap>,
    out_dir: PathBuf,
    pages: AtomicUsize,
    copied: AtomicUsize,
}

impl RenderJob {
    /// Render a page through its layouts and page filter, then write it.
    fn render(&self, page: &Page, default_layout: &str, in_sitemap: bool) -> Result<(), BuildError> {
        info!("P > {}", page.filename);
        let html = self
            .layouts
            .render_page(&page.meta, &page.content, default_layout)
            .map_err(|source| BuildError::Render { path: page.filename.clone(), source })?;
        let bytes = self
            .filters
            .apply(&page.output_extension(), html.as_bytes())
            .map_err(|source| BuildError::Filter { path: page.filename.clone(), source })?;
        self.writer.write_file(&self.out_dir.join(&page.filename), &bytes)?;

        if let (true, Some(sitemap)) = (in_sitemap, &self.sitemap) {
            sitemap.add_page(page)?;
        }
        Ok(())
    }

    /// Render `path` if it is a page, otherwise copy it verbatim.
    fn render_source(&self, loader: &PageLoader, base: &Path, path: &Path) -> Result<(), BuildError> {
        match loader.load(base, path) {
            Ok(page) => {
                let listed = SITEMAP_EXTENSIONS.contains(&page.output_extension().as_str());
                self.render(&page, DEFAULT_LAYOUT, listed)?;
                self.pages.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(ContentError::NotPage(_)) => {
                let relative = path.strip_prefix(base).unwrap_or(path);
                info!("C {}", relative.display());
                self.writer.copy_file(&self.out_dir.join(relative), path)?;
                self.copied.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Values exposed to templates as `site.*`.
///
/// Config values plus `posts` (newest first), `tags` and the build `date`.
pub fn site_vars(config: &SiteConfig, posts: &[Arc<Post>], tags: &TagIndex) -> Mapping {
    let mut vars = config.template_vars();

    let list = posts
        .iter()
        .map(|post| {
            let mut item = Mapping::new();
            item.insert("title".into(), post.title().into());
            item.insert("url".into(), post.url().into());
            item.insert("date".into(), post.date.format("%Y-%m-%d").to_string().into());
            item.insert("summary".into(), post.page.short_content.as_str().into());
            item.insert(
                "tags".into(),
                Value::Sequence(post.tags.iter().map(|t| Value::from(t.as_str())).collect()),
            );
            Value::Mapping(item)
        })
        .collect();
    vars.insert("posts".into(), Value::Sequence(list));

    let tag_list = tags
        .tags()
        .map(|tag| {
            let mut item = Mapping::new();
            item.insert("name".into(), tag.into());
            item.insert("count".into(), Value::from(tags.posts(tag).len() as u64));
            if let Some(tag_config) = &config.tag_index {
                let url = clean_permalink(&tag_permalink(&tag_config.permalink, tag));
                item.insert("url".into(), url.into());
            }
            Value::Mapping(item)
        })
        .collect();
    vars.insert("tags".into(), Value::Sequence(tag_list));

    vars.insert("date".into(), chrono::Local::now().format("%Y-%m-%d").to_string().into());
    vars
}
