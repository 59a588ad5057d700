//! Pages: files under `pages/` with front matter.

use super::metafile::{get_bool, get_str, Meta, MetaFile};
use super::ContentError;
use crate::build::StalenessCache;
use crate::markup::{markup_for_extension, Markup, MARKDOWN};
use crate::urls::{clean_permalink, folderize, permalink_to_filename, replace_extension, slash_path};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Marker splitting the teaser from the rest of a body.
pub const MORE_SEPARATOR: &str = "<!--more-->";

/// A parsed page, ready for rendering.
#[derive(Debug, Clone)]
pub struct Page {
    /// Source file
    pub source: PathBuf,
    /// Front matter plus `url` and `id`
    pub meta: Meta,
    /// Body after markup conversion
    pub content: String,
    /// Body up to `<!--more-->`, or the whole body
    pub short_content: String,
    /// Output path relative to the output directory, `/`-separated
    pub filename: String,
    /// URL the page is served at
    pub url: String,
    pub modified: SystemTime,
}

impl Page {
    /// Assemble a page and derive its URL and teaser.
    pub(crate) fn new(source: &Path, mut meta: Meta, content: String, filename: String, modified: SystemTime) -> Self {
        let url = clean_permalink(&filename);
        meta.insert("url".to_string(), Value::from(url.as_str()));
        meta.insert("id".to_string(), Value::from(url.as_str()));
        let short_content = match content.find(MORE_SEPARATOR) {
            Some(i) => content[..i].to_string(),
            None => content.clone(),
        };
        Self { source: source.to_path_buf(), meta, content, short_content, filename, url, modified }
    }

    pub fn title(&self) -> &str {
        get_str(&self.meta, "title").unwrap_or("")
    }

    /// Layout named in front matter, if any.
    pub fn layout(&self) -> Option<&str> {
        get_str(&self.meta, "layout")
    }

    /// Output file name extension including the dot, e.g. `.html`.
    pub fn output_extension(&self) -> String {
        match Path::new(&self.filename).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!(".{}", ext),
            None => String::new(),
        }
    }
}

/// Convert `body` with the markup named in front matter or implied by the
/// source extension.
pub(crate) fn convert_body(
    markup: &dyn Markup,
    meta: &Meta,
    path: &Path,
    body: String,
) -> Result<String, ContentError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let name = get_str(meta, "markup").or_else(|| markup_for_extension(ext));
    match name {
        Some(name) => {
            let converted = markup
                .process(name, body.as_bytes())
                .map_err(|source| ContentError::Markup { path: path.to_path_buf(), source })?;
            Ok(String::from_utf8_lossy(&converted).into_owned())
        }
        None => Ok(body),
    }
}

/// Loads pages through a staleness cache.
#[derive(Clone)]
pub struct PageLoader {
    markup: Arc<dyn Markup>,
    cache: Arc<StalenessCache<Page>>,
}

impl PageLoader {
    pub fn new(markup: Arc<dyn Markup>, cache: Arc<StalenessCache<Page>>) -> Self {
        Self { markup, cache }
    }

    /// Load `path`, a file below `base_dir`.
    ///
    /// Fails with [`ContentError::NotPage`] for files without front matter.
    pub fn load(&self, base_dir: &Path, path: &Path) -> Result<Arc<Page>, ContentError> {
        self.cache.load(path, |p| self.parse(base_dir, p))
    }

    /// Parse `path` without consulting the cache.
    pub fn parse(&self, base_dir: &Path, path: &Path) -> Result<Page, ContentError> {
        let file = MetaFile::read(path)?.ok_or_else(|| ContentError::NotPage(path.to_path_buf()))?;
        let relative = path.strip_prefix(base_dir).unwrap_or(path);
        let mut filename = slash_path(relative);

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if markup_for_extension(ext) == Some(MARKDOWN) {
            filename = replace_extension(&filename, "html");
        }

        let content = convert_body(self.markup.as_ref(), &file.meta, path, file.content)?;

        if let Some(permalink) = get_str(&file.meta, "permalink") {
            filename = permalink_to_filename(permalink);
        }
        if get_bool(&file.meta, "folder") {
            filename = folderize(&filename);
        }

        Ok(Page::new(path, file.meta, content, filename, file.modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::{MarkupError, MarkupProcessor};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Markup double counting its invocations.
    #[derive(Default)]
    struct CountingMarkup {
        calls: AtomicUsize,
    }

    impl Markup for CountingMarkup {
        fn process(&self, _name: &str, input: &[u8]) -> Result<Vec<u8>, MarkupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.to_vec())
        }
    }

    fn loader(enabled: bool) -> PageLoader {
        PageLoader::new(Arc::new(MarkupProcessor::default()), Arc::new(StalenessCache::new(enabled)))
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_markdown_page() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "notes/hello.md", "---\ntitle: Hello\n---\n*hi*\n");

        let page = loader(false).load(dir.path(), &path).unwrap();
        assert_eq!(page.title(), "Hello");
        assert_eq!(page.filename, "notes/hello.html");
        assert_eq!(page.url, "/notes/hello.html");
        assert_eq!(page.content, "<p><em>hi</em></p>\n");
        assert_eq!(get_str(&page.meta, "id"), Some("/notes/hello.html"));
        assert_eq!(page.output_extension(), ".html");
    }

    #[test]
    fn test_index_url() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "index.html", "---\n---\n<h1>Home</h1>");
        let page = loader(false).load(dir.path(), &path).unwrap();
        assert_eq!(page.filename, "index.html");
        assert_eq!(page.url, "/");
        assert_eq!(page.content, "<h1>Home</h1>");
    }

    #[test]
    fn test_permalink_and_folder() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "a.html", "---\npermalink: /custom/place/\n---\nA");
        let b = write(dir.path(), "about.html", "---\nfolder: true\n---\nB");

        let l = loader(false);
        let a = l.load(dir.path(), &a).unwrap();
        assert_eq!(a.filename, "custom/place/index.html");
        assert_eq!(a.url, "/custom/place/");

        let b = l.load(dir.path(), &b).unwrap();
        assert_eq!(b.filename, "about/index.html");
        assert_eq!(b.url, "/about/");
    }

    #[test]
    fn test_markup_from_meta() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "raw.html", "---\nmarkup: markdown\n---\n# T\n");
        let page = loader(false).load(dir.path(), &path).unwrap();
        assert_eq!(page.filename, "raw.html");
        assert_eq!(page.content, "<h1>T</h1>\n");
    }

    #[test]
    fn test_unknown_markup_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "x.html", "---\nmarkup: textile\n---\nx");
        let err = loader(false).load(dir.path(), &path).unwrap_err();
        assert!(matches!(err, ContentError::Markup { .. }));
    }

    #[test]
    fn test_short_content() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "p.html", "---\n---\nIntro<!--more-->Rest");
        let page = loader(false).load(dir.path(), &path).unwrap();
        assert_eq!(page.short_content, "Intro");
        assert_eq!(page.content, "Intro<!--more-->Rest");

        let path = write(dir.path(), "q.html", "---\n---\nAll of it");
        let page = loader(false).load(dir.path(), &path).unwrap();
        assert_eq!(page.short_content, "All of it");
    }

    #[test]
    fn test_not_a_page() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "robots.txt", "User-agent: *");
        let err = loader(true).load(dir.path(), &path).unwrap_err();
        assert!(matches!(err, ContentError::NotPage(_)));
    }

    #[test]
    fn test_cached_load_skips_markup() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "post.md", "---\ntitle: x\n---\nbody");
        let markup = Arc::new(CountingMarkup::default());
        let loader = PageLoader::new(markup.clone(), Arc::new(StalenessCache::new(true)));

        let first = loader.load(dir.path(), &path).unwrap();
        let second = loader.load(dir.path(), &path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(markup.calls.load(Ordering::SeqCst), 1);

        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_500_000_000, 0)).unwrap();
        let third = loader.load(dir.path(), &path).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(markup.calls.load(Ordering::SeqCst), 2);
    }
}
