//! XML sitemap of rendered pages.
//!
//! Pages are added from render workers as they are written; the file is
//! produced once at the end of a build.

use crate::content::metafile::value_text;
use crate::content::Page;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Accepted `changefreq` values. Empty means unset.
pub const CHANGEFREQS: &[&str] = &["", "always", "hourly", "daily", "weekly", "monthly", "yearly", "never"];

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SitemapError {
    #[error("{loc}: invalid changefreq '{changefreq}'")]
    Changefreq { loc: String, changefreq: String },
}

/// One `<url>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SitemapEntry {
    /// Path relative to the site URL, starting with `/`
    pub loc: String,
    pub lastmod: String,
    pub changefreq: String,
    pub priority: String,
}

impl SitemapEntry {
    /// Entry for a page, or `None` when its front matter has `sitemap: false`.
    pub fn for_page(page: &Page) -> Option<Self> {
        if page.meta.get("sitemap").and_then(|v| v.as_bool()) == Some(false) {
            return None;
        }
        let text = |key: &str| page.meta.get(key).map(value_text).unwrap_or_default();
        Some(Self {
            loc: page.url.clone(),
            lastmod: DateTime::<Local>::from(page.modified).format("%Y-%m-%d").to_string(),
            changefreq: text("changefreq"),
            priority: text("priority"),
        })
    }
}

/// Sitemap entries collected during a build.
#[derive(Debug, Default)]
pub struct Sitemap {
    entries: Mutex<Vec<SitemapEntry>>,
}

impl Sitemap {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SitemapEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, entry: SitemapEntry) -> Result<(), SitemapError> {
        if !CHANGEFREQS.contains(&entry.changefreq.as_str()) {
            return Err(SitemapError::Changefreq { loc: entry.loc, changefreq: entry.changefreq });
        }
        self.lock().push(entry);
        Ok(())
    }

    /// Add `page` unless it opts out.
    pub fn add_page(&self, page: &Page) -> Result<(), SitemapError> {
        match SitemapEntry::for_page(page) {
            Some(entry) => self.add(entry),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Render a `urlset` document, shortest locations first.
    pub fn render(&self, base_url: &str) -> String {
        let mut entries = self.lock().clone();
        entries.sort_by_key(|e| e.loc.len());

        let base = escape_xml(base_url.trim_end_matches('/'));
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n");
        for entry in &entries {
            out.push_str(" <url>\n");
            let _ = writeln!(out, "  <loc>{}{}</loc>", base, escape_xml(&entry.loc));
            for (tag, value) in [
                ("lastmod", &entry.lastmod),
                ("changefreq", &entry.changefreq),
                ("priority", &entry.priority),
            ] {
                if !value.is_empty() {
                    let _ = writeln!(out, "  <{tag}>{}</{tag}>", escape_xml(value));
                }
            }
            out.push_str(" </url>\n");
        }
        out.push_str("</urlset>\n");
        out
    }
}

/// Escape text for XML element content and attribute values.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
