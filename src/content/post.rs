//! Posts: dated pages under `posts/`.
//!
//! A post's file name carries its date and slug, `2024-03-09-first-light.md`.
//! Its output path comes from the site permalink template, where `:year`,
//! `:month`, `:day` and `:name` are substituted.

use super::is_ignored;
use super::metafile::{get_str, Meta, MetaFile};
use super::page::{convert_body, Page};
use super::ContentError;
use crate::build::StalenessCache;
use crate::markup::Markup;
use crate::urls::permalink_to_filename;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_yaml::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

/// Extensions of files in `posts/` that are loaded as posts.
pub const POST_EXTENSIONS: &[&str] = &["html", "htm", "markdown", "md"];

/// Date-time formats accepted in a post's `date` front matter.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y.%m.%d %H:%M"];

/// Formats carrying a UTC offset, `2024-03-01 10:00 +02:00`.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M %:z", "%Y-%m-%d %H:%M:%S %:z"];

/// Date-only formats.
const DAY_FORMATS: &[&str] = &["%Y-%m-%d", "%Y.%m.%d"];

/// `date` output without its zone name: `Mon Jan  2 15:04:05 2006`.
const UNIX_DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// A parsed post.
#[derive(Debug, Clone)]
pub struct Post {
    pub page: Page,
    pub date: NaiveDateTime,
    pub tags: Vec<String>,
}

impl Post {
    pub fn title(&self) -> &str {
        self.page.title()
    }

    pub fn url(&self) -> &str {
        &self.page.url
    }
}

/// Split `2024-03-09-first-light.md` into its date and slug.
pub fn parse_post_name(path: &Path) -> Result<(NaiveDate, String), ContentError> {
    let bad_name = || ContentError::PostName(path.to_path_buf());
    let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(bad_name)?;
    if stem.len() < 12 || !stem.is_char_boundary(10) || stem.as_bytes()[10] != b'-' {
        return Err(bad_name());
    }
    let date = NaiveDate::parse_from_str(&stem[..10], "%Y-%m-%d").map_err(|_| bad_name())?;
    Ok((date, stem[11..].to_string()))
}

/// Whether `path` has one of the [`POST_EXTENSIONS`].
pub fn is_post_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| POST_EXTENSIONS.contains(&ext))
}

/// Parse a front matter date. Dates with a UTC offset keep their wall-clock time.
pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDateTime::parse_from_str(value, format) {
            return Some(date);
        }
    }
    for format in OFFSET_FORMATS {
        if let Ok(date) = DateTime::parse_from_str(value, format) {
            return Some(date.naive_local());
        }
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.naive_local());
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.naive_local());
    }
    if let Some(date) = parse_unix_date(value) {
        return Some(date);
    }
    DAY_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// `Mon Jan  2 15:04:05 MST 2006`, ignoring the zone name.
fn parse_unix_date(value: &str) -> Option<NaiveDateTime> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    let [weekday, month, day, time, _zone, year] = fields.as_slice() else {
        return None;
    };
    let text = format!("{} {} {} {} {}", weekday, month, day, time, year);
    NaiveDateTime::parse_from_str(&text, UNIX_DATE_FORMAT).ok()
}

/// Tags from front matter: a comma separated string or a list.
pub fn parse_tags(meta: &Meta, path: &Path) -> Result<Vec<String>, ContentError> {
    let raw: Vec<String> = match meta.get("tags") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(ContentError::Meta {
                    path: path.to_path_buf(),
                    key: "tags".to_string(),
                    message: "entries must be strings".to_string(),
                }),
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(ContentError::Meta {
                path: path.to_path_buf(),
                key: "tags".to_string(),
                message: "must be a string or a list".to_string(),
            })
        }
    };
    Ok(raw.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).map(str::to_string).collect())
}

/// Fill a permalink template for a post from its file name date and slug.
pub fn expand_permalink(template: &str, date: &NaiveDate, name: &str) -> String {
    template
        .replace(":year", &date.format("%Y").to_string())
        .replace(":month", &date.format("%m").to_string())
        .replace(":day", &date.format("%d").to_string())
        .replace(":name", name)
}

/// Loads posts through a staleness cache.
#[derive(Clone)]
pub struct PostLoader {
    markup: Arc<dyn Markup>,
    cache: Arc<StalenessCache<Post>>,
    permalink: String,
}

impl PostLoader {
    pub fn new(markup: Arc<dyn Markup>, cache: Arc<StalenessCache<Post>>, permalink: &str) -> Self {
        Self { markup, cache, permalink: permalink.to_string() }
    }

    pub fn load(&self, path: &Path) -> Result<Arc<Post>, ContentError> {
        self.cache.load(path, |p| self.parse(p))
    }

    /// Load every post below `dir`, newest first. A missing directory has no posts.
    pub fn load_dir(&self, dir: &Path) -> Result<Vec<Arc<Post>>, ContentError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut posts = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                ContentError::io(&path, e.into())
            })?;
            if !entry.file_type().is_file() || is_ignored(entry.path()) {
                continue;
            }
            if !is_post_file(entry.path()) {
                debug!(path = %entry.path().display(), "skipping non-post file");
                continue;
            }
            posts.push(self.load(entry.path())?);
        }
        posts.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.page.url.cmp(&b.page.url)));
        Ok(posts)
    }

    /// Parse `path` without consulting the cache.
    pub fn parse(&self, path: &Path) -> Result<Post, ContentError> {
        let (file_date, name) = parse_post_name(path)?;
        let file = MetaFile::read(path)?.ok_or_else(|| ContentError::NotPage(path.to_path_buf()))?;
        let mut meta = file.meta;

        let date = match meta.get("date") {
            None | Some(Value::Null) => file_date.and_hms_opt(0, 0, 0),
            Some(Value::String(s)) => parse_date(s),
            Some(_) => None,
        }
        .ok_or_else(|| ContentError::Date {
            path: path.to_path_buf(),
            value: get_str(&meta, "date").unwrap_or_default().to_string(),
        })?;

        let tags = parse_tags(&meta, path)?;
        let content = convert_body(self.markup.as_ref(), &meta, path, file.content)?;

        let permalink = match get_str(&meta, "permalink") {
            Some(permalink) => permalink.to_string(),
            None => expand_permalink(&self.permalink, &file_date, &name),
        };
        let filename = permalink_to_filename(&permalink);

        meta.insert("date".to_string(), Value::from(date.format("%Y-%m-%d").to_string()));
        meta.insert(
            "tags".to_string(),
            Value::Sequence(tags.iter().map(|t| Value::from(t.as_str())).collect()),
        );

        let page = Page::new(path, meta, content, filename, file.modified);
        Ok(Post { page, date, tags })
    }
}
