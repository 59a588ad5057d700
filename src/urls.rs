//! Output path and URL helpers.

use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

/// Turn an output file name into the URL it is served at.
///
/// Strips a trailing `index.html`/`index.htm` and guarantees a leading `/`.
pub fn clean_permalink(filename: &str) -> String {
    let trimmed = filename
        .strip_suffix("index.html")
        .or_else(|| filename.strip_suffix("index.htm"))
        .unwrap_or(filename);
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Append `index.html` to directory-style permalinks.
pub fn add_index_if_needed(permalink: &str) -> String {
    if permalink.is_empty() || permalink.ends_with('/') {
        format!("{}index.html", permalink)
    } else {
        permalink.to_string()
    }
}

/// Output file name for a permalink: no leading `/`, `index.html` for directories.
pub fn permalink_to_filename(permalink: &str) -> String {
    add_index_if_needed(permalink.trim_start_matches('/'))
}

/// Replace the extension of a `/`-separated file name.
pub fn replace_extension(filename: &str, ext: &str) -> String {
    let start = filename.rfind('/').map(|i| i + 1).unwrap_or(0);
    match filename[start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}.{}", &filename[..start + dot], ext),
        _ => format!("{}.{}", filename, ext),
    }
}

/// Turn `name.html` into `name/index.html`, leaving index files alone.
pub fn folderize(filename: &str) -> String {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    if base == "index.html" || base == "index.htm" {
        return filename.to_string();
    }
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &filename[..filename.len() - (base.len() - dot)],
        _ => filename,
    };
    format!("{}/index.html", stem)
}

/// Relative path rendered with `/` separators.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a base URL and a path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

const ABS_PATH_PATTERNS: [&str; 2] = [
    r#"(?i)<([^>]+\s)(src|href)=(")/([^"]+)"#,
    r#"(?i)<([^>]+\s)(src|href)=(')/([^']+)"#,
];

fn abs_path_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| ABS_PATH_PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect())
}

/// Prefix `base` to root-relative `src` and `href` attributes in `html`.
pub fn abs_paths(base: &str, html: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut out = html.to_string();
    for pattern in abs_path_patterns() {
        out = pattern
            .replace_all(&out, |caps: &Captures<'_>| format!("<{}{}={}{}/{}", &caps[1], &caps[2], &caps[3], base, &caps[4]))
            .into_owned();
    }
    out
}
