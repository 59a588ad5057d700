//! Site content: pages, posts and tags.
//!
//! # Overview
//!
//! - **metafile**: front matter splitting and metadata access
//! - **page**: files under `pages/`, rendered or copied verbatim
//! - **post**: dated entries under `posts/`
//! - **tags**: grouping posts for per-tag index pages
//!
//! Loaders go through a [`StalenessCache`](crate::build::StalenessCache), so
//! a watch process only re-parses files whose fingerprint changed.

pub mod metafile;
pub mod page;
pub mod post;
pub mod tags;

pub use metafile::{Meta, MetaFile};
pub use page::{Page, PageLoader};
pub use post::{Post, PostLoader};
pub use tags::TagIndex;

use crate::fingerprint::StatError;
use crate::markup::MarkupError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Files skipped when walking content directories.
pub fn is_ignored(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.ends_with('~') || name == ".DS_Store",
        None => false,
    }
}

/// Error produced while loading content.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContentError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Stat(#[from] StatError),
    #[error("{0}: front matter is not valid UTF-8")]
    Encoding(PathBuf),
    #[error("{0}: front matter is not terminated by ---")]
    Unterminated(PathBuf),
    #[error("{path}: front matter: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path}: {source}")]
    Markup {
        path: PathBuf,
        #[source]
        source: MarkupError,
    },
    #[error("{0}: not a page")]
    NotPage(PathBuf),
    #[error("{0}: post file names must look like YYYY-MM-DD-name.ext")]
    PostName(PathBuf),
    #[error("{path}: invalid date \"{value}\"")]
    Date { path: PathBuf, value: String },
    #[error("{path}: '{key}' {message}")]
    Meta { path: PathBuf, key: String, message: String },
}

impl ContentError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ContentError::Io { path: path.to_path_buf(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ignored() {
        assert!(is_ignored(Path::new("pages/draft.md~")));
        assert!(is_ignored(Path::new("pages/.DS_Store")));
        assert!(!is_ignored(Path::new("pages/index.md")));
    }
}
