//! Build result types.
//!
//! Contains the summary reported after a successful build pass.

use crate::build::CacheStats;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Counts describing one build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    /// Materialized assets written
    pub assets: usize,
    /// Posts rendered
    pub posts: usize,
    /// Pages rendered
    pub pages: usize,
    /// Files copied verbatim
    pub copied: usize,
    /// Tag index pages rendered
    pub tags: usize,
    /// Sitemap entries, when a sitemap was written
    pub sitemap_entries: Option<usize>,
    /// Pages and posts served from the staleness cache
    pub cached: usize,
    /// Pages and posts parsed from disk
    pub parsed: usize,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl BuildSummary {
    /// Number of primary output files written.
    pub fn outputs(&self) -> usize {
        self.assets + self.posts + self.pages + self.copied + self.tags + usize::from(self.sitemap_entries.is_some())
    }

    /// Record cache effectiveness as the difference between two stat readings.
    pub fn with_cache_delta(mut self, before: CacheStats, after: CacheStats) -> Self {
        self.cached = after.hits.saturating_sub(before.hits);
        self.parsed = after.misses.saturating_sub(before.misses);
        self
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Build complete ({}) - Pages: {} | Posts: {} | Assets: {} | Copied: {}",
            format_duration(self.duration),
            self.pages,
            self.posts,
            self.assets,
            self.copied
        )?;
        if self.tags > 0 {
            write!(f, " | Tags: {}", self.tags)?;
        }
        if self.cached > 0 {
            write!(f, " | Cached: {}", self.cached)?;
        }
        Ok(())
    }
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
