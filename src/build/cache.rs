//! Staleness cache for parsed source files.
//!
//! Long-running watch processes reload the same pages and posts on every
//! rebuild. The cache keeps each parsed object keyed by its full path along
//! with the [`Fingerprint`] observed when it was parsed, and hands it back as
//! long as the file on disk still has that fingerprint.
//!
//! # How It Works
//!
//! 1. Stat the file and fingerprint it
//! 2. If an entry exists with the same fingerprint, return it
//! 3. Otherwise parse the file and store the result under the new fingerprint
//!
//! The map is locked around each individual lookup and store, not across the
//! parse. Two loads of the same path may both parse; the second store simply
//! replaces the first with an equally fresh entry.
//!
//! # Example
//!
//! ```ignore
//! use kiln::build::StalenessCache;
//!
//! let cache = StalenessCache::new(true);
//! let page = cache.load(&path, |p| Page::parse(p, &markup))?;
//! ```

use crate::fingerprint::{Fingerprint, StatError};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

struct Entry<T> {
    fingerprint: Fingerprint,
    value: Arc<T>,
}

/// Path-keyed memo of parsed objects, invalidated by file metadata.
pub struct StalenessCache<T> {
    enabled: bool,
    entries: Mutex<HashMap<PathBuf, Entry<T>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cached, {} parsed", self.hits, self.misses)
    }
}

impl std::ops::Add for CacheStats {
    type Output = CacheStats;

    fn add(self, other: CacheStats) -> CacheStats {
        CacheStats { hits: self.hits + other.hits, misses: self.misses + other.misses }
    }
}

impl<T> StalenessCache<T> {
    /// Create a cache. A disabled cache never stores and always parses.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value for `path` if it is still fresh, otherwise
    /// run `parse` and remember its result.
    pub fn load<F, E>(&self, path: &Path, parse: F) -> Result<Arc<T>, E>
    where
        F: FnOnce(&Path) -> Result<T, E>,
        E: From<StatError>,
    {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return parse(path).map(Arc::new);
        }

        let fingerprint = Fingerprint::of(path)?;
        if let Some(entry) = self.lock().get(path) {
            if !entry.fingerprint.differs(&fingerprint) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(path = %path.display(), "cache hit");
                return Ok(Arc::clone(&entry.value));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(parse(path)?);
        self.lock()
            .insert(path.to_path_buf(), Entry { fingerprint, value: Arc::clone(&value) });
        Ok(value)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Hit and miss counts since creation.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<T> fmt::Debug for StalenessCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StalenessCache")
            .field("enabled", &self.enabled)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    fn counting_parse(calls: &AtomicUsize) -> impl FnOnce(&Path) -> io::Result<String> + '_ {
        move |p: &Path| {
            calls.fetch_add(1, Ordering::SeqCst);
            fs::read_to_string(p)
        }
    }

    #[test]
    fn test_hit_returns_same_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.md");
        fs::write(&path, "hello").unwrap();

        let cache = StalenessCache::new(true);
        let calls = AtomicUsize::new(0);

        let first = cache.load(&path, counting_parse(&calls)).unwrap();
        let second = cache.load(&path, counting_parse(&calls)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_touch_forces_reparse() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.md");
        fs::write(&path, "hello").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let cache = StalenessCache::new(true);
        let calls = AtomicUsize::new(0);
        let first = cache.load(&path, counting_parse(&calls)).unwrap();

        set_file_mtime(&path, FileTime::from_unix_time(2_000_000, 0)).unwrap();
        let second = cache.load(&path, counting_parse(&calls)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));

        // The replacement is now the cached object.
        let third = cache.load(&path, counting_parse(&calls)).unwrap();
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_always_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.md");
        fs::write(&path, "hello").unwrap();

        let cache = StalenessCache::new(false);
        let calls = AtomicUsize::new(0);
        cache.load(&path, counting_parse(&calls)).unwrap();
        cache.load(&path, counting_parse(&calls)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_parse_error_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.md");
        fs::write(&path, "hello").unwrap();

        let cache: StalenessCache<String> = StalenessCache::new(true);
        let err = cache.load(&path, |_| Err::<String, _>(io::Error::other("bad"))).unwrap_err();
        assert_eq!(err.to_string(), "bad");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let cache: StalenessCache<String> = StalenessCache::new(true);
        let result = cache.load(&dir.path().join("missing.md"), |p| fs::read_to_string(p));
        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_loads_agree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.md");
        fs::write(&path, "shared").unwrap();

        let cache = Arc::new(StalenessCache::new(true));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let path = path.clone();
                std::thread::spawn(move || cache.load(&path, |p| fs::read_to_string(p)).unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().as_str(), "shared");
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.md");
        fs::write(&path, "x").unwrap();
        let cache = StalenessCache::new(true);
        cache.load(&path, |p| fs::read_to_string(p)).unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_add() {
        let total = CacheStats { hits: 1, misses: 2 } + CacheStats { hits: 3, misses: 0 };
        assert_eq!(total, CacheStats { hits: 4, misses: 2 });
        assert_eq!(total.to_string(), "4 cached, 2 parsed");
    }
}
