//! Polling watcher for automatic rebuilds
//!
//! Detects source changes by periodically walking the site tree and comparing
//! [`Snapshot`]s of file fingerprints, so it works without any OS notification
//! API. Polling runs at an *active* interval right after a change and slows
//! down to an *idle* interval once the tree has been quiet for a while.
//!
//! # Example
//!
//! ```ignore
//! let excludes = site_excludes(&root, &config.watch)?;
//! let watcher = PollWatcher::watch(&root, excludes, Intervals::from_config(&config.watch))?;
//! rebuild_on_change(&watcher, &coordinator.handle());
//! ```

use crate::build::{BuildError, CoordinatorHandle};
use crate::config::WatchConfig;
use crate::fingerprint::Fingerprint;
use glob::Pattern;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Pending events kept while nobody is reading.
pub const EVENT_BUFFER: usize = 16;

/// Default poll interval right after a change.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
/// Idle interval as a multiple of the active one.
pub const IDLE_FACTOR: u32 = 5;
/// Default quiet period before polling slows down.
pub const DEFAULT_IDLE_AFTER: Duration = Duration::from_secs(300);

/// Error during watch mode
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    /// Walking the tree failed (non-fatal, polling continues)
    #[error("watch {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("invalid exclude pattern \"{pattern}\": {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("watch root not found: {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("failed to start watcher: {0}")]
    Spawn(#[source] io::Error),
}

/// Glob patterns for paths the watcher ignores.
///
/// A pattern matches when it matches either the full path or the basename.
#[derive(Debug, Clone, Default)]
pub struct Excludes {
    patterns: Vec<Pattern>,
}

impl Excludes {
    pub fn new<I, S>(patterns: I) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut excludes = Self::default();
        for pattern in patterns {
            excludes.add(pattern.as_ref())?;
        }
        Ok(excludes)
    }

    pub fn add(&mut self, pattern: &str) -> Result<(), WatchError> {
        let compiled = Pattern::new(pattern)
            .map_err(|source| WatchError::Pattern { pattern: pattern.to_string(), source })?;
        self.patterns.push(compiled);
        Ok(())
    }

    /// Exclude exactly `path`, with glob metacharacters escaped.
    pub fn add_path(&mut self, path: &Path) -> Result<(), WatchError> {
        self.add(&Pattern::escape(&path.to_string_lossy()))
    }

    pub fn matches(&self, path: &Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy());
        self.patterns.iter().any(|p| {
            p.matches_path(path) || name.as_deref().is_some_and(|n| p.matches(n))
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Build the exclusions for watching a site rooted at `root`: the output
/// directory, version control metadata and `watch.exclude` from config.
pub fn site_excludes(root: &Path, config: &WatchConfig) -> Result<Excludes, WatchError> {
    let mut excludes = Excludes::new([".DS_Store", "*~"])?;
    excludes.add_path(&root.join(crate::build::OUT_DIR))?;
    excludes.add_path(&root.join(".git"))?;
    for pattern in &config.exclude {
        excludes.add(pattern)?;
    }
    Ok(excludes)
}

/// Fingerprints of every path under a root at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: HashMap<PathBuf, Fingerprint>,
}

impl Snapshot {
    /// Walk `root`, skipping excluded paths. Excluded directories are not descended into.
    pub fn capture(root: &Path, excludes: &Excludes) -> Result<Self, WatchError> {
        let mut entries = HashMap::new();
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !excludes.matches(e.path()));
        for entry in walker {
            let entry = entry.map_err(|source| walk_error(root, source))?;
            let meta = entry.metadata().map_err(|source| walk_error(root, source))?;
            entries.insert(entry.into_path(), Fingerprint::from_metadata(&meta));
        }
        Ok(Self { entries })
    }

    /// Whether the path sets differ or any shared path changed.
    pub fn differs(&self, other: &Snapshot) -> bool {
        self.entries.len() != other.entries.len()
            || self.entries.iter().any(|(path, fp)| match other.entries.get(path) {
                Some(other_fp) => fp.differs(other_fp),
                None => true,
            })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn walk_error(root: &Path, source: walkdir::Error) -> WatchError {
    let path = source.path().unwrap_or(root).to_path_buf();
    WatchError::Walk { path, source }
}

/// Compares successive snapshots of one root.
#[derive(Debug)]
pub struct Poller {
    root: PathBuf,
    excludes: Excludes,
    snapshot: Snapshot,
}

impl Poller {
    /// Take the initial snapshot of `root`.
    pub fn new(root: impl Into<PathBuf>, excludes: Excludes) -> Result<Self, WatchError> {
        let root = root.into();
        let snapshot = Snapshot::capture(&root, &excludes)?;
        Ok(Self { root, excludes, snapshot })
    }

    /// Take a new snapshot and report whether it differs from the last one.
    /// On a walk error the previous snapshot is kept.
    pub fn check(&mut self) -> Result<bool, WatchError> {
        let next = Snapshot::capture(&self.root, &self.excludes)?;
        let changed = next.differs(&self.snapshot);
        self.snapshot = next;
        Ok(changed)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

/// Poll intervals of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub active: Duration,
    pub idle: Duration,
    pub idle_after: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, DEFAULT_IDLE_AFTER)
    }
}

impl Intervals {
    /// A zero `active` means one second; a zero `idle` means five times `active`.
    pub fn new(active: Duration, idle: Duration, idle_after: Duration) -> Self {
        let active = if active.is_zero() { DEFAULT_INTERVAL } else { active };
        let idle = if idle.is_zero() { active * IDLE_FACTOR } else { idle };
        Self { active, idle, idle_after }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.interval(), config.idle_interval(), config.idle_after())
    }
}

/// Two-speed poll scheduling.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    intervals: Intervals,
    last_change: Instant,
    current: Duration,
}

impl PollSchedule {
    pub fn new(intervals: Intervals, now: Instant) -> Self {
        Self { intervals, last_change: now, current: intervals.active }
    }

    /// Interval to wait before the next poll.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn is_idle(&self) -> bool {
        self.current == self.intervals.idle && self.intervals.idle != self.intervals.active
    }

    /// Record the outcome of a poll and return the next interval.
    pub fn tick(&mut self, changed: bool, now: Instant) -> Duration {
        if changed {
            self.last_change = now;
            self.current = self.intervals.active;
        } else if now.saturating_duration_since(self.last_change) > self.intervals.idle_after {
            if self.current != self.intervals.idle {
                debug!(interval = ?self.intervals.idle, "watcher idle");
            }
            self.current = self.intervals.idle;
        }
        self.current
    }
}

/// Event emitted by a [`PollWatcher`].
#[derive(Debug)]
pub enum WatchEvent {
    Changed,
    Error(WatchError),
}

/// Watcher running its poll loop on a background thread.
#[derive(Debug)]
pub struct PollWatcher {
    events: Receiver<WatchEvent>,
    close: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PollWatcher {
    /// Start watching `root`. The initial snapshot is taken before returning.
    pub fn watch(root: &Path, excludes: Excludes, intervals: Intervals) -> Result<Self, WatchError> {
        if !root.exists() {
            return Err(WatchError::RootNotFound(root.to_path_buf()));
        }
        let poller = Poller::new(root, excludes)?;
        let (event_tx, events) = mpsc::sync_channel(EVENT_BUFFER);
        let (close_tx, close_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("kiln-watch".to_string())
            .spawn(move || poll_loop(poller, PollSchedule::new(intervals, Instant::now()), event_tx, close_rx))
            .map_err(WatchError::Spawn)?;

        Ok(Self { events, close: Some(close_tx), thread: Some(thread) })
    }

    pub fn events(&self) -> &Receiver<WatchEvent> {
        &self.events
    }

    /// Block for the next event. `None` once the watcher has stopped.
    pub fn recv(&self) -> Option<WatchEvent> {
        self.events.recv().ok()
    }

    /// Handle that stops the poll loop from another thread, for callers
    /// that move the watcher into a consumer thread.
    pub fn stopper(&self) -> Option<WatchStopper> {
        self.close.clone().map(WatchStopper)
    }

    /// Stop polling and wait for the loop to exit.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Stops a [`PollWatcher`] without owning it. Once stopped, the watcher's
/// event channel drains and [`PollWatcher::recv`] returns `None`.
#[derive(Debug, Clone)]
pub struct WatchStopper(Sender<()>);

impl WatchStopper {
    pub fn stop(&self) {
        let _ = self.0.send(());
    }
}

impl Drop for PollWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn poll_loop(mut poller: Poller, mut schedule: PollSchedule, events: SyncSender<WatchEvent>, close: Receiver<()>) {
    loop {
        match close.recv_timeout(schedule.current()) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
        let changed = match poller.check() {
            Ok(changed) => changed,
            Err(err) => {
                if !emit(&events, WatchEvent::Error(err)) {
                    return;
                }
                false
            }
        };
        if changed && !emit(&events, WatchEvent::Changed) {
            return;
        }
        schedule.tick(changed, Instant::now());
    }
}

/// Send without blocking. Returns `false` once the receiver is gone.
fn emit(events: &SyncSender<WatchEvent>, event: WatchEvent) -> bool {
    match events.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            debug!(?event, "watch event dropped, buffer full");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Request a build for every change until the watcher or coordinator stops.
///
/// Build and watch errors are logged; the loop keeps going.
pub fn rebuild_on_change(watcher: &PollWatcher, coordinator: &CoordinatorHandle) {
    let mut failing = false;
    while let Some(event) = watcher.recv() {
        match event {
            WatchEvent::Changed => {
                info!("change detected, rebuilding");
                match coordinator.build() {
                    Ok(summary) => {
                        if failing {
                            info!("build fixed");
                        }
                        failing = false;
                        info!("{}", summary);
                    }
                    Err(BuildError::CoordinatorStopped) => return,
                    Err(err) => {
                        failing = true;
                        error!("build failed: {}", err);
                    }
                }
            }
            WatchEvent::Error(err) => warn!("{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pages")).unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        fs::write(dir.path().join("pages/index.md"), "---\n---\nhi").unwrap();
        dir
    }

    #[test]
    fn test_excludes_match_path_or_basename() {
        let excludes = Excludes::new(["*.swp", "/srv/site/out"]).unwrap();
        assert!(excludes.matches(Path::new("/srv/site/pages/.index.md.swp")));
        assert!(excludes.matches(Path::new("/srv/site/out")));
        assert!(!excludes.matches(Path::new("/srv/site/pages/index.md")));
        assert_eq!(excludes.len(), 2);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(Excludes::new(["[unclosed"]), Err(WatchError::Pattern { .. })));
    }

    #[test]
    fn test_snapshot_identical() {
        let dir = site();
        let a = Snapshot::capture(dir.path(), &Excludes::default()).unwrap();
        let b = Snapshot::capture(dir.path(), &Excludes::default()).unwrap();
        assert!(!a.differs(&b));
        assert!(a.contains(&dir.path().join("pages/index.md")));
    }

    #[test]
    fn test_snapshot_added_file_differs() {
        let dir = site();
        let a = Snapshot::capture(dir.path(), &Excludes::default()).unwrap();
        fs::write(dir.path().join("pages/new.md"), "x").unwrap();
        let b = Snapshot::capture(dir.path(), &Excludes::default()).unwrap();
        assert!(a.differs(&b));
        assert!(b.differs(&a));
    }

    #[test]
    fn test_excluded_directory_is_pruned() {
        let dir = site();
        fs::write(dir.path().join("out/index.html"), "built").unwrap();
        let excludes = site_excludes(dir.path(), &WatchConfig::default()).unwrap();
        let snapshot = Snapshot::capture(dir.path(), &excludes).unwrap();
        assert!(!snapshot.contains(&dir.path().join("out")));
        assert!(!snapshot.contains(&dir.path().join("out/index.html")));
    }

    #[test]
    fn test_poller_reports_changes() {
        let dir = site();
        let excludes = site_excludes(dir.path(), &WatchConfig::default()).unwrap();
        let mut poller = Poller::new(dir.path(), excludes).unwrap();
        assert!(!poller.check().unwrap());

        let page = dir.path().join("pages/index.md");
        set_file_mtime(&page, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        assert!(poller.check().unwrap());
        assert!(!poller.check().unwrap());
    }

    #[test]
    fn test_poller_ignores_excluded_changes() {
        let dir = site();
        let config = WatchConfig { exclude: vec!["*.tmp".to_string()], ..Default::default() };
        let excludes = site_excludes(dir.path(), &config).unwrap();
        let mut poller = Poller::new(dir.path(), excludes).unwrap();

        fs::write(dir.path().join("out/index.html"), "rebuilt").unwrap();
        fs::write(dir.path().join("pages/scratch.tmp"), "x").unwrap();
        fs::write(dir.path().join("pages/index.md~"), "backup").unwrap();
        assert!(!poller.check().unwrap());
    }

    #[test]
    fn test_intervals_defaults() {
        let intervals = Intervals::default();
        assert_eq!(intervals.active, Duration::from_secs(1));
        assert_eq!(intervals.idle, Duration::from_secs(5));
        assert_eq!(intervals.idle_after, Duration::from_secs(300));

        let custom = Intervals::new(Duration::from_millis(200), Duration::ZERO, Duration::from_secs(1));
        assert_eq!(custom.idle, Duration::from_millis(1000));
        assert_eq!(Intervals::from_config(&WatchConfig::default()), Intervals::default());
    }

    #[test]
    fn test_schedule_goes_idle_and_wakes() {
        let intervals = Intervals::new(Duration::from_secs(1), Duration::from_secs(10), Duration::from_secs(60));
        let start = Instant::now();
        let mut schedule = PollSchedule::new(intervals, start);
        assert_eq!(schedule.current(), Duration::from_secs(1));

        assert_eq!(schedule.tick(false, start + Duration::from_secs(30)), Duration::from_secs(1));
        assert_eq!(schedule.tick(false, start + Duration::from_secs(61)), Duration::from_secs(10));
        assert!(schedule.is_idle());

        let wake = start + Duration::from_secs(90);
        assert_eq!(schedule.tick(true, wake), Duration::from_secs(1));
        assert!(!schedule.is_idle());
        assert_eq!(schedule.tick(false, wake + Duration::from_secs(59)), Duration::from_secs(1));
    }

    #[test]
    fn test_watch_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = PollWatcher::watch(&dir.path().join("gone"), Excludes::default(), Intervals::default())
            .unwrap_err();
        assert!(matches!(err, WatchError::RootNotFound(_)));
    }

    #[test]
    fn test_watcher_emits_change() {
        let dir = site();
        let intervals = Intervals::new(Duration::from_millis(10), Duration::ZERO, DEFAULT_IDLE_AFTER);
        let mut watcher = PollWatcher::watch(dir.path(), Excludes::default(), intervals).unwrap();

        fs::write(dir.path().join("pages/new.md"), "---\n---\n").unwrap();
        let event = watcher.events().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, WatchEvent::Changed));
        watcher.close();
        // Events queued before the close are still delivered, then the channel ends.
        while watcher.recv().is_some() {}
        assert!(watcher.recv().is_none());
    }

    #[test]
    fn test_close_without_consumer() {
        let dir = site();
        let intervals = Intervals::new(Duration::from_millis(1), Duration::ZERO, DEFAULT_IDLE_AFTER);
        let mut watcher = PollWatcher::watch(dir.path(), Excludes::default(), intervals).unwrap();

        // Fill the event buffer without reading it.
        for i in 0..(EVENT_BUFFER as i64 * 2) {
            let path = dir.path().join("pages/index.md");
            set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000 + i, 0)).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        watcher.close();
    }

    #[test]
    fn test_rebuild_on_change_until_stopped() {
        use crate::build::{BuildSummary, Coordinator};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = site();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let coordinator = Coordinator::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BuildError>(BuildSummary::default())
        })
        .unwrap();

        let intervals = Intervals::new(Duration::from_millis(10), Duration::ZERO, DEFAULT_IDLE_AFTER);
        let watcher = PollWatcher::watch(dir.path(), Excludes::default(), intervals).unwrap();
        let stopper = watcher.stopper().unwrap();
        let handle = coordinator.handle();
        let consumer = thread::spawn(move || rebuild_on_change(&watcher, &handle));

        fs::write(dir.path().join("pages/new.md"), "---\n---\n").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while builds.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(builds.load(Ordering::SeqCst) >= 1);

        stopper.stop();
        consumer.join().unwrap();
        coordinator.shutdown();
    }
}
