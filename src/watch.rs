//! Live watching of the input directory.
//!
//! Wraps a recursive `notify` watcher and turns its events into paths of files that became
//! available in the watched tree. A folder that appears is reported as the files inside
//! it. While a file is reported and not yet forgotten, further events for it are dropped.
//!
//! On Linux a new file is only reported once its writer closes it, so a photo still being
//! copied is not picked up half written. Files found by listing a new folder may have
//! been closed before the folder was watched; they are held until they are closed or
//! their size stops changing for one settle interval. Other platforms have no close
//! notification and report files when they are created.

use anyhow::{Context, Result};
use log::{debug, warn};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::ingest::list_files;

/// Whether the platform watcher reports a writer closing a file
const ARRIVE_ON_CLOSE: bool = cfg!(target_os = "linux");

/// A change to the watched tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A file or folder was created; a file may still be being written
    Created(PathBuf),
    /// A file opened for writing was closed
    Written(PathBuf),
    /// A file or folder was moved into the tree
    MovedIn(PathBuf),
    /// A file or folder left the tree
    Removed(PathBuf),
}

/// The changes carried by one watcher event
pub fn changes(event: Event) -> Vec<Change> {
    match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Folder | CreateKind::Any) => {
            event.paths.into_iter().map(Change::Created).collect()
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            event.paths.into_iter().map(Change::Written).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(Change::MovedIn).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
            event.paths.into_iter().map(Change::Removed).collect()
        }
        // a rename reported as one event carries [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut changes = Vec::new();
            if let Some(from) = paths.next() {
                changes.push(Change::Removed(from));
            }
            changes.extend(paths.map(Change::MovedIn));
            changes
        }
        _ => Vec::new(),
    }
}

/// Decides which changes make a file available, and reports each file once
#[derive(Debug)]
pub struct ArrivalTracker {
    arrive_on_close: bool,
    // listed files not known to be complete, with their size when last looked at
    held: HashMap<PathBuf, u64>,
    reported: HashSet<PathBuf>,
}

impl ArrivalTracker {
    pub fn new(arrive_on_close: bool) -> Self {
        Self {
            arrive_on_close,
            held: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    /// Files that became available through `change`
    pub fn apply(&mut self, change: Change) -> Vec<PathBuf> {
        match change {
            // files written before the new folder was watched only show up in this listing
            Change::Created(path) if self.arrive_on_close && path.is_dir() => {
                self.hold_all(list_files(&path));
                Vec::new()
            }
            Change::Created(path) | Change::MovedIn(path) if path.is_dir() => {
                self.report_all(list_files(&path))
            }
            Change::Created(path) if self.arrive_on_close => {
                debug!("Waiting for {} to be written", path.display());
                Vec::new()
            }
            Change::Created(path) | Change::MovedIn(path) | Change::Written(path) => {
                self.report_all(vec![path])
            }
            Change::Removed(path) => {
                self.held.retain(|held, _| !held.starts_with(&path));
                self.reported.retain(|reported| !reported.starts_with(&path));
                Vec::new()
            }
        }
    }

    /// Reports held files whose size has not changed since they were last looked at
    pub fn settle(&mut self) -> Vec<PathBuf> {
        let mut settled = Vec::new();
        self.held.retain(|path, size| match fs::metadata(path) {
            Ok(metadata) if metadata.len() == *size => {
                settled.push(path.clone());
                false
            }
            Ok(metadata) => {
                *size = metadata.len();
                true
            }
            Err(_) => false,
        });
        settled.sort();
        self.report_all(settled)
    }

    pub fn has_held(&self) -> bool {
        !self.held.is_empty()
    }

    /// Lets a reported path arrive again, once its ingestion has finished
    pub fn forget(&mut self, path: &Path) {
        self.reported.remove(path);
    }

    fn hold_all(&mut self, paths: Vec<PathBuf>) {
        for path in paths {
            if self.reported.contains(&path) {
                continue;
            }
            if let Ok(metadata) = fs::metadata(&path) {
                debug!("Holding {} until it is complete", path.display());
                self.held.insert(path, metadata.len());
            }
        }
    }

    fn report_all(&mut self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        paths
            .into_iter()
            .filter(|path| {
                self.held.remove(path);
                path.is_file() && self.reported.insert(path.clone())
            })
            .collect()
    }
}

pub struct InputWatcher {
    // dropping the watcher stops the notifications
    _watcher: RecommendedWatcher,
    changes: mpsc::UnboundedReceiver<Change>,
    tracker: ArrivalTracker,
    ready: VecDeque<PathBuf>,
    settle_interval: Duration,
    settle_at: Option<Instant>,
}

impl InputWatcher {
    /// Starts watching `dir` and everything below it.
    ///
    /// Held files are reported once their size is unchanged over `settle_interval`.
    pub fn start(dir: &Path, settle_interval: Duration) -> Result<Self> {
        let (tx, changes_rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in changes(event) {
                    // the receiver is gone once shutdown has begun
                    let _ = tx.send(change);
                }
            }
            Err(e) => warn!("Watch error: {e}"),
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(dir, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;

        Ok(Self {
            _watcher: watcher,
            changes: changes_rx,
            tracker: ArrivalTracker::new(ARRIVE_ON_CLOSE),
            ready: VecDeque::new(),
            settle_interval,
            settle_at: None,
        })
    }

    /// Next file that became available in the watched tree
    pub async fn next_path(&mut self) -> Option<PathBuf> {
        loop {
            if let Some(path) = self.ready.pop_front() {
                return Some(path);
            }

            let received = match self.settle_at {
                Some(deadline) => tokio::time::timeout_at(deadline, self.changes.recv()).await,
                None => Ok(self.changes.recv().await),
            };
            match received {
                Ok(change) => {
                    let arrived = self.tracker.apply(change?);
                    self.ready.extend(arrived);
                }
                Err(_) => {
                    self.settle_at = None;
                    let settled = self.tracker.settle();
                    self.ready.extend(settled);
                }
            }

            if self.settle_at.is_none() && self.tracker.has_held() {
                self.settle_at = Some(Instant::now() + self.settle_interval);
            }
        }
    }

    /// Marks `path` as done, so a later write to it is a new arrival
    pub fn forget(&mut self, path: &Path) {
        self.tracker.forget(path);
    }
}
