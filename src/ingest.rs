//! Ingestion dispatch.
//!
//! `Ingestor::dispatch` takes one newly available path, decides whether it is a photo, an
//! archive or something to ignore, and routes it. Archives are expanded and their contents
//! dispatched again, one level deeper. `dispatch_tree` handles a whole directory (the
//! startup backlog or an expanded archive): every file is dispatched concurrently, at
//! most `max_concurrency` at a time, and the call returns only when all of them are done.
//!
//! Failures stay with the file that caused them. They are logged and counted in the
//! returned `IngestSummary`, and never stop sibling files.

use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinSet};
use walkdir::WalkDir;

use crate::archive::{self, ArchiveKind};
use crate::config::Config;
use crate::geocode::ReverseGeocoder;
use crate::process::{PhotoProcessor, PlacedPhoto};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// How a path is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Archive(ArchiveKind),
}

/// Classifies a path by name alone.
///
/// Hidden files (name starting with `.`) and unknown extensions yield `None`.
pub fn classify(path: &Path) -> Option<FileKind> {
    let name = path.file_name()?.to_string_lossy();
    if name.starts_with('.') {
        return None;
    }

    let ext = path.extension().and_then(OsStr::to_str)?;
    if IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)) {
        Some(FileKind::Image)
    } else {
        ArchiveKind::from_extension(ext).map(FileKind::Archive)
    }
}

/// Tries to open `path` for reading up to `attempts` times, pausing `delay` after each
/// failure. Returns whether the file became readable; callers proceed either way.
pub async fn wait_for_readable(path: &Path, attempts: u32, delay: Duration) -> bool {
    for attempt in 1..=attempts {
        match File::open(path) {
            Ok(_) => return true,
            Err(e) => {
                debug!(
                    "{} not readable yet (attempt {attempt}/{attempts}): {e}",
                    path.display()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    false
}

/// Result of dispatching one path
#[derive(Debug)]
pub enum IngestOutcome {
    Photo(PlacedPhoto),
    Archive(IngestSummary),
    Skipped,
    Failed,
}

/// Counts of what a batch of dispatches did, including files found inside archives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub photos: usize,
    pub archives: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl IngestSummary {
    pub fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Photo(_) => self.photos += 1,
            IngestOutcome::Archive(inner) => {
                self.archives += 1;
                self.merge(inner);
            }
            IngestOutcome::Skipped => self.skipped += 1,
            IngestOutcome::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &IngestSummary) {
        self.photos += other.photos;
        self.archives += other.archives;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

struct Inner {
    config: Arc<Config>,
    processor: PhotoProcessor,
}

/// Routes incoming files; cheap to clone and share between tasks
#[derive(Clone)]
pub struct Ingestor {
    inner: Arc<Inner>,
}

impl Ingestor {
    pub fn new(config: Arc<Config>, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        let processor = PhotoProcessor::new(config.output_dir.clone(), geocoder);
        Self {
            inner: Arc::new(Inner { config, processor }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Handles one newly available file
    pub async fn dispatch(&self, path: PathBuf) -> IngestOutcome {
        self.dispatch_at(path, 0).await
    }

    /// Dispatches every file below `root` and waits for all of them
    pub async fn dispatch_tree(&self, root: &Path) -> IngestSummary {
        self.dispatch_tree_at(root.to_path_buf(), 0).await
    }

    fn dispatch_at(&self, path: PathBuf, depth: u32) -> BoxFuture<'static, IngestOutcome> {
        let this = self.clone();
        Box::pin(async move {
            let Some(kind) = classify(&path) else {
                debug!("Ignoring {}", path.display());
                return IngestOutcome::Skipped;
            };

            let config = this.config();
            if !wait_for_readable(&path, config.readable_attempts, config.readable_delay()).await {
                warn!(
                    "{} still not readable after {} attempts, processing anyway",
                    path.display(),
                    config.readable_attempts
                );
            }

            match kind {
                FileKind::Image => {
                    info!("Found photo: {}", path.display());
                    match this.inner.processor.process(&path).await {
                        Ok(placed) => IngestOutcome::Photo(placed),
                        Err(e) => {
                            error!("Failed to process {}: {e:#}", path.display());
                            IngestOutcome::Failed
                        }
                    }
                }
                FileKind::Archive(archive_kind) => {
                    this.expand_archive(&path, archive_kind, depth).await
                }
            }
        })
    }

    async fn expand_archive(&self, path: &Path, kind: ArchiveKind, depth: u32) -> IngestOutcome {
        let config = self.config();
        if depth >= config.max_archive_depth {
            warn!(
                "Skipping {}: archives nested deeper than {} levels are not expanded",
                path.display(),
                config.max_archive_depth
            );
            return IngestOutcome::Skipped;
        }

        info!("Found archive: {}", path.display());
        let this = self.clone();
        let result = archive::expand(
            path,
            kind,
            &config.temp_root(),
            config.max_extracted_bytes,
            |workspace| async move { this.dispatch_tree_at(workspace, depth + 1).await },
        )
        .await;

        match result {
            Ok(summary) => {
                info!(
                    "Finished archive {}: {} photos, {} failed",
                    path.display(),
                    summary.photos,
                    summary.failed
                );
                IngestOutcome::Archive(summary)
            }
            Err(e) => {
                error!("Failed to expand archive {}: {e:#}", path.display());
                IngestOutcome::Failed
            }
        }
    }

    async fn dispatch_tree_at(&self, root: PathBuf, depth: u32) -> IngestSummary {
        let walk_root = root.clone();
        let files = match task::spawn_blocking(move || list_files(&walk_root)).await {
            Ok(files) => files,
            Err(e) => {
                error!("Failed to list {}: {e}", root.display());
                return IngestSummary::default();
            }
        };

        self.dispatch_all(files, depth).await
    }

    /// Dispatches `paths` concurrently with bounded parallelism and joins on all of them
    async fn dispatch_all(&self, paths: Vec<PathBuf>, depth: u32) -> IngestSummary {
        let concurrent_limit = self.config().max_concurrency.max(1);
        let mut summary = IngestSummary::default();
        let mut tasks = JoinSet::new();

        for path in paths {
            tasks.spawn(self.dispatch_at(path, depth));

            // Limit concurrent tasks
            if tasks.len() >= concurrent_limit {
                if let Some(joined) = tasks.join_next().await {
                    record_joined(&mut summary, joined);
                }
            }
        }

        // Wait for all remaining tasks to complete
        while let Some(joined) = tasks.join_next().await {
            record_joined(&mut summary, joined);
        }

        summary
    }
}

fn record_joined(summary: &mut IngestSummary, joined: Result<IngestOutcome, task::JoinError>) {
    match joined {
        Ok(outcome) => summary.record(&outcome),
        Err(e) => {
            error!("Ingestion task panicked: {e}");
            summary.failed += 1;
        }
    }
}

/// All regular files below `root`, in a stable order
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {e}", root.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
