//! Archive expansion.
//!
//! An archive is unpacked into a `TempWorkspace`, a uniquely named scratch directory under
//! the system temp root, and the extracted files are handed back to the caller for
//! re-ingestion. The workspace is removed once that work completes, whether extraction or
//! processing failed or not. If the expanding task is dropped half way, `Drop` still
//! removes the directory.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
}

impl ArchiveKind {
    /// Detects the format from a file extension, case-insensitively
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("zip") {
            Some(Self::Zip)
        } else if ext.eq_ignore_ascii_case("tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// A scratch directory owned by one expansion
#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    removed: bool,
}

impl TempWorkspace {
    /// Creates a fresh, uniquely named workspace under `root`
    pub fn create_in(root: &Path) -> Result<Self> {
        let path = root.join(format!("photo-sorter-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create workspace {}", path.display()))?;
        debug!("Created workspace {}", path.display());

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the workspace and everything in it; failures are logged
    pub async fn remove(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed workspace {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove workspace {}: {}", self.path.display(), e);
            }
        }
    }
}

/// What an extraction produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Tracks bytes written against the per-archive limit
struct ByteBudget {
    remaining: u64,
}

impl ByteBudget {
    fn write_entry(&mut self, reader: &mut dyn Read, target: &Path) -> Result<u64> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = File::create(target)
            .with_context(|| format!("Failed to create {}", target.display()))?;

        // Read one byte past the budget to detect an overrun
        let mut limited = reader.take(self.remaining.saturating_add(1));
        let written = io::copy(&mut limited, &mut file)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        if written > self.remaining {
            bail!("Archive exceeds the extraction limit");
        }

        self.remaining -= written;
        Ok(written)
    }
}

/// Turns an entry name into a path relative to the workspace.
///
/// Returns `None` for names that are empty or would escape the workspace.
fn safe_relative_path(name: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Extracts every non-directory entry of `archive` into `dest`, overwriting collisions
pub fn extract(
    archive: &Path,
    kind: ArchiveKind,
    dest: &Path,
    max_bytes: u64,
) -> Result<ExtractSummary> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let mut budget = ByteBudget {
        remaining: max_bytes,
    };

    match kind {
        ArchiveKind::Zip => extract_zip(file, dest, &mut budget),
        ArchiveKind::Tar => extract_tar(file, dest, &mut budget),
    }
    .with_context(|| format!("Failed to extract {}", archive.display()))
}

fn extract_zip(file: File, dest: &Path, budget: &mut ByteBudget) -> Result<ExtractSummary> {
    let mut zip = zip::ZipArchive::new(file).context("Not a readable zip archive")?;
    let mut summary = ExtractSummary::default();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = safe_relative_path(Path::new(entry.name())) else {
            warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };

        summary.bytes += budget.write_entry(&mut entry, &dest.join(relative))?;
        summary.files += 1;
    }

    Ok(summary)
}

fn extract_tar(file: File, dest: &Path, budget: &mut ByteBudget) -> Result<ExtractSummary> {
    let mut tar = tar::Archive::new(file);
    let mut summary = ExtractSummary::default();

    for entry in tar.entries().context("Not a readable tar archive")? {
        let mut entry = entry?;
        // Links and special files are skipped along with directories
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.into_owned();
        let Some(relative) = safe_relative_path(&name) else {
            warn!("Skipping unsafe archive entry {}", name.display());
            continue;
        };

        summary.bytes += budget.write_entry(&mut entry, &dest.join(relative))?;
        summary.files += 1;
    }

    Ok(summary)
}

/// Expands `archive` into a fresh workspace under `temp_root` and runs `reingest` over it.
///
/// `reingest` receives the workspace directory and must finish all work on its files
/// before its future resolves; the workspace is removed right after. Extraction failures
/// skip `reingest` and are returned as errors once the workspace is gone.
pub async fn expand<F, Fut, T>(
    archive: &Path,
    kind: ArchiveKind,
    temp_root: &Path,
    max_bytes: u64,
    reingest: F,
) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = T>,
{
    let workspace = TempWorkspace::create_in(temp_root)?;
    let result = expand_into(&workspace, archive, kind, max_bytes, reingest).await;
    workspace.remove().await;
    result
}

async fn expand_into<F, Fut, T>(
    workspace: &TempWorkspace,
    archive: &Path,
    kind: ArchiveKind,
    max_bytes: u64,
    reingest: F,
) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = T>,
{
    let source = archive.to_path_buf();
    let dest = workspace.path().to_path_buf();
    let summary = tokio::task::spawn_blocking(move || extract(&source, kind, &dest, max_bytes))
        .await
        .context("Extraction task failed")??;

    debug!(
        "Extracted {} files ({} bytes) from {}",
        summary.files,
        summary.bytes,
        archive.display()
    );

    Ok(reingest(workspace.path().to_path_buf()).await)
}
