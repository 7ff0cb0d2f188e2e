//! Collision-safe file placement.
//!
//! `place` copies a file into a destination directory under its own name, or under
//! `name_1.ext`, `name_2.ext`, ... when that name is taken. A name is claimed by creating
//! the destination with `create_new`, so two concurrent placements can never end up
//! writing the same file.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Characters that are not allowed in a file name on at least one supported platform
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Makes a single path component safe to use as a directory name.
///
/// Every invalid character becomes `_`. A name made only of dots is turned into
/// underscores too, so it cannot be read as `.` or `..`.
pub fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    if !sanitized.is_empty() && sanitized.chars().all(|c| c == '.') {
        "_".repeat(sanitized.len())
    } else {
        sanitized
    }
}

/// File name for the `n`th candidate: `stem.ext`, then `stem_1.ext`, `stem_2.ext`, ...
fn candidate_name(stem: &str, extension: Option<&str>, n: u32) -> OsString {
    let mut name = if n == 0 {
        stem.to_string()
    } else {
        format!("{stem}_{n}")
    };
    if let Some(ext) = extension {
        name.push('.');
        name.push_str(ext);
    }
    OsString::from(name)
}

/// Atomically claims the first free candidate name in `dest_dir`
fn claim_destination(
    dest_dir: &Path,
    stem: &str,
    extension: Option<&str>,
) -> Result<(PathBuf, File)> {
    let mut n = 0u32;
    loop {
        let candidate = dest_dir.join(candidate_name(stem, extension, n));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                n = n
                    .checked_add(1)
                    .context("Ran out of candidate file names")?;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create {}", candidate.display()));
            }
        }
    }
}

/// Copies `source` into `dest_dir`, creating the directory if needed.
///
/// Returns the path the copy was written to. The source is never modified.
pub fn place(source: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let Some(file_name) = source.file_name() else {
        bail!("{} has no file name", source.display());
    };
    let file_name = Path::new(file_name);
    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = file_name
        .extension()
        .map(|e| e.to_string_lossy().into_owned());

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory {}", dest_dir.display()))?;

    let mut reader = File::open(source)
        .with_context(|| format!("Failed to open {}", source.display()))?;
    let (destination, mut writer) = claim_destination(dest_dir, &stem, extension.as_deref())?;

    if let Err(e) = io::copy(&mut reader, &mut writer) {
        drop(writer);
        if let Err(cleanup) = fs::remove_file(&destination) {
            warn!(
                "Failed to remove partial copy {}: {}",
                destination.display(),
                cleanup
            );
        }
        return Err(e).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                source.display(),
                destination.display()
            )
        });
    }

    debug!("Copied {} to {}", source.display(), destination.display());
    Ok(destination)
}
