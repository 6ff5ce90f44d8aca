//! Snapshot store over a cache directory

use super::metadata::Metadata;
use crate::error::Error;
use crate::paths;
use std::fs;
use std::path::{Path, PathBuf};

/// Manages the snapshot subtree under a cache root.
///
/// ```text
/// <cache_root>/snapshots/
///     2025-01-15/
///         metadata.json
///         index_v4.bin
///         index_v6.bin
///         raw/              (optional)
///     latest -> 2025-01-15
/// ```
///
/// `latest` is a relative symbolic link. On hosts that refuse symlink
/// creation the store falls back to a plain file named `latest` whose
/// content is the target date; `get_latest` accepts both forms.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    cache_root: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at the given cache directory
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        SnapshotStore {
            cache_root: cache_root.into(),
        }
    }

    /// Cache root this store operates under
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// The `snapshots/` directory
    pub fn snapshots_dir(&self) -> PathBuf {
        paths::snapshots_dir(&self.cache_root)
    }

    /// Directory for a specific date (the directory may not exist)
    pub fn dir_for(&self, date: &str) -> PathBuf {
        self.snapshots_dir().join(date)
    }

    /// Ensure the date directory exists and return its path. Idempotent.
    pub fn create(&self, date: &str) -> Result<PathBuf, Error> {
        let dir = self.dir_for(date);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Io(format!("create {}: {}", dir.display(), e)))?;
        Ok(dir)
    }

    /// True iff a snapshot exists for the date.
    ///
    /// Gated on `metadata.json`: a bare date directory may be an
    /// in-progress build and does not count.
    pub fn exists(&self, date: &str) -> bool {
        paths::metadata_path(&self.dir_for(date)).exists()
    }

    /// All snapshot dates, lexicographically ascending.
    ///
    /// Only entries shaped like `YYYY-MM-DD` count; the `latest` pointer is
    /// excluded.
    pub fn list(&self) -> Result<Vec<String>, Error> {
        let dir = self.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut dates = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == paths::LATEST_LINK {
                continue;
            }
            if is_date_shaped(name) {
                dates.push(name.to_string());
            }
        }

        dates.sort();
        Ok(dates)
    }

    /// Snapshot directory and metadata for a specific date
    pub fn get_by_date(&self, date: &str) -> Result<(PathBuf, Metadata), Error> {
        let dir = self.dir_for(date);
        let meta_path = paths::metadata_path(&dir);
        if !meta_path.exists() {
            return Err(Error::SnapshotNotFound(date.to_string()));
        }
        let meta = Metadata::load(&meta_path)?;
        Ok((dir, meta))
    }

    /// Resolve the most recent snapshot.
    ///
    /// Tries the `latest` pointer first (symlink, then plain-file
    /// fallback); if neither resolves to loadable metadata, falls back to
    /// the lexicographically greatest date that loads. `NoSnapshots` when
    /// nothing usable exists.
    pub fn get_latest(&self) -> Result<(PathBuf, Metadata), Error> {
        let link = self.snapshots_dir().join(paths::LATEST_LINK);

        if let Ok(target) = fs::read_link(&link) {
            let dir = if target.is_absolute() {
                target
            } else {
                self.snapshots_dir().join(target)
            };
            if let Ok(meta) = Metadata::load(&paths::metadata_path(&dir)) {
                return Ok((dir, meta));
            }
        } else if let Ok(content) = fs::read_to_string(&link) {
            // Plain-file fallback: the file names the target date.
            let date = content.trim();
            if is_date_shaped(date) {
                let dir = self.dir_for(date);
                if let Ok(meta) = Metadata::load(&paths::metadata_path(&dir)) {
                    return Ok((dir, meta));
                }
            }
        }

        let mut dates = self.list()?;
        dates.reverse();
        for date in dates {
            let dir = self.dir_for(&date);
            if let Ok(meta) = Metadata::load(&paths::metadata_path(&dir)) {
                return Ok((dir, meta));
            }
        }

        Err(Error::NoSnapshots)
    }

    /// Point `latest` at the given date.
    ///
    /// Removes any existing pointer, then creates a relative symlink; if
    /// symlink creation fails, writes the plain-file form instead.
    pub fn set_latest(&self, date: &str) -> Result<(), Error> {
        let link = self.snapshots_dir().join(paths::LATEST_LINK);
        match fs::remove_file(&link) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(format!("remove {}: {}", link.display(), e))),
        }

        if symlink_to(date, &link).is_err() {
            fs::write(&link, date)
                .map_err(|e| Error::Io(format!("write {}: {}", link.display(), e)))?;
        }
        Ok(())
    }

    /// Remove a snapshot directory recursively.
    ///
    /// Does not touch `latest`; re-pointing it is the caller's business.
    pub fn delete(&self, date: &str) -> Result<(), Error> {
        let dir = self.dir_for(date);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("remove {}: {}", dir.display(), e))),
        }
    }
}

/// `YYYY-MM-DD`: ten chars, hyphens at positions 4 and 7, digits elsewhere
fn is_date_shaped(name: &str) -> bool {
    let b = name.as_bytes();
    b.len() == 10
        && b.iter()
            .enumerate()
            .all(|(i, &c)| if i == 4 || i == 7 { c == b'-' } else { c.is_ascii_digit() })
}

#[cfg(unix)]
fn symlink_to(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_to(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
