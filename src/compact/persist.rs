//! Staged, all-or-nothing file writes.
//!
//! Every file is first written to a temporary file in its target
//! directory. Only when all of them are on disk are they renamed over
//! their targets. If a rename fails, targets already replaced are
//! restored from their previous contents.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::util::{Error, Result};

/// Files waiting to be written.
#[derive(Debug, Default)]
pub struct StagedWrites {
    writes: Vec<(PathBuf, Vec<u8>)>,
}

impl StagedWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: PathBuf, bytes: Vec<u8>) {
        self.writes.push((path, bytes));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// True if `path` is already scheduled.
    pub fn contains(&self, path: &Path) -> bool {
        self.writes.iter().any(|(p, _)| p == path)
    }

    /// Write everything or nothing. Returns the written paths.
    #[tracing::instrument(skip_all, fields(files = self.writes.len()))]
    pub fn commit(self) -> Result<Vec<PathBuf>> {
        let mut temps = Vec::with_capacity(self.writes.len());
        for (path, bytes) in self.writes {
            let temp = stage(&path, &bytes).map_err(|source| Error::PersistenceFailed {
                path: path.clone(),
                source,
            })?;
            let previous = fs::read(&path).ok();
            temps.push((path, temp, previous));
        }

        let mut written: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::with_capacity(temps.len());
        for (path, temp, previous) in temps {
            if let Err(e) = temp.persist(&path) {
                rollback(&written);
                return Err(Error::PersistenceFailed {
                    path,
                    source: e.error,
                });
            }
            tracing::debug!(path = %path.display(), "written");
            written.push((path, previous));
        }
        Ok(written.into_iter().map(|(p, _)| p).collect())
    }
}

fn stage(path: &Path, bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

fn rollback(written: &[(PathBuf, Option<Vec<u8>>)]) {
    for (path, previous) in written.iter().rev() {
        let restored = match previous {
            Some(bytes) => fs::write(path, bytes),
            None => fs::remove_file(path),
        };
        if let Err(e) = restored {
            tracing::error!(path = %path.display(), error = %e, "rollback failed");
        }
    }
}
