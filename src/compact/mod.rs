//! Buffer compaction.
//!
//! When accessors are replaced by an encoded blob their bytes are dead
//! weight. [`CompactionPass`] strips their view references, cuts the
//! unused ranges out of the buffers and rewrites every index that
//! pointed past a deleted entry. [`compress_meshes`] drives the whole
//! flow for an external [`GeometryEncoder`].
//!
//! ```text
//!  buffer 0 before:  [ keep | removed | keep | removed | keep ]
//!  buffer 0 after:   [ keep | keep | keep ]
//!                            ^ surviving offsets shift by the
//!                              removed bytes in front of them
//! ```

mod encoder;
mod pass;
mod persist;
mod ranges;
mod reindex;

pub use encoder::{compress_meshes, EncodedGeometry, GeometryEncoder, RawAttribute, RawGeometry};
pub use pass::CompactionPass;
pub use persist::StagedWrites;
pub use ranges::{ByteRange, RemovedRanges};
pub use reindex::Reindex;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::util::Error;

/// Default stem of the file holding appended encoded data.
pub const DEFAULT_BUFFER_BASENAME: &str = "compressed";

/// How rewritten buffers are stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Embedding {
    /// Embedded buffers stay embedded, external files are rewritten in
    /// place or copied to the destination.
    #[default]
    Keep,
    /// Every buffer and image becomes a data URI.
    All,
}

/// Compaction configuration.
#[derive(Clone, Debug, Default)]
pub struct CompactOptions {
    pub embedding: Embedding,
    /// Directory for written files. Defaults to the asset's directory.
    pub destination: Option<PathBuf>,
    /// File stem of the appended buffer. Defaults to [`DEFAULT_BUFFER_BASENAME`].
    pub buffer_basename: Option<String>,
}

impl CompactOptions {
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_destination(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination = Some(dir.into());
        self
    }

    pub fn with_buffer_basename(mut self, name: impl Into<String>) -> Self {
        self.buffer_basename = Some(name.into());
        self
    }

    pub(crate) fn basename(&self) -> &str {
        self.buffer_basename.as_deref().unwrap_or(DEFAULT_BUFFER_BASENAME)
    }
}

/// What a compaction did.
#[derive(Debug, Default)]
pub struct CompactionReport {
    /// Deleted views, by index before compaction.
    pub removed_buffer_views: Vec<usize>,
    /// Deleted buffers, by index before compaction.
    pub removed_buffers: Vec<usize>,
    /// Bytes cut from each buffer, by index before compaction.
    pub bytes_removed: BTreeMap<usize, u64>,
    /// Files written to disk, copies included.
    pub written_files: Vec<PathBuf>,
    /// Current bytes of every buffer the pass rewrote, embedded or
    /// appended, by index after compaction.
    pub buffers: BTreeMap<usize, Arc<[u8]>>,
    /// New contents of the container's BIN chunk, if it changed.
    pub container_payload: Option<Vec<u8>>,
    /// Index of the appended encoded buffer.
    pub appended_buffer: Option<usize>,
    /// Primitives that received an encoded geometry block.
    pub encoded_primitives: usize,
    /// Failures that did not abort the pass.
    pub errors: Vec<Error>,
}

impl CompactionReport {
    /// True if neither the document nor any file changed.
    pub fn is_noop(&self) -> bool {
        self.removed_buffer_views.is_empty()
            && self.removed_buffers.is_empty()
            && self.bytes_removed.is_empty()
            && self.appended_buffer.is_none()
            && self.buffers.is_empty()
            && self.written_files.is_empty()
    }

    pub fn total_bytes_removed(&self) -> u64 {
        self.bytes_removed.values().sum()
    }
}

/// First of `stem.ext`, `stem-1.ext`, `stem-2.ext`, ... not yet taken.
pub fn unique_filename(dir: &Path, stem: &str, ext: &str, taken: impl Fn(&Path) -> bool) -> String {
    let mut name = format!("{stem}.{ext}");
    let mut n = 0;
    loop {
        let path = dir.join(&name);
        if !path.exists() && !taken(&path) {
            return name;
        }
        n += 1;
        name = format!("{stem}-{n}.{ext}");
    }
}
