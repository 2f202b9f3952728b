//! A loaded asset: document, buffer store and resolved buffers.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use rayon::prelude::*;

use crate::accessor::AccessorTable;
use crate::buffer::BufferStore;
use crate::build::{BuildOptions, PrimitiveBufferBuilder};
use crate::compact::{self, CompactOptions, CompactionPass, CompactionReport, GeometryEncoder};
use crate::document::Document;
use crate::glb::{is_container, write_container, Container};
use crate::util::Result;

/// Options for opening assets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadOptions {
    /// Memory-map the input file instead of reading it.
    pub use_mmap: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_mmap: cfg!(feature = "mmap"),
        }
    }
}

impl LoadOptions {
    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }
}

/// One parsed asset with every buffer resolved.
pub struct Asset {
    document: Document,
    store: BufferStore,
    buffers: Vec<Arc<[u8]>>,
    container: bool,
    path: Option<PathBuf>,
}

impl Asset {
    /// Open a `.glb` or `.gltf` file. External buffers resolve next to it.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, opts: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        let base = path.parent().map(Path::to_path_buf);

        let mut asset = if opts.use_mmap && size > 0 {
            // Safety: the map is read-only and dropped before this function returns
            let mmap = unsafe { Mmap::map(&file) }?;
            Self::from_slice(&mmap, base)?
        } else {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data)?;
            Self::from_slice(&data, base)?
        };
        asset.path = Some(path.to_path_buf());
        Ok(asset)
    }

    /// Parse container or JSON bytes, detected by the container magic.
    pub fn from_slice(bytes: &[u8], base_path: Option<PathBuf>) -> Result<Self> {
        let container = is_container(bytes);
        let (document, store) = if container {
            let (json, bin) = Container::parse(bytes)?.into_parts();
            (Document::from_slice(&json)?, BufferStore::new(base_path, bin))
        } else {
            (Document::from_slice(bytes)?, BufferStore::new(base_path, None))
        };
        document.validate_references()?;
        let buffers = store.resolve_all(&document)?;

        tracing::debug!(
            container,
            buffers = buffers.len(),
            views = document.buffer_views.len(),
            accessors = document.accessors.len(),
            "asset loaded"
        );
        Ok(Self {
            document,
            store,
            buffers,
            container,
            path: None,
        })
    }

    #[inline]
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Mutable document access. Call [`refresh_buffers`](Self::refresh_buffers)
    /// after changing buffer entries.
    #[inline]
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    #[inline]
    pub fn store(&self) -> &BufferStore {
        &self.store
    }

    #[inline]
    pub fn buffers(&self) -> &[Arc<[u8]>] {
        &self.buffers
    }

    /// True if loaded from a binary container.
    #[inline]
    pub fn is_container(&self) -> bool {
        self.container
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn accessors(&self) -> AccessorTable<'_> {
        AccessorTable::new(&self.document, &self.buffers)
    }

    pub fn builder(&self, options: BuildOptions) -> PrimitiveBufferBuilder<'_> {
        PrimitiveBufferBuilder::new(&self.document, &self.buffers, options)
    }

    /// Compact away the data of `removed` accessors.
    pub fn compact(&mut self, removed: &BTreeSet<usize>, options: &CompactOptions) -> Result<CompactionReport> {
        let report = CompactionPass::new(options.clone()).run(&mut self.document, &mut self.store, removed)?;
        self.adopt_buffers(&report);
        Ok(report)
    }

    /// Encode every uncompressed primitive and compact the freed data.
    pub fn compress_meshes<E: GeometryEncoder + ?Sized>(
        &mut self,
        encoder: &mut E,
        options: &CompactOptions,
    ) -> Result<CompactionReport> {
        let report = compact::compress_meshes(&mut self.document, &mut self.store, &self.buffers, encoder, options)?;
        self.adopt_buffers(&report);
        Ok(report)
    }

    /// Line the resolved buffers up with the compacted buffer table.
    ///
    /// Buffers the pass produced come from the report; the rest keep the
    /// bytes already in memory, minus the buffers it deleted.
    fn adopt_buffers(&mut self, report: &CompactionReport) {
        let mut survivors = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(i, _)| !report.removed_buffers.contains(i))
            .map(|(_, bytes)| bytes);
        self.buffers = (0..self.document.buffers.len())
            .map(|i| {
                let kept = survivors.next();
                match report.buffers.get(&i).or(kept) {
                    Some(bytes) => Arc::clone(bytes),
                    None => {
                        tracing::warn!(buffer = i, "no bytes for buffer after compaction");
                        Arc::from(Vec::new())
                    }
                }
            })
            .collect();
    }

    /// Re-resolve every buffer. Buffers that fail resolve to empty bytes
    /// and their errors are returned.
    pub fn refresh_buffers(&mut self) -> Vec<crate::util::Error> {
        let mut errors = Vec::new();
        self.buffers = self
            .document
            .buffers
            .iter()
            .enumerate()
            .map(|(i, b)| {
                self.store.resolve(i, b).unwrap_or_else(|e| {
                    tracing::warn!(buffer = i, error = %e, "buffer unavailable after rewrite");
                    errors.push(e);
                    Arc::from(Vec::new())
                })
            })
            .collect();
        errors
    }

    /// Serialize as a binary container carrying the current BIN payload.
    pub fn to_container(&self) -> Result<Vec<u8>> {
        write_container(&self.document.to_vec()?, self.store.container_payload())
    }

    /// Write back in the format the asset was loaded from.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = if self.container {
            self.to_container()?
        } else {
            self.document.to_vec_pretty()?
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Open several assets in parallel. Each load fails on its own.
#[tracing::instrument(skip_all, fields(count = paths.len()))]
pub fn load_all<P: AsRef<Path> + Sync>(paths: &[P], opts: &LoadOptions) -> Vec<Result<Asset>> {
    paths.par_iter().map(|p| Asset::open(p, opts)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "asset": {"version": "2.0"},
        "buffers": [{"byteLength": 4, "uri": "data:application/octet-stream;base64,AQIDBA=="}],
        "bufferViews": [{"buffer": 0, "byteLength": 4}],
        "accessors": [{"bufferView": 0, "componentType": 5121, "count": 4, "type": "SCALAR"}]
    }"#;

    #[test]
    fn test_json_asset() {
        let asset = Asset::from_slice(JSON.as_bytes(), None).unwrap();
        assert!(!asset.is_container());
        assert_eq!(asset.accessors().read::<u8>(0).unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_container_asset() {
        let json = r#"{"buffers": [{"byteLength": 3}], "bufferViews": [{"buffer": 0, "byteLength": 3}]}"#;
        let bytes = write_container(json.as_bytes(), Some(&[7u8, 8, 9][..])).unwrap();
        let asset = Asset::from_slice(&bytes, None).unwrap();
        assert!(asset.is_container());
        assert_eq!(&*asset.buffers()[0], &[7, 8, 9]);
        assert_eq!(asset.accessors().views().bytes(0).unwrap(), &[7, 8, 9]);
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let json = r#"{"bufferViews": [{"buffer": 2, "byteLength": 3}]}"#;
        assert!(Asset::from_slice(json.as_bytes(), None).is_err());
    }

    #[test]
    fn test_overflowing_offset_rejected() {
        let json = r#"{"buffers": [{"byteLength": 4, "uri": "data:application/octet-stream;base64,AQIDBA=="}],
            "bufferViews": [{"buffer": 0, "byteOffset": 18446744073709551615, "byteLength": 4}]}"#;
        assert!(matches!(
            Asset::from_slice(json.as_bytes(), None),
            Err(crate::util::Error::ViewOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_default_options() {
        assert_eq!(LoadOptions::default().use_mmap, cfg!(feature = "mmap"));
        assert!(!LoadOptions::default().with_mmap(false).use_mmap);
    }
}
