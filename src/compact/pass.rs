//! The compaction pass.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::persist::StagedWrites;
use super::ranges::{ByteRange, RemovedRanges};
use super::reindex::Reindex;
use super::{unique_filename, CompactOptions, CompactionReport, Embedding};
use crate::buffer::{
    classify, image_media_type, read_file, to_data_uri, to_data_uri_as, BufferSource, BufferStore, UriKind,
};
use crate::document::{Buffer, Document, COMPRESSED_GEOMETRY_EXTENSION};
use crate::util::{Error, Result, TableKind};

/// Removes the data of replaced accessors from a document's buffers.
///
/// The pass works on a copy of the document. Only after every file is on
/// disk is the copy swapped in, so a failed run leaves the caller's
/// document and files as they were.
#[derive(Clone, Debug, Default)]
pub struct CompactionPass {
    options: CompactOptions,
    appended: Option<Vec<u8>>,
}

impl CompactionPass {
    pub fn new(options: CompactOptions) -> Self {
        Self {
            options,
            appended: None,
        }
    }

    /// Append an encoded buffer after compaction and register the
    /// compressed-geometry extension.
    ///
    /// Views that should point at it use the index one past the last
    /// existing buffer; they are shifted along with everything else.
    pub fn with_appended(mut self, bytes: Vec<u8>) -> Self {
        self.appended = Some(bytes);
        self
    }

    pub fn options(&self) -> &CompactOptions {
        &self.options
    }

    /// Compact `doc` after the accessors in `removed` lost their data.
    ///
    /// With a destination other than the store's base path, external files
    /// the pass does not rewrite are copied there, and the store is re-based
    /// onto it. Under [`Embedding::All`] every buffer and image ends up
    /// inline.
    #[tracing::instrument(skip_all, fields(removed = removed.len()))]
    pub fn run(
        &self,
        doc: &mut Document,
        store: &mut BufferStore,
        removed: &BTreeSet<usize>,
    ) -> Result<CompactionReport> {
        let copy_to = self.copy_target(store);
        if removed.is_empty()
            && self.appended.is_none()
            && copy_to.is_none()
            && self.options.embedding == Embedding::Keep
        {
            tracing::debug!("nothing to compact");
            return Ok(CompactionReport::default());
        }

        let mut work = doc.clone();
        let mut report = CompactionReport::default();
        let buffer_count = work.buffers.len();
        let pending = usize::from(self.appended.is_some());

        work.validate_references_with(pending)?;
        if let Some(&bad) = removed.iter().find(|&&a| a >= work.accessors.len()) {
            return Err(Error::dangling(TableKind::Accessor, bad, work.accessors.len()));
        }

        // Strip the removed accessors and collect views nothing else uses
        let candidates = strip_accessors(&mut work, removed);
        let ranges = plan_ranges(&work, &candidates)?;

        // Cut the ranges out of each affected buffer
        let mut rewritten: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        let mut skipped = BTreeSet::new();
        for (&b, r) in &ranges {
            if r.is_empty() {
                continue;
            }
            if b >= buffer_count {
                return Err(Error::other(format!(
                    "removed views point into the appended buffer {b}"
                )));
            }
            let bytes = match store.resolve(b, &work.buffers[b]) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(buffer = b, error = %e, "buffer left untouched");
                    skipped.insert(b);
                    report.errors.push(e);
                    continue;
                }
            };
            report.bytes_removed.insert(b, r.total());
            rewritten.insert(b, r.apply(&bytes)?);
        }

        // Delete the views and re-point everything that referenced past them
        let view_map = Reindex::removing(TableKind::BufferView, work.buffer_views.len(), &candidates);
        remap_views(&mut work, &view_map)?;
        for &v in candidates.iter().rev() {
            work.buffer_views.remove(v);
        }
        report.removed_buffer_views = candidates.iter().copied().collect();

        // Surviving views move down by the bytes removed in front of them
        for view in &mut work.buffer_views {
            if skipped.contains(&view.buffer) {
                continue;
            }
            if let Some(r) = ranges.get(&view.buffer) {
                let old = view.offset();
                let new = r.map_offset(old);
                if new != old {
                    view.byte_offset = Some(new);
                }
            }
        }

        // Buffers left with no bytes and no views go away
        let emptied: BTreeSet<usize> = rewritten
            .iter()
            .filter(|(&b, bytes)| bytes.is_empty() && !work.buffer_views.iter().any(|v| v.buffer == b))
            .map(|(&b, _)| b)
            .collect();
        let buffer_map = Reindex::removing(TableKind::Buffer, buffer_count + pending, &emptied);
        for view in &mut work.buffer_views {
            buffer_map.apply(&mut view.buffer)?;
        }

        // Update lengths and decide where each rewritten buffer goes
        let mut writes = StagedWrites::new();
        let mut container_detached = false;
        for (&b, bytes) in &rewritten {
            if emptied.contains(&b) {
                if store.source(b, &work.buffers[b]).ok() == Some(BufferSource::Container) {
                    container_detached = true;
                }
                continue;
            }
            let source = store
                .source(b, &work.buffers[b])
                .map_err(|cause| Error::BufferUnresolvable { buffer: b, cause })?;
            let buffer = &mut work.buffers[b];
            buffer.byte_length = bytes.len() as u64;
            match source {
                BufferSource::Container if self.options.embedding == Embedding::Keep => {
                    report.container_payload = Some(bytes.clone());
                }
                BufferSource::External(path) if self.options.embedding == Embedding::Keep => {
                    let target = self.external_target(buffer, path);
                    writes.push(target, bytes.clone());
                }
                source => {
                    if source == BufferSource::Container {
                        container_detached = true;
                    }
                    buffer.uri = Some(to_data_uri(bytes));
                }
            }
        }

        // Buffers the cut left alone still follow the output layout
        let mut inlined: BTreeMap<usize, Arc<[u8]>> = BTreeMap::new();
        for b in 0..buffer_count {
            if rewritten.contains_key(&b) || skipped.contains(&b) {
                continue;
            }
            let buffer = &mut work.buffers[b];
            match self.options.embedding {
                Embedding::All => match store.source(b, buffer) {
                    Ok(BufferSource::Embedded) => {}
                    Ok(source) => match store.resolve(b, buffer) {
                        Ok(bytes) => {
                            container_detached |= source == BufferSource::Container;
                            buffer.uri = Some(to_data_uri(&bytes));
                            inlined.insert(b, bytes);
                        }
                        Err(e) => {
                            tracing::warn!(buffer = b, error = %e, "cannot embed buffer");
                            report.errors.push(e);
                        }
                    },
                    Err(cause) => report.errors.push(Error::BufferUnresolvable { buffer: b, cause }),
                },
                Embedding::Keep => {
                    let (Some(dest), Some(rel)) = (copy_to, relative_path(buffer.uri.as_deref())) else {
                        continue;
                    };
                    let target = dest.join(rel);
                    if writes.contains(&target) {
                        continue;
                    }
                    match read_file(&store.external_path(rel)) {
                        Ok(bytes) => writes.push(target, bytes),
                        Err(cause) => {
                            tracing::warn!(buffer = b, error = %cause, "cannot copy missing buffer file");
                            report.errors.push(Error::BufferUnresolvable { buffer: b, cause });
                        }
                    }
                }
            }
        }
        self.carry_images(&mut work, store, copy_to, &mut writes, &mut report);

        for &b in emptied.iter().rev() {
            tracing::debug!(buffer = b, "removing emptied buffer");
            work.buffers.remove(b);
        }
        report.removed_buffers = emptied.iter().copied().collect();

        if let Some(bytes) = &self.appended {
            let index = work.buffers.len();
            if buffer_map.get(buffer_count) != Some(index) {
                return Err(Error::other(format!(
                    "appended buffer index mismatch: views expect {:?}, table has {index}",
                    buffer_map.get(buffer_count)
                )));
            }
            let mut buffer = Buffer {
                byte_length: bytes.len() as u64,
                ..Default::default()
            };
            match self.options.embedding {
                Embedding::All => buffer.uri = Some(to_data_uri(bytes)),
                Embedding::Keep => {
                    let dir = self.output_dir(store);
                    let name = unique_filename(&dir, self.options.basename(), "bin", |p| writes.contains(p));
                    writes.push(dir.join(&name), bytes.clone());
                    buffer.uri = Some(name);
                }
            }
            work.buffers.push(buffer);
            work.register_extension(COMPRESSED_GEOMETRY_EXTENSION, true);
            report.appended_buffer = Some(index);
            report.buffers.insert(index, Arc::from(bytes.as_slice()));
        }

        verify_rewritten_bounds(&work, &rewritten, &emptied, &buffer_map)?;

        report.written_files = writes.commit()?;

        // Everything is on disk; record the new bytes under their new indices
        let changed = rewritten
            .into_iter()
            .filter(|(b, _)| !emptied.contains(b))
            .map(|(b, bytes)| (b, Arc::<[u8]>::from(bytes)))
            .chain(inlined);
        for (b, bytes) in changed {
            if let Some(index) = buffer_map.get(b) {
                report.buffers.insert(index, bytes);
            }
        }

        if container_detached {
            store.set_container_payload(None);
        } else if let Some(payload) = &report.container_payload {
            store.set_container_payload(Some(payload.clone()));
        }
        if let Some(dest) = &self.options.destination {
            store.set_base_path(Some(dest.clone()));
        }
        *doc = work;

        tracing::info!(
            views = report.removed_buffer_views.len(),
            buffers = report.removed_buffers.len(),
            bytes = report.total_bytes_removed(),
            files = report.written_files.len(),
            "compaction done"
        );
        Ok(report)
    }

    /// Copy or embed the images that live in external files.
    fn carry_images(
        &self,
        work: &mut Document,
        store: &BufferStore,
        copy_to: Option<&Path>,
        writes: &mut StagedWrites,
        report: &mut CompactionReport,
    ) {
        for (i, image) in work.images.iter_mut().enumerate() {
            let Some(uri) = image.uri.as_deref() else {
                continue;
            };
            let path = match (self.options.embedding, classify(uri)) {
                (Embedding::All, Ok(UriKind::Path(path))) => path,
                (Embedding::Keep, Ok(UriKind::Path(path))) if copy_to.is_some() && Path::new(path).is_relative() => path,
                _ => continue,
            };
            let bytes = match read_file(&store.external_path(path)) {
                Ok(bytes) => bytes,
                Err(cause) => {
                    tracing::warn!(image = i, error = %cause, "cannot read image file");
                    report.errors.push(Error::ImageUnresolvable { image: i, cause });
                    continue;
                }
            };
            match copy_to {
                Some(dest) if self.options.embedding == Embedding::Keep => {
                    let target = dest.join(path);
                    if !writes.contains(&target) {
                        writes.push(target, bytes);
                    }
                }
                _ => image.uri = Some(to_data_uri_as(image_media_type(path), &bytes)),
            }
        }
    }

    /// Directory receiving new files.
    fn output_dir(&self, store: &BufferStore) -> PathBuf {
        self.options
            .destination
            .clone()
            .or_else(|| store.base_path().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Destination untouched external files must be copied to, if any.
    fn copy_target<'a>(&'a self, store: &BufferStore) -> Option<&'a Path> {
        self.options
            .destination
            .as_deref()
            .filter(|&dest| !store.base_path().is_some_and(|base| same_dir(base, dest)))
    }

    /// Where a rewritten external buffer is written.
    fn external_target(&self, buffer: &Buffer, resolved: PathBuf) -> PathBuf {
        match (&self.options.destination, relative_path(buffer.uri.as_deref())) {
            (Some(dest), Some(rel)) => dest.join(rel),
            _ => resolved,
        }
    }
}

/// True if both paths name the same directory. An empty path is the
/// working directory.
fn same_dir(a: &Path, b: &Path) -> bool {
    fn dot(p: &Path) -> &Path {
        if p.as_os_str().is_empty() {
            Path::new(".")
        } else {
            p
        }
    }
    let (a, b) = (dot(a), dot(b));
    a == b || matches!((a.canonicalize(), b.canonicalize()), (Ok(x), Ok(y)) if x == y)
}

/// The URI as a relative file path, if it is one.
fn relative_path(uri: Option<&str>) -> Option<&str> {
    match uri.map(classify) {
        Some(Ok(UriKind::Path(rel))) if Path::new(rel).is_relative() => Some(rel),
        _ => None,
    }
}

/// Drop view references of removed accessors; return the views no
/// surviving reference still needs.
fn strip_accessors(doc: &mut Document, removed: &BTreeSet<usize>) -> BTreeSet<usize> {
    let mut candidates = BTreeSet::new();
    for &a in removed {
        let accessor = &mut doc.accessors[a];
        candidates.extend(accessor.buffer_view.take());
        accessor.byte_offset = None;
        if let Some(sparse) = accessor.sparse.take() {
            candidates.insert(sparse.indices.buffer_view);
            candidates.insert(sparse.values.buffer_view);
        }
    }

    let live = referenced_views(doc);
    candidates.retain(|v| {
        let shared = live.contains(v);
        if shared {
            tracing::warn!(view = v, "view still referenced, kept");
        }
        !shared
    });
    candidates
}

fn referenced_views(doc: &Document) -> BTreeSet<usize> {
    let mut live = BTreeSet::new();
    for accessor in &doc.accessors {
        live.extend(accessor.buffer_view);
        if let Some(sparse) = &accessor.sparse {
            live.insert(sparse.indices.buffer_view);
            live.insert(sparse.values.buffer_view);
        }
    }
    for mesh in &doc.meshes {
        for prim in &mesh.primitives {
            live.extend(prim.compressed().map(|c| c.buffer_view));
        }
    }
    for image in &doc.images {
        live.extend(image.buffer_view);
    }
    live
}

/// Group the candidate views per buffer and validate them against each
/// other and against every surviving view, before anything is mutated.
fn plan_ranges(doc: &Document, candidates: &BTreeSet<usize>) -> Result<BTreeMap<usize, RemovedRanges>> {
    let mut grouped: BTreeMap<usize, Vec<ByteRange>> = BTreeMap::new();
    for &v in candidates {
        let view = &doc.buffer_views[v];
        grouped.entry(view.buffer).or_default().push(ByteRange::of_view(view));
    }

    let mut ranges = BTreeMap::new();
    for (buffer, list) in grouped {
        ranges.insert(buffer, RemovedRanges::new(buffer, list)?);
    }

    for (i, view) in doc.buffer_views.iter().enumerate() {
        if candidates.contains(&i) {
            continue;
        }
        if let Some(r) = ranges.get(&view.buffer) {
            r.check_survivor(&ByteRange::of_view(view))?;
        }
    }
    Ok(ranges)
}

fn remap_views(doc: &mut Document, map: &Reindex) -> Result<()> {
    if map.is_identity() {
        return Ok(());
    }
    for accessor in &mut doc.accessors {
        if let Some(view) = &mut accessor.buffer_view {
            map.apply(view)?;
        }
        if let Some(sparse) = &mut accessor.sparse {
            map.apply(&mut sparse.indices.buffer_view)?;
            map.apply(&mut sparse.values.buffer_view)?;
        }
    }
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if let Some(block) = prim.compressed_mut() {
                map.apply(&mut block.buffer_view)?;
            }
        }
    }
    for image in &mut doc.images {
        if let Some(view) = &mut image.buffer_view {
            map.apply(view)?;
        }
    }
    Ok(())
}

/// Every view of a rewritten buffer must fit in its new length.
fn verify_rewritten_bounds(
    doc: &Document,
    rewritten: &BTreeMap<usize, Vec<u8>>,
    emptied: &BTreeSet<usize>,
    buffer_map: &Reindex,
) -> Result<()> {
    let shrunk: BTreeSet<usize> = rewritten
        .keys()
        .filter(|b| !emptied.contains(b))
        .filter_map(|&b| buffer_map.get(b))
        .collect();
    for (i, view) in doc.buffer_views.iter().enumerate() {
        if !shrunk.contains(&view.buffer) {
            continue;
        }
        let len = doc.buffer(view.buffer)?.byte_length;
        let end = view.end().unwrap_or(u64::MAX);
        if end > len {
            return Err(Error::out_of_bounds(
                format!("bufferView {i} after compacting buffer {}", view.buffer),
                end,
                len,
            ));
        }
    }
    Ok(())
}
