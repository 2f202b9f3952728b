//! Mesh compression driver around an external geometry encoder.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{CompactOptions, CompactionPass, CompactionReport};
use crate::accessor::AccessorTable;
use crate::buffer::BufferStore;
use crate::document::{BufferView, CompressedGeometry, Document, Primitive};
use crate::util::{ElementLayout, Error, Result};

/// One attribute handed to the encoder, tightly packed.
#[derive(Clone, Debug, PartialEq)]
pub struct RawAttribute {
    pub layout: ElementLayout,
    pub normalized: bool,
    pub count: u64,
    pub data: Vec<u8>,
}

/// Uncompressed geometry of one primitive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawGeometry {
    /// Attributes in name order.
    pub attributes: Vec<(String, RawAttribute)>,
    pub indices: Option<Vec<u32>>,
}

/// Encoder output: the blob and the attribute ids it assigned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodedGeometry {
    pub bytes: Vec<u8>,
    pub attribute_ids: BTreeMap<String, u32>,
}

/// An external geometry codec.
pub trait GeometryEncoder {
    /// Encode one primitive. The error message ends up in
    /// [`Error::EncodingFailed`].
    fn encode(&mut self, geometry: &RawGeometry) -> std::result::Result<EncodedGeometry, String>;
}

/// Encode every primitive not yet compressed, then compact the document.
///
/// Blobs are concatenated into one new buffer with one view per blob.
/// Primitives that fail to gather or encode are recorded in the report and
/// left as they were. If nothing was encoded the document is unchanged.
/// The document is only replaced when the whole run succeeds.
#[tracing::instrument(skip_all, fields(meshes = doc.meshes.len()))]
pub fn compress_meshes<E: GeometryEncoder + ?Sized>(
    doc: &mut Document,
    store: &mut BufferStore,
    buffers: &[Arc<[u8]>],
    encoder: &mut E,
    options: &CompactOptions,
) -> Result<CompactionReport> {
    let table = AccessorTable::new(doc, buffers);
    let first_view = doc.buffer_views.len();
    let new_buffer = doc.buffers.len();

    let mut blob: Vec<u8> = Vec::new();
    let mut views = Vec::new();
    let mut blocks = Vec::new();
    let mut errors = Vec::new();

    for (m, mesh) in doc.meshes.iter().enumerate() {
        for (p, prim) in mesh.primitives.iter().enumerate() {
            if prim.compressed().is_some() {
                tracing::debug!(mesh = m, primitive = p, "already compressed");
                continue;
            }
            let raw = match gather(&table, prim) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(mesh = m, primitive = p, error = %e, "cannot read primitive");
                    errors.push(e);
                    continue;
                }
            };
            let encoded = match encoder.encode(&raw) {
                Ok(encoded) => encoded,
                Err(reason) => {
                    tracing::warn!(mesh = m, primitive = p, %reason, "encoding failed");
                    errors.push(Error::EncodingFailed { mesh: m, primitive: p, reason });
                    continue;
                }
            };

            let view = first_view + views.len();
            views.push(BufferView::new(new_buffer, blob.len() as u64, encoded.bytes.len() as u64));
            blob.extend_from_slice(&encoded.bytes);
            blocks.push((
                m,
                p,
                CompressedGeometry {
                    buffer_view: view,
                    attributes: encoded.attribute_ids,
                    extras: Default::default(),
                },
            ));
        }
    }

    if blocks.is_empty() {
        tracing::info!("no primitive encoded");
        return Ok(CompactionReport {
            errors,
            ..Default::default()
        });
    }

    let mut staged = doc.clone();
    staged.buffer_views.extend(views);
    for (m, p, block) in blocks.iter().cloned() {
        staged.meshes[m].primitives[p].set_compressed(block);
    }

    // Accessors still read by a primitive that kept its raw data stay intact
    let encoded: BTreeSet<(usize, usize)> = blocks.iter().map(|&(m, p, _)| (m, p)).collect();
    let mut removed = BTreeSet::new();
    let mut kept = BTreeSet::new();
    for (m, mesh) in doc.meshes.iter().enumerate() {
        for (p, prim) in mesh.primitives.iter().enumerate() {
            let target = if encoded.contains(&(m, p)) { &mut removed } else { &mut kept };
            target.extend(prim.attributes.values().copied());
            target.extend(prim.indices);
        }
    }
    let removed: BTreeSet<usize> = removed.difference(&kept).copied().collect();

    let pass = CompactionPass::new(options.clone()).with_appended(blob);
    let mut report = pass.run(&mut staged, store, &removed)?;
    report.encoded_primitives = blocks.len();
    errors.append(&mut report.errors);
    report.errors = errors;
    *doc = staged;
    Ok(report)
}

fn gather(table: &AccessorTable<'_>, prim: &Primitive) -> Result<RawGeometry> {
    let mut raw = RawGeometry::default();
    for (name, &index) in &prim.attributes {
        let accessor = table.get(index)?;
        raw.attributes.push((
            name.clone(),
            RawAttribute {
                layout: accessor.layout(),
                normalized: accessor.normalized,
                count: accessor.count,
                data: table.materialize(index)?,
            },
        ));
    }
    raw.indices = prim.indices.map(|i| table.read_indices(i)).transpose()?;
    Ok(raw)
}
