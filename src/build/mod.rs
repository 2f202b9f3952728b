//! GPU-ready buffer construction.
//!
//! [`PrimitiveBufferBuilder`] turns the accessors of a mesh primitive into
//! [`GpuBuffer`]s plus attribute descriptors:
//!
//! - Accessors reading the same source (same view, or views with the same
//!   key and range) at offsets up to the split threshold share one buffer
//!   holding the whole view. Each descriptor keeps its own offset.
//! - An accessor starting past the threshold gets a buffer sliced from its
//!   first byte to the end of the view, addressed at offset 0.
//! - Accessors without a view, or with a sparse override, are materialized
//!   into a buffer of their own.
//!
//! Built buffers are plain bytes; realizing them on a device goes through
//! a [`GpuUploader`] on the rendering thread.

mod cache;
mod upload;

pub use cache::{BufferCache, BufferKey, PrimitiveCache, PrimitiveKey, SharedCache, SharingKey};
pub use upload::{GpuUploader, UploadQueue};

use std::fmt;
use std::sync::Arc;

use crate::accessor::AccessorTable;
use crate::document::{Document, Primitive};
use crate::util::{ComponentType, Result};

/// Default split threshold in bytes.
pub const DEFAULT_SPLIT_THRESHOLD: u64 = 2048;

/// Builder configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildOptions {
    /// Accessor offsets above this many bytes get a buffer of their own.
    pub split_threshold: u64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
        }
    }
}

impl BuildOptions {
    pub fn with_split_threshold(mut self, threshold: u64) -> Self {
        self.split_threshold = threshold;
        self
    }
}

/// Renderer-ready bytes, owned independently of the source buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct GpuBuffer {
    data: Vec<u8>,
}

impl GpuBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuBuffer({} bytes)", self.data.len())
    }
}

/// How one attribute (or the index list) reads from a built buffer.
#[derive(Clone, Debug)]
pub struct AttributeDescriptor {
    pub name: String,
    pub buffer: Arc<GpuBuffer>,
    pub byte_offset: u64,
    /// 0 means tightly packed.
    pub byte_stride: u64,
    pub component_type: ComponentType,
    pub component_count: usize,
    pub element_count: u64,
    pub normalized: bool,
}

/// A primitive's descriptors, attributes in name order.
#[derive(Clone, Debug)]
pub struct BuiltPrimitive {
    pub attributes: Vec<AttributeDescriptor>,
    pub indices: Option<AttributeDescriptor>,
}

impl BuiltPrimitive {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Every buffer referenced, attributes first, duplicates included.
    pub fn buffers(&self) -> impl Iterator<Item = &Arc<GpuBuffer>> {
        self.attributes
            .iter()
            .chain(self.indices.iter())
            .map(|a| &a.buffer)
    }
}

/// Where a staged descriptor's buffer comes from.
enum Staged {
    Cached(BufferKey),
    Standalone,
}

/// Builds and caches GPU buffers for the primitives of one document.
pub struct PrimitiveBufferBuilder<'a> {
    doc: &'a Document,
    accessors: AccessorTable<'a>,
    options: BuildOptions,
    buffers: BufferCache,
    primitives: PrimitiveCache,
}

impl<'a> PrimitiveBufferBuilder<'a> {
    pub fn new(doc: &'a Document, buffers: &'a [Arc<[u8]>], options: BuildOptions) -> Self {
        Self {
            doc,
            accessors: AccessorTable::new(doc, buffers),
            options,
            buffers: BufferCache::new(),
            primitives: PrimitiveCache::new(),
        }
    }

    #[inline]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Number of distinct cached buffers (standalone buffers excluded).
    pub fn cached_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn cached_primitives(&self) -> usize {
        self.primitives.len()
    }

    /// Build every primitive of a mesh. Each primitive fails on its own.
    #[tracing::instrument(skip(self))]
    pub fn build_mesh(&self, mesh: usize) -> Result<Vec<Result<Arc<BuiltPrimitive>>>> {
        let mesh = self.doc.mesh(mesh)?;
        Ok(mesh
            .primitives
            .iter()
            .enumerate()
            .map(|(i, prim)| {
                self.build_primitive(prim).inspect_err(|e| {
                    tracing::warn!(primitive = i, error = %e, "primitive skipped");
                })
            })
            .collect())
    }

    /// Build one primitive, or return the cached build of an identical one.
    ///
    /// Nothing is committed to the buffer cache unless every attribute
    /// builds.
    pub fn build_primitive(&self, primitive: &Primitive) -> Result<Arc<BuiltPrimitive>> {
        let key = PrimitiveKey::of(primitive);
        if let Some(hit) = self.primitives.get(&key) {
            return Ok(hit);
        }

        let mut staged_buffers: Vec<(BufferKey, Arc<GpuBuffer>)> = Vec::new();
        let mut staged = Vec::with_capacity(primitive.attributes.len() + 1);
        for (name, &accessor) in &primitive.attributes {
            staged.push(self.build_attribute(name, accessor, &mut staged_buffers)?);
        }
        let indices = match primitive.indices {
            Some(accessor) => Some(self.build_attribute("indices", accessor, &mut staged_buffers)?),
            None => None,
        };

        // Swap staged buffers for whatever another thread may have cached first
        let keys: Vec<BufferKey> = staged_buffers.iter().map(|(k, _)| k.clone()).collect();
        let canonical = self.buffers.commit(staged_buffers);
        let resolve = |(origin, mut desc): (Staged, AttributeDescriptor)| {
            if let Staged::Cached(key) = origin {
                if let Some(pos) = keys.iter().position(|k| *k == key) {
                    desc.buffer = Arc::clone(&canonical[pos]);
                }
            }
            desc
        };

        let built = BuiltPrimitive {
            attributes: staged.into_iter().map(resolve).collect(),
            indices: indices.map(resolve),
        };
        Ok(self.primitives.insert(key, Arc::new(built)))
    }

    fn build_attribute(
        &self,
        name: &str,
        index: usize,
        staged: &mut Vec<(BufferKey, Arc<GpuBuffer>)>,
    ) -> Result<(Staged, AttributeDescriptor)> {
        let accessor = self.accessors.get(index)?;
        let span = self.accessors.span(index)?;

        let desc = |buffer: Arc<GpuBuffer>, byte_offset: u64, byte_stride: u64| AttributeDescriptor {
            name: name.to_string(),
            buffer,
            byte_offset,
            byte_stride,
            component_type: accessor.component_type,
            component_count: accessor.kind.component_count(),
            element_count: accessor.count,
            normalized: accessor.normalized,
        };

        let span = match span {
            Some(span) if accessor.sparse.is_none() => span,
            _ => {
                let bytes = self.accessors.materialize(index)?;
                tracing::trace!(accessor = index, len = bytes.len(), "standalone buffer");
                return Ok((Staged::Standalone, desc(Arc::new(GpuBuffer::new(bytes)), 0, 0)));
            }
        };

        let views = self.accessors.views();
        let view = views.get(span.view)?;
        let source = SharingKey::for_view(span.view, view);
        let (key, byte_offset) = if span.byte_offset > self.options.split_threshold {
            (BufferKey::split(source, span.byte_offset), 0)
        } else {
            (BufferKey::shared(source), span.byte_offset)
        };

        let buffer = match staged.iter().find(|(k, _)| *k == key) {
            Some((_, b)) => Arc::clone(b),
            None => match self.buffers.get(&key) {
                Some(b) => b,
                None => {
                    let bytes = views.bytes(span.view)?;
                    let start = key.split_at.unwrap_or(0) as usize;
                    let buffer = Arc::new(GpuBuffer::new(bytes[start..].to_vec()));
                    tracing::trace!(accessor = index, view = span.view, len = buffer.len(), split = key.split_at.is_some(), "new buffer");
                    staged.push((key.clone(), Arc::clone(&buffer)));
                    buffer
                }
            },
        };

        Ok((Staged::Cached(key), desc(buffer, byte_offset, view.stride())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Accessor, Buffer, BufferView, Mesh};
    use crate::util::ElementLayout;

    fn fixture() -> (Document, Vec<Arc<[u8]>>) {
        let data: Vec<u8> = (0..4800u32).map(|i| (i % 251) as u8).collect();
        let doc = Document {
            buffers: vec![Buffer { byte_length: 4800, ..Default::default() }],
            buffer_views: vec![BufferView::new(0, 0, 4800)],
            accessors: vec![
                Accessor::new(Some(0), ElementLayout::VEC3F, 100),
                Accessor::new(Some(0), ElementLayout::VEC3F, 100).with_offset(2400),
                Accessor::new(None, ElementLayout::VEC2F, 100),
            ],
            ..Default::default()
        };
        (doc, vec![Arc::from(data)])
    }

    fn primitive(attrs: &[(&str, usize)]) -> Primitive {
        let mut p = Primitive::default();
        for &(name, acc) in attrs {
            p.attributes.insert(name.to_string(), acc);
        }
        p
    }

    #[test]
    fn test_split_above_threshold() {
        let (doc, buffers) = fixture();
        let builder = PrimitiveBufferBuilder::new(&doc, &buffers, BuildOptions::default());
        let built = builder
            .build_primitive(&primitive(&[("NORMAL", 0), ("POSITION", 1)]))
            .unwrap();

        let normal = built.attribute("NORMAL").unwrap();
        assert_eq!(normal.byte_offset, 0);
        assert!(normal.buffer.len() >= 2400);

        let position = built.attribute("POSITION").unwrap();
        assert_eq!(position.byte_offset, 0);
        assert_eq!(position.buffer.len(), 2400);
        assert_eq!(position.buffer.data(), &buffers[0][2400..4800]);
        assert!(!Arc::ptr_eq(&normal.buffer, &position.buffer));
    }

    #[test]
    fn test_shared_below_threshold() {
        let (doc, buffers) = fixture();
        let opts = BuildOptions::default().with_split_threshold(4096);
        let builder = PrimitiveBufferBuilder::new(&doc, &buffers, opts);
        let built = builder
            .build_primitive(&primitive(&[("NORMAL", 0), ("POSITION", 1)]))
            .unwrap();
        let normal = built.attribute("NORMAL").unwrap();
        let position = built.attribute("POSITION").unwrap();
        assert!(Arc::ptr_eq(&normal.buffer, &position.buffer));
        assert_eq!(position.byte_offset, 2400);
        assert_eq!(builder.cached_buffers(), 1);
    }

    #[test]
    fn test_viewless_is_standalone() {
        let (doc, buffers) = fixture();
        let builder = PrimitiveBufferBuilder::new(&doc, &buffers, BuildOptions::default());
        let built = builder.build_primitive(&primitive(&[("TEXCOORD_0", 2)])).unwrap();
        let uv = built.attribute("TEXCOORD_0").unwrap();
        assert_eq!(uv.buffer.len(), 800);
        assert!(uv.buffer.data().iter().all(|&b| b == 0));
        assert_eq!(builder.cached_buffers(), 0);
    }

    #[test]
    fn test_primitive_cache() {
        let (doc, buffers) = fixture();
        let builder = PrimitiveBufferBuilder::new(&doc, &buffers, BuildOptions::default());
        let a = builder.build_primitive(&primitive(&[("POSITION", 1)])).unwrap();
        let b = builder.build_primitive(&primitive(&[("POSITION", 1)])).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builder.cached_primitives(), 1);
    }

    #[test]
    fn test_failed_primitive_commits_nothing() {
        let (mut doc, buffers) = fixture();
        doc.meshes.push(Mesh {
            primitives: vec![primitive(&[("NORMAL", 0), ("POSITION", 9)]), primitive(&[("POSITION", 1)])],
            ..Default::default()
        });
        let builder = PrimitiveBufferBuilder::new(&doc, &buffers, BuildOptions::default());
        let results = builder.build_mesh(0).unwrap();
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
        // Only the split POSITION buffer of the second primitive is cached
        assert_eq!(builder.cached_buffers(), 1);
        assert!(builder.build_mesh(3).is_err());
    }
}
