//! Typed view of the JSON document.
//!
//! Only the tables the resource layer reads or rewrites are modelled:
//! buffers, bufferViews, accessors, mesh primitives and images. Every
//! other key, at any level, is kept verbatim in an `extras` map so a
//! document can be rewritten without losing data.
//!
//! Cross-references are plain integer indices into these flat tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::{AccessorType, ComponentType, ElementLayout, Error, Result, TableKind};

/// Name of the compressed-geometry primitive extension.
pub const COMPRESSED_GEOMETRY_EXTENSION: &str = "KHR_draco_mesh_compression";

/// The root JSON object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions_required: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accessors: Vec<Accessor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<Buffer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffer_views: Vec<BufferView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meshes: Vec<Mesh>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// A declared buffer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffer {
    pub byte_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// A byte range of a buffer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferView {
    pub buffer: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_offset: Option<u64>,
    pub byte_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_stride: Option<u64>,
    /// Sharing hint: views with equal key and offset hold the same data.
    /// Supplied by the importer, never serialized.
    #[serde(skip)]
    pub key: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl BufferView {
    pub fn new(buffer: usize, byte_offset: u64, byte_length: u64) -> Self {
        Self {
            buffer,
            byte_offset: Some(byte_offset),
            byte_length,
            ..Default::default()
        }
    }

    /// Offset of the view inside its buffer.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.byte_offset.unwrap_or(0)
    }

    /// Declared stride, with 0 meaning tightly packed.
    #[inline]
    pub fn stride(&self) -> u64 {
        self.byte_stride.unwrap_or(0)
    }

    /// One past the last byte of the view, `None` if that overflows.
    #[inline]
    pub fn end(&self) -> Option<u64> {
        self.offset().checked_add(self.byte_length)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_stride(mut self, stride: u64) -> Self {
        self.byte_stride = Some(stride);
        self
    }
}

/// A typed window into a buffer view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_view: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_offset: Option<u64>,
    pub component_type: ComponentType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub normalized: bool,
    pub count: u64,
    #[serde(rename = "type")]
    pub kind: AccessorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<Sparse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl Accessor {
    /// An accessor over a view.
    pub fn new(buffer_view: Option<usize>, layout: ElementLayout, count: u64) -> Self {
        Self {
            buffer_view,
            byte_offset: None,
            component_type: layout.component_type,
            normalized: false,
            count,
            kind: layout.accessor_type,
            sparse: None,
            name: None,
            extras: Map::new(),
        }
    }

    pub fn with_offset(mut self, byte_offset: u64) -> Self {
        self.byte_offset = Some(byte_offset);
        self
    }

    pub fn with_sparse(mut self, sparse: Sparse) -> Self {
        self.sparse = Some(sparse);
        self
    }

    #[inline]
    pub fn layout(&self) -> ElementLayout {
        ElementLayout::new(self.component_type, self.kind)
    }

    /// Size in bytes of one tightly packed element.
    #[inline]
    pub fn element_size(&self) -> u64 {
        self.layout().num_bytes() as u64
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.byte_offset.unwrap_or(0)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Sparse override block of an accessor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sparse {
    pub count: u64,
    pub indices: SparseIndices,
    pub values: SparseValues,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl Sparse {
    pub fn new(count: u64, indices_view: usize, index_type: ComponentType, values_view: usize) -> Self {
        Self {
            count,
            indices: SparseIndices {
                buffer_view: indices_view,
                byte_offset: None,
                component_type: index_type,
                extras: Map::new(),
            },
            values: SparseValues {
                buffer_view: values_view,
                byte_offset: None,
                extras: Map::new(),
            },
            extras: Map::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparseIndices {
    pub buffer_view: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_offset: Option<u64>,
    pub component_type: ComponentType,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparseValues {
    pub buffer_view: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_offset: Option<u64>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    #[serde(default)]
    pub primitives: Vec<Primitive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// Attribute name to accessor pairs plus an optional index accessor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    #[serde(default)]
    pub attributes: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<PrimitiveExtensions>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl Primitive {
    /// The compressed-geometry block, if this primitive carries one.
    pub fn compressed(&self) -> Option<&CompressedGeometry> {
        self.extensions.as_ref()?.compressed.as_ref()
    }

    pub fn compressed_mut(&mut self) -> Option<&mut CompressedGeometry> {
        self.extensions.as_mut()?.compressed.as_mut()
    }

    /// Attach a compressed-geometry block, keeping other extensions.
    pub fn set_compressed(&mut self, block: CompressedGeometry) {
        self.extensions
            .get_or_insert_with(PrimitiveExtensions::default)
            .compressed = Some(block);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveExtensions {
    #[serde(
        rename = "KHR_draco_mesh_compression",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub compressed: Option<CompressedGeometry>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Extension block pointing at an encoded geometry blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedGeometry {
    pub buffer_view: usize,
    #[serde(default)]
    pub attributes: BTreeMap<String, u32>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_view: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl Document {
    /// Parse a JSON document. Trailing NUL or space padding is tolerated.
    pub fn from_slice(json: &[u8]) -> Result<Self> {
        let end = json
            .iter()
            .rposition(|&b| b != 0 && b != b' ')
            .map_or(0, |i| i + 1);
        Ok(serde_json::from_slice(&json[..end])?)
    }

    /// Serialize to compact JSON.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn to_vec_pretty(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn buffer(&self, index: usize) -> Result<&Buffer> {
        self.buffers
            .get(index)
            .ok_or_else(|| Error::dangling(TableKind::Buffer, index, self.buffers.len()))
    }

    pub fn buffer_view(&self, index: usize) -> Result<&BufferView> {
        self.buffer_views
            .get(index)
            .ok_or_else(|| Error::dangling(TableKind::BufferView, index, self.buffer_views.len()))
    }

    pub fn accessor(&self, index: usize) -> Result<&Accessor> {
        self.accessors
            .get(index)
            .ok_or_else(|| Error::dangling(TableKind::Accessor, index, self.accessors.len()))
    }

    pub fn mesh(&self, index: usize) -> Result<&Mesh> {
        self.meshes
            .get(index)
            .ok_or_else(|| Error::dangling(TableKind::Mesh, index, self.meshes.len()))
    }

    /// Add an extension name to `extensionsUsed` and, if `required`,
    /// to `extensionsRequired`. Names already present are not repeated.
    pub fn register_extension(&mut self, name: &str, required: bool) {
        if !self.extensions_used.iter().any(|e| e == name) {
            self.extensions_used.push(name.to_string());
        }
        if required && !self.extensions_required.iter().any(|e| e == name) {
            self.extensions_required.push(name.to_string());
        }
    }

    /// Check every cross-reference of the resource tables.
    pub fn validate_references(&self) -> Result<()> {
        self.validate_references_with(0)
    }

    /// Like [`validate_references`](Self::validate_references), but views may
    /// also point at `pending` buffers about to be appended.
    pub fn validate_references_with(&self, pending: usize) -> Result<()> {
        let views = self.buffer_views.len();
        let buffers = self.buffers.len() + pending;
        for (i, view) in self.buffer_views.iter().enumerate() {
            if view.buffer >= buffers {
                return Err(Error::dangling(TableKind::Buffer, view.buffer, buffers));
            }
            if view.end().is_none() {
                return Err(Error::out_of_bounds(format!("bufferView {i}"), u64::MAX, u64::MAX));
            }
        }
        let check_view = |index: usize| {
            if index >= views {
                Err(Error::dangling(TableKind::BufferView, index, views))
            } else {
                Ok(())
            }
        };
        for (i, accessor) in self.accessors.iter().enumerate() {
            if let Some(view) = accessor.buffer_view {
                check_view(view)?;
            }
            if accessor.offset().checked_add(accessor.element_size()).is_none() {
                return Err(Error::out_of_bounds(format!("accessor {i}"), u64::MAX, u64::MAX));
            }
            if let Some(sparse) = &accessor.sparse {
                check_view(sparse.indices.buffer_view)?;
                check_view(sparse.values.buffer_view)?;
            }
        }
        for mesh in &self.meshes {
            for prim in &mesh.primitives {
                for &accessor in prim.attributes.values().chain(prim.indices.iter()) {
                    if accessor >= self.accessors.len() {
                        return Err(Error::dangling(TableKind::Accessor, accessor, self.accessors.len()));
                    }
                }
                if let Some(block) = prim.compressed() {
                    check_view(block.buffer_view)?;
                }
            }
        }
        for image in &self.images {
            if let Some(view) = image.buffer_view {
                check_view(view)?;
            }
        }
        Ok(())
    }
}
