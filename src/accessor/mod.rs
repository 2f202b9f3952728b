//! Bounds-checked access to buffer views and accessors.
//!
//! [`BufferViewTable`] hands out the bytes of a view; [`AccessorTable`]
//! turns an accessor into a tightly packed byte array, applying any
//! sparse override on top of the base data.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::Pod;

use crate::document::{Accessor, BufferView, Document, Sparse};
use crate::util::{ComponentType, Error, Result, TableKind};

/// Byte slices of every view of a document.
#[derive(Clone, Copy)]
pub struct BufferViewTable<'a> {
    views: &'a [BufferView],
    buffers: &'a [Arc<[u8]>],
}

impl<'a> BufferViewTable<'a> {
    pub fn new(doc: &'a Document, buffers: &'a [Arc<[u8]>]) -> Self {
        Self {
            views: &doc.buffer_views,
            buffers,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&'a BufferView> {
        self.views
            .get(index)
            .ok_or_else(|| Error::dangling(TableKind::BufferView, index, self.views.len()))
    }

    /// Resolved bytes of a whole buffer.
    pub fn buffer_bytes(&self, buffer: usize) -> Result<&'a [u8]> {
        self.buffers
            .get(buffer)
            .map(|b| &b[..])
            .ok_or_else(|| Error::dangling(TableKind::Buffer, buffer, self.buffers.len()))
    }

    /// The bytes covered by a view, exactly `byteLength` long.
    pub fn bytes(&self, index: usize) -> Result<&'a [u8]> {
        let view = self.get(index)?;
        let data = self.buffer_bytes(view.buffer)?;
        let end = view.end().unwrap_or(u64::MAX);
        if end > data.len() as u64 {
            return Err(Error::out_of_bounds(
                format!("bufferView {index} in buffer {}", view.buffer),
                end,
                data.len() as u64,
            ));
        }
        Ok(&data[view.offset() as usize..end as usize])
    }
}

/// Location of an accessor's base data inside its view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessorSpan {
    pub view: usize,
    pub byte_offset: u64,
    /// Effective stride; never zero.
    pub byte_stride: u64,
    pub element_size: u64,
    pub count: u64,
}

impl AccessorSpan {
    /// Bytes from `byte_offset` to the end of the last element.
    pub fn byte_len(&self) -> u64 {
        match self.count {
            0 => 0,
            n => (n - 1) * self.byte_stride + self.element_size,
        }
    }

    #[inline]
    pub fn is_packed(&self) -> bool {
        self.byte_stride == self.element_size
    }
}

/// Accessor lookups and materialization over resolved buffers.
#[derive(Clone, Copy)]
pub struct AccessorTable<'a> {
    accessors: &'a [Accessor],
    views: BufferViewTable<'a>,
}

impl<'a> AccessorTable<'a> {
    pub fn new(doc: &'a Document, buffers: &'a [Arc<[u8]>]) -> Self {
        Self {
            accessors: &doc.accessors,
            views: BufferViewTable::new(doc, buffers),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }

    #[inline]
    pub fn views(&self) -> &BufferViewTable<'a> {
        &self.views
    }

    pub fn get(&self, index: usize) -> Result<&'a Accessor> {
        self.accessors
            .get(index)
            .ok_or_else(|| Error::dangling(TableKind::Accessor, index, self.accessors.len()))
    }

    /// Validate and describe where an accessor's base data lives.
    ///
    /// Returns `None` for accessors without a view.
    pub fn span(&self, index: usize) -> Result<Option<AccessorSpan>> {
        let accessor = self.get(index)?;
        let Some(view_index) = accessor.buffer_view else {
            return Ok(None);
        };
        let view = self.views.get(view_index)?;
        let element_size = accessor.element_size();
        let span = AccessorSpan {
            view: view_index,
            byte_offset: accessor.offset(),
            byte_stride: match view.stride() {
                0 => element_size,
                s => s,
            },
            element_size,
            count: accessor.count,
        };

        let needed = span
            .count
            .checked_sub(1)
            .and_then(|n| n.checked_mul(span.byte_stride))
            .and_then(|n| n.checked_add(span.element_size))
            .and_then(|n| n.checked_add(span.byte_offset))
            .unwrap_or(if span.count == 0 { span.byte_offset } else { u64::MAX });
        if needed > view.byte_length {
            return Err(Error::out_of_bounds(
                format!("accessor {index} in bufferView {view_index}"),
                needed,
                view.byte_length,
            ));
        }
        Ok(Some(span))
    }

    /// Produce `count * elementSize` tightly packed bytes.
    ///
    /// Accessors without a view start zero-filled. A sparse override is
    /// applied last, entries written in stored order.
    pub fn materialize(&self, index: usize) -> Result<Vec<u8>> {
        let accessor = self.get(index)?;
        let elem = accessor.element_size() as usize;
        let total = (accessor.count as usize)
            .checked_mul(elem)
            .ok_or_else(|| Error::out_of_bounds(format!("accessor {index}"), u64::MAX, 0))?;
        let mut out = vec![0u8; total];

        if let Some(span) = self.span(index)? {
            let data = self.views.bytes(span.view)?;
            let start = span.byte_offset as usize;
            if span.is_packed() {
                out.copy_from_slice(&data[start..start + total]);
            } else {
                let stride = span.byte_stride as usize;
                for (i, dst) in out.chunks_exact_mut(elem).enumerate() {
                    let src = start + i * stride;
                    dst.copy_from_slice(&data[src..src + elem]);
                }
            }
        }

        if let Some(sparse) = &accessor.sparse {
            self.apply_sparse(index, accessor, sparse, &mut out)?;
        }
        Ok(out)
    }

    fn apply_sparse(&self, index: usize, accessor: &Accessor, sparse: &Sparse, out: &mut [u8]) -> Result<()> {
        let index_type = sparse.indices.component_type;
        if !index_type.is_unsigned_integer() {
            return Err(Error::other(format!(
                "accessor {index}: sparse indices must be unsigned integers, got {index_type}"
            )));
        }
        let elem = accessor.element_size() as usize;
        let n = sparse.count as usize;

        let indices = self.sub_view(
            index,
            "sparse indices",
            sparse.indices.buffer_view,
            sparse.indices.byte_offset.unwrap_or(0),
            sparse.count.saturating_mul(index_type.num_bytes() as u64),
        )?;
        let values = self.sub_view(
            index,
            "sparse values",
            sparse.values.buffer_view,
            sparse.values.byte_offset.unwrap_or(0),
            sparse.count.saturating_mul(elem as u64),
        )?;

        let step = index_type.num_bytes();
        for k in 0..n {
            let target = read_index(&indices[k * step..], index_type);
            if target >= accessor.count {
                return Err(Error::out_of_bounds(
                    format!("accessor {index} sparse entry {k} (index {target})"),
                    target + 1,
                    accessor.count,
                ));
            }
            let dst = target as usize * elem;
            out[dst..dst + elem].copy_from_slice(&values[k * elem..(k + 1) * elem]);
        }
        tracing::trace!(accessor = index, entries = n, "applied sparse override");
        Ok(())
    }

    /// Bytes `[offset, offset + needed)` of a sparse sub-view.
    fn sub_view(&self, accessor: usize, what: &str, view: usize, offset: u64, needed: u64) -> Result<&'a [u8]> {
        let data = self.views.bytes(view)?;
        let end = offset.saturating_add(needed);
        if end > data.len() as u64 {
            return Err(Error::out_of_bounds(
                format!("accessor {accessor} {what} in bufferView {view}"),
                end,
                data.len() as u64,
            ));
        }
        Ok(&data[offset as usize..end as usize])
    }

    /// Materialize and reinterpret as `T`.
    ///
    /// `T` must evenly divide the element size, e.g. `f32` or `[f32; 3]`
    /// for a `VEC3` float accessor.
    pub fn read<T: Pod>(&self, index: usize) -> Result<Vec<T>> {
        let accessor = self.get(index)?;
        let size = std::mem::size_of::<T>();
        let elem = accessor.element_size() as usize;
        if size == 0 || (elem % size != 0 && size % elem != 0) {
            return Err(Error::other(format!(
                "accessor {index}: {} cannot be read as {size}-byte values",
                accessor.layout()
            )));
        }
        let bytes = self.materialize(index)?;
        if bytes.len() % size != 0 {
            return Err(Error::other(format!(
                "accessor {index}: {} bytes is not a multiple of {size}",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Read an index accessor widened to `u32`.
    pub fn read_indices(&self, index: usize) -> Result<Vec<u32>> {
        let accessor = self.get(index)?;
        let ct = accessor.component_type;
        if !ct.is_unsigned_integer() || accessor.layout().component_count() != 1 {
            return Err(Error::other(format!(
                "accessor {index}: {} is not an index type",
                accessor.layout()
            )));
        }
        let bytes = self.materialize(index)?;
        Ok(bytes
            .chunks_exact(ct.num_bytes())
            .map(|c| read_index(c, ct) as u32)
            .collect())
    }
}

#[inline]
fn read_index(bytes: &[u8], ct: ComponentType) -> u64 {
    match ct {
        ComponentType::UnsignedByte => bytes[0] as u64,
        ComponentType::UnsignedShort => LittleEndian::read_u16(bytes) as u64,
        _ => LittleEndian::read_u32(bytes) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Buffer;
    use crate::util::ElementLayout;

    fn doc_with(buffer_len: u64, views: Vec<BufferView>, accessors: Vec<Accessor>) -> Document {
        Document {
            buffers: vec![Buffer { byte_length: buffer_len, ..Default::default() }],
            buffer_views: views,
            accessors,
            ..Default::default()
        }
    }

    fn floats(values: &[f32]) -> Arc<[u8]> {
        Arc::from(bytemuck::cast_slice::<f32, u8>(values))
    }

    #[test]
    fn test_packed() {
        let data = floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let doc = doc_with(
            24,
            vec![BufferView::new(0, 0, 24)],
            vec![Accessor::new(Some(0), ElementLayout::VEC3F, 2)],
        );
        let buffers = [data];
        let table = AccessorTable::new(&doc, &buffers);
        assert_eq!(table.read::<f32>(0).unwrap(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(table.read::<[f32; 3]>(0).unwrap()[1], [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_strided() {
        // Two interleaved VEC2 attributes, stride 16
        let data = floats(&[1.0, 2.0, 9.0, 9.0, 3.0, 4.0, 9.0, 9.0]);
        let doc = doc_with(
            32,
            vec![BufferView::new(0, 0, 32).with_stride(16)],
            vec![
                Accessor::new(Some(0), ElementLayout::VEC2F, 2),
                Accessor::new(Some(0), ElementLayout::VEC2F, 2).with_offset(8),
            ],
        );
        let buffers = [data];
        let table = AccessorTable::new(&doc, &buffers);
        assert_eq!(table.read::<f32>(0).unwrap(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(table.read::<f32>(1).unwrap(), [9.0, 9.0, 9.0, 9.0]);
        assert_eq!(table.span(1).unwrap().unwrap().byte_len(), 24);
    }

    #[test]
    fn test_no_view_is_zero() {
        let doc = doc_with(0, vec![], vec![Accessor::new(None, ElementLayout::VEC3F, 4)]);
        let table = AccessorTable::new(&doc, &[]);
        let bytes = table.materialize(0).unwrap();
        assert_eq!(bytes.len(), 48);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_out_of_bounds() {
        let data = floats(&[0.0; 6]);
        let doc = doc_with(
            24,
            vec![BufferView::new(0, 0, 24), BufferView::new(0, 12, 24)],
            vec![
                Accessor::new(Some(0), ElementLayout::VEC3F, 3),
                Accessor::new(Some(1), ElementLayout::VEC3F, 1),
                Accessor::new(Some(7), ElementLayout::VEC3F, 1),
            ],
        );
        let buffers = [data];
        let table = AccessorTable::new(&doc, &buffers);
        assert!(matches!(
            table.materialize(0),
            Err(Error::ViewOutOfBounds { needed: 36, available: 24, .. })
        ));
        assert!(matches!(
            table.materialize(1),
            Err(Error::ViewOutOfBounds { needed: 36, available: 24, .. })
        ));
        assert!(matches!(
            table.materialize(2),
            Err(Error::DanglingReference { kind: TableKind::BufferView, index: 7, .. })
        ));
        assert!(matches!(table.get(3), Err(Error::DanglingReference { .. })));
    }

    #[test]
    fn test_huge_offsets_are_errors() {
        let buffers = [floats(&[0.0; 6])];
        let mut view = BufferView::new(0, 0, 24);
        view.byte_offset = Some(u64::MAX);
        let doc = doc_with(
            24,
            vec![view, BufferView::new(0, 0, 24)],
            vec![Accessor::new(Some(1), ElementLayout::VEC3F, 1).with_offset(u64::MAX - 4)],
        );
        let table = AccessorTable::new(&doc, &buffers);
        assert!(matches!(
            table.views().bytes(0),
            Err(Error::ViewOutOfBounds { needed: u64::MAX, available: 24, .. })
        ));
        assert!(matches!(table.materialize(0), Err(Error::ViewOutOfBounds { .. })));
    }

    /// Base of 5 scalars, indices [3, 1] as u16, values [30, 10].
    fn sparse_fixture(base: bool) -> (Document, Vec<Arc<[u8]>>) {
        let mut bytes: Vec<u8> = bytemuck::cast_slice(&[0.5f32, 1.5, 2.5, 3.5, 4.5]).to_vec();
        bytes.extend_from_slice(bytemuck::cast_slice(&[3u16, 1]));
        bytes.extend_from_slice(bytemuck::cast_slice(&[30.0f32, 10.0]));
        let layout = ElementLayout::new(ComponentType::Float, crate::util::AccessorType::Scalar);
        let sparse = Sparse::new(2, 1, ComponentType::UnsignedShort, 2);
        let accessor = Accessor::new(base.then_some(0), layout, 5).with_sparse(sparse);
        let doc = doc_with(
            bytes.len() as u64,
            vec![
                BufferView::new(0, 0, 20),
                BufferView::new(0, 20, 4),
                BufferView::new(0, 24, 8),
            ],
            vec![accessor],
        );
        (doc, vec![Arc::from(bytes)])
    }

    #[test]
    fn test_sparse_over_base() {
        let (doc, buffers) = sparse_fixture(true);
        let table = AccessorTable::new(&doc, &buffers);
        assert_eq!(table.read::<f32>(0).unwrap(), [0.5, 10.0, 2.5, 30.0, 4.5]);
    }

    #[test]
    fn test_sparse_without_base() {
        let (doc, buffers) = sparse_fixture(false);
        let table = AccessorTable::new(&doc, &buffers);
        assert_eq!(table.read::<f32>(0).unwrap(), [0.0, 10.0, 0.0, 30.0, 0.0]);
    }

    #[test]
    fn test_sparse_sub_view_too_short() {
        let (mut doc, buffers) = sparse_fixture(true);
        doc.accessors[0].sparse.as_mut().unwrap().count = 3;
        let table = AccessorTable::new(&doc, &buffers);
        assert!(matches!(table.materialize(0), Err(Error::ViewOutOfBounds { .. })));
    }

    #[test]
    fn test_sparse_index_past_count() {
        let (mut doc, buffers) = sparse_fixture(true);
        doc.accessors[0].count = 3;
        doc.buffer_views[0].byte_length = 12;
        let table = AccessorTable::new(&doc, &buffers);
        assert!(matches!(table.materialize(0), Err(Error::ViewOutOfBounds { .. })));
    }

    #[test]
    fn test_sparse_signed_indices() {
        let (mut doc, buffers) = sparse_fixture(true);
        doc.accessors[0].sparse.as_mut().unwrap().indices.component_type = ComponentType::Short;
        let table = AccessorTable::new(&doc, &buffers);
        assert!(table.materialize(0).is_err());
    }

    #[test]
    fn test_read_indices() {
        let bytes: Vec<u8> = bytemuck::cast_slice(&[0u16, 1, 2, 2, 1, 3]).to_vec();
        let doc = doc_with(
            12,
            vec![BufferView::new(0, 0, 12)],
            vec![Accessor::new(Some(0), ElementLayout::INDEX_U16, 6)],
        );
        let buffers: [Arc<[u8]>; 1] = [Arc::from(bytes)];
        let table = AccessorTable::new(&doc, &buffers);
        assert_eq!(table.read_indices(0).unwrap(), [0, 1, 2, 2, 1, 3]);
    }
}
