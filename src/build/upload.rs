//! Device realization of built buffers.
//!
//! An [`UploadQueue`] lives on the rendering thread. It hands each distinct
//! [`GpuBuffer`] to the uploader once, however many attributes or
//! primitives reference it.

use std::collections::HashMap;
use std::sync::Arc;

use super::{BuiltPrimitive, GpuBuffer};
use crate::util::Result;

/// Creates device buffers. Implemented by the renderer.
pub trait GpuUploader {
    /// Device-side buffer handle.
    type Handle: Clone;

    fn upload(&mut self, buffer: &GpuBuffer) -> Result<Self::Handle>;
}

/// Uploads built buffers, deduplicated by `Arc` identity.
pub struct UploadQueue<U: GpuUploader> {
    uploader: U,
    // The Arc is kept so its address cannot be reused while cached
    realized: HashMap<usize, (Arc<GpuBuffer>, U::Handle)>,
}

impl<U: GpuUploader> UploadQueue<U> {
    pub fn new(uploader: U) -> Self {
        Self {
            uploader,
            realized: HashMap::new(),
        }
    }

    /// Handle for a buffer, uploading it on first use.
    pub fn realize_buffer(&mut self, buffer: &Arc<GpuBuffer>) -> Result<U::Handle> {
        let id = Arc::as_ptr(buffer) as usize;
        if let Some((_, handle)) = self.realized.get(&id) {
            return Ok(handle.clone());
        }
        let handle = self.uploader.upload(buffer)?;
        self.realized.insert(id, (Arc::clone(buffer), handle.clone()));
        Ok(handle)
    }

    /// Handles for every attribute, then the indices if present.
    pub fn realize(&mut self, primitive: &BuiltPrimitive) -> Result<Vec<U::Handle>> {
        primitive.buffers().map(|b| self.realize_buffer(b)).collect()
    }

    /// Number of distinct buffers uploaded so far.
    pub fn uploaded(&self) -> usize {
        self.realized.len()
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    pub fn into_uploader(self) -> U {
        self.uploader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::AttributeDescriptor;
    use crate::util::ComponentType;

    #[derive(Default)]
    struct CountingUploader {
        bytes: usize,
    }

    impl GpuUploader for CountingUploader {
        type Handle = u32;

        fn upload(&mut self, buffer: &GpuBuffer) -> Result<u32> {
            self.bytes += buffer.len();
            Ok(self.bytes as u32)
        }
    }

    fn attr(name: &str, buffer: &Arc<GpuBuffer>) -> AttributeDescriptor {
        AttributeDescriptor {
            name: name.to_string(),
            buffer: Arc::clone(buffer),
            byte_offset: 0,
            byte_stride: 0,
            component_type: ComponentType::Float,
            component_count: 3,
            element_count: 1,
            normalized: false,
        }
    }

    #[test]
    fn test_shared_buffer_uploaded_once() {
        let shared = Arc::new(GpuBuffer::new(vec![0; 24]));
        let other = Arc::new(GpuBuffer::new(vec![0; 24]));
        let prim = BuiltPrimitive {
            attributes: vec![attr("NORMAL", &shared), attr("POSITION", &shared)],
            indices: Some(attr("indices", &other)),
        };

        let mut queue = UploadQueue::new(CountingUploader::default());
        let handles = queue.realize(&prim).unwrap();
        assert_eq!(handles, [24, 24, 48]);
        assert_eq!(queue.uploaded(), 2);

        queue.realize(&prim).unwrap();
        assert_eq!(queue.into_uploader().bytes, 48);
    }
}
