//! # glTF resources
//!
//! The binary resource layer of glTF 2.0: everything between the bytes on
//! disk and renderer-ready vertex and index buffers, plus the inverse path
//! that strips raw geometry out of buffers once it has been re-encoded.
//!
//! ## Modules
//!
//! - [`util`] - Component types, errors
//! - [`glb`] - Low-level binary container format
//! - [`document`] - Typed JSON tables (buffers, views, accessors, meshes, images)
//! - [`buffer`] - Buffer resolution (data URIs, external files, container payload)
//! - [`accessor`] - Bounds-checked views and sparse accessor materialization
//! - [`build`] - Deduplicated, split GPU buffers and attribute descriptors
//! - [`compact`] - Buffer compaction and the mesh compression driver
//!
//! ## Example
//!
//! ```ignore
//! use gltf_resources::prelude::*;
//!
//! let asset = Asset::open("scene.glb", &LoadOptions::default())?;
//! let builder = asset.builder(BuildOptions::default());
//!
//! for (i, prim) in builder.build_mesh(0)?.into_iter().enumerate() {
//!     let prim = prim?;
//!     println!("primitive {i}: {} attributes", prim.attributes.len());
//! }
//! ```

pub mod util;
pub mod glb;
pub mod document;
pub mod buffer;
pub mod accessor;
pub mod build;
pub mod compact;
mod asset;

pub use asset::{load_all, Asset, LoadOptions};
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accessor::{AccessorTable, BufferViewTable};
    pub use crate::asset::{load_all, Asset, LoadOptions};
    pub use crate::buffer::BufferStore;
    pub use crate::build::{BuildOptions, BuiltPrimitive, GpuBuffer, GpuUploader, PrimitiveBufferBuilder, UploadQueue};
    pub use crate::compact::{
        compress_meshes, CompactOptions, CompactionPass, CompactionReport, Embedding, GeometryEncoder,
    };
    pub use crate::document::Document;
    pub use crate::glb::Container;
    pub use crate::util::{AccessorType, ComponentType, ElementLayout, Error, Result};
}
