//! Utility types shared by every layer.
//!
//! - [`ComponentType`] / [`AccessorType`] / [`ElementLayout`] - accessor element types
//! - [`Error`] / [`Result`] - Error handling

mod component;
mod error;

pub use component::*;
pub use error::*;
