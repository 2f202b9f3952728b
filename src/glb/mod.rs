//! Binary container (GLB) reading and writing.
//!
//! ```text
//! +--------+---------+--------------+
//! | magic  | version | total length |   12-byte header, little-endian
//! +--------+---------+--------------+
//! | length | "JSON"  | json bytes   |   first chunk, required
//! +--------+---------+--------------+
//! | length | "BIN\0" | binary bytes |   optional, at most once
//! +--------+---------+--------------+
//! | length | type    | ...          |   unknown chunks are skipped
//! +--------+---------+--------------+
//! ```

pub mod format;
mod reader;
mod writer;

pub use format::*;
pub use reader::{is_container, Container};
pub use writer::{write_container, write_container_to};
