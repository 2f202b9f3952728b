//! Error types for the glTF resource layer.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Kind of table an index refers into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKind {
    Buffer,
    BufferView,
    Accessor,
    Mesh,
    Image,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Buffer => "buffer",
            Self::BufferView => "bufferView",
            Self::Accessor => "accessor",
            Self::Mesh => "mesh",
            Self::Image => "image",
        };
        f.write_str(name)
    }
}

/// Why a buffer could not be turned into bytes.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// URI has a scheme other than `data:` or a plain relative path
    #[error("unsupported URI scheme in {0:?}")]
    MalformedScheme(String),

    /// `data:` URI without the `,` separating header and payload
    #[error("data URI has no header/payload separator")]
    MissingHeader,

    /// `data:` URI whose header does not end in `;base64`
    #[error("data URI is not base64 encoded (header {0:?})")]
    UnsupportedEncoding(String),

    /// Payload is not valid base64
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// External file does not exist
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// External file exists but could not be read
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Buffer has no URI but the asset carries no binary chunk
    #[error("buffer has no uri and the container has no BIN chunk")]
    MissingContainerPayload,
}

/// Main error type for glTF resource operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad magic, version, declared length or chunk framing
    #[error("Malformed container: {0}")]
    ContainerMalformed(String),

    /// The JSON chunk is absent
    #[error("Missing required {0} chunk")]
    MissingRequiredChunk(&'static str),

    /// A chunk that may appear once appeared twice
    #[error("Duplicate {0} chunk")]
    DuplicateChunk(&'static str),

    /// A buffer could not be resolved to bytes
    #[error("Buffer {buffer} unresolvable: {cause}")]
    BufferUnresolvable {
        buffer: usize,
        #[source]
        cause: ResolveError,
    },

    /// An image file could not be read while copying or embedding it
    #[error("Image {image} unresolvable: {cause}")]
    ImageUnresolvable {
        image: usize,
        #[source]
        cause: ResolveError,
    },

    /// An accessor or view addresses bytes beyond its storage
    #[error("{what} out of bounds: needs {needed} bytes, {available} available")]
    ViewOutOfBounds {
        what: String,
        needed: u64,
        available: u64,
    },

    /// An index refers to a nonexistent table entry
    #[error("Dangling {kind} reference {index} (count: {count})")]
    DanglingReference {
        kind: TableKind,
        index: usize,
        count: usize,
    },

    /// The external geometry encoder refused a primitive
    #[error("Encoding failed for mesh {mesh} primitive {primitive}: {reason}")]
    EncodingFailed {
        mesh: usize,
        primitive: usize,
        reason: String,
    },

    /// Writing a compacted buffer to disk failed
    #[error("Persisting {path} failed: {source}")]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Byte ranges scheduled for removal overlap each other or a surviving view
    #[error("Overlapping ranges in buffer {buffer}: [{first_offset}, +{first_length}) and [{second_offset}, +{second_length})")]
    OverlappingRanges {
        buffer: usize,
        first_offset: u64,
        first_length: u64,
        second_offset: u64,
        second_length: u64,
    },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a malformed container error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::ContainerMalformed(msg.into())
    }

    /// Create a dangling reference error.
    pub fn dangling(kind: TableKind, index: usize, count: usize) -> Self {
        Self::DanglingReference { kind, index, count }
    }

    /// Create an out-of-bounds error.
    pub fn out_of_bounds(what: impl Into<String>, needed: u64, available: u64) -> Self {
        Self::ViewOutOfBounds {
            what: what.into(),
            needed,
            available,
        }
    }
}

/// Result type alias for glTF resource operations.
pub type Result<T> = std::result::Result<T, Error>;
