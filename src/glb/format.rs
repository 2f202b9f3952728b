//! Binary container format constants.

/// Magic at the start of a container: ASCII "glTF" read as a little-endian u32.
pub const GLB_MAGIC: u32 = 0x4654_6C67;

/// The only supported container version.
pub const GLB_VERSION: u32 = 2;

/// Size of the file header in bytes (magic, version, total length).
pub const HEADER_SIZE: usize = 12;

/// Size of each chunk header in bytes (length, type).
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Offset of the version in the header.
pub const VERSION_OFFSET: usize = 4;

/// Offset of the declared total length in the header.
pub const LENGTH_OFFSET: usize = 8;

/// Chunk type of the JSON document: ASCII "JSON".
pub const CHUNK_JSON: u32 = 0x4E4F_534A;

/// Chunk type of the default binary payload: ASCII "BIN\0".
pub const CHUNK_BIN: u32 = 0x004E_4942;

/// Chunk payloads are padded to this alignment by the writer.
pub const CHUNK_ALIGNMENT: usize = 4;

/// JSON chunks are padded with spaces so the text stays valid.
pub const JSON_PADDING: u8 = b' ';

/// BIN chunks are padded with zeros.
pub const BIN_PADDING: u8 = 0x00;

/// Round a length up to the chunk alignment.
#[inline]
pub const fn padded_len(len: usize) -> usize {
    (len + CHUNK_ALIGNMENT - 1) & !(CHUNK_ALIGNMENT - 1)
}

/// Human-readable name of a chunk type, for diagnostics.
pub fn chunk_name(chunk_type: u32) -> String {
    match chunk_type {
        CHUNK_JSON => "JSON".to_string(),
        CHUNK_BIN => "BIN".to_string(),
        other => format!("0x{other:08X}"),
    }
}
