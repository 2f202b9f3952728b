//! Container reader implementation.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use super::format::*;
use crate::util::{Error, Result};

/// The two payloads extracted from a binary container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    json: Vec<u8>,
    bin: Option<Vec<u8>>,
    skipped_chunks: usize,
}

impl Container {
    /// Open a container file for reading with memory mapping.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_opts(path, true)
    }

    /// Open a container file with optional memory mapping.
    pub fn open_opts(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        if use_mmap && size > 0 {
            // Safety: the map is read-only and dropped before this function returns
            let mmap = unsafe { Mmap::map(&file) }?;
            Self::parse(&mmap)
        } else {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data)?;
            Self::parse(&data)
        }
    }

    /// Split a container into its JSON and binary payloads.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_header(data)?;

        let mut json: Option<&[u8]> = None;
        let mut bin: Option<&[u8]> = None;
        let mut skipped_chunks = 0;
        let mut pos = HEADER_SIZE;

        while pos < data.len() {
            let remaining = data.len() - pos;
            if remaining < CHUNK_HEADER_SIZE {
                return Err(Error::malformed(format!(
                    "truncated chunk header at byte {pos} ({remaining} bytes left)"
                )));
            }

            let chunk_len = LittleEndian::read_u32(&data[pos..]) as usize;
            let chunk_type = LittleEndian::read_u32(&data[pos + 4..]);
            pos += CHUNK_HEADER_SIZE;

            if chunk_len > data.len() - pos {
                return Err(Error::malformed(format!(
                    "{} chunk declares {chunk_len} bytes but only {} remain",
                    chunk_name(chunk_type),
                    data.len() - pos
                )));
            }
            let body = &data[pos..pos + chunk_len];
            pos += chunk_len;

            match chunk_type {
                CHUNK_JSON => {
                    if json.is_some() {
                        return Err(Error::DuplicateChunk("JSON"));
                    }
                    json = Some(body);
                }
                CHUNK_BIN => {
                    // JSON has to be the first recognized chunk
                    if json.is_none() {
                        return Err(Error::MissingRequiredChunk("JSON"));
                    }
                    if bin.is_some() {
                        return Err(Error::DuplicateChunk("BIN"));
                    }
                    bin = Some(body);
                }
                other => {
                    tracing::debug!(chunk = %chunk_name(other), len = chunk_len, "skipping unknown chunk");
                    skipped_chunks += 1;
                }
            }
        }

        let json = json.ok_or(Error::MissingRequiredChunk("JSON"))?;
        Ok(Self {
            json: json.to_vec(),
            bin: bin.map(<[u8]>::to_vec),
            skipped_chunks,
        })
    }

    /// Parse and validate the container header.
    fn parse_header(data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::malformed("empty input"));
        }
        if data.len() < HEADER_SIZE {
            return Err(Error::malformed(format!(
                "{} bytes is shorter than the {HEADER_SIZE}-byte header",
                data.len()
            )));
        }

        let magic = LittleEndian::read_u32(&data[0..]);
        if magic != GLB_MAGIC {
            return Err(Error::malformed(format!("bad magic 0x{magic:08X}")));
        }

        let version = LittleEndian::read_u32(&data[VERSION_OFFSET..]);
        if version != GLB_VERSION {
            return Err(Error::malformed(format!("unsupported version {version}")));
        }

        let total = LittleEndian::read_u32(&data[LENGTH_OFFSET..]) as u64;
        if total != data.len() as u64 {
            return Err(Error::malformed(format!(
                "header declares {total} bytes, input has {}",
                data.len()
            )));
        }

        Ok(())
    }

    /// Build a container from already separated payloads.
    pub fn from_parts(json: Vec<u8>, bin: Option<Vec<u8>>) -> Self {
        Self { json, bin, skipped_chunks: 0 }
    }

    /// The JSON chunk, including any trailing padding.
    #[inline]
    pub fn json(&self) -> &[u8] {
        &self.json
    }

    /// The default binary payload, if present.
    #[inline]
    pub fn bin(&self) -> Option<&[u8]> {
        self.bin.as_deref()
    }

    /// Number of chunks of unknown type that were skipped.
    #[inline]
    pub fn skipped_chunks(&self) -> usize {
        self.skipped_chunks
    }

    /// Consume the container and return its payloads.
    pub fn into_parts(self) -> (Vec<u8>, Option<Vec<u8>>) {
        (self.json, self.bin)
    }
}

/// Check whether `data` starts with the container magic.
#[inline]
pub fn is_container(data: &[u8]) -> bool {
    data.len() >= 4 && LittleEndian::read_u32(data) == GLB_MAGIC
}
