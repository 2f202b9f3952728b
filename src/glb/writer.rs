//! Container writer.
//!
//! Produces a version 2 container with a space-padded JSON chunk and an
//! optional zero-padded BIN chunk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use super::format::*;
use crate::util::{Error, Result};

/// Serialize a JSON document and optional binary payload into container bytes.
pub fn write_container(json: &[u8], bin: Option<&[u8]>) -> Result<Vec<u8>> {
    let json_len = padded_len(json.len());
    let bin_len = bin.map(|b| padded_len(b.len()));

    let mut total = HEADER_SIZE + CHUNK_HEADER_SIZE + json_len;
    if let Some(len) = bin_len {
        total += CHUNK_HEADER_SIZE + len;
    }
    let total_u32 = u32::try_from(total)
        .map_err(|_| Error::other(format!("container of {total} bytes exceeds the 4 GiB limit")))?;

    let mut out = Vec::with_capacity(total);
    out.write_u32::<LittleEndian>(GLB_MAGIC)?;
    out.write_u32::<LittleEndian>(GLB_VERSION)?;
    out.write_u32::<LittleEndian>(total_u32)?;

    write_chunk(&mut out, CHUNK_JSON, json, JSON_PADDING)?;
    if let Some(bin) = bin {
        write_chunk(&mut out, CHUNK_BIN, bin, BIN_PADDING)?;
    }

    debug_assert_eq!(out.len(), total);
    Ok(out)
}

/// Write a container straight to a file.
pub fn write_container_to(path: impl AsRef<Path>, json: &[u8], bin: Option<&[u8]>) -> Result<()> {
    let bytes = write_container(json, bin)?;
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(())
}

fn write_chunk<W: Write>(w: &mut W, kind: u32, body: &[u8], pad: u8) -> Result<()> {
    let padded = padded_len(body.len());
    w.write_u32::<LittleEndian>(padded as u32)?;
    w.write_u32::<LittleEndian>(kind)?;
    w.write_all(body)?;
    for _ in body.len()..padded {
        w.write_u8(pad)?;
    }
    Ok(())
}
