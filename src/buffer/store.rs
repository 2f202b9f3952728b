//! Resolution of declared buffers to bytes.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::uri::{classify, decode_data_uri, UriKind};
use crate::document::{Buffer, Document};
use crate::glb::CHUNK_ALIGNMENT;
use crate::util::{Error, ResolveError, Result};

/// Where the bytes of a buffer come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferSource {
    /// Base64 payload inside the JSON.
    Embedded,
    /// File next to the asset.
    External(PathBuf),
    /// The container's BIN chunk.
    Container,
}

/// Resolves buffers against a base directory and an optional container payload.
#[derive(Clone, Debug, Default)]
pub struct BufferStore {
    base_path: Option<PathBuf>,
    container_payload: Option<Arc<[u8]>>,
}

impl BufferStore {
    pub fn new(base_path: Option<PathBuf>, container_payload: Option<Vec<u8>>) -> Self {
        Self {
            base_path,
            container_payload: container_payload.map(Arc::from),
        }
    }

    /// Directory external URIs are resolved against.
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    /// Resolve relative URIs against `base_path` from now on.
    pub fn set_base_path(&mut self, base_path: Option<PathBuf>) {
        self.base_path = base_path;
    }

    pub fn container_payload(&self) -> Option<&[u8]> {
        self.container_payload.as_deref()
    }

    /// Replace the container payload, e.g. after compaction rewrote it.
    pub fn set_container_payload(&mut self, payload: Option<Vec<u8>>) {
        self.container_payload = payload.map(Arc::from);
    }

    /// Full path of an external URI.
    pub fn external_path(&self, uri: &str) -> PathBuf {
        let path = Path::new(uri);
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Classify a buffer without reading it.
    pub fn source(&self, index: usize, buffer: &Buffer) -> std::result::Result<BufferSource, ResolveError> {
        match buffer.uri.as_deref() {
            Some(uri) => match classify(uri)? {
                UriKind::Data(_) => Ok(BufferSource::Embedded),
                UriKind::Path(path) => Ok(BufferSource::External(self.external_path(path))),
            },
            None if index == 0 && self.container_payload.is_some() => Ok(BufferSource::Container),
            None => Err(ResolveError::MissingContainerPayload),
        }
    }

    /// Resolve buffer `index` to its bytes.
    ///
    /// A `byteLength` that disagrees with the resolved size is only logged.
    pub fn resolve(&self, index: usize, buffer: &Buffer) -> Result<Arc<[u8]>> {
        let bytes = self
            .load(index, buffer)
            .map_err(|cause| Error::BufferUnresolvable { buffer: index, cause })?;

        if bytes.len() as u64 != buffer.byte_length {
            tracing::warn!(
                buffer = index,
                declared = buffer.byte_length,
                actual = bytes.len(),
                "buffer byteLength does not match resolved size"
            );
        }
        Ok(bytes)
    }

    /// Resolve every buffer of a document, failing on the first error.
    #[tracing::instrument(skip_all, fields(buffers = doc.buffers.len()))]
    pub fn resolve_all(&self, doc: &Document) -> Result<Vec<Arc<[u8]>>> {
        doc.buffers
            .iter()
            .enumerate()
            .map(|(i, b)| self.resolve(i, b))
            .collect()
    }

    fn load(&self, index: usize, buffer: &Buffer) -> std::result::Result<Arc<[u8]>, ResolveError> {
        match buffer.uri.as_deref() {
            Some(uri) => match classify(uri)? {
                UriKind::Data(data) => Ok(decode_data_uri(data)?.into()),
                UriKind::Path(path) => Ok(read_file(&self.external_path(path))?.into()),
            },
            None => {
                let payload = match (&self.container_payload, index) {
                    (Some(payload), 0) => payload,
                    _ => return Err(ResolveError::MissingContainerPayload),
                };
                // The BIN chunk may carry up to three bytes of alignment padding
                let declared = buffer.byte_length as usize;
                let padding = payload.len().saturating_sub(declared);
                if padding > 0 && padding < CHUNK_ALIGNMENT {
                    Ok(Arc::from(&payload[..declared]))
                } else {
                    Ok(Arc::clone(payload))
                }
            }
        }
    }
}

/// Read an external buffer file, keeping "absent" distinct from "unreadable".
pub(crate) fn read_file(path: &Path) -> std::result::Result<Vec<u8>, ResolveError> {
    std::fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ResolveError::FileNotFound(path.to_path_buf()),
        _ => ResolveError::Unreadable {
            path: path.to_path_buf(),
            source,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn buffer(len: u64, uri: Option<&str>) -> Buffer {
        Buffer {
            byte_length: len,
            uri: uri.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_embedded() {
        let store = BufferStore::default();
        let bytes = store
            .resolve(0, &buffer(4, Some("data:application/octet-stream;base64,AQIDBA==")))
            .unwrap();
        assert_eq!(&*bytes, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_external() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("mesh.bin")).unwrap();
        f.write_all(&[5; 16]).unwrap();

        let store = BufferStore::new(Some(dir.path().to_path_buf()), None);
        let bytes = store.resolve(0, &buffer(16, Some("mesh.bin"))).unwrap();
        assert_eq!(bytes.len(), 16);

        let err = store.resolve(3, &buffer(16, Some("missing.bin"))).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferUnresolvable { buffer: 3, cause: ResolveError::FileNotFound(_) }
        ));
    }

    #[test]
    fn test_container_payload() {
        let store = BufferStore::new(None, Some(vec![1, 2, 3, 4, 5, 0, 0, 0]));
        assert_eq!(store.resolve(0, &buffer(5, None)).unwrap().len(), 5);
        assert_eq!(store.resolve(0, &buffer(8, None)).unwrap().len(), 8);
        assert!(matches!(
            store.resolve(1, &buffer(5, None)),
            Err(Error::BufferUnresolvable { cause: ResolveError::MissingContainerPayload, .. })
        ));
        assert!(matches!(
            BufferStore::default().resolve(0, &buffer(5, None)),
            Err(Error::BufferUnresolvable { cause: ResolveError::MissingContainerPayload, .. })
        ));
    }

    #[test]
    fn test_length_mismatch_is_advisory() {
        let store = BufferStore::default();
        let bytes = store
            .resolve(0, &buffer(100, Some("data:application/octet-stream;base64,AQIDBA==")))
            .unwrap();
        assert_eq!(bytes.len(), 4);
    }

    #[test]
    fn test_source() {
        let store = BufferStore::new(Some(PathBuf::from("/assets")), Some(vec![0; 4]));
        assert_eq!(store.source(0, &buffer(4, None)).unwrap(), BufferSource::Container);
        assert_eq!(
            store.source(1, &buffer(4, Some("a.bin"))).unwrap(),
            BufferSource::External(PathBuf::from("/assets/a.bin"))
        );
        assert_eq!(
            store.source(1, &buffer(4, Some("data:;base64,"))).unwrap(),
            BufferSource::Embedded
        );
    }
}
