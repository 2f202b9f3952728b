//! Buffer URI classification and `data:` URI coding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::util::ResolveError;

/// Media type written by [`to_data_uri`].
pub const OCTET_STREAM_PREFIX: &str = "data:application/octet-stream;base64,";

/// Where a buffer URI points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UriKind<'a> {
    /// An embedded `data:` URI (the full string).
    Data(&'a str),
    /// A path relative to the asset, or a `file:` URI with the scheme removed.
    Path(&'a str),
}

/// Classify a buffer URI. Schemes other than `data:` and `file:` are rejected.
pub fn classify(uri: &str) -> Result<UriKind<'_>, ResolveError> {
    let Some(colon) = uri.find(':') else {
        return Ok(UriKind::Path(uri));
    };
    let scheme = &uri[..colon];

    // A single letter before the colon is a drive, not a scheme
    let is_scheme = scheme.len() >= 2
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !is_scheme {
        return Ok(UriKind::Path(uri));
    }

    if scheme.eq_ignore_ascii_case("data") {
        Ok(UriKind::Data(uri))
    } else if scheme.eq_ignore_ascii_case("file") {
        let rest = &uri[colon + 1..];
        Ok(UriKind::Path(rest.strip_prefix("//").unwrap_or(rest)))
    } else {
        Err(ResolveError::MalformedScheme(uri.to_string()))
    }
}

/// Decode a `data:<mediatype>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, ResolveError> {
    let rest = match uri.get(..5) {
        Some(scheme) if scheme.eq_ignore_ascii_case("data:") => &uri[5..],
        _ => return Err(ResolveError::MalformedScheme(truncate(uri))),
    };
    let (header, payload) = rest.split_once(',').ok_or(ResolveError::MissingHeader)?;
    if !header.ends_with(";base64") {
        return Err(ResolveError::UnsupportedEncoding(header.to_string()));
    }
    Ok(STANDARD.decode(payload)?)
}

/// Encode bytes as an `application/octet-stream` base64 data URI.
pub fn to_data_uri(bytes: &[u8]) -> String {
    to_data_uri_as("application/octet-stream", bytes)
}

/// Encode bytes as a base64 data URI of the given media type.
pub fn to_data_uri_as(media_type: &str, bytes: &[u8]) -> String {
    let mut uri = String::with_capacity(media_type.len() + 13 + bytes.len().div_ceil(3) * 4);
    uri.push_str("data:");
    uri.push_str(media_type);
    uri.push_str(";base64,");
    STANDARD.encode_string(bytes, &mut uri);
    uri
}

/// Media type of an image file, by extension.
pub fn image_media_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map_or("", |(_, ext)| ext);
    if ext.eq_ignore_ascii_case("png") {
        "image/png"
    } else if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") {
        "image/jpeg"
    } else if ext.eq_ignore_ascii_case("ktx2") {
        "image/ktx2"
    } else if ext.eq_ignore_ascii_case("webp") {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

/// Keep error messages readable when a large URI is malformed.
fn truncate(uri: &str) -> String {
    match uri.char_indices().nth(48) {
        Some((end, _)) => format!("{}...", &uri[..end]),
        None => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("mesh.bin").unwrap(), UriKind::Path("mesh.bin"));
        assert_eq!(classify("sub/dir/mesh.bin").unwrap(), UriKind::Path("sub/dir/mesh.bin"));
        assert_eq!(classify("C:/assets/mesh.bin").unwrap(), UriKind::Path("C:/assets/mesh.bin"));
        assert_eq!(classify("file:///tmp/a.bin").unwrap(), UriKind::Path("/tmp/a.bin"));
        assert!(matches!(classify("DATA:;base64,AAAA").unwrap(), UriKind::Data(_)));
        assert!(matches!(
            classify("https://example.com/a.bin"),
            Err(ResolveError::MalformedScheme(_))
        ));
    }

    #[test]
    fn test_decode() {
        let bytes = decode_data_uri("data:application/octet-stream;base64,AQIDBA==").unwrap();
        assert_eq!(bytes, [1, 2, 3, 4]);
        let bytes = decode_data_uri("data:application/gltf-buffer;base64,").unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(decode_data_uri("blob:AAAA"), Err(ResolveError::MalformedScheme(_))));
        assert!(matches!(
            decode_data_uri("data:application/octet-stream;base64"),
            Err(ResolveError::MissingHeader)
        ));
        assert!(matches!(
            decode_data_uri("data:text/plain,hello"),
            Err(ResolveError::UnsupportedEncoding(h)) if h == "text/plain"
        ));
        assert!(matches!(
            decode_data_uri("data:application/octet-stream;base64,@@@"),
            Err(ResolveError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_encode() {
        let uri = to_data_uri(&[1, 2, 3, 4]);
        assert_eq!(uri, "data:application/octet-stream;base64,AQIDBA==");
        assert_eq!(decode_data_uri(&uri).unwrap(), [1, 2, 3, 4]);
        assert!(uri.starts_with(OCTET_STREAM_PREFIX));
    }

    #[test]
    fn test_image_uri() {
        assert_eq!(image_media_type("tex/albedo.PNG"), "image/png");
        assert_eq!(image_media_type("a.jpeg"), "image/jpeg");
        assert_eq!(image_media_type("noext"), "application/octet-stream");
        let uri = to_data_uri_as(image_media_type("a.jpg"), &[0xFF, 0xD8]);
        assert_eq!(uri, "data:image/jpeg;base64,/9g=");
        assert_eq!(decode_data_uri(&uri).unwrap(), [0xFF, 0xD8]);
    }
}
