//! Buffer resolution: embedded data URIs, external files and the
//! container payload.

mod store;
mod uri;

pub(crate) use store::read_file;
pub use store::{BufferSource, BufferStore};
pub use uri::{
    classify, decode_data_uri, image_media_type, to_data_uri, to_data_uri_as, UriKind, OCTET_STREAM_PREFIX,
};
