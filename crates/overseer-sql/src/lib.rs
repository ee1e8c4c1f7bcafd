//! Typed access to the controller's relational store. One module per entity;
//! every function takes the shared [`sqlx::PgPool`] so each concurrent caller
//! checks out its own connection. `schema.sql` in this crate's root carries
//! the normative DDL, including the customer → host_scheme → monitor cascade.

use std::io::{Read, Write};

pub mod capabilities;
pub mod events;
pub mod host_schemes;
pub mod mappings;
pub mod monitors;
pub mod regions;
pub mod resources;
pub mod servers;

/// Keyword blobs are persisted zlib-compressed.
pub(crate) fn compress_blob(raw: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

pub(crate) fn decompress_blob(blob: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut raw = Vec::new();
    flate2::read::ZlibDecoder::new(blob).read_to_end(&mut raw)?;
    Ok(raw)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blob_compression_round_trips() {
        let raw = b"keyword one\x00keyword two".repeat(16);
        let compressed = compress_blob(&raw).unwrap();
        assert_eq!(decompress_blob(&compressed).unwrap(), raw);
    }

    #[test]
    fn garbage_fails_to_decompress() {
        assert!(decompress_blob(b"not a zlib stream").is_err());
    }
}
