//! Snappy codec: the standard block format plus Apple's IWA chunk framing.
//!
//! The block codec delegates to the reference `snap` crate so tag-byte
//! handling, copy-offset validation, and length accounting match the
//! standard Snappy implementation exactly. The framing layer above it is
//! Apple-specific: IWA streams differ from the standard Snappy stream
//! format (no stream identifier chunk, no CRC-32C, and a 4-byte
//! `{type, 24-bit length}` header per chunk) and are hand-rolled here.

use snap::raw::{Decoder, Encoder, decompress_len, max_compress_len};

use crate::error::{Error, Result};

/// Chunk type byte IWA expects on every framing chunk.
const IWA_CHUNK_TYPE: u8 = 0;

/// Maximum payload a single framing chunk's 24-bit length field can hold.
const MAX_CHUNK_LEN: usize = 0x00FF_FFFF;

/// Once the list of decompressed chunks grows past this many entries, they
/// are coalesced into one buffer to keep later copies bounded. A
/// performance heuristic only; it must not be observable in outputs.
const COALESCE_THRESHOLD: usize = 26;

/// Compresses `input` using the standard Snappy block format: a varint
/// uncompressed length followed by the literal/copy tag stream.
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new();
    encoder
        .compress_vec(input)
        .map_err(|e| Error::SnappyDecompressionFailed { reason: e.to_string() })
}

/// Decompresses a standard Snappy block, failing if the decoded length
/// does not match the block's declared uncompressed length.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let expected_len = decompress_len(input)
        .map_err(|e| Error::SnappyDecompressionFailed { reason: e.to_string() })?;
    let mut out = vec![0u8; expected_len];
    let mut decoder = Decoder::new();
    let written = decoder
        .decompress(input, &mut out)
        .map_err(|e| Error::SnappyDecompressionFailed { reason: e.to_string() })?;
    if written != expected_len {
        return Err(Error::SnappyDecompressionFailed {
            reason: format!(
                "declared length {} does not match decompressed length {}",
                expected_len, written
            ),
        });
    }
    out.truncate(written);
    Ok(out)
}

/// Reports whether `input` is a well-formed Snappy block that this codec
/// can decompress.
pub fn validate(input: &[u8]) -> bool {
    decompress(input).is_ok()
}

/// Upper bound on the compressed size of an `n`-byte input.
pub fn max_compressed_length(n: usize) -> usize {
    max_compress_len(n)
}

/// Reads the declared uncompressed length out of a Snappy block's varint
/// header without decompressing the body.
pub fn uncompressed_length(input: &[u8]) -> Result<usize> {
    decompress_len(input).map_err(|e| Error::SnappyDecompressionFailed { reason: e.to_string() })
}

/// Decompresses an IWA-framed byte stream: a concatenation of
/// `{ u8 chunk_type == 0; u24 chunk_length; Snappy block }` chunks.
pub fn decompress_framed(input: &[u8]) -> Result<Vec<u8>> {
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut total_len = 0usize;
    let mut pos = 0usize;

    while pos < input.len() {
        if input.len() - pos < 4 {
            return Err(Error::InvalidArchiveStructure {
                reason: "truncated IWA chunk header".to_string(),
            });
        }
        let chunk_type = input[pos];
        if chunk_type != IWA_CHUNK_TYPE {
            return Err(Error::InvalidIwaHeader { expected: IWA_CHUNK_TYPE, found: chunk_type });
        }
        let length =
            u32::from_le_bytes([input[pos + 1], input[pos + 2], input[pos + 3], 0]) as usize;
        pos += 4;

        if input.len() - pos < length {
            return Err(Error::InvalidArchiveStructure {
                reason: "IWA chunk length exceeds remaining bytes".to_string(),
            });
        }
        let block = &input[pos..pos + length];
        pos += length;

        if length == 0 {
            continue;
        }

        let decompressed = decompress(block)?;
        total_len += decompressed.len();
        chunks.push(decompressed);

        if chunks.len() > COALESCE_THRESHOLD {
            coalesce(&mut chunks);
        }
    }

    let mut out = Vec::with_capacity(total_len);
    for chunk in chunks {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Merges every chunk in `chunks` into a single entry, in place.
fn coalesce(chunks: &mut Vec<Vec<u8>>) {
    let total: usize = chunks.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    for chunk in chunks.drain(..) {
        merged.extend_from_slice(&chunk);
    }
    chunks.push(merged);
}

/// Compresses `input` as an IWA-framed byte stream, splitting it into as
/// few chunks as the 24-bit chunk-length field allows.
pub fn compress_framed(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if input.is_empty() {
        let block = compress(input)?;
        write_chunk(&mut out, &block)?;
        return Ok(out);
    }

    // Each raw chunk must compress to at most MAX_CHUNK_LEN bytes; Snappy's
    // worst case expands small inputs slightly, so undershoot the raw chunk
    // size to stay inside the 24-bit length field after compression.
    let raw_chunk_size = MAX_CHUNK_LEN - max_compressed_length(MAX_CHUNK_LEN) + MAX_CHUNK_LEN;
    let raw_chunk_size = raw_chunk_size.min(MAX_CHUNK_LEN).max(1);

    for raw in input.chunks(raw_chunk_size.min(1 << 20)) {
        let block = compress(raw)?;
        write_chunk(&mut out, &block)?;
    }
    Ok(out)
}

fn write_chunk(out: &mut Vec<u8>, block: &[u8]) -> Result<()> {
    if block.len() > MAX_CHUNK_LEN {
        return Err(Error::InvalidArchiveStructure {
            reason: "compressed block exceeds 24-bit chunk length".to_string(),
        });
    }
    out.push(IWA_CHUNK_TYPE);
    let len = block.len() as u32;
    out.extend_from_slice(&len.to_le_bytes()[..3]);
    out.extend_from_slice(block);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_hello_world() {
        let input = b"Hello, World!";
        let compressed = compress(input).unwrap();
        assert!(validate(&compressed));
        assert_eq!(decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn empty_input_compresses_to_valid_block() {
        let compressed = compress(b"").unwrap();
        assert_eq!(compressed.len(), 1);
        assert_eq!(decompress(&compressed).unwrap(), b"");
    }

    #[test]
    fn uncompressed_length_matches_input_length() {
        let input = b"a repeated repeated repeated string";
        let compressed = compress(input).unwrap();
        assert_eq!(uncompressed_length(&compressed).unwrap(), input.len());
    }

    #[test]
    fn framed_round_trip() {
        let input = b"iWork archive payload bytes, repeated repeated repeated";
        let framed = compress_framed(input).unwrap();
        assert_eq!(decompress_framed(&framed).unwrap(), input);
    }

    #[test]
    fn framed_rejects_nonzero_chunk_type() {
        let mut framed = compress_framed(b"abc").unwrap();
        framed[0] = 1;
        let err = decompress_framed(&framed).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidIwaHeader { expected: 0, found: 1 }
        ));
    }

    #[test]
    fn framed_chunk_length_past_end_is_structural_error() {
        let framed = vec![0u8, 0xFF, 0xFF, 0xFF];
        let err = decompress_framed(&framed).unwrap_err();
        assert!(matches!(err, Error::InvalidArchiveStructure { .. }));
    }

    #[test]
    fn empty_framed_stream_decompresses_to_empty() {
        assert_eq!(decompress_framed(&[]).unwrap(), Vec::<u8>::new());
    }

    proptest::proptest! {
        #[test]
        fn snappy_round_trip_any_bytes(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096)) {
            let compressed = compress(&data).unwrap();
            proptest::prop_assert!(validate(&compressed));
            proptest::prop_assert_eq!(decompress(&compressed).unwrap(), data.clone());
            proptest::prop_assert_eq!(uncompressed_length(&compressed).unwrap(), data.len());
        }

        #[test]
        fn framed_round_trip_any_bytes(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096)) {
            let framed = compress_framed(&data).unwrap();
            proptest::prop_assert_eq!(decompress_framed(&framed).unwrap(), data);
        }
    }
}
