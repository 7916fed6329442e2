//! Raw deflate for large payloads.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::CodecError;

/// Deflate the UTF-8 bytes of `text`.
///
/// # Errors
///
/// Returns [`CodecError::Compression`] if the encoder fails.
pub fn compress(text: &str) -> Result<Vec<u8>, CodecError> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(text.len() / 2), Compression::default());
    encoder.write_all(text.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Inflate bytes produced by [`compress`] back into text.
///
/// # Errors
///
/// Returns [`CodecError::Compression`] for corrupt input and
/// [`CodecError::Utf8`] if the inflated bytes are not UTF-8.
pub fn decompress(bytes: &[u8]) -> Result<String, CodecError> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(String::from_utf8(out)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompress_inverts_compress() {
        let text = "broker payload ".repeat(64);
        let packed = compress(&text).expect("compress");
        assert!(packed.len() < text.len());
        assert_eq!(decompress(&packed).expect("decompress"), text);
    }

    #[test]
    fn empty_text_round_trips() {
        let packed = compress("").expect("compress");
        assert_eq!(decompress(&packed).expect("decompress"), "");
    }

    #[test]
    fn multibyte_text_round_trips() {
        let text = "grüße → 世界 ".repeat(40);
        let packed = compress(&text).expect("compress");
        assert_eq!(decompress(&packed).expect("decompress"), text);
    }

    #[test]
    fn decompress_rejects_garbage() {
        let err = decompress(&[0xff, 0xff, 0xff, 0xff]).expect_err("garbage should fail");
        assert!(matches!(err, CodecError::Compression(_)));
    }
}
