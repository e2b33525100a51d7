//! Base64 transfer encoding.
//!
//! The encoder emits one unbroken run of base64 text; line wrapping to the
//! RFC 2045 limit is left to [`ChunkedLineWriter`](crate::ChunkedLineWriter).

use super::BodyCodec;
use crate::error::Result;
use ::base64::Engine;
use ::base64::alphabet;
use ::base64::engine::general_purpose::STANDARD;
use ::base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use ::base64::write::EncoderWriter;
use std::io::{self, Read, Write};

/// Standard alphabet decoder that accepts missing padding and stray
/// trailing bits, as found in real-world mail.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Base64 [`BodyCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64;

impl BodyCodec for Base64 {
    fn encode(&self, source: &mut dyn Read, sink: &mut dyn Write) -> io::Result<u64> {
        let mut encoder = EncoderWriter::new(sink, &STANDARD);
        let copied = io::copy(source, &mut encoder)?;
        encoder.finish()?;
        Ok(copied)
    }

    fn decode(&self, body: &[u8]) -> Result<Vec<u8>> {
        decode(body)
    }
}

/// Encodes data as Base64.
#[must_use]
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data, ignoring any whitespace and line breaks.
///
/// Padding is optional.
///
/// # Errors
///
/// Returns an error if the input holds characters outside the Base64
/// alphabet.
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    LENIENT.decode(cleaned).map_err(Into::into)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_wrapped_lines() {
        let decoded = decode(b"SGVsbG8s\r\nIFdvcmxk\r\nIQ==\r\n").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_decode_without_padding() {
        assert_eq!(decode(b"iVBORw").unwrap(), [0x89, b'P', b'N', b'G']);
        assert_eq!(decode(b"SGVsbG8sIFdvcmxkIQ").unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(decode(b"not*base64"), Err(Error::Base64Decode(_))));
    }

    #[test]
    fn test_streaming_encode_in_small_reads() {
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = self.0.len().min(buf.len()).min(2);
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let mut out = Vec::new();
        let consumed = Base64
            .encode(&mut Trickle(b"Hello, World!"), &mut out)
            .unwrap();
        assert_eq!(consumed, 13);
        assert_eq!(out, b"SGVsbG8sIFdvcmxkIQ==");
    }
}
