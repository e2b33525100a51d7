//! Content transfer encodings.
//!
//! Quoted-printable and base64 are both [`BodyCodec`]s: a streaming encoder
//! from a byte source into a sink, plus a decoder over a materialized body.
//! The writer and the tree decoder pick a codec from the part's
//! `Content-Transfer-Encoding` tag through [`TransferEncoding::codec`].

pub mod base64;
pub mod quoted_printable;
pub mod rfc2047;

use crate::error::Result;
use crate::header::{CONTENT_TRANSFER_ENCODING, Headers};
use std::fmt;
use std::io::{self, Read, Write};

pub use self::base64::Base64;
pub use self::quoted_printable::{QuotedPrintable, QuotedPrintableWriter};

/// Streaming encode / materialized decode of a part body.
pub trait BodyCodec {
    /// Encodes everything `source` yields into `sink`, returning the number
    /// of source bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns any error from the source or the sink.
    fn encode(&self, source: &mut dyn Read, sink: &mut dyn Write) -> io::Result<u64>;

    /// Decodes a complete encoded body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for this encoding.
    fn decode(&self, body: &[u8]) -> Result<Vec<u8>>;
}

/// Passes bytes through unchanged (7bit, 8bit, binary).
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl BodyCodec for Identity {
    fn encode(&self, source: &mut dyn Read, sink: &mut dyn Write) -> io::Result<u64> {
        io::copy(source, sink)
    }

    fn decode(&self, body: &[u8]) -> Result<Vec<u8>> {
        Ok(body.to_vec())
    }
}

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    #[default]
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }

    /// Reads the `Content-Transfer-Encoding` of a header set.
    #[must_use]
    pub fn from_headers(headers: &Headers) -> Self {
        headers
            .get(CONTENT_TRANSFER_ENCODING)
            .map_or(Self::SevenBit, Self::parse)
    }

    /// Returns the codec implementing this encoding.
    #[must_use]
    pub fn codec(self) -> &'static dyn BodyCodec {
        match self {
            Self::Base64 => &Base64,
            Self::QuotedPrintable => &QuotedPrintable,
            Self::SevenBit | Self::EightBit | Self::Binary => &Identity,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("Quoted-Printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-uuencode"), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_from_headers_default() {
        let headers = Headers::new();
        assert_eq!(TransferEncoding::from_headers(&headers), TransferEncoding::SevenBit);

        let mut headers = Headers::new();
        headers.add("content-transfer-encoding", "base64");
        assert_eq!(TransferEncoding::from_headers(&headers), TransferEncoding::Base64);
    }

    #[test]
    fn test_codec_selection() {
        let mut out = Vec::new();
        TransferEncoding::Base64
            .codec()
            .encode(&mut &b"hi"[..], &mut out)
            .unwrap();
        assert_eq!(out, b"aGk=");

        let decoded = TransferEncoding::QuotedPrintable
            .codec()
            .decode(b"a=3Db")
            .unwrap();
        assert_eq!(decoded, b"a=b");

        let decoded = TransferEncoding::EightBit.codec().decode(b"=3D").unwrap();
        assert_eq!(decoded, b"=3D");
    }
}
