//! Error types for message encoding and decoding.

use std::io;

/// Result type alias for message operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input exceeded the configured size cap.
    #[error("Message exceeds size limit of {limit} bytes")]
    SizeLimitExceeded {
        /// The cap that was exceeded.
        limit: u64,
    },

    /// Structural parse failure (malformed header block, unterminated multipart).
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input ended while more was required.
    #[error("Unexpected end of input: {0}")]
    UnexpectedEof(&'static str),

    /// Multipart entity declared without a boundary parameter.
    #[error("No boundary found for multipart entity")]
    MissingBoundary,

    /// Content-Type header value could not be parsed.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// A field required for serialization is missing.
    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),

    /// I/O error on the underlying source or sink.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Write or close attempted on an already closed chunk writer.
    #[error("Chunk writer is closed")]
    WriterClosed,

    /// Reading or rewinding an attachment for content sniffing failed.
    #[error("Content type detection failed: {0}")]
    Sniff(#[source] io::Error),

    /// Invalid transfer or header encoding.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// Payload carried inside an [`io::Error`] when a closed chunk writer is reused.
///
/// `io::Write` can only report `io::Error`; the conversion into [`Error`]
/// recovers [`Error::WriterClosed`] from it.
#[derive(Debug, thiserror::Error)]
#[error("chunk writer is closed")]
pub(crate) struct ClosedWriter;

impl ClosedWriter {
    pub(crate) fn into_io() -> io::Error {
        io::Error::other(Self)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.downcast_ref::<ClosedWriter>().is_some())
        {
            return Self::WriterClosed;
        }
        Self::Io(err)
    }
}

impl Error {
    /// Creates a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Returns true if the error came from the caller's source or sink.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_writer_maps_back() {
        let err: Error = ClosedWriter::into_io().into();
        assert!(matches!(err, Error::WriterClosed));
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.is_io());
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_size_limit_display() {
        let err = Error::SizeLimitExceeded { limit: 1024 };
        assert_eq!(err.to_string(), "Message exceeds size limit of 1024 bytes");
    }
}
