//! RFC 2046 multipart delimiters on the encode path.

use crate::header::Headers;
use rand::Rng;
use std::io::{self, Write};

/// Random bytes behind each generated boundary.
const BOUNDARY_BYTES: usize = 30;

/// Generates a fresh boundary: 60 lower-case hex digits.
#[must_use]
pub fn random_boundary() -> String {
    let bytes = rand::thread_rng().r#gen::<[u8; BOUNDARY_BYTES]>();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Writes the delimiters of one multipart envelope.
///
/// The writer does not own the sink; each call borrows it so parts can be
/// nested by writing an inner envelope between two calls on the outer one.
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
    opened: bool,
}

impl MultipartWriter {
    /// Creates an envelope with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(random_boundary())
    }

    /// Creates an envelope with a caller-chosen boundary.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            opened: false,
        }
    }

    /// The boundary string, without leading dashes.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Starts a new part: delimiter line, `headers` verbatim, blank line.
    ///
    /// # Errors
    ///
    /// Returns the sink's error.
    pub fn open_part<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        headers: &Headers,
    ) -> io::Result<()> {
        if self.opened {
            write!(sink, "\r\n--{}\r\n", self.boundary)?;
        } else {
            write!(sink, "--{}\r\n", self.boundary)?;
            self.opened = true;
        }
        headers.write_raw(sink)?;
        sink.write_all(b"\r\n")
    }

    /// Writes the close delimiter.
    ///
    /// # Errors
    ///
    /// Returns the sink's error.
    pub fn close<W: Write + ?Sized>(self, sink: &mut W) -> io::Result<()> {
        if self.opened {
            write!(sink, "\r\n--{}--\r\n", self.boundary)
        } else {
            write!(sink, "--{}--\r\n", self.boundary)
        }
    }
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::header::CONTENT_TYPE;
    use crate::multipart::MultipartReader;

    #[test]
    fn test_random_boundary_shape() {
        let a = random_boundary();
        let b = random_boundary();
        assert_eq!(a.len(), 60);
        assert!(a.bytes().all(|c| c.is_ascii_digit() || (b'a'..=b'f').contains(&c)));
        assert_ne!(a, b);
    }

    #[test]
    fn test_delimiters() {
        let mut out = Vec::new();
        let mut writer = MultipartWriter::with_boundary("b");
        let mut headers = Headers::new();
        headers.add(CONTENT_TYPE, "text/plain");

        writer.open_part(&mut out, &headers).unwrap();
        out.extend_from_slice(b"one");
        writer.open_part(&mut out, &Headers::new()).unwrap();
        out.extend_from_slice(b"two");
        writer.close(&mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "--b\r\nContent-Type: text/plain\r\n\r\none\r\n--b\r\n\r\ntwo\r\n--b--\r\n"
        );
    }

    #[test]
    fn test_close_without_parts() {
        let mut out = Vec::new();
        MultipartWriter::with_boundary("xyz").close(&mut out).unwrap();
        assert_eq!(out, b"--xyz--\r\n");
    }

    #[test]
    fn test_reader_reads_what_writer_wrote() {
        let mut out = Vec::new();
        let mut writer = MultipartWriter::new();
        let boundary = writer.boundary().to_string();
        let mut headers = Headers::new();
        headers.add(CONTENT_TYPE, "application/octet-stream");

        writer.open_part(&mut out, &headers).unwrap();
        out.extend_from_slice(b"\x00\x01payload");
        writer.close(&mut out).unwrap();

        let mut reader = MultipartReader::new(&out, &boundary);
        let part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.headers.get(CONTENT_TYPE), Some("application/octet-stream"));
        assert_eq!(part.body, b"\x00\x01payload");
        assert!(reader.next_part().unwrap().is_none());
    }
}
