//! Attachments: closable byte sources and content type detection.

use crate::header::{
    CONTENT_DISPOSITION, CONTENT_ID, CONTENT_TRANSFER_ENCODING, CONTENT_TYPE, Headers,
};
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// Content type used when nothing better is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Bytes examined when sniffing content.
pub const SNIFF_LEN: usize = 512;

/// A readable attachment body that must be released explicitly.
pub trait AttachmentSource: Read {
    /// Releases the source. Called at most once per attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the release fails.
    fn close(&mut self) -> io::Result<()>;
}

impl<T: AsRef<[u8]>> AttachmentSource for Cursor<T> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AttachmentSource for File {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Adapts any reader into an [`AttachmentSource`] whose close does nothing.
#[derive(Debug, Clone, Default)]
pub struct NopClose<R>(pub R);

impl<R: Read> Read for NopClose<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Seek> Seek for NopClose<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl<R: Read> AttachmentSource for NopClose<R> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A file attached to a message.
pub struct Attachment {
    /// Display name, used for the filename and the content id.
    pub name: String,
    /// Part headers written before the body.
    pub headers: Headers,
    body: Box<dyn AttachmentSource + Send>,
    closed: bool,
}

impl Attachment {
    /// Creates a base64 attachment with the standard part headers.
    pub fn new<S>(source: S, name: impl Into<String>, content_type: impl Into<String>) -> Self
    where
        S: AttachmentSource + Send + 'static,
    {
        let name = name.into();
        let mut headers = Headers::new();
        headers.add(CONTENT_DISPOSITION, format!("attachment;\r\n filename=\"{name}\""));
        headers.add(CONTENT_ID, format!("<{name}>"));
        headers.add(CONTENT_TRANSFER_ENCODING, "base64");
        headers.add(CONTENT_TYPE, content_type);

        Self {
            name,
            headers,
            body: Box::new(source),
            closed: false,
        }
    }

    /// The attachment's `Content-Type` value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)
    }

    /// The body source.
    pub fn body_mut(&mut self) -> &mut (dyn AttachmentSource + Send) {
        self.body.as_mut()
    }

    /// Returns true once the source has been released.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases the source. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns the source's close error.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.body.close()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("headers", &self.headers)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Maps attachments to MIME types.
pub trait ContentTypeDetector {
    /// Looks a type up from the file name alone.
    fn by_extension(&self, filename: &str) -> Option<String>;

    /// Guesses a type from the first bytes of the content (at most 512).
    fn by_content(&self, head: &[u8]) -> String;
}

/// Extension table and magic-byte sniffer shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDetector;

const EXTENSIONS: &[(&str, &str)] = &[
    ("avif", "image/avif"),
    ("css", "text/css; charset=utf-8"),
    ("csv", "text/csv; charset=utf-8"),
    ("eml", "message/rfc822"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("htm", "text/html; charset=utf-8"),
    ("html", "text/html; charset=utf-8"),
    ("ics", "text/calendar; charset=utf-8"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("mjs", "text/javascript; charset=utf-8"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("svg", "image/svg+xml"),
    ("txt", "text/plain; charset=utf-8"),
    ("wasm", "application/wasm"),
    ("webp", "image/webp"),
    ("xml", "text/xml; charset=utf-8"),
    ("zip", "application/zip"),
];

/// Byte patterns at fixed offsets that all have to match, and the type they
/// identify.
const MAGIC: &[(&[(usize, &[u8])], &str)] = &[
    (&[(0, b"%PDF-")], "application/pdf"),
    (&[(0, b"%!PS-Adobe-")], "application/postscript"),
    (&[(0, b"\xfe\xff")], "text/plain; charset=utf-16be"),
    (&[(0, b"\xff\xfe")], "text/plain; charset=utf-16le"),
    (&[(0, b"\xef\xbb\xbf")], "text/plain; charset=utf-8"),
    (&[(0, b"GIF87a")], "image/gif"),
    (&[(0, b"GIF89a")], "image/gif"),
    (&[(0, b"\x89PNG\r\n\x1a\n")], "image/png"),
    (&[(0, b"\xff\xd8\xff")], "image/jpeg"),
    (&[(0, b"BM")], "image/bmp"),
    (&[(0, b"RIFF"), (8, b"WEBPVP")], "image/webp"),
    (&[(0, b"\x00\x00\x01\x00")], "image/x-icon"),
    (&[(0, b"PK\x03\x04")], "application/zip"),
    (&[(0, b"\x1f\x8b\x08")], "application/x-gzip"),
    (&[(0, b"Rar!\x1a\x07\x00")], "application/x-rar-compressed"),
    (&[(0, b"Rar!\x1a\x07\x01\x00")], "application/x-rar-compressed"),
    (&[(0, b"\x00asm")], "application/wasm"),
    (&[(0, b"OggS\x00")], "application/ogg"),
    (&[(0, b"ID3")], "audio/mpeg"),
    (&[(4, b"ftyp")], "video/mp4"),
];

/// Tags that mark a document as HTML when they open it.
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

fn matches_magic(pattern: &[(usize, &[u8])], head: &[u8]) -> bool {
    pattern
        .iter()
        .all(|(offset, bytes)| head.get(*offset..offset + bytes.len()) == Some(*bytes))
}

fn is_html(head: &[u8]) -> bool {
    HTML_TAGS.iter().any(|tag| {
        head.get(..tag.len()).is_some_and(|h| h.eq_ignore_ascii_case(tag))
            && matches!(head.get(tag.len()), Some(b' ' | b'>'))
    })
}

/// Control bytes that never appear in text.
const fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}

impl ContentTypeDetector for BuiltinDetector {
    fn by_extension(&self, filename: &str) -> Option<String> {
        let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
        EXTENSIONS
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, mime)| (*mime).to_string())
    }

    fn by_content(&self, head: &[u8]) -> String {
        let head = &head[..head.len().min(SNIFF_LEN)];

        let start = head
            .iter()
            .position(|b| !matches!(b, b'\t' | b'\n' | 0x0c | b'\r' | b' '))
            .unwrap_or(head.len());
        let text_start = &head[start..];
        if is_html(text_start) {
            return "text/html; charset=utf-8".to_string();
        }
        if text_start.starts_with(b"<?xml") {
            return "text/xml; charset=utf-8".to_string();
        }

        if let Some((_, mime)) = MAGIC
            .iter()
            .find(|(pattern, _)| matches_magic(pattern, head))
        {
            return (*mime).to_string();
        }

        if head.iter().copied().any(is_binary_byte) {
            OCTET_STREAM.to_string()
        } else {
            "text/plain; charset=utf-8".to_string()
        }
    }
}

/// Resolves a type without reading content: explicit, extension, octet-stream.
pub(crate) fn resolve_by_name(
    detector: &dyn ContentTypeDetector,
    filename: &str,
    content_type: Option<&str>,
) -> Option<String> {
    content_type
        .filter(|ct| !ct.is_empty())
        .map(str::to_string)
        .or_else(|| detector.by_extension(filename))
}

/// Sniffs up to [`SNIFF_LEN`] bytes of `source` and rewinds it.
pub(crate) fn sniff<S: Read + Seek>(
    detector: &dyn ContentTypeDetector,
    source: &mut S,
) -> io::Result<String> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    source.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    source.seek(SeekFrom::Start(0))?;
    Ok(detector.by_content(&head))
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

    #[test]
    fn test_attachment_headers() {
        let attachment =
            Attachment::new(Cursor::new(b"data".to_vec()), "report.pdf", "application/pdf");
        let names: Vec<&str> = attachment.headers.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            ["Content-Disposition", "Content-Id", "Content-Transfer-Encoding", "Content-Type"]
        );
        assert_eq!(
            attachment.headers.get(CONTENT_DISPOSITION),
            Some("attachment;\r\n filename=\"report.pdf\"")
        );
        assert_eq!(attachment.headers.get(CONTENT_ID), Some("<report.pdf>"));
        assert_eq!(attachment.content_type(), Some("application/pdf"));
    }

    #[test]
    fn test_close_is_idempotent() {
        struct Counted<'a>(&'a std::sync::atomic::AtomicUsize);
        impl Read for Counted<'_> {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        impl AttachmentSource for Counted<'static> {
            fn close(&mut self) -> io::Result<()> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }

        static CLOSES: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
        let mut attachment = Attachment::new(Counted(&CLOSES), "a.bin", OCTET_STREAM);
        attachment.close().unwrap();
        attachment.close().unwrap();
        assert!(attachment.is_closed());
        assert_eq!(CLOSES.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_by_extension() {
        let d = BuiltinDetector;
        assert_eq!(d.by_extension("photo.JPG").as_deref(), Some("image/jpeg"));
        assert_eq!(
            d.by_extension("dir.v2/notes.txt").as_deref(),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(d.by_extension("archive.tar.gz").as_deref(), Some("application/gzip"));
        assert_eq!(d.by_extension("Makefile"), None);
        assert_eq!(d.by_extension("data.unknown"), None);
    }

    #[test]
    fn test_by_content() {
        let d = BuiltinDetector;
        assert_eq!(d.by_content(b"%PDF-1.7\n..."), "application/pdf");
        assert_eq!(d.by_content(b"\x89PNG\r\n\x1a\n\x00\x00"), "image/png");
        assert_eq!(d.by_content(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(d.by_content(b"\x00\x00\x00\x18ftypmp42"), "video/mp4");
        assert_eq!(d.by_content(b"  \n<html><body>"), "text/html; charset=utf-8");
        assert_eq!(d.by_content(b"<!-- comment -->"), "text/html; charset=utf-8");
        assert_eq!(d.by_content(b"<?xml version=\"1.0\"?>"), "text/xml; charset=utf-8");
        assert_eq!(d.by_content(b"just some words\r\n"), "text/plain; charset=utf-8");
        assert_eq!(d.by_content(b""), "text/plain; charset=utf-8");
        assert_eq!(d.by_content(b"\x01\x02\x03\x04"), OCTET_STREAM);
    }

    #[test]
    fn test_html_tag_needs_terminator() {
        assert_eq!(BuiltinDetector.by_content(b"<Bogus"), "text/plain; charset=utf-8");
        assert_eq!(BuiltinDetector.by_content(b"<b>bold"), "text/html; charset=utf-8");
    }

    #[test]
    fn test_resolve_by_name() {
        let d = BuiltinDetector;
        assert_eq!(
            resolve_by_name(&d, "a.png", Some("image/x-custom")).as_deref(),
            Some("image/x-custom")
        );
        assert_eq!(resolve_by_name(&d, "a.png", Some("")).as_deref(), Some("image/png"));
        assert_eq!(resolve_by_name(&d, "a.bin", None), None);
    }

    #[test]
    fn test_sniff_rewinds() {
        let mut data = b"GIF89a".to_vec();
        data.extend(std::iter::repeat_n(0u8, 2000));
        let mut source = Cursor::new(data.clone());

        assert_eq!(sniff(&BuiltinDetector, &mut source).unwrap(), "image/gif");
        assert_eq!(source.position(), 0);
        let mut all = Vec::new();
        source.read_to_end(&mut all).unwrap();
        assert_eq!(all, data);
    }
}
