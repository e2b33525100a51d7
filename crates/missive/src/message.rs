//! The structured message and its encode/decode entry points.

use crate::assemble;
use crate::attachment::{
    Attachment, AttachmentSource, BuiltinDetector, ContentTypeDetector, OCTET_STREAM,
    resolve_by_name, sniff,
};
use crate::chunked::ChunkedLineWriter;
use crate::config::{Config, DEFAULT_MAX_MESSAGE_SIZE};
use crate::content_type::ContentType;
use crate::encoding::{TransferEncoding, rfc2047};
use crate::error::{Error, Result};
use crate::header::{BCC, CC, CONTENT_TRANSFER_ENCODING, CONTENT_TYPE, FROM, Headers, SUBJECT, TO};
use crate::multipart::{MultipartWriter, Part, collect_leaves};
use crate::reader::read_message;
use chrono::{DateTime, FixedOffset, Local};
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::Path;

/// Initial capacity of [`Message::to_bytes`] buffers.
const TYPICAL_MESSAGE_SIZE: usize = 75 * 1024;

/// An RFC 5322 email.
///
/// Serialized as a `multipart/mixed` document holding an optional
/// `multipart/alternative` text/HTML pair followed by the attachments.
#[derive(Debug, Default)]
pub struct Message {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Carbon copy addresses.
    pub cc: Vec<String>,
    /// Blind carbon copy addresses. Never written as a header.
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain text body; empty means none.
    pub text: Vec<u8>,
    /// HTML body; empty means none.
    pub html: Vec<u8>,
    /// Extra headers, and overrides for the derived ones.
    pub headers: Headers,
    /// Attachments, in the order they are written.
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a message, reading at most [`DEFAULT_MAX_MESSAGE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is too large, the headers are malformed,
    /// or the MIME structure cannot be decoded.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        Self::parse_with_limit(reader, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Decodes a message using the size cap from `config`.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn parse_with<R: Read>(reader: R, config: &Config) -> Result<Self> {
        Self::parse_with_limit(reader, config.max_message_size)
    }

    /// Decodes a message, reading at most `max` bytes.
    ///
    /// Leading whitespace is skipped. `To`, `Cc`, `Bcc`, `Subject` and
    /// `From` move into the matching fields; every other header stays in
    /// [`headers`](Self::headers). The first `text/plain` leaf becomes
    /// [`text`](Self::text) and the first `text/html` leaf becomes
    /// [`html`](Self::html); other leaves are dropped without being
    /// transfer-decoded. A kept body that does not decode is returned as
    /// it appears in the message.
    ///
    /// Header values lose surrounding spaces and tabs, so an ASCII subject
    /// written as `" hi "` reads back as `"hi"`. Values that were written
    /// as RFC 2047 encoded words keep them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeLimitExceeded`] if the input holds more than
    /// `max` bytes, any header or structure error, or [`Error::Parse`] for
    /// multipart nesting deeper than
    /// [`MAX_NESTING_DEPTH`](crate::multipart::MAX_NESTING_DEPTH).
    pub fn parse_with_limit<R: Read>(reader: R, max: u64) -> Result<Self> {
        let data = read_message(reader, max)?;
        let (mut headers, consumed) = Headers::parse(&data)?;
        let leaves = collect_leaves(&headers, &data[consumed..])?;
        tracing::debug!(size = data.len(), leaves = leaves.len(), "decoded message");

        let mut message = Self {
            subject: take_first(&mut headers, SUBJECT),
            from: take_first(&mut headers, FROM),
            to: take_all(&mut headers, TO),
            cc: take_all(&mut headers, CC),
            bcc: take_all(&mut headers, BCC),
            headers,
            ..Self::default()
        };

        let mut text = None;
        let mut html = None;
        for leaf in &leaves {
            if leaf.content_type.is("text", "plain") {
                text.get_or_insert(leaf);
            } else if leaf.content_type.is("text", "html") {
                html.get_or_insert(leaf);
            }
        }
        message.text = text.map(decode_leaf).unwrap_or_default();
        message.html = html.map(decode_leaf).unwrap_or_default();
        Ok(message)
    }

    /// Writes the message to `sink` with default settings.
    ///
    /// Attachment sources are consumed; write a message with attachments
    /// once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRequiredField`] without a sender, or the
    /// first I/O error. Output already written is not rolled back.
    pub fn write_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64> {
        self.write_to_with(sink, &Config::default())
    }

    /// Writes the message to `sink`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// See [`write_to`](Self::write_to).
    pub fn write_to_with<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        config: &Config,
    ) -> Result<u64> {
        let mut counter = CountingWriter::new(sink);
        self.write_at(&mut counter, config, Local::now().fixed_offset())?;
        tracing::debug!(
            bytes = counter.count(),
            attachments = self.attachments.len(),
            "encoded message"
        );
        Ok(counter.count())
    }

    /// Serializes the message into a new buffer with default settings.
    ///
    /// # Errors
    ///
    /// See [`write_to`](Self::write_to).
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.to_bytes_with(&Config::default())
    }

    /// Serializes the message into a new buffer.
    ///
    /// # Errors
    ///
    /// See [`write_to`](Self::write_to).
    pub fn to_bytes_with(&mut self, config: &Config) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(TYPICAL_MESSAGE_SIZE);
        self.write_to_with(&mut buf, config)?;
        Ok(buf)
    }

    pub(crate) fn write_at(
        &mut self,
        sink: &mut dyn Write,
        config: &Config,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let mixed = MultipartWriter::new();
        let headers = assemble::message_headers(self, config, now, mixed.boundary())?;
        headers.write_encoded(sink)?;
        sink.write_all(b"\r\n")?;
        self.write_parts(sink, mixed)
    }

    fn write_parts(&mut self, sink: &mut dyn Write, mut mixed: MultipartWriter) -> Result<()> {
        if !self.text.is_empty() || !self.html.is_empty() {
            let alternative = MultipartWriter::new();
            let mut envelope = Headers::new();
            envelope.add(
                CONTENT_TYPE,
                format!("multipart/alternative;\r\n boundary={}", alternative.boundary()),
            );
            mixed.open_part(sink, &envelope)?;
            write_alternative(sink, alternative, &self.text, &self.html)?;
        }

        if !self.attachments.is_empty() {
            let mut chunks = ChunkedLineWriter::new(&mut *sink);
            for attachment in &mut self.attachments {
                mixed.open_part(chunks.get_mut(), &attachment.headers)?;
                let encoding = TransferEncoding::from_headers(&attachment.headers);
                let mut body = attachment.body_mut();
                let read = encoding.codec().encode(&mut body, &mut chunks)?;
                tracing::trace!(
                    name = %attachment.name,
                    %encoding,
                    bytes = read,
                    "wrote attachment"
                );
            }
            chunks.close()?;
        }

        mixed.close(sink)?;
        Ok(())
    }

    /// Attaches `source`, typed from `content_type` or the file extension.
    ///
    /// Falls back to `application/octet-stream` when neither gives a type.
    /// The body is base64 encoded when the message is written.
    pub fn attach<S>(
        &mut self,
        source: S,
        filename: impl Into<String>,
        content_type: Option<&str>,
    ) -> &mut Attachment
    where
        S: AttachmentSource + Send + 'static,
    {
        let filename = filename.into();
        let content_type = resolve_by_name(&BuiltinDetector, &filename, content_type)
            .unwrap_or_else(|| OCTET_STREAM.to_string());
        self.push(Attachment::new(source, filename, content_type))
    }

    /// Like [`attach`](Self::attach), but sniffs the content when neither
    /// the caller nor the extension gives a type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sniff`] if reading or rewinding the source fails;
    /// the source is closed first.
    pub fn attach_seekable<S>(
        &mut self,
        source: S,
        filename: impl Into<String>,
        content_type: Option<&str>,
    ) -> Result<&mut Attachment>
    where
        S: AttachmentSource + Seek + Send + 'static,
    {
        self.attach_with(&BuiltinDetector, source, filename, content_type)
    }

    /// Like [`attach_seekable`](Self::attach_seekable) with a custom detector.
    ///
    /// # Errors
    ///
    /// See [`attach_seekable`](Self::attach_seekable).
    pub fn attach_with<S>(
        &mut self,
        detector: &dyn ContentTypeDetector,
        mut source: S,
        filename: impl Into<String>,
        content_type: Option<&str>,
    ) -> Result<&mut Attachment>
    where
        S: AttachmentSource + Seek + Send + 'static,
    {
        let filename = filename.into();
        let content_type = match resolve_by_name(detector, &filename, content_type) {
            Some(content_type) => content_type,
            None => match sniff(detector, &mut source) {
                Ok(content_type) => content_type,
                Err(e) => {
                    if let Err(close_err) = source.close() {
                        tracing::warn!(
                            name = %filename,
                            error = %close_err,
                            "closing attachment after failed sniff"
                        );
                    }
                    return Err(Error::Sniff(e));
                }
            },
        };
        tracing::trace!(name = %filename, %content_type, "attachment typed");
        Ok(self.push(Attachment::new(source, filename, content_type)))
    }

    /// Opens and attaches a file, named after the last path component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened, or
    /// [`Error::Sniff`] if typing it fails.
    pub fn attach_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Attachment> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy(), |n| n.to_string_lossy())
            .into_owned();
        self.attach_seekable(file, name, None)
    }

    fn push(&mut self, attachment: Attachment) -> &mut Attachment {
        let idx = self.attachments.len();
        self.attachments.push(attachment);
        &mut self.attachments[idx]
    }

    /// Releases every attachment source that has not been released yet.
    ///
    /// All sources are closed even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first close error.
    pub fn close(&mut self) -> Result<()> {
        let mut first = None;
        for attachment in &mut self.attachments {
            if let Err(e) = attachment.close() {
                tracing::warn!(name = %attachment.name, error = %e, "closing attachment failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), |e| Err(e.into()))
    }
}

fn write_alternative(
    sink: &mut dyn Write,
    mut alternative: MultipartWriter,
    text: &[u8],
    html: &[u8],
) -> Result<()> {
    let encoding = TransferEncoding::QuotedPrintable;
    let parts = [
        (text, ContentType::text_plain()),
        (html, ContentType::text_html()),
    ];
    for (body, content_type) in parts {
        if body.is_empty() {
            continue;
        }
        let mut headers = Headers::new();
        headers.add(CONTENT_TYPE, content_type.to_string());
        headers.add(CONTENT_TRANSFER_ENCODING, encoding.to_string());
        alternative.open_part(sink, &headers)?;
        encoding.codec().encode(&mut &*body, sink)?;
    }
    alternative.close(sink)?;
    Ok(())
}

/// Removes a header and returns its first value, RFC 2047 decoded.
fn take_first(headers: &mut Headers, name: &str) -> String {
    take_all(headers, name).into_iter().next().unwrap_or_default()
}

/// Removes a kept leaf's transfer encoding, falling back to the raw body.
fn decode_leaf(leaf: &Part) -> Vec<u8> {
    leaf.decode().unwrap_or_else(|e| {
        tracing::warn!(
            content_type = %leaf.content_type.essence(),
            encoding = %leaf.encoding,
            error = %e,
            "keeping undecodable body"
        );
        leaf.body.clone()
    })
}

/// Removes a header and returns all of its values, RFC 2047 decoded.
fn take_all(headers: &mut Headers, name: &str) -> Vec<String> {
    headers
        .remove(name)
        .unwrap_or_default()
        .into_iter()
        .map(|value| {
            rfc2047::decode(&value).unwrap_or_else(|e| {
                tracing::warn!(field = name, error = %e, "keeping undecodable header value");
                value
            })
        })
        .collect()
}

/// Counts the bytes that reach the inner writer.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    const fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    const fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
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
    use crate::header::{DATE, MESSAGE_ID};
    use chrono::TimeZone;
    use std::io::Cursor;

    fn fixed_now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
            .unwrap()
    }

    fn render(message: &mut Message) -> String {
        let mut out = Vec::new();
        message.write_at(&mut out, &Config::default(), fixed_now()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_counting_writer() {
        let mut out = Vec::new();
        let mut counter = CountingWriter::new(&mut out);
        counter.write_all(b"hello").unwrap();
        write!(counter, " {}", 42).unwrap();
        assert_eq!(counter.count(), 8);
        assert_eq!(out, b"hello 42");
    }

    #[test]
    fn test_write_to_reports_byte_count() {
        let mut message = Message {
            from: "a@x.com".to_string(),
            text: b"hello".to_vec(),
            ..Message::default()
        };
        let mut out = Vec::new();
        let n = message.write_to(&mut out).unwrap();
        assert_eq!(n, out.len() as u64);
    }

    #[test]
    fn test_text_and_html_layout() {
        let mut message = Message {
            from: "a@x.com".to_string(),
            to: vec!["b@x.com".to_string()],
            subject: "S".to_string(),
            text: b"plain".to_vec(),
            html: b"<p>rich</p>".to_vec(),
            ..Message::default()
        };
        let out = render(&mut message);

        assert!(out.starts_with(concat!(
            "To: b@x.com\r\n",
            "From: a@x.com\r\n",
            "Subject: S\r\n",
            "Date: Mon, 06 May 2024 07:08:09 +0000\r\n",
        )));
        assert!(out.contains("Mime-Version: 1.0\r\nContent-Type: multipart/mixed;\r\n boundary="));
        assert!(out.contains("Content-Type: multipart/alternative;\r\n boundary="));

        let plain = out
            .find(concat!(
                "Content-Type: text/plain; charset=UTF-8\r\n",
                "Content-Transfer-Encoding: quoted-printable\r\n\r\nplain",
            ))
            .unwrap();
        let html = out
            .find(concat!(
                "Content-Type: text/html; charset=UTF-8\r\n",
                "Content-Transfer-Encoding: quoted-printable\r\n\r\n<p>rich</p>",
            ))
            .unwrap();
        assert!(plain < html);
        assert!(out.ends_with("--\r\n"));
    }

    #[test]
    fn test_no_alternative_without_bodies() {
        let mut message = Message {
            from: "a@x.com".to_string(),
            ..Message::default()
        };
        let out = render(&mut message);
        assert!(!out.contains("multipart/alternative"));

        let boundary = out.split("boundary=").nth(1).unwrap().lines().next().unwrap();
        assert!(out.ends_with(&format!("\r\n\r\n--{boundary}--\r\n")));
    }

    #[test]
    fn test_subject_is_q_encoded() {
        let mut message = Message {
            from: "a@x.com".to_string(),
            subject: "Grüße".to_string(),
            ..Message::default()
        };
        let out = render(&mut message);
        assert!(out.contains("Subject: =?UTF-8?q?Gr=C3=BC=C3=9Fe?=\r\n"));

        let decoded = Message::parse(out.as_bytes()).unwrap();
        assert_eq!(decoded.subject, "Grüße");
    }

    #[test]
    fn test_attachments_share_one_chunk_writer() {
        let mut message = Message {
            from: "a@x.com".to_string(),
            ..Message::default()
        };
        message.attach(Cursor::new(vec![7u8; 100]), "a.bin", None);
        message.attach(Cursor::new(vec![9u8; 100]), "b.bin", None);
        let out = render(&mut message);

        for line in out.split("\r\n") {
            assert!(line.len() <= 76, "line too long: {line:?}");
        }
        assert_eq!(out.matches("Content-Transfer-Encoding: base64\r\n").count(), 2);
        assert!(out.contains(concat!(
            "Content-Disposition: attachment;\r\n filename=\"a.bin\"\r\n",
            "Content-Id: <a.bin>\r\n",
        )));
        assert!(out.contains("Content-Type: application/octet-stream\r\n"));
    }

    #[test]
    fn test_attach_resolution() {
        let mut message = Message::new();
        let ct = message
            .attach(Cursor::new(Vec::new()), "x.png", None)
            .content_type()
            .map(str::to_string);
        assert_eq!(ct.as_deref(), Some("image/png"));

        let ct = message
            .attach(Cursor::new(Vec::new()), "x.png", Some("image/x-mine"))
            .content_type()
            .map(str::to_string);
        assert_eq!(ct.as_deref(), Some("image/x-mine"));

        let attachment = message
            .attach_seekable(Cursor::new(b"%PDF-1.4".to_vec()), "noext", None)
            .unwrap();
        assert_eq!(attachment.content_type(), Some("application/pdf"));
        assert_eq!(message.attachments.len(), 3);
    }

    #[test]
    fn test_failed_sniff_closes_source() {
        struct Broken {
            closed: std::sync::Arc<std::sync::atomic::AtomicBool>,
        }
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("unreadable"))
            }
        }
        impl Seek for Broken {
            fn seek(&mut self, _: io::SeekFrom) -> io::Result<u64> {
                Ok(0)
            }
        }
        impl AttachmentSource for Broken {
            fn close(&mut self) -> io::Result<()> {
                self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }

        let closed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut message = Message::new();
        let err = message
            .attach_seekable(Broken { closed: closed.clone() }, "mystery", None)
            .unwrap_err();
        assert!(matches!(err, Error::Sniff(_)));
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn test_parse_keeps_other_headers() {
        let raw = concat!(
            "From: a@x.com\r\n",
            "To: b@x.com\r\n",
            "Message-Id: <1@x>\r\n",
            "Date: Mon, 06 May 2024 07:08:09 +0000\r\n",
            "\r\n",
            "body\r\n",
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.from, "a@x.com");
        assert_eq!(message.to, ["b@x.com"]);
        assert!(!message.headers.contains(FROM));
        assert!(!message.headers.contains(TO));
        assert_eq!(message.headers.get(MESSAGE_ID), Some("<1@x>"));
        assert!(message.headers.contains(DATE));
        assert_eq!(message.text, b"body\r\n");
    }

    #[test]
    fn test_parse_first_leaf_wins() {
        let raw = concat!(
            "From: a@x.com\r\n",
            "Content-Type: multipart/mixed; boundary=b\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "first\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "second\r\n",
            "--b--\r\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.text, b"first");
        assert!(message.html.is_empty());
    }

    #[test]
    fn test_parse_bad_encoded_word_kept_raw() {
        let raw = "From: a@x.com\r\nSubject: =?utf-8?q?bad=ZZ?=\r\n\r\n";
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.subject, "=?utf-8?q?bad=ZZ?=");
    }
}
