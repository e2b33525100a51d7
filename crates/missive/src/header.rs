//! Ordered, case-insensitive header sets.

use crate::encoding::rfc2047;
use crate::error::{Error, Result};
use std::fmt;
use std::io::{self, Write};

/// `Content-Type` field name.
pub const CONTENT_TYPE: &str = "Content-Type";
/// `Content-Disposition` field name.
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
/// `Content-Id` field name.
pub const CONTENT_ID: &str = "Content-Id";
/// `Content-Transfer-Encoding` field name.
pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
/// `To` field name.
pub const TO: &str = "To";
/// `Cc` field name.
pub const CC: &str = "Cc";
/// `Bcc` field name.
pub const BCC: &str = "Bcc";
/// `From` field name.
pub const FROM: &str = "From";
/// `Subject` field name.
pub const SUBJECT: &str = "Subject";
/// `Date` field name.
pub const DATE: &str = "Date";
/// `Message-Id` field name.
pub const MESSAGE_ID: &str = "Message-Id";
/// `Mime-Version` field name.
pub const MIME_VERSION: &str = "Mime-Version";

const CRLF: &[u8] = b"\r\n";

/// Returns the canonical form of a field name.
///
/// The first letter and every letter following a hyphen are upper-cased,
/// the rest lower-cased, so `content-TYPE` becomes `Content-Type`. Names
/// containing characters outside the field-name range are returned as-is.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    if !name.bytes().all(is_field_name_byte) {
        return name.to_string();
    }

    let mut upper = true;
    name.chars()
        .map(|c| {
            let mapped = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            mapped
        })
        .collect()
}

const fn is_field_name_byte(b: u8) -> bool {
    b >= 33 && b <= 126 && b != b':'
}

/// Collection of header fields.
///
/// Field names are stored in canonical form and compared case-insensitively.
/// Iteration follows insertion order, and every value of a repeated field is
/// kept in the order it was added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(field, _)| field.eq_ignore_ascii_case(name))
    }

    /// Adds a header value after any existing values for the field.
    pub fn add(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let value = value.into();
        match self.position(name) {
            Some(idx) => self.fields[idx].1.push(value),
            None => self.fields.push((canonical_name(name), vec![value])),
        }
    }

    /// Sets a header value, replacing any existing values.
    ///
    /// A field that already exists keeps its position.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.set_all(name, vec![value.into()]);
    }

    /// Replaces all values of a field.
    pub fn set_all(&mut self, name: impl AsRef<str>, values: Vec<String>) {
        let name = name.as_ref();
        match self.position(name) {
            Some(idx) => self.fields[idx].1 = values,
            None => self.fields.push((canonical_name(name), values)),
        }
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|idx| self.fields[idx].1.first().map(String::as_str))
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(name)
            .map_or(&[], |idx| self.fields[idx].1.as_slice())
    }

    /// Returns true if the field is present, even with no values.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes a field, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name)
            .map(|idx| self.fields.remove(idx).1)
    }

    /// Number of distinct fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over fields with all of their values, in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Returns an iterator over every `(name, value)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Parses a header block terminated by a blank line.
    ///
    /// Lines may end in CRLF or a bare LF. Continuation lines (starting with
    /// a space or tab) are joined to the previous value with a single space.
    /// Returns the headers and the number of bytes consumed, including the
    /// blank line.
    ///
    /// # Errors
    ///
    /// Returns an error for a continuation line before any field, a line
    /// without a colon, an invalid field name, or input ending before the
    /// blank line.
    pub fn parse(input: &[u8]) -> Result<(Self, usize)> {
        let mut headers = Self::new();
        let mut pending: Option<(String, String)> = None;
        let mut pos = 0;

        loop {
            let Some(rel) = input[pos..].iter().position(|&b| b == b'\n') else {
                return Err(Error::UnexpectedEof(
                    "header block is not terminated by a blank line",
                ));
            };
            let end = pos + rel + 1;
            let line = trim_line_ending(&input[pos..end]);
            pos = end;

            if line.is_empty() {
                if let Some((name, value)) = pending.take() {
                    headers.add(name, value);
                }
                return Ok((headers, pos));
            }

            if matches!(line[0], b' ' | b'\t') {
                let Some((_, value)) = pending.as_mut() else {
                    return Err(Error::parse(format!(
                        "malformed header initial line: {:?}",
                        String::from_utf8_lossy(line)
                    )));
                };
                let text = String::from_utf8_lossy(line);
                let text = text.trim_matches([' ', '\t']);
                if !text.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(text);
                }
                continue;
            }

            if let Some((name, value)) = pending.take() {
                headers.add(name, value);
            }

            let Some(colon) = line.iter().position(|&b| b == b':') else {
                return Err(Error::parse(format!(
                    "malformed header line: {:?}",
                    String::from_utf8_lossy(line)
                )));
            };
            let name = &line[..colon];
            if name.is_empty() || !name.iter().copied().all(is_field_name_byte) {
                return Err(Error::parse(format!(
                    "invalid header field name: {:?}",
                    String::from_utf8_lossy(name)
                )));
            }

            let value = String::from_utf8_lossy(&line[colon + 1..]);
            pending = Some((
                String::from_utf8_lossy(name).into_owned(),
                value.trim_matches([' ', '\t']).to_string(),
            ));
        }
    }

    /// Writes every field verbatim as `Name: value\r\n`, followed by nothing.
    ///
    /// # Errors
    ///
    /// Returns any error from the sink.
    pub fn write_raw<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        for (name, value) in self.iter() {
            write!(sink, "{name}: {value}")?;
            sink.write_all(CRLF)?;
        }
        Ok(())
    }

    /// Writes every field, RFC 2047 encoding values that need it.
    ///
    /// `Content-Type` and `Content-Disposition` carry structured parameters
    /// and are written verbatim.
    ///
    /// # Errors
    ///
    /// Returns any error from the sink.
    pub fn write_encoded<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        for (name, value) in self.iter() {
            if name == CONTENT_TYPE || name == CONTENT_DISPOSITION {
                write!(sink, "{name}: {value}")?;
            } else {
                write!(sink, "{name}: {}", rfc2047::encode_q(value))?;
            }
            sink.write_all(CRLF)?;
        }
        Ok(())
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
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

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("content-type"), "Content-Type");
        assert_eq!(canonical_name("MESSAGE-ID"), "Message-Id");
        assert_eq!(canonical_name("mime-version"), "Mime-Version");
        assert_eq!(canonical_name("x-a b"), "x-a b");
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("content-type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.fields().next().unwrap().0, "Content-Type");
    }

    #[test]
    fn test_headers_set_keeps_position() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("To", "bob@example.com");
        headers.add("Subject", "Hi");
        assert_eq!(headers.get_all("to").len(), 2);

        headers.set("TO", "charlie@example.com");
        assert_eq!(headers.get_all("To"), ["charlie@example.com"]);
        let names: Vec<_> = headers.fields().map(|(n, _)| n).collect();
        assert_eq!(names, ["To", "Subject"]);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        assert_eq!(headers.remove("subject"), Some(vec!["Test".to_string()]));
        assert!(headers.get("Subject").is_none());
        assert!(headers.remove("Subject").is_none());
    }

    #[test]
    fn test_headers_insertion_order() {
        let headers: Headers = [("Zeta", "1"), ("Alpha", "2"), ("zeta", "3")]
            .into_iter()
            .collect();
        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, [("Zeta", "1"), ("Zeta", "3"), ("Alpha", "2")]);
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com \r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            "    charset=utf-8\r\n",
            "\r\n",
            "body"
        );

        let (headers, consumed) = Headers::parse(text.as_bytes()).unwrap();
        assert_eq!(&text[consumed..], "body");
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
    }

    #[test]
    fn test_headers_parse_bare_lf() {
        let text = "Subject: a\nX-Thing: b\n\nrest";
        let (headers, consumed) = Headers::parse(text.as_bytes()).unwrap();
        assert_eq!(consumed, text.len() - 4);
        assert_eq!(headers.get("x-thing"), Some("b"));
    }

    #[test]
    fn test_headers_parse_empty_block() {
        let (headers, consumed) = Headers::parse(b"\r\nbody").unwrap();
        assert!(headers.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_headers_parse_errors() {
        assert!(matches!(
            Headers::parse(b" folded: first\r\n\r\n"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            Headers::parse(b"no colon here\r\n\r\n"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            Headers::parse(b"Bad Name: x\r\n\r\n"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            Headers::parse(b"Subject: unterminated\r\n"),
            Err(Error::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_write_encoded() {
        let mut headers = Headers::new();
        headers.add("Subject", "Grüße");
        headers.add("Content-Type", "text/plain; charset=\"ü\"");
        headers.add("To", "plain@example.com");

        let mut out = Vec::new();
        headers.write_encoded(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            concat!(
                "Subject: =?UTF-8?q?Gr=C3=BC=C3=9Fe?=\r\n",
                "Content-Type: text/plain; charset=\"ü\"\r\n",
                "To: plain@example.com\r\n",
            )
        );
    }

    #[test]
    fn test_headers_display() {
        let mut headers = Headers::new();
        headers.add("from", "sender@example.com");
        headers.add("to", "recipient@example.com");

        let s = headers.to_string();
        assert_eq!(s, "From: sender@example.com\r\nTo: recipient@example.com\r\n");
    }
}
