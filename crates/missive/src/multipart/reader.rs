//! RFC 2046 multipart body splitting and the leaf walk.

use crate::content_type::ContentType;
use crate::encoding::TransferEncoding;
use crate::error::{Error, Result};
use crate::header::{CONTENT_TYPE, Headers};
use memchr::memmem;

/// Deepest multipart nesting [`collect_leaves`] accepts.
pub const MAX_NESTING_DEPTH: usize = 100;

/// A leaf part of a MIME tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// The part's content type.
    pub content_type: ContentType,
    /// The part's content-transfer-encoding.
    pub encoding: TransferEncoding,
    /// Body as it appears in the message, still transfer-encoded.
    pub body: Vec<u8>,
}

impl Part {
    /// Returns the body with its content-transfer-encoding removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for its encoding.
    pub fn decode(&self) -> Result<Vec<u8>> {
        self.encoding.codec().decode(&self.body)
    }
}

/// One sub-part of a multipart body, still undecoded.
#[derive(Debug)]
pub struct RawPart<'a> {
    /// The sub-part's own headers.
    pub headers: Headers,
    /// The sub-part's body, without the line break before the next delimiter.
    pub body: &'a [u8],
}

/// Iterates over the parts of one multipart body.
///
/// The preamble before the first delimiter and the epilogue after the close
/// delimiter are skipped. The line ending used by the first delimiter line
/// (CRLF or bare LF) is expected throughout.
#[derive(Debug)]
pub struct MultipartReader<'a> {
    data: &'a [u8],
    pos: usize,
    dash_boundary: Vec<u8>,
    newline: &'static [u8],
    started: bool,
    finished: bool,
}

impl<'a> MultipartReader<'a> {
    /// Creates a reader over `data` split on `boundary`.
    #[must_use]
    pub fn new(data: &'a [u8], boundary: &str) -> Self {
        let mut dash_boundary = Vec::with_capacity(boundary.len() + 2);
        dash_boundary.extend_from_slice(b"--");
        dash_boundary.extend_from_slice(boundary.as_bytes());
        Self {
            data,
            pos: 0,
            dash_boundary,
            newline: b"\r\n",
            started: false,
            finished: false,
        }
    }

    /// Returns the next part, or `None` after the close delimiter.
    ///
    /// # Errors
    ///
    /// Returns an error if no delimiter is found, a part's headers are
    /// malformed, or the body ends before the close delimiter.
    pub fn next_part(&mut self) -> Result<Option<RawPart<'a>>> {
        if self.finished {
            return Ok(None);
        }
        if !self.started && !self.skip_preamble()? {
            return Ok(None);
        }

        let (headers, consumed) = Headers::parse(&self.data[self.pos..])?;
        let body_start = self.pos + consumed;
        let (body_end, line_start) = self.find_delimiter(body_start).ok_or_else(|| {
            Error::parse(format!(
                "multipart body ended before the close delimiter {:?}",
                String::from_utf8_lossy(&self.dash_boundary)
            ))
        })?;

        let after_boundary = &self.data[line_start + self.dash_boundary.len()..];
        if after_boundary.starts_with(b"--") {
            self.finished = true;
        }
        self.pos = line_end(self.data, line_start);

        Ok(Some(RawPart {
            headers,
            body: &self.data[body_start..body_end],
        }))
    }

    /// Advances past the first delimiter line. Returns false if the first
    /// delimiter found is the close delimiter.
    fn skip_preamble(&mut self) -> Result<bool> {
        while self.pos < self.data.len() {
            let end = line_end(self.data, self.pos);
            let line = &self.data[self.pos..end];
            self.pos = end;

            if self.is_close_delimiter(line) {
                self.finished = true;
                return Ok(false);
            }
            if self.is_delimiter_line(line) {
                self.newline = if line.ends_with(b"\r\n") || !line.ends_with(b"\n") {
                    b"\r\n"
                } else {
                    b"\n"
                };
                self.started = true;
                return Ok(true);
            }
        }
        Err(Error::parse(format!(
            "no multipart delimiter {:?} found",
            String::from_utf8_lossy(&self.dash_boundary)
        )))
    }

    /// Finds the delimiter ending a body that starts at `from`.
    ///
    /// Returns the body end and the start of the delimiter line.
    fn find_delimiter(&self, from: usize) -> Option<(usize, usize)> {
        let rest = &self.data[from..];

        // An empty body directly followed by the delimiter line.
        if rest.starts_with(&self.dash_boundary)
            && self.ends_delimiter(from + self.dash_boundary.len())
        {
            return Some((from, from));
        }

        let mut needle = self.newline.to_vec();
        needle.extend_from_slice(&self.dash_boundary);

        memmem::find_iter(rest, &needle)
            .map(|rel| from + rel)
            .find(|&at| self.ends_delimiter(at + needle.len()))
            .map(|at| (at, at + self.newline.len()))
    }

    /// True if what follows `--boundary` at `pos` completes a delimiter:
    /// `--`, or optional linear whitespace and a line break or end of input.
    fn ends_delimiter(&self, pos: usize) -> bool {
        let rest = &self.data[pos..];
        if rest.starts_with(b"--") {
            return true;
        }
        let trimmed = trim_lwsp_start(rest);
        trimmed.is_empty() || trimmed.starts_with(b"\n") || trimmed.starts_with(b"\r\n")
    }

    fn is_delimiter_line(&self, line: &[u8]) -> bool {
        line.strip_prefix(self.dash_boundary.as_slice())
            .is_some_and(|rest| trim_lwsp_start(rest).iter().all(|b| matches!(b, b'\r' | b'\n')))
    }

    fn is_close_delimiter(&self, line: &[u8]) -> bool {
        line.strip_prefix(self.dash_boundary.as_slice())
            .and_then(|rest| rest.strip_prefix(b"--"))
            .is_some_and(|rest| trim_lwsp_start(rest).iter().all(|b| matches!(b, b'\r' | b'\n')))
    }
}

fn line_end(data: &[u8], from: usize) -> usize {
    memchr::memchr(b'\n', &data[from..]).map_or(data.len(), |rel| from + rel + 1)
}

fn trim_lwsp_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t'))
        .unwrap_or(bytes.len());
    &bytes[start..]
}

/// Resolves the effective content type of an entity.
///
/// # Errors
///
/// Returns [`Error::InvalidContentType`] if the header cannot be parsed.
pub fn content_type_of(headers: &Headers) -> Result<ContentType> {
    headers
        .get(CONTENT_TYPE)
        .map_or_else(|| Ok(ContentType::default_text()), ContentType::parse)
}

/// Walks a MIME entity and returns its leaves in document order.
///
/// Multipart entities are split on their boundary and every sub-part is
/// walked the same way, up to [`MAX_NESTING_DEPTH`] levels. Leaf bodies are
/// returned undecoded; see [`Part::decode`].
///
/// # Errors
///
/// Returns [`Error::MissingBoundary`] for a multipart entity without a
/// boundary, [`Error::Parse`] for nesting deeper than
/// [`MAX_NESTING_DEPTH`], or any header, content type or structure error
/// met along the way.
pub fn collect_leaves(headers: &Headers, body: &[u8]) -> Result<Vec<Part>> {
    let mut leaves = Vec::new();
    let mut open: Vec<MultipartReader<'_>> = Vec::new();
    if let Some(reader) = visit(headers, body, 0, &mut leaves)? {
        open.push(reader);
    }

    while let Some(reader) = open.last_mut() {
        match reader.next_part()? {
            Some(part) => {
                let depth = open.len();
                if let Some(nested) = visit(&part.headers, part.body, depth, &mut leaves)? {
                    open.push(nested);
                }
            }
            None => {
                open.pop();
            }
        }
    }
    Ok(leaves)
}

/// Records a leaf, or returns a reader over a multipart entity's parts.
fn visit<'a>(
    headers: &Headers,
    body: &'a [u8],
    depth: usize,
    leaves: &mut Vec<Part>,
) -> Result<Option<MultipartReader<'a>>> {
    let content_type = content_type_of(headers)?;

    if !content_type.is_multipart() {
        let encoding = TransferEncoding::from_headers(headers);
        tracing::trace!(
            depth,
            content_type = %content_type.essence(),
            %encoding,
            len = body.len(),
            "leaf part"
        );
        leaves.push(Part {
            content_type,
            encoding,
            body: body.to_vec(),
        });
        return Ok(None);
    }

    if depth >= MAX_NESTING_DEPTH {
        return Err(Error::parse(format!(
            "multipart nesting exceeds {MAX_NESTING_DEPTH} levels"
        )));
    }
    let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
    tracing::trace!(depth, content_type = %content_type.essence(), boundary, "multipart entity");
    Ok(Some(MultipartReader::new(body, boundary)))
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

    fn multipart_headers(value: &str) -> Headers {
        let mut headers = Headers::new();
        headers.add(CONTENT_TYPE, value);
        headers
    }

    #[test]
    fn test_split_crlf_parts() {
        let body = concat!(
            "preamble\r\n",
            "--xyz\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "first\r\n",
            "--xyz\r\n",
            "\r\n",
            "second\r\n\r\n",
            "--xyz--\r\n",
            "epilogue"
        );
        let mut reader = MultipartReader::new(body.as_bytes(), "xyz");

        let first = reader.next_part().unwrap().unwrap();
        assert_eq!(first.headers.get("content-type"), Some("text/plain"));
        assert_eq!(first.body, b"first");

        let second = reader.next_part().unwrap().unwrap();
        assert!(second.headers.is_empty());
        assert_eq!(second.body, b"second\r\n");

        assert!(reader.next_part().unwrap().is_none());
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_split_bare_lf_parts() {
        let body = "--b\nContent-Type: text/html\n\n<p>x</p>\n--b--\n";
        let mut reader = MultipartReader::new(body.as_bytes(), "b");
        let part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.body, b"<p>x</p>");
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_boundary_prefix_inside_body_is_not_a_delimiter() {
        let body = "--b\r\n\r\nline\r\n--bogus\r\nmore\r\n--b--\r\n";
        let mut reader = MultipartReader::new(body.as_bytes(), "b");
        let part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.body, b"line\r\n--bogus\r\nmore");
    }

    #[test]
    fn test_close_delimiter_only() {
        let mut reader = MultipartReader::new(b"--b--\r\n", "b");
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_close_delimiter_at_end_of_input() {
        let body = "--b\r\n\r\ndata\r\n--b--";
        let mut reader = MultipartReader::new(body.as_bytes(), "b");
        assert_eq!(reader.next_part().unwrap().unwrap().body, b"data");
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_unterminated_multipart() {
        let body = "--b\r\n\r\ndata that never ends";
        let mut reader = MultipartReader::new(body.as_bytes(), "b");
        assert!(matches!(reader.next_part(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_no_delimiter_at_all() {
        let mut reader = MultipartReader::new(b"just text\r\n", "b");
        assert!(matches!(reader.next_part(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_leaf_defaults_to_us_ascii_text() {
        let leaves = collect_leaves(&Headers::new(), b"hello").unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].content_type.to_string(), "text/plain; charset=us-ascii");
        assert_eq!(leaves[0].decode().unwrap(), b"hello");
    }

    #[test]
    fn test_missing_boundary() {
        let headers = multipart_headers("multipart/mixed");
        assert!(matches!(
            collect_leaves(&headers, b"--x\r\n\r\n--x--\r\n"),
            Err(Error::MissingBoundary)
        ));
    }

    #[test]
    fn test_nested_missing_boundary() {
        let headers = multipart_headers("multipart/mixed; boundary=outer");
        let body = concat!(
            "--outer\r\n",
            "Content-Type: multipart/signed\r\n",
            "\r\n",
            "whatever\r\n",
            "--outer--\r\n",
        );
        assert!(matches!(
            collect_leaves(&headers, body.as_bytes()),
            Err(Error::MissingBoundary)
        ));
    }

    #[test]
    fn test_invalid_content_type() {
        let headers = multipart_headers("not a type");
        assert!(matches!(
            collect_leaves(&headers, b""),
            Err(Error::InvalidContentType(_))
        ));
    }

    #[test]
    fn test_nested_tree_is_flattened_in_order() {
        let headers = multipart_headers("multipart/mixed; boundary=\"===outer==\"");
        let body = concat!(
            "--===outer==\n",
            "Content-Type: multipart/signed; boundary=\"=-=-=\";\n",
            "    micalg=pgp-sha1; protocol=\"application/pgp-signature\"\n",
            "\n",
            "--=-=-=\n",
            "Content-Transfer-Encoding: quoted-printable\n",
            "\n",
            "Twas brillig did g=\n",
            "yre and gimble:\n",
            "\n",
            "--=-=-=\n",
            "Content-Type: application/pgp-signature\n",
            "\n",
            "-----BEGIN PGP SIGNATURE-----\n",
            "-----END PGP SIGNATURE-----\n",
            "--=-=-=--\n",
            "\n",
            "--===outer==\n",
            "Content-Type: image/png\n",
            "Content-Transfer-Encoding: base64\n",
            "\n",
            "iVBORw==\n",
            "--===outer==--\n",
        );

        let leaves = collect_leaves(&headers, body.as_bytes()).unwrap();
        let types: Vec<_> = leaves.iter().map(|p| p.content_type.essence()).collect();
        assert_eq!(types, ["text/plain", "application/pgp-signature", "image/png"]);
        assert_eq!(leaves[0].encoding, TransferEncoding::QuotedPrintable);
        assert_eq!(leaves[0].body, b"Twas brillig did g=\nyre and gimble:\n");
        assert_eq!(leaves[0].decode().unwrap(), b"Twas brillig did gyre and gimble:\n");
        assert_eq!(
            leaves[1].decode().unwrap(),
            b"-----BEGIN PGP SIGNATURE-----\n-----END PGP SIGNATURE-----"
        );
        assert_eq!(leaves[2].decode().unwrap(), [0x89, b'P', b'N', b'G']);
    }

    /// Wraps a text leaf in `levels` multipart entities, each with its own boundary.
    fn nested(levels: usize) -> (Headers, String) {
        let mut open = String::new();
        let mut close = Vec::new();
        for level in 1..levels {
            open.push_str(&format!(
                "Content-Type: multipart/mixed; boundary=b{level}\r\n\r\n--b{level}\r\n"
            ));
            close.push(format!("\r\n--b{level}--"));
        }
        close.reverse();
        let body = format!(
            "--b0\r\n{open}Content-Type: text/plain\r\n\r\ncore{}\r\n--b0--\r\n",
            close.concat()
        );
        (multipart_headers("multipart/mixed; boundary=b0"), body)
    }

    #[test]
    fn test_nesting_up_to_the_limit() {
        let (headers, body) = nested(MAX_NESTING_DEPTH);
        let leaves = collect_leaves(&headers, body.as_bytes()).unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].body, b"core");
    }

    #[test]
    fn test_nesting_past_the_limit() {
        let (headers, body) = nested(MAX_NESTING_DEPTH + 1);
        assert!(matches!(
            collect_leaves(&headers, body.as_bytes()),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_deep_nesting_does_not_exhaust_the_stack() {
        let (headers, body) = nested(20_000);
        assert!(matches!(
            collect_leaves(&headers, body.as_bytes()),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_malformed_leaf_is_not_decoded_eagerly() {
        let headers = multipart_headers("multipart/mixed; boundary=b");
        let body = concat!(
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "hello\r\n",
            "--b\r\n",
            "Content-Type: image/png\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "not*base64\r\n",
            "--b--\r\n",
        );
        let leaves = collect_leaves(&headers, body.as_bytes()).unwrap();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].decode().unwrap(), b"hello");
        assert!(leaves[1].decode().is_err());
    }
}
