//! Integration tests for message encoding and decoding.
//!
//! Messages are written to memory and read back through the public API
//! only.

#![allow(clippy::unwrap_used)]

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use missive::encoding::rfc2047;
use missive::header::{CONTENT_TYPE, Headers, MESSAGE_ID};
use missive::multipart::{MultipartReader, collect_leaves};
use missive::{AttachmentSource, Config, ContentType, Error, Message, NopClose};
use proptest::prelude::*;

fn simple_message() -> Message {
    Message {
        from: "a@x.com".to_string(),
        to: vec!["b@x.com".to_string()],
        subject: "S".to_string(),
        text: b"hi\n".to_vec(),
        ..Message::default()
    }
}

/// Splits rendered output into top-level headers and body.
fn split(raw: &[u8]) -> (Headers, &[u8]) {
    let (headers, consumed) = Headers::parse(raw).unwrap();
    (headers, &raw[consumed..])
}

#[test]
fn test_round_trip_normalizes_text_line_breaks() {
    let raw = simple_message().to_bytes().unwrap();
    let decoded = Message::parse(raw.as_slice()).unwrap();

    assert_eq!(decoded.from, "a@x.com");
    assert_eq!(decoded.to, ["b@x.com"]);
    assert_eq!(decoded.subject, "S");
    assert_eq!(decoded.text, b"hi\r\n");
    assert!(decoded.html.is_empty());
    assert!(decoded.headers.get(MESSAGE_ID).is_some());
}

#[test]
fn test_round_trip_text_and_html() {
    let mut message = Message {
        from: "Jordan Wright <test@example.com>".to_string(),
        to: vec!["Recipient <r@example.com>".to_string()],
        cc: vec!["c@example.com".to_string()],
        subject: "Awesome Subject".to_string(),
        text: b"Text Body is, of course, supported!\r\n".to_vec(),
        html: b"<h1>Fancy HTML is supported, too!</h1>\r\n".to_vec(),
        ..Message::default()
    };
    let raw = message.to_bytes_with(&Config::new("mx.example.org")).unwrap();
    let decoded = Message::parse(raw.as_slice()).unwrap();

    assert_eq!(decoded.from, message.from);
    assert_eq!(decoded.to, message.to);
    assert_eq!(decoded.cc, message.cc);
    assert_eq!(decoded.subject, message.subject);
    assert_eq!(decoded.text, message.text);
    assert_eq!(decoded.html, message.html);
    assert!(decoded.headers.get(MESSAGE_ID).unwrap().ends_with("@mx.example.org>"));
}

#[test]
fn test_missing_sender() {
    let mut message = Message {
        from: String::new(),
        ..simple_message()
    };
    assert!(matches!(
        message.to_bytes(),
        Err(Error::MissingRequiredField("From"))
    ));
}

#[test]
fn test_no_alternative_envelope_without_bodies() {
    let mut message = Message {
        text: Vec::new(),
        ..simple_message()
    };
    message.attach(Cursor::new(b"payload".to_vec()), "data.bin", None);
    let raw = message.to_bytes().unwrap();

    let (headers, body) = split(&raw);
    let envelope = ContentType::parse(headers.get(CONTENT_TYPE).unwrap()).unwrap();
    assert!(envelope.is("multipart", "mixed"));
    assert_eq!(envelope.boundary().unwrap().len(), 60);

    let mut parts = MultipartReader::new(body, envelope.boundary().unwrap());
    let only = parts.next_part().unwrap().unwrap();
    assert_eq!(only.headers.get(CONTENT_TYPE), Some("application/octet-stream"));
    assert!(parts.next_part().unwrap().is_none());
    assert!(!String::from_utf8_lossy(&raw).contains("multipart/alternative"));
}

#[test]
fn test_attachments_decode_to_original_bytes() {
    let first: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let second: Vec<u8> = (0..777u32).map(|i| (i * 7 % 251) as u8).collect();

    let mut message = simple_message();
    message.attach(Cursor::new(first.clone()), "first.bin", None);
    message.attach(
        NopClose(Cursor::new(second.clone())),
        "second.bin",
        Some("application/x-custom"),
    );
    let raw = message.to_bytes().unwrap();

    for line in raw.split(|&b| b == b'\n') {
        assert!(line.len() <= 78, "line too long: {:?}", String::from_utf8_lossy(line));
    }

    let (headers, body) = split(&raw);
    let leaves = collect_leaves(&headers, body).unwrap();
    let types: Vec<String> = leaves.iter().map(|p| p.content_type.essence()).collect();
    assert_eq!(types, ["text/plain", "application/octet-stream", "application/x-custom"]);
    assert_eq!(leaves[1].decode().unwrap(), first);
    assert_eq!(leaves[2].decode().unwrap(), second);
}

#[test]
fn test_attachment_headers_on_the_wire() {
    let mut message = simple_message();
    message.attach(Cursor::new(b"awesome attachment".to_vec()), "rad.txt", None);
    let raw = String::from_utf8(message.to_bytes().unwrap()).unwrap();

    assert!(raw.contains(concat!(
        "Content-Disposition: attachment;\r\n filename=\"rad.txt\"\r\n",
        "Content-Id: <rad.txt>\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "YXdlc29tZSBhdHRhY2htZW50\r\n"
    )));
}

#[test]
fn test_decode_alternative_with_qp_html() {
    let raw = concat!(
        "MIME-Version: 1.0\n",
        "Subject: Test Subject\n",
        "From: John Smith <jsmith@gmail.com>\n",
        "To: John Smith <jsmith@gmail.com>\n",
        "Content-Type: multipart/alternative; boundary=001a114fb3fc42fd6b051f834280\n",
        "\n",
        "--001a114fb3fc42fd6b051f834280\n",
        "Content-Type: text/plain; charset=UTF-8\n",
        "\n",
        "This is a test email with HTML Formatting. It also has very long lines so\n",
        "that the content must be wrapped if using quoted-printable decoding.\n",
        "\n",
        "--001a114fb3fc42fd6b051f834280\n",
        "Content-Type: text/html; charset=UTF-8\n",
        "Content-Transfer-Encoding: quoted-printable\n",
        "\n",
        "<div dir=3D\"ltr\">This is a test email with <b>HTML Formatting.</b>=C2=A0It =\n",
        "also has very long lines so that the content must be wrapped if using quote=\n",
        "d-printable decoding.</div>\n",
        "\n",
        "--001a114fb3fc42fd6b051f834280--"
    );
    let message = Message::parse(raw.as_bytes()).unwrap();

    assert_eq!(message.subject, "Test Subject");
    assert_eq!(message.from, "John Smith <jsmith@gmail.com>");
    assert_eq!(message.to, ["John Smith <jsmith@gmail.com>"]);
    assert_eq!(
        message.text,
        "This is a test email with HTML Formatting. It also has very long lines so\n\
         that the content must be wrapped if using quoted-printable decoding.\n"
            .as_bytes()
    );
    assert_eq!(
        message.html,
        "<div dir=\"ltr\">This is a test email with <b>HTML Formatting.</b>\u{a0}It also has \
         very long lines so that the content must be wrapped if using quoted-printable \
         decoding.</div>\n"
            .as_bytes()
    );
}

#[test]
fn test_decode_single_part_keeps_unclaimed_headers() {
    let raw = concat!(
        "From: \"Foo Bar\" <foobar@example.com>\n",
        "Content-Type: text/plain\n",
        "To: foobar@example.com \n",
        "Subject: Example Subject (no MIME Type)\n",
        "Message-ID: <foobar@example.com>\n",
        "\n",
        "This is a test message!"
    );
    let message = Message::parse(raw.as_bytes()).unwrap();

    assert_eq!(message.subject, "Example Subject (no MIME Type)");
    assert_eq!(message.to, ["foobar@example.com"]);
    assert_eq!(message.text, b"This is a test message!");
    assert_eq!(message.headers.get("message-id"), Some("<foobar@example.com>"));
    assert_eq!(message.headers.get(CONTENT_TYPE), Some("text/plain"));
    assert!(message.headers.get("Subject").is_none());
}

#[test]
fn test_decode_nested_signed_tree() {
    let raw = concat!(
        "From: Mikhail Gusarov <dottedmag@dottedmag.net>\n",
        "To: notmuch@notmuchmail.org\n",
        "Message-ID: <87iqd9rn3l.fsf@vertex.dottedmag>\n",
        "MIME-Version: 1.0\n",
        "Subject: Re: [notmuch] Working with Maildir storage?\n",
        "Content-Type: multipart/mixed; boundary=\"===============1958295626==\"\n",
        "\n",
        "--===============1958295626==\n",
        "Content-Type: multipart/signed; boundary=\"=-=-=\";\n",
        "    micalg=pgp-sha1; protocol=\"application/pgp-signature\"\n",
        "\n",
        "--=-=-=\n",
        "Content-Type: text/html\n",
        "Content-Transfer-Encoding: quoted-printable\n",
        "\n",
        "<p>Twas brillig did g=\n",
        "yre and gimble</p>\n",
        "\n",
        "--=-=-=\n",
        "Content-Type: application/pgp-signature\n",
        "\n",
        "-----BEGIN PGP SIGNATURE-----\n",
        "=/ksP\n",
        "-----END PGP SIGNATURE-----\n",
        "--=-=-=--\n",
        "\n",
        "--===============1958295626==\n",
        "Content-Type: text/plain; charset=\"us-ascii\"\n",
        "Content-Transfer-Encoding: 7bit\n",
        "\n",
        "Testing!\n",
        "--===============1958295626==--\n"
    );
    let message = Message::parse(raw.as_bytes()).unwrap();

    assert_eq!(message.text, b"Testing!");
    assert_eq!(message.html, b"<p>Twas brillig did gyre and gimble</p>\n");
}

#[test]
fn test_first_text_leaf_wins_including_untyped_parts() {
    let raw = concat!(
        "From: a@x.com\r\n",
        "Content-Type: multipart/mixed; boundary=zz\r\n",
        "\r\n",
        "--zz\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "defaults to text/plain =3D first\r\n",
        "--zz\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "second\r\n",
        "--zz--\r\n"
    );
    let message = Message::parse(raw.as_bytes()).unwrap();
    assert_eq!(message.text, b"defaults to text/plain = first");
}

#[test]
fn test_multipart_without_boundary() {
    let raw = "From: a@x.com\r\nContent-Type: multipart/mixed\r\n\r\nbody\r\n";
    assert!(matches!(
        Message::parse(raw.as_bytes()),
        Err(Error::MissingBoundary)
    ));
}

#[test]
fn test_unterminated_multipart() {
    let raw = concat!(
        "From: a@x.com\r\n",
        "Content-Type: multipart/mixed; boundary=b\r\n",
        "\r\n",
        "--b\r\n",
        "\r\n",
        "no close\r\n",
    );
    assert!(matches!(Message::parse(raw.as_bytes()), Err(Error::Parse(_))));
}

#[test]
fn test_deeply_nested_message_is_rejected() {
    let levels = 10_000;
    let mut raw =
        String::from("From: a@x.com\r\nContent-Type: multipart/mixed; boundary=b0\r\n\r\n--b0\r\n");
    for level in 1..levels {
        raw.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=b{level}\r\n\r\n--b{level}\r\n"
        ));
    }
    raw.push_str("\r\nbottom");
    for level in (0..levels).rev() {
        raw.push_str(&format!("\r\n--b{level}--"));
    }
    assert!(raw.len() < 1 << 20);

    assert!(matches!(Message::parse(raw.as_bytes()), Err(Error::Parse(_))));
}

#[test]
fn test_malformed_attachment_beside_text() {
    let raw = concat!(
        "From: a@x.com\r\n",
        "Content-Type: multipart/mixed; boundary=b\r\n",
        "\r\n",
        "--b\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "hello\r\n",
        "--b\r\n",
        "Content-Type: image/png\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "iVBORw\r\n",
        "--b\r\n",
        "Content-Type: application/octet-stream\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "%%% not base64 %%%\r\n",
        "--b--\r\n",
    );
    let message = Message::parse(raw.as_bytes()).unwrap();
    assert_eq!(message.text, b"hello");
    assert!(message.html.is_empty());
}

#[test]
fn test_undecodable_text_body_is_kept_raw() {
    let raw = concat!(
        "From: a@x.com\r\n",
        "Content-Type: text/plain\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "not*base64",
    );
    let message = Message::parse(raw.as_bytes()).unwrap();
    assert_eq!(message.text, b"not*base64");
}

#[test]
fn test_malformed_headers() {
    assert!(matches!(
        Headers::parse(b" continued: first\r\n\r\n"),
        Err(Error::Parse(_))
    ));
    assert!(matches!(
        Message::parse(&b"From: a@x.com\r\nnot a header\r\n\r\n"[..]),
        Err(Error::Parse(_))
    ));
    assert!(matches!(
        Message::parse(&b"From: a@x.com\r\nSubject: no blank line"[..]),
        Err(Error::UnexpectedEof(_))
    ));
}

#[test]
fn test_leading_whitespace_is_skipped() {
    let raw = "\r\n\n \t\u{a0}From: a@x.com\r\nSubject: hi\r\n\r\nbody";
    let message = Message::parse(raw.as_bytes()).unwrap();
    assert_eq!(message.from, "a@x.com");
    assert_eq!(message.subject, "hi");
}

#[test]
fn test_size_limit() {
    let raw = simple_message().to_bytes().unwrap();
    let limit = raw.len() as u64;

    assert!(Message::parse_with_limit(raw.as_slice(), limit).is_ok());
    assert!(matches!(
        Message::parse_with_limit(raw.as_slice(), limit - 1),
        Err(Error::SizeLimitExceeded { limit: l }) if l == limit - 1
    ));

    let config = Config::builder().max_message_size(16).build();
    assert!(matches!(
        Message::parse_with(raw.as_slice(), &config),
        Err(Error::SizeLimitExceeded { limit: 16 })
    ));
}

#[test]
fn test_message_id_stable_for_same_content() {
    let config = Config::new("example.com");
    let a = simple_message().to_bytes_with(&config).unwrap();
    let b = simple_message().to_bytes_with(&config).unwrap();
    let id = |raw: &[u8]| split(raw).0.get(MESSAGE_ID).unwrap().to_string();

    // Only fails if the two writes straddle a five minute boundary.
    let (first, second) = (id(&a), id(&b));
    if first != second {
        let third = id(&simple_message().to_bytes_with(&config).unwrap());
        assert_eq!(second, third);
    }
}

#[test]
fn test_close_releases_each_source_once() {
    struct Tracked {
        data: Cursor<Vec<u8>>,
        closes: Arc<AtomicUsize>,
        fail: bool,
    }
    impl Read for Tracked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.data.read(buf)
        }
    }
    impl AttachmentSource for Tracked {
        fn close(&mut self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(io::Error::other("close failed"))
            } else {
                Ok(())
            }
        }
    }

    let closes = Arc::new(AtomicUsize::new(0));
    let mut message = simple_message();
    for (name, fail) in [("a.bin", false), ("b.bin", true), ("c.bin", false)] {
        message.attach(
            Tracked {
                data: Cursor::new(vec![1, 2, 3]),
                closes: Arc::clone(&closes),
                fail,
            },
            name,
            None,
        );
    }

    let err = message.close().unwrap_err();
    assert!(err.is_io());
    assert_eq!(closes.load(Ordering::SeqCst), 3);

    message.close().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 3);
    assert!(message.attachments.iter().all(missive::Attachment::is_closed));
}

/// Accepts `budget` bytes, then fails every write.
struct FailingSink {
    budget: usize,
    written: Vec<u8>,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.budget == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        let n = buf.len().min(self.budget);
        self.budget -= n;
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn message_with_attachment() -> Message {
    let mut message = simple_message();
    message.html = b"<p>hi</p>".to_vec();
    message.attach(Cursor::new(vec![7u8; 3000]), "blob.bin", None);
    message
}

#[test]
fn test_failing_sink_aborts_write() {
    let full = message_with_attachment().to_bytes().unwrap().len();

    for budget in [0, 10, full / 2, full - 3] {
        let mut message = message_with_attachment();
        let mut sink = FailingSink {
            budget,
            written: Vec::new(),
        };
        let err = message.write_to(&mut sink).unwrap_err();
        assert!(
            matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe),
            "budget {budget}: {err}"
        );
        assert_eq!(sink.written.len(), budget);
    }
}

#[test]
fn test_attachment_read_error_aborts_write() {
    struct Flaky {
        served: bool,
    }
    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "source dropped"));
            }
            self.served = true;
            let n = buf.len().min(100);
            buf[..n].fill(b'x');
            Ok(n)
        }
    }
    impl AttachmentSource for Flaky {
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut message = simple_message();
    message.attach(Flaky { served: false }, "flaky.bin", None);
    let mut out = Vec::new();
    let err = message.write_to(&mut out).unwrap_err();

    assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::ConnectionReset), "{err}");
    assert!(String::from_utf8_lossy(&out).contains("filename=\"flaky.bin\""));
}

#[test]
fn test_subject_surrounding_whitespace() {
    let mut message = simple_message();
    message.subject = "  padded\t ".to_string();
    let raw = message.to_bytes().unwrap();
    assert_eq!(Message::parse(raw.as_slice()).unwrap().subject, "padded");

    message.subject = " caf\u{e9} ".to_string();
    let raw = message.to_bytes().unwrap();
    assert_eq!(Message::parse(raw.as_slice()).unwrap().subject, " caf\u{e9} ");
}

proptest! {
    #[test]
    fn prop_round_trip_fields(
        from in "[a-z]{1,12}@[a-z]{1,8}\\.com",
        to in prop::collection::vec("[a-z]{1,12}@[a-z]{1,8}\\.org", 1..4),
        subject in "\\PC{0,60}",
        text in "[\\PC\\n]{1,300}",
        html in "[\\PC\\n]{0,300}",
    ) {
        let mut message = Message {
            from: from.clone(),
            to: to.clone(),
            subject: subject.clone(),
            text: text.clone().into_bytes(),
            html: html.clone().into_bytes(),
            ..Message::default()
        };
        let raw = message.to_bytes().unwrap();
        let decoded = Message::parse(raw.as_slice()).unwrap();

        prop_assert_eq!(decoded.from, from);
        prop_assert_eq!(decoded.to, vec![to.join(", ")]);
        // Unencoded values lose surrounding blanks; encoded words keep them.
        let expected_subject = if rfc2047::needs_encoding(&subject) {
            subject.clone()
        } else {
            subject.trim_matches([' ', '\t']).to_string()
        };
        prop_assert_eq!(decoded.subject, expected_subject);
        let crlf = |s: &str| s.replace("\r\n", "\n").replace('\n', "\r\n").into_bytes();
        prop_assert_eq!(decoded.text, crlf(&text));
        prop_assert_eq!(decoded.html, crlf(&html));
    }
}
