//! RFC 2047 encoded words for header values.
//!
//! Format: `=?charset?encoding?encoded-text?=`

use super::base64;
use crate::error::{Error, Result};

/// Longest encoded word allowed by RFC 2047.
const MAX_ENCODED_WORD_LENGTH: usize = 75;

const PREFIX: &str = "=?UTF-8?q?";
const SUFFIX: &str = "?=";

const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Returns true if a header value has to be encoded before it is written.
#[must_use]
pub fn needs_encoding(value: &str) -> bool {
    value
        .bytes()
        .any(|b| (b < b' ' || b > b'~') && b != b'\t')
}

/// Encodes a header value as UTF-8 Q-encoded words when needed.
///
/// Values made only of printable ASCII and tabs are returned unchanged.
/// Otherwise the value is split into encoded words of at most 75
/// characters, never splitting a character, joined by single spaces.
#[must_use]
pub fn encode_q(value: &str) -> String {
    if !needs_encoding(value) {
        return value.to_string();
    }

    let budget = MAX_ENCODED_WORD_LENGTH - PREFIX.len() - SUFFIX.len();
    let mut out = String::with_capacity(value.len() * 3);
    let mut word = String::new();

    for ch in value.chars() {
        let mut utf8 = [0; 4];
        let encoded = q_encode_char(ch.encode_utf8(&mut utf8));
        if !word.is_empty() && word.len() + encoded.len() > budget {
            push_word(&mut out, &word);
            word.clear();
        }
        word.push_str(&encoded);
    }
    push_word(&mut out, &word);
    out
}

fn push_word(out: &mut String, word: &str) {
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(PREFIX);
    out.push_str(word);
    out.push_str(SUFFIX);
}

fn q_encode_char(ch: &str) -> String {
    let mut encoded = String::with_capacity(ch.len() * 3);
    for b in ch.bytes() {
        match b {
            b' ' => encoded.push('_'),
            b'!'..=b'~' if b != b'=' && b != b'?' && b != b'_' => encoded.push(char::from(b)),
            _ => {
                encoded.push('=');
                encoded.push(char::from(UPPER_HEX[usize::from(b >> 4)]));
                encoded.push(char::from(UPPER_HEX[usize::from(b & 0x0f)]));
            }
        }
    }
    encoded
}

/// Decodes every encoded word in a header value.
///
/// Whitespace between two adjacent encoded words is dropped. Words in
/// charsets other than UTF-8 and US-ASCII are left as they are.
///
/// # Errors
///
/// Returns an error if an encoded word is malformed or does not decode to
/// valid UTF-8.
pub fn decode(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut pending_space = "";
    let mut last_was_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        let Some((word, after)) = split_word(candidate) else {
            out.push_str(pending_space);
            out.push_str(&rest[..start + 2]);
            pending_space = "";
            rest = &rest[start + 2..];
            last_was_word = false;
            continue;
        };

        let decoded = decode_word(word)?;
        if !(last_was_word && decoded.is_some() && before.trim().is_empty()) {
            out.push_str(pending_space);
            out.push_str(before);
        }

        match decoded {
            Some(text) => {
                out.push_str(&text);
                last_was_word = true;
            }
            None => {
                out.push_str(word);
                last_was_word = false;
            }
        }
        pending_space = "";
        rest = after;

        let trimmed = rest.trim_start();
        if last_was_word && trimmed.starts_with("=?") {
            pending_space = &rest[..rest.len() - trimmed.len()];
            rest = trimmed;
        }
    }

    out.push_str(pending_space);
    out.push_str(rest);
    Ok(out)
}

/// Splits `=?charset?enc?text?=` off the front of `s`.
fn split_word(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix("=?")?;
    let charset_end = inner.find('?')?;
    let after_charset = &inner[charset_end + 1..];
    let enc_end = after_charset.find('?')?;
    if enc_end != 1 {
        return None;
    }
    let text = &after_charset[2..];
    let text_end = text.find("?=")?;
    let total = 2 + charset_end + 1 + 2 + text_end + 2;
    Some(s.split_at(total))
}

/// Decodes one encoded word, or `None` if its charset is not supported.
fn decode_word(word: &str) -> Result<Option<String>> {
    let inner = &word[2..word.len() - 2];
    let mut parts = inner.splitn(3, '?');
    let (Some(charset), Some(encoding), Some(text)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::InvalidEncoding(format!("Invalid RFC 2047 word: {word}")));
    };

    // RFC 2231 language suffix, e.g. `utf-8*en`.
    let charset = charset.split('*').next().unwrap_or(charset);
    if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("us-ascii") {
        return Ok(None);
    }

    let bytes = match encoding {
        "B" | "b" => base64::decode(text.as_bytes())?,
        "Q" | "q" => decode_q(text)?,
        _ => {
            return Err(Error::InvalidEncoding(format!(
                "Unknown encoding: {encoding}"
            )));
        }
    };

    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| Error::InvalidEncoding(format!("encoded word is not UTF-8: {e}")))
}

fn decode_q(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        Error::InvalidEncoding(format!("Invalid Q escape in: {text}"))
                    })?;
                out.push(hex);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    Ok(out)
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
    fn test_encode_plain_passthrough() {
        assert_eq!(encode_q("Hello\tWorld"), "Hello\tWorld");
        assert_eq!(encode_q("John Smith <test@example.com>"), "John Smith <test@example.com>");
    }

    #[test]
    fn test_encode_q_word() {
        assert_eq!(encode_q("Héllo wörld"), "=?UTF-8?q?H=C3=A9llo_w=C3=B6rld?=");
        assert_eq!(encode_q("a_b=c?é"), "=?UTF-8?q?a=5Fb=3Dc=3F=C3=A9?=");
    }

    #[test]
    fn test_encode_splits_long_values() {
        let value = "ü".repeat(40);
        let encoded = encode_q(&value);
        let words: Vec<_> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        for word in &words {
            assert!(word.len() <= MAX_ENCODED_WORD_LENGTH);
            assert!(word.starts_with(PREFIX) && word.ends_with(SUFFIX));
            // Never split inside a character.
            assert_eq!((word.len() - PREFIX.len() - SUFFIX.len()) % 6, 0);
        }
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_decode_plain() {
        assert_eq!(decode("Hello").unwrap(), "Hello");
        assert_eq!(decode("a =? b").unwrap(), "a =? b");
    }

    #[test]
    fn test_decode_base64_word() {
        assert_eq!(decode("=?utf-8?B?SMOpbGxv?=").unwrap(), "Héllo");
    }

    #[test]
    fn test_decode_q_word() {
        assert_eq!(decode("=?utf-8?Q?H=C3=A9llo_there?=").unwrap(), "Héllo there");
    }

    #[test]
    fn test_decode_mixed_text() {
        assert_eq!(
            decode("Re: =?UTF-8?q?caf=C3=A9?= =?UTF-8?q?_cr=C3=A8me?= today").unwrap(),
            "Re: café crème today"
        );
    }

    #[test]
    fn test_decode_unsupported_charset_kept() {
        let value = "=?iso-8859-1?q?caf=E9?=";
        assert_eq!(decode(value).unwrap(), value);
    }

    #[test]
    fn test_decode_invalid() {
        assert!(decode("=?utf-8?x?abc?=").is_err());
        assert!(decode("=?utf-8?q?bad=Z?=").is_err());
    }
}
