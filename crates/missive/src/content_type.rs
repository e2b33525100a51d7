//! MIME content type handling.

use crate::error::{Error, Result};
use std::fmt;

/// Content type assumed when a part has no `Content-Type` (RFC 2045 section 5.2).
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=us-ascii";

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters in the order they appeared, names lower-cased.
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// The RFC 2045 default, `text/plain; charset=us-ascii`.
    #[must_use]
    pub fn default_text() -> Self {
        Self::new("text", "plain").with_parameter("charset", "us-ascii")
    }

    /// Creates a text/plain content type.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "UTF-8")
    }

    /// Creates a text/html content type.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "UTF-8")
    }

    /// Adds or replaces a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(key, value);
        self
    }

    fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.parameters.push((key, value)),
        }
    }

    /// Returns a parameter by case-insensitive name.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameter("charset")
    }

    /// Returns the boundary parameter if present and non-empty.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary").filter(|b| !b.is_empty())
    }

    /// `type/subtype` without parameters.
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Returns true if the type is exactly `main/sub`.
    #[must_use]
    pub fn is(&self, main: &str, sub: &str) -> bool {
        self.main_type.eq_ignore_ascii_case(main) && self.sub_type.eq_ignore_ascii_case(sub)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("text")
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="quoted value"`. Type,
    /// subtype and parameter names are lower-cased; quoted values may use
    /// backslash escapes. A trailing `;` is tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error if the type, subtype or a parameter is malformed.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidContentType(format!("{why}: {s:?}"));

        let (main_type, rest) = take_token(s.trim_start());
        if main_type.is_empty() {
            return Err(invalid("missing media type"));
        }
        let rest = rest
            .strip_prefix('/')
            .ok_or_else(|| invalid("expected slash after media type"))?;
        let (sub_type, mut rest) = take_token(rest);
        if sub_type.is_empty() {
            return Err(invalid("missing subtype"));
        }

        let mut content_type = Self::new(
            main_type.to_ascii_lowercase(),
            sub_type.to_ascii_lowercase(),
        );

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            rest = rest
                .strip_prefix(';')
                .ok_or_else(|| invalid("expected ';' before parameter"))?
                .trim_start();
            if rest.is_empty() {
                break;
            }

            let (key, after_key) = take_token(rest);
            if key.is_empty() {
                return Err(invalid("invalid parameter name"));
            }
            let after_eq = after_key
                .trim_start()
                .strip_prefix('=')
                .ok_or_else(|| invalid("expected '=' after parameter name"))?
                .trim_start();

            let (value, after_value) = if after_eq.starts_with('"') {
                take_quoted(after_eq).ok_or_else(|| invalid("unterminated quoted parameter"))?
            } else {
                let (token, tail) = take_token(after_eq);
                if token.is_empty() {
                    return Err(invalid("invalid parameter value"));
                }
                (token.to_string(), tail)
            };

            content_type.set_parameter(key, value);
            rest = after_value;
        }

        Ok(content_type)
    }
}

/// RFC 2045 `token` characters.
const fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic()
        && !matches!(
            c,
            '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
        )
}

fn take_token(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !is_token_char(c)).unwrap_or(s.len());
    s.split_at(end)
}

/// Consumes a quoted string, returning the unescaped value and the rest.
fn take_quoted(s: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Some((value, &s[idx + 1..])),
            '\\' => value.push(chars.next()?.1),
            _ => value.push(c),
        }
    }
    None
}

impl Default for ContentType {
    fn default() -> Self {
        Self::default_text()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;

        for (key, value) in &self.parameters {
            if !value.is_empty() && value.chars().all(is_token_char) {
                write!(f, "; {key}={value}")?;
            } else {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "; {key}=\"{escaped}\"")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_new() {
        let ct = ContentType::new("text", "plain");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_default_text() {
        let ct = ContentType::default();
        assert_eq!(ct.to_string(), DEFAULT_CONTENT_TYPE);
        assert_eq!(ContentType::parse(DEFAULT_CONTENT_TYPE).unwrap(), ct);
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; Charset=utf-8").unwrap();
        assert_eq!(ct.essence(), "text/plain");
        assert_eq!(ct.charset(), Some("utf-8"));
        assert!(ct.is("text", "plain"));
        assert!(ct.is_text());
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_123\"").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("----=_Part_123"));
    }

    #[test]
    fn test_parse_folded_signed() {
        let ct = ContentType::parse(
            "multipart/signed; boundary=\"=-=-=\"; micalg=pgp-sha1; \
             protocol=\"application/pgp-signature\"",
        )
        .unwrap();
        assert_eq!(ct.boundary(), Some("=-=-="));
        assert_eq!(ct.parameter("protocol"), Some("application/pgp-signature"));
        assert_eq!(ct.parameter("MICALG"), Some("pgp-sha1"));
    }

    #[test]
    fn test_parse_quoted_semicolon_and_escape() {
        let ct = ContentType::parse(r#"application/x-thing; name="a;b \"c\""; "#).unwrap();
        assert_eq!(ct.parameter("name"), Some("a;b \"c\""));
    }

    #[test]
    fn test_parse_without_boundary() {
        let ct = ContentType::parse("multipart/alternative").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), None);
        let ct = ContentType::parse("multipart/alternative; boundary=\"\"").unwrap();
        assert_eq!(ct.boundary(), None);
    }

    #[test]
    fn test_parse_errors() {
        let bad_values = [
            "",
            "text",
            "text/",
            "/plain",
            "text/plain; charset",
            "text/plain charset=x",
            "a/b; n=\"open",
        ];
        for bad in bad_values {
            assert!(
                matches!(ContentType::parse(bad), Err(Error::InvalidContentType(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_content_type_display() {
        let ct = ContentType::text_plain().with_parameter("name", "my file.txt");
        assert_eq!(ct.to_string(), "text/plain; charset=UTF-8; name=\"my file.txt\"");
    }

    #[test]
    fn test_content_type_with_parameter() {
        let ct = ContentType::new("text", "plain")
            .with_parameter("charset", "iso-8859-1")
            .with_parameter("format", "flowed")
            .with_parameter("Charset", "utf-8");

        assert_eq!(ct.charset(), Some("utf-8"));
        assert_eq!(ct.parameter("format"), Some("flowed"));
        assert_eq!(ct.parameters.len(), 2);
    }
}
