//! Top-level header synthesis for outgoing messages.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::header::{CC, CONTENT_TYPE, DATE, FROM, Headers, MESSAGE_ID, MIME_VERSION, SUBJECT, TO};
use crate::message::Message;
use crate::message_id::{self, Fingerprint};
use chrono::{DateTime, FixedOffset, Utc};

/// RFC 1123 with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`.
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Fields placed ahead of the caller's remaining overrides, in order.
const LEADING: [&str; 6] = [TO, CC, FROM, SUBJECT, DATE, MESSAGE_ID];

/// Formats a `Date` header value.
#[must_use]
pub fn format_date(now: DateTime<FixedOffset>) -> String {
    now.format(DATE_FORMAT).to_string()
}

/// Builds the header block of a `multipart/mixed` message.
///
/// `message.headers` is read, never modified. A field set there wins over
/// the value derived from the message, except `Content-Type`, which always
/// announces the envelope with `boundary`.
pub(crate) fn message_headers(
    message: &Message,
    config: &Config,
    now: DateTime<FixedOffset>,
    boundary: &str,
) -> Result<Headers> {
    let overrides = &message.headers;
    let mut headers = Headers::new();

    for name in LEADING {
        let values = overrides.get_all(name);
        if !values.is_empty() {
            headers.set_all(name, values.to_vec());
            continue;
        }
        if let Some(value) = derive(message, config, now, name)? {
            headers.set(name, value);
        }
    }

    for (name, values) in overrides.fields() {
        let reserved = LEADING
            .iter()
            .chain([&MIME_VERSION, &CONTENT_TYPE])
            .any(|field| field.eq_ignore_ascii_case(name));
        if !reserved && !values.is_empty() {
            headers.set_all(name, values.to_vec());
        }
    }

    match overrides.get_all(MIME_VERSION) {
        [] => headers.set(MIME_VERSION, "1.0"),
        values => headers.set_all(MIME_VERSION, values.to_vec()),
    }

    if let Some(discarded) = overrides.get(CONTENT_TYPE) {
        tracing::debug!(
            content_type = discarded,
            "replacing Content-Type override with envelope type"
        );
    }
    headers.set(CONTENT_TYPE, format!("multipart/mixed;\r\n boundary={boundary}"));

    Ok(headers)
}

fn derive(
    message: &Message,
    config: &Config,
    now: DateTime<FixedOffset>,
    name: &str,
) -> Result<Option<String>> {
    let value = match name {
        TO => join(&message.to),
        CC => join(&message.cc),
        FROM => {
            if message.from.is_empty() {
                return Err(Error::MissingRequiredField(FROM));
            }
            Some(message.from.clone())
        }
        SUBJECT => Some(message.subject.clone()).filter(|s| !s.is_empty()),
        DATE => Some(format_date(now)),
        _ => {
            let fingerprint = Fingerprint {
                from: &message.from,
                subject: &message.subject,
                text: &message.text,
                html: &message.html,
            };
            Some(message_id::generate(
                &fingerprint,
                now.with_timezone(&Utc),
                &config.hostname,
            ))
        }
    };
    Ok(value)
}

fn join(addresses: &[String]) -> Option<String> {
    (!addresses.is_empty()).then(|| addresses.join(", "))
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
    use crate::header::BCC;
    use chrono::TimeZone;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2006, 1, 2, 15, 4, 5)
            .unwrap()
    }

    fn sample() -> Message {
        Message {
            from: "Jordan Wright <test@example.com>".to_string(),
            to: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            bcc: vec!["hidden@example.com".to_string()],
            subject: "Awesome Subject".to_string(),
            text: b"hi".to_vec(),
            ..Message::default()
        }
    }

    fn names(headers: &Headers) -> Vec<&str> {
        headers.fields().map(|(name, _)| name).collect()
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(now()), "Mon, 02 Jan 2006 15:04:05 -0700");
    }

    #[test]
    fn test_derived_order_and_values() {
        let headers = message_headers(&sample(), &Config::default(), now(), "BND").unwrap();

        assert_eq!(
            names(&headers),
            ["To", "From", "Subject", "Date", "Message-Id", "Mime-Version", "Content-Type"]
        );
        assert_eq!(headers.get(TO), Some("a@example.com, b@example.com"));
        assert_eq!(headers.get(DATE), Some("Mon, 02 Jan 2006 15:04:05 -0700"));
        assert!(headers.get(MESSAGE_ID).unwrap().ends_with("@localhost.localdomain>"));
        assert_eq!(headers.get(MIME_VERSION), Some("1.0"));
        assert_eq!(headers.get(CONTENT_TYPE), Some("multipart/mixed;\r\n boundary=BND"));
        assert!(!headers.contains(BCC));
        assert!(!headers.contains(CC));
    }

    #[test]
    fn test_overrides_win_and_keep_order() {
        let mut message = sample();
        message.headers.add("X-Mailer", "missive");
        message.headers.add("subject", "Overridden");
        message.headers.add("Content-Type", "text/plain");
        message.headers.add("Message-Id", "<fixed@example.com>");
        message.headers.add("X-Priority", "1");

        let headers =
            message_headers(&message, &Config::new("mx.example.org"), now(), "BND").unwrap();

        assert_eq!(
            names(&headers),
            [
                "To",
                "From",
                "Subject",
                "Date",
                "Message-Id",
                "X-Mailer",
                "X-Priority",
                "Mime-Version",
                "Content-Type"
            ]
        );
        assert_eq!(headers.get(SUBJECT), Some("Overridden"));
        assert_eq!(headers.get(MESSAGE_ID), Some("<fixed@example.com>"));
        assert_eq!(headers.get(CONTENT_TYPE), Some("multipart/mixed;\r\n boundary=BND"));
        assert_eq!(message.headers.get(CONTENT_TYPE), Some("text/plain"));
    }

    #[test]
    fn test_from_override_satisfies_requirement() {
        let mut message = Message::default();
        assert!(matches!(
            message_headers(&message, &Config::default(), now(), "b"),
            Err(Error::MissingRequiredField("From"))
        ));

        message.headers.add(FROM, "someone@example.com");
        let headers = message_headers(&message, &Config::default(), now(), "b").unwrap();
        assert_eq!(headers.get(FROM), Some("someone@example.com"));
        assert!(!headers.contains(SUBJECT));
        assert!(!headers.contains(TO));
    }

    #[test]
    fn test_message_id_uses_configured_host() {
        let headers =
            message_headers(&sample(), &Config::new("mx.example.org"), now(), "b").unwrap();
        assert!(headers.get(MESSAGE_ID).unwrap().ends_with("@mx.example.org>"));
    }
}
