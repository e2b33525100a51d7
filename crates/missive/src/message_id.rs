//! Deterministic `Message-Id` values.
//!
//! The id is a digest of the message content and a coarse timestamp, so
//! serializing the same message twice within a few minutes yields the same
//! id while distinct messages still get distinct ones.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Host used when the local host name cannot be resolved.
pub const FALLBACK_HOST: &str = "localhost.localdomain";

/// Width of a timestamp bucket in seconds.
pub const BUCKET_SECONDS: i64 = 5 * 60;

/// The message fields an id is derived from.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint<'a> {
    /// Sender address.
    pub from: &'a str,
    /// Subject line.
    pub subject: &'a str,
    /// Plain text body.
    pub text: &'a [u8],
    /// HTML body.
    pub html: &'a [u8],
}

/// Rounds `ts` down to the start of its five minute bucket.
#[must_use]
pub fn bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(BUCKET_SECONDS), 0).unwrap_or(ts)
}

/// Builds `<hex@host>` for `fingerprint` at time `ts`.
///
/// The hex part is bytes 4..20 of a SHA-256 over the sender, subject,
/// bucketed timestamp (RFC 3339, UTC), text and HTML, in that order.
#[must_use]
pub fn generate(fingerprint: &Fingerprint<'_>, ts: DateTime<Utc>, host: &str) -> String {
    let stamp = bucket(ts).to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut hasher = Sha256::new();
    hasher.update(fingerprint.from.as_bytes());
    hasher.update(fingerprint.subject.as_bytes());
    hasher.update(stamp.as_bytes());
    hasher.update(fingerprint.text);
    hasher.update(fingerprint.html);
    let digest = hasher.finalize();

    let hex: String = digest[4..20].iter().map(|b| format!("{b:02x}")).collect();
    format!("<{hex}@{host}>")
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
    use chrono::TimeZone;

    const SAMPLE: Fingerprint<'static> = Fingerprint {
        from: "a@x.com",
        subject: "S",
        text: b"hi\n",
        html: b"",
    };

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_bucket_rounds_down() {
        assert_eq!(bucket(at(10, 4, 59)), at(10, 0, 0));
        assert_eq!(bucket(at(10, 5, 0)), at(10, 5, 0));
        assert_eq!(bucket(at(23, 59, 59)), at(23, 55, 0));
    }

    #[test]
    fn test_shape() {
        let id = generate(&SAMPLE, at(10, 0, 0), "mail.example.com");
        let inner = id.strip_prefix('<').unwrap().strip_suffix('>').unwrap();
        let (hex, host) = inner.split_once('@').unwrap();
        assert_eq!(hex.len(), 32);
        assert!(hex.bytes().all(|c| c.is_ascii_digit() || (b'a'..=b'f').contains(&c)));
        assert_eq!(host, "mail.example.com");
    }

    #[test]
    fn test_stable_within_bucket() {
        assert_eq!(
            generate(&SAMPLE, at(10, 0, 1), FALLBACK_HOST),
            generate(&SAMPLE, at(10, 4, 58), FALLBACK_HOST)
        );
    }

    #[test]
    fn test_changes_across_buckets() {
        assert_ne!(
            generate(&SAMPLE, at(10, 4, 59), FALLBACK_HOST),
            generate(&SAMPLE, at(10, 5, 0), FALLBACK_HOST)
        );
    }

    #[test]
    fn test_changes_with_content() {
        let other = Fingerprint {
            html: b"<p>hi</p>",
            ..SAMPLE
        };
        assert_ne!(
            generate(&SAMPLE, at(10, 0, 0), FALLBACK_HOST),
            generate(&other, at(10, 0, 0), FALLBACK_HOST)
        );
    }
}
