//! Encoder and decoder configuration.

use crate::message_id::FALLBACK_HOST;

/// Default cap on the size of a message accepted by the decoder (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 1 << 20;

/// Settings shared by the encode and decode paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Domain part of generated `Message-Id` values.
    pub hostname: String,
    /// Largest input the decoder reads, in bytes.
    pub max_message_size: u64,
}

impl Config {
    /// Creates a configuration with the given `Message-Id` host.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Creates a configuration using the local host name.
    ///
    /// Falls back to `localhost.localdomain` when the name cannot be
    /// resolved, is not valid UTF-8, or is empty.
    #[must_use]
    pub fn from_system() -> Self {
        let hostname = match hostname::get() {
            Ok(name) => name.into_string().ok().filter(|n| !n.is_empty()),
            Err(e) => {
                tracing::debug!(error = %e, "could not resolve local host name");
                None
            }
        };
        Self::new(hostname.unwrap_or_else(|| FALLBACK_HOST.to_string()))
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(FALLBACK_HOST)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    hostname: Option<String>,
    max_message_size: Option<u64>,
}

impl ConfigBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `Message-Id` host.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the decoder size cap.
    #[must_use]
    pub const fn max_message_size(mut self, max: u64) -> Self {
        self.max_message_size = Some(max);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            hostname: self.hostname.unwrap_or_else(|| FALLBACK_HOST.to_string()),
            max_message_size: self.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
        }
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
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.hostname, "localhost.localdomain");
        assert_eq!(config.max_message_size, 1_048_576);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .hostname("mx.example.org")
            .max_message_size(4096)
            .build();

        assert_eq!(config.hostname, "mx.example.org");
        assert_eq!(config.max_message_size, 4096);
    }

    #[test]
    fn test_config_builder_defaults() {
        assert_eq!(Config::builder().build(), Config::default());
    }

    #[test]
    fn test_from_system_never_empty() {
        assert!(!Config::from_system().hostname.is_empty());
    }
}
