//! # missive
//!
//! RFC 5322 email composition and parsing with MIME multipart support.
//!
//! ## Features
//!
//! - **Message parsing**: Decode raw messages into sender, recipients,
//!   subject, plain text and HTML, walking nested multipart trees
//! - **Message generation**: Write `multipart/mixed` documents with a
//!   text/HTML alternative pair and base64 attachments
//! - **Encoding/Decoding**: Quoted-Printable, Base64, RFC 2047 header words
//! - **Line discipline**: 76-column CRLF output per RFC 2045
//! - **Deterministic ids**: `Message-Id` derived from content and a five
//!   minute time bucket
//!
//! ## Quick Start
//!
//! ### Parsing Messages
//!
//! ```
//! use missive::Message;
//!
//! let raw = "From: sender@example.com\r\n\
//!            To: recipient@example.com\r\n\
//!            Subject: Test\r\n\
//!            \r\n\
//!            Hello, World!";
//!
//! let message = Message::parse(raw.as_bytes())?;
//! assert_eq!(message.subject, "Test");
//! assert_eq!(message.text, b"Hello, World!");
//! # Ok::<(), missive::Error>(())
//! ```
//!
//! ### Building Messages
//!
//! ```
//! use missive::{Config, Message};
//! use std::io::Cursor;
//!
//! let mut message = Message {
//!     from: "sender@example.com".to_string(),
//!     to: vec!["recipient@example.com".to_string()],
//!     subject: "Report".to_string(),
//!     text: b"See attached.".to_vec(),
//!     ..Message::default()
//! };
//! message.attach(Cursor::new(b"a,b\n1,2\n".to_vec()), "report.csv", None);
//!
//! let bytes = message.to_bytes_with(&Config::from_system())?;
//! message.close()?;
//! assert!(bytes.starts_with(b"To: recipient@example.com\r\n"));
//! # Ok::<(), missive::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod assemble;
mod attachment;
mod chunked;
mod config;
mod content_type;
mod error;
mod message;
mod reader;

pub mod encoding;
pub mod header;
pub mod message_id;
pub mod multipart;

pub use assemble::format_date;
pub use attachment::{
    Attachment, AttachmentSource, BuiltinDetector, ContentTypeDetector, NopClose, OCTET_STREAM,
    SNIFF_LEN,
};
pub use chunked::{ChunkedLineWriter, MAX_LINE_LENGTH};
pub use config::{Config, ConfigBuilder, DEFAULT_MAX_MESSAGE_SIZE};
pub use content_type::{ContentType, DEFAULT_CONTENT_TYPE};
pub use encoding::TransferEncoding;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::Message;
pub use reader::{BoundedReader, TrimReader, read_message};
