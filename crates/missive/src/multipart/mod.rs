//! Multipart bodies (RFC 2046): splitting on read, delimiting on write.

mod reader;
mod writer;

pub use reader::{
    MAX_NESTING_DEPTH, MultipartReader, Part, RawPart, collect_leaves, content_type_of,
};
pub use writer::{MultipartWriter, random_boundary};
