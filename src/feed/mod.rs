//! XML feed output.
//!
//! This module turns a lazy sequence of mapped items into a published file:
//!
//! - **Writing**: one item at a time through a `quick-xml` writer, so memory
//!   stays proportional to a single item
//! - **Publishing**: temp file, optional validation re-read, backup of the
//!   previous feed, atomic rename
//!
//! # Architecture
//!
//! - [`writer`] - Atom (Google) and RSS 2.0 (Meta) document shapes
//! - [`publish`] - temp-then-rename discipline and `.backup` handling
//!
//! # Example
//!
//! ```ignore
//! use shopfeed::feed::{publish_feed, FeedFormat, FeedHeader, PublishOptions};
//!
//! let items = shopfeed::mapping::items(&catalog, Platform::Google, &ctx);
//! let published = publish_feed(dir, "google.xml", FeedFormat::Atom, &header, items, options)?;
//! ```

pub mod publish;
pub mod writer;

pub use publish::{
    atomic_copy, backup_path, publish_feed, validate_feed, write_atomic, PublishOptions, Published,
};
pub use writer::{write_feed, FeedFormat, FeedHeader, FeedWriter, WriteSummary};

use thiserror::Error;

use crate::mapping::MappingError;

/// Errors that abort one platform's feed. The published file is untouched.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML serialization failed: {0}")]
    Xml(String),

    #[error("Mapping failed: {0}")]
    Mapping(#[from] MappingError),

    #[error("Feed validation failed: {0}")]
    Validation(String),
}

pub(crate) fn xml_error(e: impl std::fmt::Display) -> FeedError {
    FeedError::Xml(e.to_string())
}
