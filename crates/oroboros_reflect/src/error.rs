//! Error types for archives and field streams.

use thiserror::Error;

use crate::name::StringId;

/// Errors raised while reading a binary archive.
///
/// Writing never fails; every variant here describes a stream that cannot be trusted past the
/// point of failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    /// The stream ended (or hit its current read limit) before a value was complete.
    #[error("unexpected end of archive: needed {needed} bytes at offset {offset}, {remaining} available")]
    UnexpectedEof {
        /// Bytes the value needed.
        needed: usize,
        /// Cursor position when the read started.
        offset: usize,
        /// Bytes left before the limit.
        remaining: usize,
    },

    /// The archive does not start with the expected magic bytes.
    #[error("bad archive magic")]
    BadMagic,

    /// The archive container itself is newer than this reader.
    #[error("unsupported archive version {0}")]
    UnsupportedArchiveVersion(u32),

    /// A custom version tag is older than the oldest data this reader accepts.
    #[error("custom version {tag} is {found}, minimum supported is {minimum}")]
    UnsupportedVersion {
        /// Tag of the custom version.
        tag: StringId,
        /// Version stored in the archive.
        found: u32,
        /// Minimum version the reader supports.
        minimum: u32,
    },

    /// A tag byte had a value no writer produces.
    #[error("invalid tag {tag} at offset {offset}")]
    InvalidTag {
        /// The tag that was read.
        tag: u8,
        /// Cursor position of the tag.
        offset: usize,
    },

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 string at offset {0}")]
    InvalidUtf8(usize),
}

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;
