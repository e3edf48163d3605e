//! # Stable Names
//!
//! Field names, class names, object paths and version tags are all addressed by a 64-bit hash
//! that is identical across runs, so it can be written to disk.

use std::fmt;
use std::hash::Hasher;

use siphasher::sip::SipHasher13;

/// Fixed hashing keys. Changing them invalidates every stored archive.
const NAME_KEY_0: u64 = 0x4f52_4f42_4f52_4f53;
const NAME_KEY_1: u64 = 0x6e61_6d65_2d69_6473;

/// Stable hashed identifier of a string.
///
/// `0` is reserved for [`StringId::INVALID`]; a string hashing to zero is nudged to `1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct StringId(u64);

impl StringId {
    /// The invalid id. Terminates field streams.
    pub const INVALID: Self = Self(0);

    /// Hashes `text` into a stable id.
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut hasher = SipHasher13::new_with_keys(NAME_KEY_0, NAME_KEY_1);
        hasher.write(text.as_bytes());
        match hasher.finish() {
            0 => Self(1),
            hash => Self(hash),
        }
    }

    /// Rebuilds an id from its raw value (as read from an archive).
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw hash value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Checks whether this is the invalid id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<&str> for StringId {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
