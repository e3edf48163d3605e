//! Per-object state bits stored in the object database.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};

/// Bit set of object states.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectFlags(u64);

impl ObjectFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Destroyed by the next reachability collection even if still referenced.
    pub const MARKED_FOR_DELETE: Self = Self(1 << 0);
    /// Storage is freed on destroy instead of being parked as pending garbage.
    pub const GC_PURGE: Self = Self(1 << 1);
    /// Object has no outer. Collection roots.
    pub const ROOT_OBJECT: Self = Self(1 << 2);
    /// Never written to snapshots.
    pub const TRANSIENT: Self = Self(1 << 3);
    /// The outermost object has unsaved edits.
    pub const PACKAGE_DIRTY: Self = Self(1 << 4);
    /// A snapshot load into this object is in progress.
    pub const PACKAGE_LOAD_PENDING: Self = Self(1 << 5);
    /// The object was populated from a snapshot.
    pub const PACKAGE_LOADED: Self = Self(1 << 6);
    /// Default instance owned by a template.
    pub const TEMPLATE_DEFAULT: Self = Self(1 << 7);
    /// Instantiated from a template.
    pub const FROM_TEMPLATE: Self = Self(1 << 8);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::MARKED_FOR_DELETE, "MARKED_FOR_DELETE"),
        (Self::GC_PURGE, "GC_PURGE"),
        (Self::ROOT_OBJECT, "ROOT_OBJECT"),
        (Self::TRANSIENT, "TRANSIENT"),
        (Self::PACKAGE_DIRTY, "PACKAGE_DIRTY"),
        (Self::PACKAGE_LOAD_PENDING, "PACKAGE_LOAD_PENDING"),
        (Self::PACKAGE_LOADED, "PACKAGE_LOADED"),
        (Self::TEMPLATE_DEFAULT, "TEMPLATE_DEFAULT"),
        (Self::FROM_TEMPLATE, "FROM_TEMPLATE"),
    ];

    /// Rebuilds flags from raw bits, dropping unknown bits.
    #[inline]
    #[must_use]
    pub const fn from_bits_truncate(bits: u64) -> Self {
        Self(bits & ((1 << 9) - 1))
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Checks whether no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Checks whether every flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Checks whether any flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Sets the flags of `other`.
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the flags of `other`.
    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Sets or clears the flags of `other`.
    #[inline]
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for ObjectFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ObjectFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ObjectFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Sub for ObjectFlags {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl Not for ObjectFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self::from_bits_truncate(!self.0)
    }
}

impl fmt::Debug for ObjectFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}
