//! # Binary Archive
//!
//! A byte stream with a movable cursor. Writers may seek back and overwrite bytes they already
//! emitted, which is how length records and offset tables are patched after the data they
//! describe has been written.
//!
//! ## Container Format
//!
//! ```text
//! +-------+---------+-------+--------------------------+------+
//! | Magic | Version | Count | Count x (Tag u64, u32)   | Body |
//! | OROA  | u32     | u32   | custom version table     | ...  |
//! +-------+---------+-------+--------------------------+------+
//! ```
//!
//! All integers are little-endian. Cursor positions handed out by [`ArchiveWriter::cursor`] and
//! consumed by [`ArchiveReader::seek`] are offsets into the body, so they survive the header
//! being prepended by [`ArchiveWriter::finish`].

use std::collections::BTreeMap;

use crate::error::{ArchiveError, ArchiveResult};
use crate::math::{Color, Quat, Vec3};
use crate::name::StringId;

/// Magic bytes for archive identification.
pub const ARCHIVE_MAGIC: &[u8; 4] = b"OROA";

/// Current archive container version.
pub const ARCHIVE_VERSION: u32 = 1;

/// Growable output archive.
#[derive(Debug, Default, Clone)]
pub struct ArchiveWriter {
    /// Body bytes.
    body: Vec<u8>,
    /// Write position inside the body.
    cursor: usize,
    /// Custom version tags recorded by serializers.
    custom_versions: BTreeMap<StringId, u32>,
}

impl ArchiveWriter {
    /// Creates an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the version a serializer wrote its data with.
    pub fn set_custom_version(&mut self, tag: StringId, version: u32) {
        self.custom_versions.insert(tag, version);
    }

    /// Returns a recorded custom version.
    #[must_use]
    pub fn custom_version(&self, tag: StringId) -> Option<u32> {
        self.custom_versions.get(&tag).copied()
    }

    /// Current write position.
    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of body bytes written so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Checks whether nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Moves the cursor to an absolute body position.
    ///
    /// Seeking past the end is allowed; the gap is zero-filled by the next write.
    pub fn seek(&mut self, position: usize) {
        self.cursor = position;
    }

    /// Moves the cursor back by `count` bytes.
    pub fn move_backward(&mut self, count: usize) {
        debug_assert!(count <= self.cursor, "seeking before the start of the archive");
        self.cursor = self.cursor.saturating_sub(count);
    }

    /// Moves the cursor forward by `count` bytes.
    pub fn move_forward(&mut self, count: usize) {
        self.cursor += count;
    }

    /// Writes raw bytes at the cursor, overwriting existing bytes first.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.cursor + bytes.len();
        if end > self.body.len() {
            self.body.resize(end, 0);
        }
        self.body[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
    }

    /// Writes an archivable value.
    #[inline]
    pub fn write<T: Archivable>(&mut self, value: &T) {
        value.write_to(self);
    }

    /// Returns the body written so far.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Finishes the archive: header with the custom version table, then the body.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let header_len = 12 + self.custom_versions.len() * 12;
        let mut out = Vec::with_capacity(header_len + self.body.len());
        out.extend_from_slice(ARCHIVE_MAGIC);
        out.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.custom_versions.len() as u32).to_le_bytes());
        for (tag, version) in &self.custom_versions {
            out.extend_from_slice(&tag.raw().to_le_bytes());
            out.extend_from_slice(&version.to_le_bytes());
        }
        out.extend_from_slice(&self.body);
        out
    }
}

/// Input archive over a finished byte buffer.
#[derive(Debug, Clone)]
pub struct ArchiveReader<'a> {
    /// Body bytes.
    body: &'a [u8],
    /// Read position inside the body.
    cursor: usize,
    /// Reads may not cross this position.
    limit: usize,
    /// Container version found in the header.
    archive_version: u32,
    /// Custom version tags found in the header.
    custom_versions: BTreeMap<StringId, u32>,
}

impl<'a> ArchiveReader<'a> {
    /// Parses the archive header and positions the cursor at the start of the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic is wrong, the container version is newer than this
    /// reader, or the header is truncated.
    pub fn new(bytes: &'a [u8]) -> ArchiveResult<Self> {
        let mut header = Self {
            body: bytes,
            cursor: 0,
            limit: bytes.len(),
            archive_version: 0,
            custom_versions: BTreeMap::new(),
        };

        if header.read_bytes(ARCHIVE_MAGIC.len())? != ARCHIVE_MAGIC {
            return Err(ArchiveError::BadMagic);
        }
        let archive_version: u32 = header.read()?;
        if archive_version > ARCHIVE_VERSION {
            return Err(ArchiveError::UnsupportedArchiveVersion(archive_version));
        }
        let count: u32 = header.read()?;
        let mut custom_versions = BTreeMap::new();
        for _ in 0..count {
            let tag: StringId = header.read()?;
            let version: u32 = header.read()?;
            custom_versions.insert(tag, version);
        }

        let body = &bytes[header.cursor..];
        Ok(Self {
            body,
            cursor: 0,
            limit: body.len(),
            archive_version,
            custom_versions,
        })
    }

    /// Container version of this archive.
    #[must_use]
    pub const fn archive_version(&self) -> u32 {
        self.archive_version
    }

    /// Returns a custom version tag, if the writer recorded one.
    #[must_use]
    pub fn custom_version(&self, tag: StringId) -> Option<u32> {
        self.custom_versions.get(&tag).copied()
    }

    /// Checks that data tagged `tag` is at least `minimum`. A missing tag reads as version 0.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::UnsupportedVersion`] for outdated data.
    pub fn require_version(&self, tag: StringId, minimum: u32) -> ArchiveResult<u32> {
        let found = self.custom_version(tag).unwrap_or(0);
        if found < minimum {
            return Err(ArchiveError::UnsupportedVersion {
                tag,
                found,
                minimum,
            });
        }
        Ok(found)
    }

    /// Current read position.
    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Body length.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.body.len()
    }

    /// Checks whether the body is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Current read limit.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Restricts reads to positions before `limit` and returns the previous limit.
    ///
    /// The limit never grows past the body length.
    pub fn set_limit(&mut self, limit: usize) -> usize {
        std::mem::replace(&mut self.limit, limit.min(self.body.len()))
    }

    /// Bytes left before the read limit.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.cursor)
    }

    /// Moves the cursor to an absolute body position.
    pub fn seek(&mut self, position: usize) {
        self.cursor = position.min(self.body.len());
    }

    /// Moves the cursor back by `count` bytes.
    pub fn move_backward(&mut self, count: usize) {
        self.cursor = self.cursor.saturating_sub(count);
    }

    /// Moves the cursor forward by `count` bytes.
    pub fn move_forward(&mut self, count: usize) {
        self.seek(self.cursor.saturating_add(count));
    }

    /// Reads `count` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::UnexpectedEof`] if fewer bytes remain before the limit.
    pub fn read_bytes(&mut self, count: usize) -> ArchiveResult<&'a [u8]> {
        if count > self.remaining() {
            return Err(ArchiveError::UnexpectedEof {
                needed: count,
                offset: self.cursor,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.body[self.cursor..self.cursor + count];
        self.cursor += count;
        Ok(bytes)
    }

    /// Reads an archivable value.
    ///
    /// # Errors
    ///
    /// Propagates the value's decoding error.
    #[inline]
    pub fn read<T: Archivable>(&mut self) -> ArchiveResult<T> {
        T::read_from(self)
    }
}

/// Values with a fixed binary encoding.
pub trait Archivable: Sized {
    /// Appends the encoded value at the writer's cursor.
    fn write_to(&self, ar: &mut ArchiveWriter);

    /// Decodes a value at the reader's cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is truncated or malformed.
    fn read_from(ar: &mut ArchiveReader<'_>) -> ArchiveResult<Self>;
}

macro_rules! archivable_le {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Archivable for $ty {
                #[inline]
                fn write_to(&self, ar: &mut ArchiveWriter) {
                    ar.write_bytes(&self.to_le_bytes());
                }

                #[inline]
                fn read_from(ar: &mut ArchiveReader<'_>) -> ArchiveResult<Self> {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(ar.read_bytes(std::mem::size_of::<$ty>())?);
                    Ok(<$ty>::from_le_bytes(raw))
                }
            }
        )*
    };
}

archivable_le!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl Archivable for bool {
    fn write_to(&self, ar: &mut ArchiveWriter) {
        ar.write(&u8::from(*self));
    }

    fn read_from(ar: &mut ArchiveReader<'_>) -> ArchiveResult<Self> {
        Ok(ar.read::<u8>()? != 0)
    }
}

impl Archivable for String {
    fn write_to(&self, ar: &mut ArchiveWriter) {
        ar.write(&(self.len() as u64));
        ar.write_bytes(self.as_bytes());
    }

    fn read_from(ar: &mut ArchiveReader<'_>) -> ArchiveResult<Self> {
        let offset = ar.cursor();
        let len = usize::try_from(ar.read::<u64>()?).unwrap_or(usize::MAX);
        let bytes = ar.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ArchiveError::InvalidUtf8(offset))
    }
}

impl Archivable for StringId {
    fn write_to(&self, ar: &mut ArchiveWriter) {
        ar.write(&self.raw());
    }

    fn read_from(ar: &mut ArchiveReader<'_>) -> ArchiveResult<Self> {
        Ok(Self::from_raw(ar.read()?))
    }
}

impl Archivable for Vec3 {
    fn write_to(&self, ar: &mut ArchiveWriter) {
        ar.write(&self.x);
        ar.write(&self.y);
        ar.write(&self.z);
    }

    fn read_from(ar: &mut ArchiveReader<'_>) -> ArchiveResult<Self> {
        Ok(Self::new(ar.read()?, ar.read()?, ar.read()?))
    }
}

impl Archivable for Quat {
    fn write_to(&self, ar: &mut ArchiveWriter) {
        ar.write(&self.x);
        ar.write(&self.y);
        ar.write(&self.z);
        ar.write(&self.w);
    }

    fn read_from(ar: &mut ArchiveReader<'_>) -> ArchiveResult<Self> {
        Ok(Self::new(ar.read()?, ar.read()?, ar.read()?, ar.read()?))
    }
}

impl Archivable for Color {
    fn write_to(&self, ar: &mut ArchiveWriter) {
        // Byte channels have no endianness, the raw layout is the encoding.
        ar.write_bytes(bytemuck::bytes_of(self));
    }

    fn read_from(ar: &mut ArchiveReader<'_>) -> ArchiveResult<Self> {
        Ok(bytemuck::pod_read_unaligned(
            ar.read_bytes(std::mem::size_of::<Self>())?,
        ))
    }
}
