//! Fixed 40-byte container header: magic constant plus four section offsets.

use crate::codec::{self, WIDTH};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{Read, Seek, SeekFrom, Write};

/// Magic constant identifying the format (ASCII `komisanw`).
pub const MAGIC: i64 = 0x6b6f_6d69_7361_6e77;
/// Size of the header in bytes: the magic constant and four offsets.
pub const HEADER_SIZE: u64 = (WIDTH * 5) as u64;

/// Absolute byte offsets of the four container sections.
///
/// Sections are contiguous and always appear in this order, so each offset
/// is also the running length of everything before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub chapters_offset: u64,
    pub table_offset: u64,
    pub elements_offset: u64,
    pub images_offset: u64,
}

impl Header {
    /// Lay out sections of the given sizes back-to-back after the header.
    pub fn for_sections(chapters_len: usize, table_len: usize, elements_len: usize) -> Self {
        let chapters_offset = HEADER_SIZE;
        let table_offset = chapters_offset + chapters_len as u64;
        let elements_offset = table_offset + table_len as u64;
        let images_offset = elements_offset + elements_len as u64;
        Self { chapters_offset, table_offset, elements_offset, images_offset }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_i64(writer, MAGIC)?;
        for offset in self.offsets() {
            let offset = i64::try_from(offset).or_raise(|| ErrorKind::Invariant("section offset"))?;
            codec::write_i64(writer, offset)?;
        }
        Ok(())
    }

    /// Read and check the header at the start of `reader`.
    ///
    /// A file shorter than the header fails [`Truncated`](ErrorKind::Truncated);
    /// a wrong magic constant or a negative offset fails
    /// [`CorruptFormat`](ErrorKind::CorruptFormat).
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0)).or_raise(|| ErrorKind::Io)?;
        if codec::read_i64(reader, "header")? != MAGIC {
            exn::bail!(ErrorKind::CorruptFormat("magic constant"));
        }
        let mut offset = || -> Result<u64> {
            let n = codec::read_i64(reader, "header")?;
            u64::try_from(n).or_raise(|| ErrorKind::CorruptFormat("negative section offset"))
        };
        Ok(Self {
            chapters_offset: offset()?,
            table_offset: offset()?,
            elements_offset: offset()?,
            images_offset: offset()?,
        })
    }

    /// Check the section ordering against the real file length.
    pub fn validate(&self, file_len: u64) -> Result<()> {
        let ordered = HEADER_SIZE <= self.chapters_offset
            && self.chapters_offset <= self.table_offset
            && self.table_offset <= self.elements_offset
            && self.elements_offset <= self.images_offset;
        if !ordered {
            exn::bail!(ErrorKind::CorruptFormat("section offsets out of order"));
        }
        if self.images_offset > file_len {
            exn::bail!(ErrorKind::Truncated("sections"));
        }
        Ok(())
    }

    /// Length of the chain-node region.
    pub fn elements_len(&self) -> u64 {
        self.images_offset - self.elements_offset
    }

    fn offsets(&self) -> [u64; 4] {
        [self.chapters_offset, self.table_offset, self.elements_offset, self.images_offset]
    }
}
