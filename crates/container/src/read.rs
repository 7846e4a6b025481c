//! Random-access reads: open a container, list chapters, look up page images.

use crate::codec;
use crate::error::{ErrorKind, Result};
use crate::header::Header;
use crate::index;
use crate::models::ChapterRecord;
use exn::{OptionExt, ResultExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Upper bound on speculative preallocation when a count comes from disk.
const PREALLOCATE_LIMIT: u64 = 1024;

/// Container reader over any seekable byte source.
///
/// Construction reads the header and the bucket count only; everything else
/// is read on demand, one seek per field. Lookups take `&mut self` because
/// they move the underlying cursor; use one reader per thread (or a
/// [`Container`], which opens a fresh handle per lookup).
#[derive(Debug)]
pub struct Reader<R> {
    inner: R,
    header: Header,
    bucket_count: u64,
}

impl<R: Read + Seek> Reader<R> {
    /// Open a container from `inner`, validating the header against the
    /// source's length.
    pub fn new(mut inner: R) -> Result<Self> {
        let header = Header::read(&mut inner)?;
        let file_len = inner.seek(SeekFrom::End(0)).or_raise(|| ErrorKind::Io)?;
        header.validate(file_len)?;
        let bucket_count = index::read_bucket_count(&mut inner, &header)?;
        Ok(Self { inner, header, bucket_count })
    }

    /// Reuse a header and bucket count that were already read from the same
    /// container.
    fn with_layout(inner: R, header: Header, bucket_count: u64) -> Self {
        Self { inner, header, bucket_count }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    /// Decode the whole chapter table.
    pub fn chapters(&mut self) -> Result<Vec<ChapterRecord>> {
        let reader = &mut self.inner;
        reader.seek(SeekFrom::Start(self.header.chapters_offset)).or_raise(|| ErrorKind::Io)?;
        let count = codec::read_len(reader, "chapter count")?;
        let mut chapters = Vec::with_capacity(count.min(PREALLOCATE_LIMIT) as usize);
        for _ in 0..count {
            let sequence = codec::read_i64(reader, "chapter sequence")?;
            let name = codec::read_string(reader, "chapter name")?;
            let key = codec::read_string(reader, "chapter key")?;
            chapters.push(ChapterRecord { key, name, sequence });
        }
        Ok(chapters)
    }

    /// Resolve `key` to its offset in the image region, without reading any
    /// images.
    pub fn find(&mut self, key: &str) -> Result<Option<u64>> {
        index::find(&mut self.inner, &self.header, self.bucket_count, key)
    }

    /// Look up the ordered page images stored for `key`.
    ///
    /// Returns `Ok(None)` when the key isn't in the container. A short read
    /// anywhere in the blob list fails [`Truncated`](ErrorKind::Truncated);
    /// partial lists are never returned.
    pub fn lookup(&mut self, key: &str) -> Result<Option<Vec<Vec<u8>>>> {
        match self.find(key)? {
            Some(value_offset) => self.images_at(value_offset).map(Some),
            None => Ok(None),
        }
    }

    fn images_at(&mut self, value_offset: u64) -> Result<Vec<Vec<u8>>> {
        let start = self
            .header
            .images_offset
            .checked_add(value_offset)
            .ok_or_raise(|| ErrorKind::CorruptFormat("value offset"))?;
        let reader = &mut self.inner;
        reader.seek(SeekFrom::Start(start)).or_raise(|| ErrorKind::Io)?;
        let count = codec::read_len(reader, "image count")?;
        let mut images = Vec::with_capacity(count.min(PREALLOCATE_LIMIT) as usize);
        for _ in 0..count {
            images.push(codec::read_bytes(reader, "image")?);
        }
        Ok(images)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// An opened container file.
///
/// Holds the parsed header and chapter table in memory. Every lookup opens
/// its own read handle, so a `Container` can be shared freely between
/// threads and concurrent lookups never race on a shared cursor.
///
/// # Example
///
/// ```no_run
/// use komi_container::Container;
///
/// # fn example() -> komi_container::error::Result<()> {
/// let container = Container::open("manga.komi")?;
/// for chapter in container.chapters() {
///     match container.lookup(&chapter.key)? {
///         Some(pages) => println!("{chapter}: {} pages", pages.len()),
///         None => println!("{chapter}: not downloaded"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Container {
    path: PathBuf,
    header: Header,
    bucket_count: u64,
    chapters: Vec<ChapterRecord>,
}

impl Container {
    /// Open the container at `path`, reading its header, bucket count and
    /// chapter table.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = Reader::new(Self::handle(&path)?)?;
        let chapters = reader.chapters()?;
        tracing::debug!(chapters = chapters.len(), buckets = reader.bucket_count(), "Opened container");
        Ok(Self { header: reader.header, bucket_count: reader.bucket_count, chapters, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    /// Chapter table in stored order.
    pub fn chapters(&self) -> &[ChapterRecord] {
        &self.chapters
    }

    /// The chapter record with the given key, if listed.
    pub fn chapter(&self, key: &str) -> Option<&ChapterRecord> {
        self.chapters.iter().find(|c| c.key == key)
    }

    /// Whether page images are stored for `key`. Walks the hash chain only.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.reader()?.find(key)?.is_some())
    }

    /// Look up the ordered page images stored for `key`; see [`Reader::lookup`].
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn lookup(&self, key: &str) -> Result<Option<Vec<Vec<u8>>>> {
        let images = self.reader()?.lookup(key)?;
        match &images {
            Some(pages) => tracing::debug!(pages = pages.len(), "Cache hit"),
            None => tracing::debug!("Cache miss"),
        }
        Ok(images)
    }

    fn reader(&self) -> Result<Reader<BufReader<File>>> {
        Ok(Reader::with_layout(Self::handle(&self.path)?, self.header, self.bucket_count))
    }

    fn handle(path: &Path) -> Result<BufReader<File>> {
        match File::open(path) {
            Ok(file) => Ok(BufReader::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(e) => Err(e).or_raise(|| ErrorKind::Io),
        }
    }
}
