//! Whole-file container encoding and atomic persistence.

use crate::codec;
use crate::error::{ErrorKind, Result};
use crate::header::Header;
use crate::index::HashIndex;
use crate::models::{ChapterRecord, Images};
use exn::ResultExt;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::instrument;

/// Encode a complete container from a chapter list and per-key page images.
///
/// Image keys don't have to match chapter keys: chapters without images are
/// listed but have nothing to look up, and images without a chapter record
/// are still retrievable by key. Chapter keys must be unique.
///
/// Sections are built independently and then concatenated behind the header.
/// Each offset written in the header is checked against the real position of
/// its section; a mismatch fails [`Invariant`](ErrorKind::Invariant).
///
/// # Example
///
/// ```
/// use komi_container::{ChapterRecord, Images, Reader, encode};
/// use std::io::Cursor;
///
/// let chapters = [ChapterRecord::new("c1", "Chapter 1", 1)];
/// let images = Images::from([("c1".to_string(), vec![b"AAAA".to_vec(), b"BB".to_vec()])]);
/// let bytes = encode(&chapters, &images).unwrap();
///
/// let mut reader = Reader::new(Cursor::new(bytes)).unwrap();
/// assert_eq!(reader.lookup("c1").unwrap(), Some(vec![b"AAAA".to_vec(), b"BB".to_vec()]));
/// assert_eq!(reader.lookup("c2").unwrap(), None);
/// ```
#[instrument(skip_all, fields(chapters = chapters.len(), keys = images.len(), size))]
pub fn encode(chapters: &[ChapterRecord], images: &Images) -> Result<Vec<u8>> {
    let (image_region, offsets) = encode_images(images)?;
    let (table_region, elements_region) = HashIndex::build(&offsets)?.into_regions()?;
    let chapter_region = encode_chapters(chapters)?;

    let header = Header::for_sections(chapter_region.len(), table_region.len(), elements_region.len());
    let total = header.images_offset as usize + image_region.len();
    let mut output = Vec::with_capacity(total);
    header.write_to(&mut output)?;
    for (offset, region, section) in [
        (header.chapters_offset, &chapter_region, "chapters offset"),
        (header.table_offset, &table_region, "table offset"),
        (header.elements_offset, &elements_region, "elements offset"),
        (header.images_offset, &image_region, "images offset"),
    ] {
        if output.len() as u64 != offset {
            tracing::error!(section, expected = offset, actual = output.len(), "Container section misplaced");
            exn::bail!(ErrorKind::Invariant(section));
        }
        output.extend_from_slice(region);
    }
    tracing::Span::current().record("size", output.len());
    Ok(output)
}

/// Image region: per key, the blob count then each blob length-prefixed.
/// Returns the region alongside each key's offset within it.
fn encode_images(images: &Images) -> Result<(Vec<u8>, Vec<(&str, u64)>)> {
    let mut region = Vec::new();
    let mut offsets = Vec::with_capacity(images.len());
    for (key, blobs) in images {
        offsets.push((key.as_str(), region.len() as u64));
        codec::write_len(&mut region, blobs.len())?;
        for blob in blobs {
            codec::write_bytes(&mut region, blob)?;
        }
    }
    Ok((region, offsets))
}

fn encode_chapters(chapters: &[ChapterRecord]) -> Result<Vec<u8>> {
    let mut seen = HashSet::with_capacity(chapters.len());
    let mut region = Vec::new();
    codec::write_len(&mut region, chapters.len())?;
    for chapter in chapters {
        if !seen.insert(chapter.key.as_str()) {
            exn::bail!(ErrorKind::DuplicateKey(chapter.key.clone()));
        }
        codec::write_i64(&mut region, chapter.sequence)?;
        codec::write_bytes(&mut region, chapter.name.as_bytes())?;
        codec::write_bytes(&mut region, chapter.key.as_bytes())?;
    }
    Ok(region)
}

/// Atomically replace the file at `path` with `bytes`.
///
/// Writes to a temporary file in the same directory, syncs it, then renames
/// it over the destination. Readers see either the old container or the new
/// one, never a partial write.
#[instrument(skip_all, fields(path = %path.as_ref().display(), size = bytes.len()))]
pub fn persist(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory).or_raise(|| ErrorKind::Io)?;
    let mut temporary = NamedTempFile::new_in(directory).or_raise(|| ErrorKind::Io)?;
    temporary.write_all(bytes).or_raise(|| ErrorKind::Io)?;
    temporary.as_file().sync_all().or_raise(|| ErrorKind::Io)?;
    temporary.persist(path).map_err(|e| e.error).or_raise(|| ErrorKind::Io)?;
    tracing::debug!("Container written");
    Ok(())
}

/// Encode a container and atomically write it to `path`. Returns the number
/// of bytes written.
pub fn write(path: impl AsRef<Path>, chapters: &[ChapterRecord], images: &Images) -> Result<u64> {
    let bytes = encode(chapters, images)?;
    persist(path, &bytes)?;
    Ok(bytes.len() as u64)
}
