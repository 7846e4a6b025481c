//! On-disk hash index mapping chapter keys to image-region offsets.
//!
//! Open hashing with chained collision resolution. The bucket array holds
//! chain-head pointers (byte offsets into the elements region, `-1` when
//! empty); each chain node is `next, value_offset, key_len, key_bytes`.
//! New nodes are prepended, so a chain lists its keys most-recent first.
//!
//! The bucket hash is pinned to XXH64 (seed 0) over the key's UTF-8 bytes so
//! that containers stay readable across builds, platforms and versions.

use crate::codec::{self, WIDTH};
use crate::error::{ErrorKind, Result};
use crate::header::Header;
use exn::{OptionExt, ResultExt};
use std::io::{Read, Seek, SeekFrom};
use tracing::instrument;
use twox_hash::XxHash64;

/// Chain pointer meaning "no node".
pub const EMPTY: i64 = -1;
/// Smallest possible chain node: three integers and an empty key.
const MIN_NODE_SIZE: u64 = (WIDTH * 3) as u64;

/// Canonical 64-bit hash of a key.
#[inline]
#[must_use]
pub fn hash_key(key: &str) -> u64 {
    XxHash64::oneshot(0, key.as_bytes())
}

/// Bucket index for `key` in a table of `bucket_count` buckets.
///
/// The digest is treated as a signed integer (as the format always has) and
/// folded with a Euclidean remainder, so the result is in `[0, bucket_count)`.
#[inline]
#[must_use]
pub fn bucket_for(key: &str, bucket_count: u64) -> u64 {
    debug_assert!(bucket_count > 0, "bucket array must not be empty");
    (hash_key(key) as i64).rem_euclid(bucket_count as i64) as u64
}

/// A hash index built in memory, ready to be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashIndex {
    buckets: Vec<i64>,
    elements: Vec<u8>,
}

impl HashIndex {
    /// Build an index over `(key, value_offset)` pairs.
    ///
    /// Uses twice as many buckets as keys (load factor 0.5), and never fewer
    /// than one so an empty index is still a valid table.
    pub fn build<K: AsRef<str>>(entries: &[(K, u64)]) -> Result<Self> {
        let bucket_count = (entries.len() * 2).max(1);
        Self::with_bucket_count(entries, bucket_count)
    }

    pub(crate) fn with_bucket_count<K: AsRef<str>>(entries: &[(K, u64)], bucket_count: usize) -> Result<Self> {
        let mut buckets = vec![EMPTY; bucket_count];
        let mut elements = Vec::new();
        for (key, value_offset) in entries {
            let key = key.as_ref();
            let bucket = bucket_for(key, bucket_count as u64) as usize;
            let node = i64::try_from(elements.len()).or_raise(|| ErrorKind::Invariant("elements region size"))?;
            let value_offset = i64::try_from(*value_offset).or_raise(|| ErrorKind::Invariant("value offset"))?;
            codec::write_i64(&mut elements, buckets[bucket])?;
            codec::write_i64(&mut elements, value_offset)?;
            codec::write_bytes(&mut elements, key.as_bytes())?;
            buckets[bucket] = node;
        }
        Ok(Self { buckets, elements })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Chain-head pointers, one per bucket.
    pub fn buckets(&self) -> &[i64] {
        &self.buckets
    }

    /// Serialized chain nodes.
    pub fn elements(&self) -> &[u8] {
        &self.elements
    }

    /// Serialize into the table region (bucket count, then pointers) and the
    /// elements region.
    pub fn into_regions(self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut table = Vec::with_capacity((self.buckets.len() + 1) * WIDTH);
        codec::write_len(&mut table, self.buckets.len())?;
        for pointer in &self.buckets {
            codec::write_i64(&mut table, *pointer)?;
        }
        Ok((table, self.elements))
    }
}

/// Read the bucket count stored at the start of the table region, checking
/// that the whole bucket array fits before the elements region.
pub fn read_bucket_count<R: Read + Seek>(reader: &mut R, header: &Header) -> Result<u64> {
    reader.seek(SeekFrom::Start(header.table_offset)).or_raise(|| ErrorKind::Io)?;
    let bucket_count = codec::read_len(reader, "bucket count")?;
    if bucket_count == 0 {
        exn::bail!(ErrorKind::CorruptFormat("empty bucket array"));
    }
    let table_end = bucket_count
        .checked_add(1)
        .and_then(|n| n.checked_mul(WIDTH as u64))
        .and_then(|len| header.table_offset.checked_add(len))
        .ok_or_raise(|| ErrorKind::CorruptFormat("bucket count"))?;
    if table_end > header.elements_offset {
        exn::bail!(ErrorKind::CorruptFormat("bucket array overruns its region"));
    }
    Ok(bucket_count)
}

/// Resolve `key` to its value offset by walking a single chain.
///
/// Returns `Ok(None)` when the chain ends without a match. Only the bucket
/// pointer and the nodes on that one chain are read. A chain can't be longer
/// than the number of nodes that fit in the elements region, so a walk past
/// that (a cycle) or a pointer outside the region fails
/// [`CorruptFormat`](ErrorKind::CorruptFormat) rather than looping.
#[instrument(level = "trace", skip(reader, header))]
pub fn find<R: Read + Seek>(reader: &mut R, header: &Header, bucket_count: u64, key: &str) -> Result<Option<u64>> {
    let bucket = bucket_for(key, bucket_count);
    let slot = (1 + bucket)
        .checked_mul(WIDTH as u64)
        .and_then(|offset| header.table_offset.checked_add(offset))
        .ok_or_raise(|| ErrorKind::CorruptFormat("bucket count"))?;
    reader.seek(SeekFrom::Start(slot)).or_raise(|| ErrorKind::Io)?;
    let mut pointer = codec::read_i64(reader, "bucket pointer")?;

    let region = header.elements_len();
    let max_steps = region / MIN_NODE_SIZE;
    let mut steps = 0;
    while pointer != EMPTY {
        let offset = u64::try_from(pointer).or_raise(|| ErrorKind::CorruptFormat("chain pointer"))?;
        if offset + MIN_NODE_SIZE > region {
            exn::bail!(ErrorKind::CorruptFormat("chain pointer outside elements region"));
        }
        steps += 1;
        if steps > max_steps {
            exn::bail!(ErrorKind::CorruptFormat("cyclic hash chain"));
        }
        reader.seek(SeekFrom::Start(header.elements_offset + offset)).or_raise(|| ErrorKind::Io)?;
        let next = codec::read_i64(reader, "chain node")?;
        let value_offset = codec::read_i64(reader, "chain node")?;
        let node_key = codec::read_bytes(reader, "chain key")?;
        if node_key == key.as_bytes() {
            let value_offset = u64::try_from(value_offset).or_raise(|| ErrorKind::CorruptFormat("value offset"))?;
            return Ok(Some(value_offset));
        }
        pointer = next;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HEADER_SIZE;
    use rstest::rstest;
    use std::io::Cursor;

    /// Lay a built index out as `header | table | elements` with an empty
    /// chapter section and no images.
    fn layout(index: HashIndex) -> (Header, Cursor<Vec<u8>>) {
        let (table, elements) = index.into_regions().unwrap();
        let header = Header::for_sections(0, table.len(), elements.len());
        let mut buffer = Vec::new();
        header.write_to(&mut buffer).unwrap();
        buffer.extend_from_slice(&table);
        buffer.extend_from_slice(&elements);
        (header, Cursor::new(buffer))
    }

    fn keys(n: usize) -> Vec<(String, u64)> {
        (0..n).map(|i| (format!("https://example.com/chapter/{i}"), (i * 100) as u64)).collect()
    }

    #[test]
    fn test_hash_is_pinned() {
        // XXH64("", seed = 0); changing this breaks every existing container.
        assert_eq!(hash_key(""), 0xef46_db37_51d8_e999);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(7, 14)]
    #[case(100, 200)]
    fn test_bucket_count_is_twice_keys(#[case] n: usize, #[case] expected: usize) {
        let index = HashIndex::build(&keys(n)).unwrap();
        assert_eq!(index.bucket_count(), expected);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(1_000_003)]
    fn test_bucket_is_in_range(#[case] bucket_count: u64) {
        for (key, _) in keys(50) {
            assert!(bucket_for(&key, bucket_count) < bucket_count);
        }
    }

    #[test]
    fn test_every_key_is_found() {
        let entries = keys(64);
        let (header, mut reader) = layout(HashIndex::build(&entries).unwrap());
        let bucket_count = read_bucket_count(&mut reader, &header).unwrap();
        assert_eq!(bucket_count, 128);
        for (key, offset) in &entries {
            assert_eq!(find(&mut reader, &header, bucket_count, key).unwrap(), Some(*offset));
        }
    }

    #[test]
    fn test_missing_key() {
        let (header, mut reader) = layout(HashIndex::build(&keys(8)).unwrap());
        let bucket_count = read_bucket_count(&mut reader, &header).unwrap();
        assert_eq!(find(&mut reader, &header, bucket_count, "nonexistent").unwrap(), None);
    }

    #[test]
    fn test_empty_index_has_one_empty_bucket() {
        let index = HashIndex::build::<&str>(&[]).unwrap();
        assert_eq!(index.buckets(), &[EMPTY]);
        assert!(index.elements().is_empty());
        let (header, mut reader) = layout(index);
        let bucket_count = read_bucket_count(&mut reader, &header).unwrap();
        assert_eq!(find(&mut reader, &header, bucket_count, "anything").unwrap(), None);
    }

    #[test]
    fn test_single_bucket_chain_holds_everything() {
        // Worst case: every key collides into one chain.
        let entries = keys(20);
        let index = HashIndex::with_bucket_count(&entries, 1).unwrap();
        let (header, mut reader) = layout(index);
        for (key, offset) in &entries {
            assert_eq!(find(&mut reader, &header, 1, key).unwrap(), Some(*offset));
        }
        assert_eq!(find(&mut reader, &header, 1, "not/here").unwrap(), None);
    }

    #[test]
    fn test_chain_is_most_recent_first() {
        let entries = [("a", 1), ("b", 2)];
        let index = HashIndex::with_bucket_count(&entries, 1).unwrap();
        // "a" was written first at offset 0; "b" follows and becomes the head.
        let b_node = 3 * WIDTH as i64 + 1;
        assert_eq!(index.buckets(), &[b_node]);
        assert_eq!(codec::decode_i64(&index.elements()[b_node as usize..]).unwrap(), 0);
        assert_eq!(codec::decode_i64(index.elements()).unwrap(), EMPTY);
    }

    #[test]
    fn test_cyclic_chain_is_rejected() {
        // One node whose `next` points back at itself.
        let mut elements = Vec::new();
        codec::write_i64(&mut elements, 0).unwrap();
        codec::write_i64(&mut elements, 0).unwrap();
        codec::write_bytes(&mut elements, b"k").unwrap();
        let index = HashIndex { buckets: vec![0], elements };
        let (header, mut reader) = layout(index);
        let err = find(&mut reader, &header, 1, "other").unwrap_err();
        assert_eq!(*err, ErrorKind::CorruptFormat("cyclic hash chain"));
    }

    #[test]
    fn test_pointer_outside_region_is_rejected() {
        let index = HashIndex { buckets: vec![4096], elements: Vec::new() };
        let (header, mut reader) = layout(index);
        let err = find(&mut reader, &header, 1, "key").unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptFormat(_)));
    }

    #[rstest]
    #[case::overflows_table_end((1 << 61) - 2)]
    #[case::overflows_table_len(u64::MAX >> 1)]
    #[case::past_elements(1 << 20)]
    fn test_oversized_bucket_count_is_rejected(#[case] bucket_count: u64) {
        let header = Header::for_sections(8, 8, 0);
        let mut buffer = Vec::new();
        header.write_to(&mut buffer).unwrap();
        codec::write_i64(&mut buffer, 0).unwrap();
        codec::write_i64(&mut buffer, bucket_count as i64).unwrap();
        let err = read_bucket_count(&mut Cursor::new(buffer), &header).unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptFormat(_)));
    }

    #[test]
    fn test_slot_past_address_space_is_rejected() {
        let header = Header {
            chapters_offset: HEADER_SIZE,
            table_offset: u64::MAX - 4,
            elements_offset: u64::MAX,
            images_offset: u64::MAX,
        };
        let err = find(&mut Cursor::new(Vec::new()), &header, 4, "key").unwrap_err();
        assert_eq!(*err, ErrorKind::CorruptFormat("bucket count"));
    }

    #[test]
    fn test_bucket_array_must_fit() {
        let (mut header, mut reader) = layout(HashIndex::build(&keys(4)).unwrap());
        header.elements_offset = HEADER_SIZE + 16;
        let err = read_bucket_count(&mut reader, &header).unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptFormat(_)));
    }
}
