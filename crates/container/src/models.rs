use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Ordered page images for each chapter key.
///
/// A [`BTreeMap`] so that encoding the same snapshot twice always produces
/// byte-identical containers.
pub type Images = BTreeMap<String, Vec<Vec<u8>>>;

/// One entry of the chapter table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChapterRecord {
    /// Stable identifier, usually the chapter's source URL. Unique within a
    /// container and used as the key for its page images.
    pub key: String,
    /// Human-readable chapter title.
    pub name: String,
    /// Chapter number as published.
    pub sequence: i64,
}
impl ChapterRecord {
    pub fn new(key: impl Into<String>, name: impl Into<String>, sequence: i64) -> Self {
        Self { key: key.into(), name: name.into(), sequence }
    }
}
impl Display for ChapterRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "#{} {}", self.sequence, self.name)
    }
}
