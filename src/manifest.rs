//! Build manifests: the chapter list and page locations to fetch.
//!
//! ```json
//! {
//!   "chapters": [
//!     { "key": "https://example.com/c/1", "name": "Chapter 1", "sequence": 1,
//!       "pages": ["https://img.example.com/1/001.jpg", "https://img.example.com/1/002.jpg"] }
//!   ]
//! }
//! ```

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use komi_container::ChapterRecord;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    pub chapters: Vec<ManifestChapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestChapter {
    #[serde(flatten)]
    pub record: ChapterRecord,
    /// Page image locations, in reading order.
    #[serde(default)]
    pub pages: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).or_raise(|| ErrorKind::Manifest(path.to_path_buf()))?;
        Self::from_reader(BufReader::new(file)).or_raise(|| ErrorKind::Manifest(path.to_path_buf()))
    }

    pub fn from_reader<R: Read>(reader: R) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }

    pub fn page_count(&self) -> usize {
        self.chapters.iter().map(|chapter| chapter.pages.len()).sum()
    }
}
