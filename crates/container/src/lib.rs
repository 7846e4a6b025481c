//! Single-file, self-indexing binary cache for chapter page images.
//!
//! A container is written once from an in-memory snapshot and then read by
//! key without loading unrelated chapters. All integers are 8-byte
//! big-endian.
//!
//! ```text
//! [0..8)              magic constant ("komisanw")
//! [8..40)             chapters, table, elements, images offsets
//! [chapters..table)   chapter count, then per chapter: sequence, name, key
//! [table..elements)   bucket count, then one chain-head pointer per bucket (-1 = empty)
//! [elements..images)  chain nodes: next, value offset, key
//! [images..)          per key: blob count, then length-prefixed blobs
//! ```
//!
//! There is no incremental update path: "updating" a cache means encoding a
//! new container and atomically replacing the old file ([`write`]).

pub mod codec;
mod encode;
pub mod error;
mod header;
pub mod index;
mod models;
mod read;

pub use crate::encode::{encode, persist, write};
pub use crate::header::{HEADER_SIZE, Header, MAGIC};
pub use crate::index::HashIndex;
pub use crate::models::{ChapterRecord, Images};
pub use crate::read::{Container, Reader};
