//! Block Codec — the `.cidx` file format.
//!
//! ```text
//! [magic "CIDX" 4B][block0][block1]...[blockN][footer-json][footer-len i64 BE]
//! ```
//!
//! Each block is an LZ4-compressed dense concatenation of
//! [`crate::types::IndexRecord`]s. The footer is a JSON array of
//! [`crate::types::BlockMeta`]. Grounded on `storage/sstable/compression.rs`'s
//! algorithm-handler split and `storage/sstable/reader.rs`'s
//! footer/block-cache split, collapsed to a single compression algorithm
//! (LZ4) rather than a pluggable set.

mod reader;
mod writer;

pub use reader::BlockReader;
pub use writer::BlockWriter;

/// File magic bytes.
pub const MAGIC: &[u8; 4] = b"CIDX";

/// Target uncompressed block size before a flush is triggered.
pub const TARGET_BLOCK_BYTES: usize = 64 * 1024;
