//! k-way merge over sorted spill files.
//!
//! Each spill file is itself a `.cidx`-format file (written by
//! [`crate::codec::BlockWriter`]), so merging reuses [`crate::codec::BlockReader`]
//! rather than inventing a second on-disk format for temp files. A single
//! type-specialized binary min-heap drives the merge — no boxed
//! `dyn Iterator`, so the comparison in the hot loop never goes through a
//! vtable. Grounded on `storage/sstable/reader.rs`'s block-at-a-time
//! cursor pattern.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use crate::bloom::BloomFilter;
use crate::codec::{BlockReader, BlockWriter};
use crate::types::{IndexRecord, KEY_WIDTH};
use crate::Result;

/// A read cursor over one spill file, holding the current block's
/// decoded records in memory and advancing block-by-block.
struct Cursor {
    reader: BlockReader,
    block_idx: usize,
    records: Vec<IndexRecord>,
    pos: usize,
}

impl Cursor {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BlockReader::open(path)?;
        let records = if reader.blocks().is_empty() {
            Vec::new()
        } else {
            reader.read_block(&reader.blocks()[0])?
        };
        Ok(Self {
            reader,
            block_idx: 0,
            records,
            pos: 0,
        })
    }

    fn current(&self) -> Option<IndexRecord> {
        self.records.get(self.pos).copied()
    }

    fn advance(&mut self) -> Result<()> {
        self.pos += 1;
        if self.pos >= self.records.len() {
            self.block_idx += 1;
            if self.block_idx < self.reader.blocks().len() {
                self.records = self.reader.read_block(&self.reader.blocks()[self.block_idx])?;
            } else {
                self.records = Vec::new();
            }
            self.pos = 0;
        }
        Ok(())
    }
}

/// One slot in the merge heap: the next record's sort key plus which
/// cursor it came from. `Ord` is reversed so `BinaryHeap` (a max-heap)
/// behaves as a min-heap over `(key, offset)`.
struct HeapSlot {
    key: ([u8; KEY_WIDTH], i64),
    cursor: usize,
}

impl PartialEq for HeapSlot {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapSlot {}
impl PartialOrd for HeapSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

/// Outcome of a merge pass.
pub struct MergeStats {
    pub total_records: u64,
    pub distinct_count: u64,
}

/// Merge every spill file in `paths` into `writer` in sorted order,
/// populating `bloom` with every distinct key seen. Tested up to k = 64
/// spill files.
pub fn merge_spills(
    paths: &[std::path::PathBuf],
    writer: &mut BlockWriter,
    bloom: &mut BloomFilter,
) -> Result<MergeStats> {
    let mut cursors: Vec<Cursor> = paths.iter().map(Cursor::open).collect::<Result<_>>()?;
    let mut heap = BinaryHeap::with_capacity(cursors.len());

    for (i, c) in cursors.iter().enumerate() {
        if let Some(rec) = c.current() {
            heap.push(HeapSlot {
                key: rec.sort_key(),
                cursor: i,
            });
        }
    }

    let mut total_records = 0u64;
    let mut distinct_count = 0u64;
    let mut last_key: Option<[u8; KEY_WIDTH]> = None;

    while let Some(slot) = heap.pop() {
        let rec = cursors[slot.cursor].current().expect("heap slot outlived its record");

        if last_key != Some(rec.key) {
            distinct_count += 1;
            last_key = Some(rec.key);
        }
        bloom.add(rec.trimmed_key());
        writer.write_record(&rec)?;
        total_records += 1;

        cursors[slot.cursor].advance()?;
        if let Some(next) = cursors[slot.cursor].current() {
            heap.push(HeapSlot {
                key: next.sort_key(),
                cursor: slot.cursor,
            });
        }
    }

    Ok(MergeStats {
        total_records,
        distinct_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BlockWriter;
    use tempfile::tempdir;

    fn write_spill(dir: &Path, name: &str, keys: &[&str]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut w = BlockWriter::create(&path).unwrap();
        for (i, k) in keys.iter().enumerate() {
            w.write_record(&IndexRecord::new(k.as_bytes(), i as i64 * 10, i as i64 + 2))
                .unwrap();
        }
        w.close().unwrap();
        path
    }

    #[test]
    fn merges_in_sorted_order_and_counts_distinct() {
        let dir = tempdir().unwrap();
        let a = write_spill(dir.path(), "a.cidx", &["apple", "cherry", "fig"]);
        let b = write_spill(dir.path(), "b.cidx", &["banana", "cherry", "grape"]);

        let out_path = dir.path().join("out.cidx");
        let mut writer = BlockWriter::create(&out_path).unwrap();
        let mut bloom = BloomFilter::new(10, 0.01).unwrap();
        let stats = merge_spills(&[a, b], &mut writer, &mut bloom).unwrap();
        writer.close().unwrap();

        assert_eq!(stats.total_records, 6);
        assert_eq!(stats.distinct_count, 5); // "cherry" appears in both

        let reader = BlockReader::open(&out_path).unwrap();
        let mut all = Vec::new();
        for meta in reader.blocks() {
            all.extend(reader.read_block(meta).unwrap());
        }
        let keys: Vec<_> = all.iter().map(|r| r.trimmed_key().to_vec()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(bloom.might_contain(b"fig"));
    }

    #[test]
    fn merges_many_spill_files() {
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..64 {
            let key = format!("k{i:03}");
            paths.push(write_spill(dir.path(), &format!("spill{i}.cidx"), &[&key]));
        }
        let out_path = dir.path().join("out.cidx");
        let mut writer = BlockWriter::create(&out_path).unwrap();
        let mut bloom = BloomFilter::new(64, 0.01).unwrap();
        let stats = merge_spills(&paths, &mut writer, &mut bloom).unwrap();
        writer.close().unwrap();
        assert_eq!(stats.total_records, 64);
        assert_eq!(stats.distinct_count, 64);
    }
}
