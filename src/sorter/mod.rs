//! External Sorter.
//!
//! One [`Sorter`] per index. Records arrive from the scanner in row
//! order (unsorted) and are buffered until the per-index memory budget
//! is exhausted, at which point the buffer is sorted
//! in-memory and spilled to a temp `.cidx` file. [`Sorter::finalize`]
//! does a final spill of anything left in memory, then k-way merges
//! every spill into the real output file, building the bloom filter as
//! a side effect of the merge.
//!
//! Grounded on `storage/sstable/writer.rs`'s buffer-then-flush structure,
//! generalized from "one flush" to "one spill of many, merged at the
//! end" to support inputs larger than the memory budget.

mod heap;

use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::codec::{BlockWriter, FinishedFile};
use crate::error::Error;
use crate::types::{IndexRecord, RECORD_SIZE};
use crate::Result;

/// Estimated per-record bookkeeping overhead (`Vec` growth, allocator
/// padding) added on top of [`RECORD_SIZE`] when sizing the in-memory
/// buffer against a byte budget.
const RECORD_OVERHEAD_BYTES: usize = 24;

/// Never buffer fewer than this many records before spilling, even under
/// a tiny memory budget.
const MIN_BUFFER_RECORDS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collecting,
    Merging,
    Done,
}

/// Outcome of a completed sort.
pub struct SortReport {
    pub total_records: u64,
    pub distinct_count: u64,
    pub block_count: usize,
}

/// One index's external sort-and-merge pipeline.
pub struct Sorter {
    state: State,
    spill_dir: PathBuf,
    buffer: Vec<IndexRecord>,
    buffer_capacity: usize,
    spill_files: Vec<PathBuf>,
    spill_seq: usize,
    total_records: u64,
    bloom_fp_rate: f64,
}

impl Sorter {
    /// `memory_budget_bytes` is this sorter's share of the configured
    /// total (see [`crate::config::Config::memory_per_index`]).
    pub fn new(spill_dir: impl Into<PathBuf>, memory_budget_bytes: usize, bloom_fp_rate: f64) -> Self {
        let per_record = RECORD_SIZE + RECORD_OVERHEAD_BYTES;
        let buffer_capacity = (memory_budget_bytes / per_record).max(MIN_BUFFER_RECORDS);
        Self {
            state: State::Collecting,
            spill_dir: spill_dir.into(),
            buffer: Vec::with_capacity(buffer_capacity.min(MIN_BUFFER_RECORDS * 8)),
            buffer_capacity,
            spill_files: Vec::new(),
            spill_seq: 0,
            total_records: 0,
            bloom_fp_rate,
        }
    }

    /// Buffer one record, spilling to disk if the buffer is full.
    pub fn add(&mut self, rec: IndexRecord) -> Result<()> {
        if self.state != State::Collecting {
            return Err(Error::internal("Sorter::add called after finalize"));
        }
        self.buffer.push(rec);
        self.total_records += 1;
        if self.buffer.len() >= self.buffer_capacity {
            self.spill_buffer()?;
        }
        Ok(())
    }

    fn spill_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_unstable();

        let path = self.spill_dir.join(format!("spill-{:06}.cidx", self.spill_seq));
        self.spill_seq += 1;

        let mut writer = BlockWriter::create(&path)?;
        for rec in &self.buffer {
            writer.write_record(rec)?;
        }
        writer.close()?;

        self.spill_files.push(path);
        self.buffer.clear();
        Ok(())
    }

    /// Finish collecting and write the final, merged `.cidx` file plus
    /// its sidecar bloom filter. Consumes `self`; spill files are removed
    /// once the merge succeeds.
    pub fn finalize(mut self, output_path: impl AsRef<Path>, bloom_path: impl AsRef<Path>) -> Result<SortReport> {
        if self.state != State::Collecting {
            return Err(Error::internal("Sorter::finalize called twice"));
        }
        self.state = State::Merging;

        let mut bloom = BloomFilter::new(self.total_records.max(1), self.bloom_fp_rate)?;

        let report = if self.spill_files.is_empty() {
            // Everything fit in memory: sort and write directly, no merge.
            self.buffer.sort_unstable();
            let mut writer = BlockWriter::create(output_path.as_ref())?;
            let mut distinct = 0u64;
            let mut last_key = None;
            for rec in &self.buffer {
                if last_key != Some(rec.key) {
                    distinct += 1;
                    last_key = Some(rec.key);
                }
                bloom.add(rec.trimmed_key());
                writer.write_record(rec)?;
            }
            let finished: FinishedFile = writer.close()?;
            SortReport {
                total_records: finished.total_records,
                distinct_count: distinct,
                block_count: finished.block_count,
            }
        } else {
            self.spill_buffer()?;
            let mut writer = BlockWriter::create(output_path.as_ref())?;
            let stats = heap::merge_spills(&self.spill_files, &mut writer, &mut bloom)?;
            let finished = writer.close()?;
            for path in &self.spill_files {
                let _ = std::fs::remove_file(path);
            }
            SortReport {
                total_records: finished.total_records,
                distinct_count: stats.distinct_count,
                block_count: finished.block_count,
            }
        };

        bloom.save(bloom_path.as_ref())?;
        self.state = State::Done;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BlockReader;
    use tempfile::tempdir;

    #[test]
    fn everything_fits_in_memory_skips_spilling() {
        let dir = tempdir().unwrap();
        let mut sorter = Sorter::new(dir.path(), 10 * 1024 * 1024, 0.01);
        for (i, k) in ["banana", "apple", "cherry"].iter().enumerate() {
            sorter
                .add(IndexRecord::new(k.as_bytes(), i as i64 * 10, i as i64 + 2))
                .unwrap();
        }
        let out = dir.path().join("out.cidx");
        let bloom_path = dir.path().join("out.bloom");
        let report = sorter.finalize(&out, &bloom_path).unwrap();
        assert_eq!(report.total_records, 3);
        assert_eq!(report.distinct_count, 3);

        let reader = BlockReader::open(&out).unwrap();
        let recs = reader.read_block(&reader.blocks()[0]).unwrap();
        assert_eq!(recs[0].trimmed_key(), b"apple");
        assert_eq!(recs[2].trimmed_key(), b"cherry");
    }

    #[test]
    fn small_budget_forces_spills_and_merges_correctly() {
        let dir = tempdir().unwrap();
        // Tiny budget: buffer_capacity clamps to MIN_BUFFER_RECORDS (1000),
        // so use far more records than that to force multiple spills.
        let mut sorter = Sorter::new(dir.path(), 1, 0.01);
        let total = 2500u32;
        for i in 0..total {
            let key = format!("k{:06}", total - i); // insert in descending order
            sorter
                .add(IndexRecord::new(key.as_bytes(), i as i64, i as i64 + 2))
                .unwrap();
        }
        let out = dir.path().join("out.cidx");
        let bloom_path = dir.path().join("out.bloom");
        let report = sorter.finalize(&out, &bloom_path).unwrap();
        assert_eq!(report.total_records, total as u64);
        assert_eq!(report.distinct_count, total as u64);

        let reader = BlockReader::open(&out).unwrap();
        let mut all = Vec::new();
        for meta in reader.blocks() {
            all.extend(reader.read_block(meta).unwrap());
        }
        assert_eq!(all.len(), total as usize);
        for w in all.windows(2) {
            assert!(w[0] <= w[1], "output not sorted: {:?} > {:?}", w[0].key, w[1].key);
        }

        let bloom = BloomFilter::load(&bloom_path).unwrap();
        assert!(bloom.might_contain(b"k000001"));
    }

    #[test]
    fn duplicate_keys_count_as_one_distinct_value() {
        let dir = tempdir().unwrap();
        let mut sorter = Sorter::new(dir.path(), 10 * 1024 * 1024, 0.01);
        for i in 0..5 {
            sorter.add(IndexRecord::new(b"same", i, i + 2)).unwrap();
        }
        let out = dir.path().join("out.cidx");
        let bloom_path = dir.path().join("out.bloom");
        let report = sorter.finalize(&out, &bloom_path).unwrap();
        assert_eq!(report.total_records, 5);
        assert_eq!(report.distinct_count, 1);
    }
}
