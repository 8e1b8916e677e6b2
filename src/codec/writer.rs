use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Error;
use crate::types::{BlockMeta, IndexRecord, KEY_WIDTH, RECORD_SIZE};
use crate::Result;

use super::{MAGIC, TARGET_BLOCK_BYTES};

/// Streaming writer for `.cidx` files.
///
/// Records must arrive already sorted by `(key, offset)` — the writer
/// does not sort, it only groups consecutive records into blocks and
/// tracks enough metadata to build the sparse footer.
pub struct BlockWriter {
    out: BufWriter<File>,
    offset: u64,
    pending: Vec<IndexRecord>,
    pending_bytes: usize,
    footer: Vec<BlockMeta>,
    total_records: u64,
}

impl BlockWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(MAGIC)?;
        Ok(Self {
            out,
            offset: MAGIC.len() as u64,
            pending: Vec::new(),
            pending_bytes: 0,
            footer: Vec::new(),
            total_records: 0,
        })
    }

    /// Append one record, flushing the current block if it has grown
    /// past [`TARGET_BLOCK_BYTES`] of uncompressed payload.
    pub fn write_record(&mut self, rec: &IndexRecord) -> Result<()> {
        self.pending.push(*rec);
        self.pending_bytes += RECORD_SIZE;
        self.total_records += 1;
        if self.pending_bytes >= TARGET_BLOCK_BYTES {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut raw = Vec::with_capacity(self.pending.len() * RECORD_SIZE);
        for rec in &self.pending {
            raw.extend_from_slice(&rec.encode());
        }
        let compressed = lz4_flex::compress_prepend_size(&raw);

        let start_key = self.pending[0].trimmed_key().to_vec();
        let is_distinct = self
            .pending
            .iter()
            .all(|r| r.key == self.pending[0].key);

        self.out.write_all(&compressed)?;
        self.footer.push(BlockMeta {
            start_key,
            offset: self.offset,
            length: compressed.len() as u64,
            record_count: self.pending.len() as u64,
            is_distinct,
        });

        self.offset += compressed.len() as u64;
        self.pending.clear();
        self.pending_bytes = 0;
        Ok(())
    }

    /// Flush any partial block and write the footer + trailer length.
    pub fn close(mut self) -> Result<FinishedFile> {
        self.flush_block()?;

        let footer_json = serde_json::to_vec(&self.footer).map_err(Error::from)?;
        self.out.write_all(&footer_json)?;
        self.out
            .write_all(&(footer_json.len() as i64).to_be_bytes())?;
        self.out.flush()?;

        Ok(FinishedFile {
            total_records: self.total_records,
            block_count: self.footer.len(),
        })
    }

    /// Total records appended so far (including the still-pending block).
    pub fn total_records(&self) -> u64 {
        self.total_records
    }
}

/// Summary returned once a [`BlockWriter`] is closed.
#[derive(Debug, Clone, Copy)]
pub struct FinishedFile {
    pub total_records: u64,
    pub block_count: usize,
}

const _: () = assert!(KEY_WIDTH == 64);
