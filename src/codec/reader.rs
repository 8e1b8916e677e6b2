use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use memmap2::Mmap;

use crate::error::Error;
use crate::types::{BlockMeta, IndexRecord, RECORD_SIZE};
use crate::Result;

use super::MAGIC;

const TRAILER_LEN_SIZE: usize = 8;

/// Random-access reader for a `.cidx` file.
///
/// Always memory-maps the file: the footer is parsed directly out of the
/// mapping and `read_block` slices into it rather than issuing a syscall,
/// giving zero-copy reads of compressed block bytes.
pub struct BlockReader {
    mmap: Mmap,
    blocks: Vec<BlockMeta>,
    total_records: u64,
}

impl BlockReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len < MAGIC.len() as u64 + TRAILER_LEN_SIZE as u64 {
            return Err(Error::corrupt("index file shorter than trailer"));
        }

        let mmap = unsafe { Mmap::map(&file)? };

        if &mmap[..MAGIC.len()] != MAGIC {
            return Err(Error::corrupt("bad magic"));
        }

        let trailer_start = mmap.len() - TRAILER_LEN_SIZE;
        let footer_len = i64::from_be_bytes(mmap[trailer_start..].try_into().unwrap());
        if footer_len < 0 {
            return Err(Error::corrupt("negative footer length"));
        }
        let footer_len = footer_len as usize;

        if footer_len > trailer_start || trailer_start - footer_len < MAGIC.len() {
            return Err(Error::corrupt("footer length points before magic"));
        }
        let footer_start = trailer_start - footer_len;

        let blocks: Vec<BlockMeta> = serde_json::from_slice(&mmap[footer_start..trailer_start])
            .map_err(|e| Error::corrupt(format!("unparseable footer: {e}")))?;

        let total_records = blocks.iter().map(|b| b.record_count).sum();

        Ok(Self {
            mmap,
            blocks,
            total_records,
        })
    }

    /// The sparse footer, in file order (sorted by `start_key`).
    pub fn blocks(&self) -> &[BlockMeta] {
        &self.blocks
    }

    /// Sum of `record_count` across all blocks.
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Decompress and parse one block's records.
    pub fn read_block(&self, meta: &BlockMeta) -> Result<Vec<IndexRecord>> {
        let start = meta.offset as usize;
        let end = start + meta.length as usize;
        if end > self.mmap.len() {
            return Err(Error::corrupt("block extends past end of file"));
        }
        let compressed = &self.mmap[start..end];
        let raw = lz4_flex::decompress_size_prepended(compressed)
            .map_err(|e| Error::corrupt(format!("lz4 decode failed: {e}")))?;
        if raw.len() % RECORD_SIZE != 0 {
            return Err(Error::corrupt("block payload is not a multiple of record size"));
        }

        let mut out = Vec::with_capacity(raw.len() / RECORD_SIZE);
        for chunk in raw.chunks_exact(RECORD_SIZE) {
            let arr: [u8; RECORD_SIZE] = chunk.try_into().unwrap();
            out.push(IndexRecord::decode(&arr));
        }
        Ok(out)
    }

    /// Binary-search the footer for the rightmost block whose `start_key`
    /// is `<= search_key`, then back-track over equal `start_key`s so a
    /// run that spans block boundaries is never missed.
    pub fn find_start_block(&self, search_key: &[u8]) -> Option<usize> {
        if self.blocks.is_empty() {
            return None;
        }

        // Rightmost index with start_key <= search_key, via partition_point
        // over "start_key <= search_key".
        let pos = self
            .blocks
            .partition_point(|b| b.start_key.as_slice() <= search_key);
        if pos == 0 {
            return None;
        }
        let mut idx = pos - 1;
        while idx > 0 && self.blocks[idx - 1].start_key == self.blocks[idx].start_key {
            idx -= 1;
        }
        Some(idx)
    }
}

/// Standalone trailer check, useful for a fast "is this even a `.cidx`
/// file" probe without mapping the whole thing (e.g. before an
/// integrity check reads the CSV instead).
pub fn read_trailer_len(path: impl AsRef<Path>) -> Result<i64> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < TRAILER_LEN_SIZE as u64 {
        return Err(Error::corrupt("file too short for trailer"));
    }
    file.seek(SeekFrom::End(-(TRAILER_LEN_SIZE as i64)))?;
    let mut buf = [0u8; TRAILER_LEN_SIZE];
    file.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}
