//! Core fixed-width data types shared by the codec, sorter, and query
//! engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Width of the `key` field inside an [`IndexRecord`], in bytes.
pub const KEY_WIDTH: usize = 64;

/// On-disk size of one [`IndexRecord`]: 64-byte key + 8-byte offset +
/// 8-byte line number.
pub const RECORD_SIZE: usize = KEY_WIDTH + 8 + 8;

/// One entry in a `.cidx` file: a right-zero-padded key, the byte offset
/// of the row in the CSV, and its 1-based line number.
///
/// Fixed width permits zero-allocation comparison and bulk I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: [u8; KEY_WIDTH],
    pub offset: i64,
    pub line: i64,
}

impl IndexRecord {
    /// Build a record from a (possibly composite, possibly oversized) key
    /// by right-zero-padding or truncating to [`KEY_WIDTH`] bytes.
    ///
    /// Truncation of composite keys longer than 64 bytes is a documented,
    /// deliberate limitation; it is silent at this layer — callers that
    /// care should check `raw_key.len() > KEY_WIDTH` themselves before
    /// calling this.
    pub fn new(raw_key: &[u8], offset: i64, line: i64) -> Self {
        let mut key = [0u8; KEY_WIDTH];
        let n = raw_key.len().min(KEY_WIDTH);
        key[..n].copy_from_slice(&raw_key[..n]);
        Self { key, offset, line }
    }

    /// The key with trailing zero padding stripped.
    pub fn trimmed_key(&self) -> &[u8] {
        let end = self
            .key
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.key[..end]
    }

    /// Encode to the 80-byte on-disk representation: key, then
    /// big-endian offset, then big-endian line. Big-endian is used so
    /// that a raw byte-compare of two encoded records agrees with
    /// `(key, offset)` ordering for non-negative offsets, matching how
    /// the rest of the format favors explicit, inspectable big-endian
    /// integers (the trailer length is big-endian for the same reason).
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[..KEY_WIDTH].copy_from_slice(&self.key);
        buf[KEY_WIDTH..KEY_WIDTH + 8].copy_from_slice(&self.offset.to_be_bytes());
        buf[KEY_WIDTH + 8..].copy_from_slice(&self.line.to_be_bytes());
        buf
    }

    /// Decode from the 80-byte on-disk representation.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut key = [0u8; KEY_WIDTH];
        key.copy_from_slice(&buf[..KEY_WIDTH]);
        let offset = i64::from_be_bytes(buf[KEY_WIDTH..KEY_WIDTH + 8].try_into().unwrap());
        let line = i64::from_be_bytes(buf[KEY_WIDTH + 8..].try_into().unwrap());
        Self { key, offset, line }
    }

    /// Ordering used everywhere records are sorted: `(key, offset)`.
    pub fn sort_key(&self) -> ([u8; KEY_WIDTH], i64) {
        (self.key, self.offset)
    }
}

impl PartialOrd for IndexRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Compare a fixed-width, zero-padded on-disk key to a variable-length
/// search key without allocating: the fixed key's trailing zero bytes are
/// trimmed virtually before comparing.
pub fn compare_key(stored: &[u8; KEY_WIDTH], search: &[u8]) -> std::cmp::Ordering {
    let end = stored
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    stored[..end].cmp(search)
}

/// Compose a single- or multi-column key the way the scanner and query
/// engine both must: a single value is used verbatim; two or more values
/// are joined as a bracketed, comma-separated, double-quoted list, e.g.
/// `["x","20"]`.
pub fn compose_key(values: &[&[u8]]) -> Vec<u8> {
    if values.len() == 1 {
        return values[0].to_vec();
    }
    let mut out = Vec::with_capacity(values.iter().map(|v| v.len() + 3).sum::<usize>() + 2);
    out.push(b'[');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.push(b'"');
        out.extend_from_slice(v);
        out.push(b'"');
    }
    out.push(b']');
    out
}

/// A single footer entry describing one compressed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMeta {
    #[serde(rename = "startKey")]
    pub start_key: Vec<u8>,
    pub offset: u64,
    pub length: u64,
    #[serde(rename = "recordCount")]
    pub record_count: u64,
    #[serde(rename = "isDistinct")]
    pub is_distinct: bool,
}

/// Per-index summary stored in `<csv>_meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    #[serde(rename = "distinctCount")]
    pub distinct_count: u64,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
}

/// Current on-disk format version, stamped into `<csv>_meta.json`.
///
/// Older metadata files lack this field, and a `recordCount == 0` on any
/// of their blocks must be treated as "unknown" rather than "truly empty"
/// for the count-all shortcut.
pub const FORMAT_VERSION: u8 = 1;

/// `<csv>_meta.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    #[serde(rename = "capturedAt")]
    pub captured_at: String,
    #[serde(rename = "totalRows")]
    pub total_rows: u64,
    #[serde(rename = "csvSize")]
    pub csv_size: u64,
    #[serde(rename = "csvMtime")]
    pub csv_mtime: i64,
    #[serde(rename = "csvHash")]
    pub csv_hash: String,
    pub indexes: std::collections::BTreeMap<String, IndexSummary>,
    #[serde(rename = "formatVersion", default)]
    pub format_version: u8,
}

/// Size of each of the (up to three) samples hashed into the CSV
/// fingerprint.
pub const FINGERPRINT_SAMPLE_BYTES: usize = 512 * 1024;

/// SHA-1 of up to three samples (start, middle, end) of `data`, used for
/// integrity checks. The middle sample is only taken when `data` is at
/// least 3 samples long; the end sample only when it is at least 1
/// sample long.
pub fn csv_fingerprint(data: &[u8]) -> String {
    use sha1::{Digest, Sha1};

    let mut hasher = Sha1::new();
    let len = data.len();
    let sample = FINGERPRINT_SAMPLE_BYTES;

    hasher.update(&data[..sample.min(len)]);

    if len >= sample * 3 {
        let mid = len / 2;
        let mid_start = mid.saturating_sub(sample / 2);
        hasher.update(&data[mid_start..(mid_start + sample).min(len)]);
    }
    if len >= sample {
        hasher.update(&data[len - sample..]);
    }

    format!("{:x}", hasher.finalize())
}

/// A CSV's modification time, in seconds since the Unix epoch.
pub fn csv_mtime(path: impl AsRef<Path>) -> Result<i64> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

/// `<csv>_meta.json`, sitting next to the CSV file itself.
pub fn meta_path_for(csv_path: impl AsRef<Path>) -> PathBuf {
    let mut s = csv_path.as_ref().as_os_str().to_owned();
    s.push("_meta.json");
    PathBuf::from(s)
}

/// `<csv>_updates.json`, sitting next to the CSV file.
pub fn updates_path_for(csv_path: impl AsRef<Path>) -> PathBuf {
    let mut s = csv_path.as_ref().as_os_str().to_owned();
    s.push("_updates.json");
    PathBuf::from(s)
}

/// Index name used both as the `<csvBase>_<name>.cidx` file suffix and
/// as the key in `<csv>_meta.json`'s `indexes` map: the lower-cased
/// column names, sorted lexicographically, joined with `_`. Sorting here
/// is what lets the query engine's prefix probe land on the same name
/// regardless of the order columns were requested in.
pub fn index_name(columns: &[String]) -> String {
    let mut lowered: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();
    lowered.sort();
    lowered.join("_")
}

/// `<output_dir>/<csv_base>_<name>.cidx`.
pub fn cidx_path(output_dir: impl AsRef<Path>, csv_base: &str, name: &str) -> PathBuf {
    output_dir.as_ref().join(format!("{csv_base}_{name}.cidx"))
}

/// `<output_dir>/<csv_base>_<name>.cidx.bloom`.
pub fn bloom_path(output_dir: impl AsRef<Path>, csv_base: &str, name: &str) -> PathBuf {
    output_dir.as_ref().join(format!("{csv_base}_{name}.cidx.bloom"))
}
