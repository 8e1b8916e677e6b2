//! Parallel Scanner.
//!
//! Memory-maps the CSV, splits it into quote-safe chunks (one per
//! worker), and — per chunk — builds quote/separator/newline bitmaps
//! (`bitmap` submodule, SIMD-accelerated where available) and walks them
//! to extract the configured columns from every row, invoking a
//! thread-safe handler once per row with its composed key(s), byte
//! offset, 1-based line number, and worker id.
//!
//! Grounded on `platform/threading.rs`'s pool-gated task execution,
//! generalized from async `spawn_blocking` to a `rayon` scope: the
//! workload here is parallel OS-thread-like tasks over shared memory
//! with blocking I/O allowed, which `rayon` models more directly than an
//! async runtime.

pub mod bitmap;
mod chunk;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use memmap2::Mmap;

use crate::error::Error;
use crate::types::compose_key;
use crate::Result;

use bitmap::build_bitmaps;

/// One configured secondary index: a name and the (already
/// header-resolved) column positions that make up its key.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<usize>,
}

/// The parsed, case-insensitive CSV header.
#[derive(Debug, Clone)]
pub struct Header {
    names: Vec<String>,
    /// Byte length of the header line, including its trailing newline.
    pub byte_len: usize,
}

impl Header {
    /// Parse the first line of `data`. Strips a UTF-8 BOM; rejects a
    /// UTF-16 BOM outright.
    pub fn parse(data: &[u8], separator: u8) -> Result<Self> {
        if data.len() >= 2 && (data[..2] == [0xFF, 0xFE] || data[..2] == [0xFE, 0xFF]) {
            return Err(Error::invalid_input("UTF-16 CSV is not supported"));
        }

        let mut start = 0;
        if data.len() >= 3 && &data[..3] == b"\xEF\xBB\xBF" {
            start = 3;
        }

        let line_end = data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| start + p)
            .unwrap_or(data.len());
        let byte_len = if line_end < data.len() { line_end + 1 } else { line_end };

        let line = &data[start..line_end];
        let names = line
            .split(|&b| b == separator)
            .map(|raw| {
                let s = std::str::from_utf8(raw).unwrap_or_default();
                trim_name(s).to_lowercase()
            })
            .collect();

        Ok(Self { names, byte_len })
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        let needle = name.to_lowercase();
        self.names.iter().position(|n| *n == needle)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

fn trim_name(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// One row observed by the scanner.
pub struct ScanRow<'a> {
    pub worker_id: usize,
    pub offset: i64,
    pub line: i64,
    /// Composed key for each [`IndexDef`], in the same order they were
    /// passed to [`scan`].
    pub keys: &'a [Vec<u8>],
    /// The raw (quote-stripped) field slices for this row, in header
    /// column order. Borrowed from the memory map — copy anything kept
    /// past the handler call.
    pub fields: &'a [&'a [u8]],
}

/// Running scan counters, exposed so callers can report progress.
#[derive(Debug, Default)]
pub struct ScanStats {
    pub rows_scanned: AtomicU64,
    pub bytes_consumed: AtomicU64,
}

/// Outcome of a completed scan.
pub struct ScanReport {
    pub rows: u64,
    pub elapsed: Duration,
}

/// Strip one layer of surrounding double quotes, if present. Zero-copy.
#[inline]
fn extract_field(raw: &[u8]) -> &[u8] {
    if raw.len() >= 2 && raw[0] == b'"' && raw[raw.len() - 1] == b'"' {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// Scan `data` (the full, memory-mapped CSV, header included), invoking
/// `handler` once per data row on whichever worker thread parsed it.
///
/// `workers` selects the rayon pool size (default: host CPU count).
pub fn scan<F>(
    data: &[u8],
    separator: u8,
    workers: usize,
    indexes: &[IndexDef],
    handler: F,
) -> Result<ScanReport>
where
    F: Fn(ScanRow) + Sync,
{
    let start_time = Instant::now();
    let header = Header::parse(data, separator)?;
    let data_start = header.byte_len;

    let row_ends = chunk::safe_points(data, data_start, data.len());
    let boundaries = chunk::quote_safe_boundaries(data, data_start, data.len(), workers.max(1));

    let stats = ScanStats::default();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| Error::internal(format!("failed to build scanner thread pool: {e}")))?;

    pool.install(|| -> Result<()> {
        use rayon::prelude::*;
        (0..boundaries.len() - 1)
            .into_par_iter()
            .try_for_each(|w| {
                scan_chunk(
                    data,
                    boundaries[w],
                    boundaries[w + 1],
                    data_start,
                    &row_ends,
                    w,
                    separator,
                    indexes,
                    &handler,
                    &stats,
                )
            })
    })?;

    Ok(ScanReport {
        rows: stats.rows_scanned.load(Ordering::Relaxed),
        elapsed: start_time.elapsed(),
    })
}

#[allow(clippy::too_many_arguments)]
fn scan_chunk<F>(
    data: &[u8],
    chunk_start: usize,
    chunk_end: usize,
    data_start: usize,
    row_ends: &[usize],
    worker_id: usize,
    separator: u8,
    indexes: &[IndexDef],
    handler: &F,
    stats: &ScanStats,
) -> Result<()>
where
    F: Fn(ScanRow) + Sync,
{
    if chunk_start >= chunk_end {
        return Ok(());
    }

    let first_row_index = row_ends.partition_point(|&p| p <= chunk_start);
    let bitmaps = build_bitmaps(&data[chunk_start..chunk_end], separator);
    let local = |global: usize| global - chunk_start;

    let mut row_start = chunk_start;
    let mut row_idx = first_row_index;
    let mut field_start = row_start;
    let mut in_quotes = false;
    let mut fields: Vec<&[u8]> = Vec::new();

    for i in chunk_start..chunk_end {
        let li = local(i);
        if bitmaps.quote.get(li) {
            in_quotes = !in_quotes;
            continue;
        }
        if !in_quotes && bitmaps.separator.get(li) {
            fields.push(extract_field(&data[field_start..i]));
            field_start = i + 1;
            continue;
        }
        if !in_quotes && bitmaps.newline.get(li) {
            fields.push(extract_field(&data[field_start..i]));
            emit_row(
                data, row_start, row_idx, worker_id, &fields, indexes, handler, stats,
            );
            fields.clear();
            field_start = i + 1;
            row_start = i + 1;
            row_idx += 1;
        }
    }

    // Trailing row with no final newline (last line in the file).
    if field_start < chunk_end || row_start < chunk_end {
        fields.push(extract_field(&data[field_start..chunk_end]));
        emit_row(
            data, row_start, row_idx, worker_id, &fields, indexes, handler, stats,
        );
    }

    let _ = data_start;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn emit_row<F>(
    data: &[u8],
    row_start: usize,
    row_idx: usize,
    worker_id: usize,
    fields: &[&[u8]],
    indexes: &[IndexDef],
    handler: &F,
    stats: &ScanStats,
) where
    F: Fn(ScanRow) + Sync,
{
    let keys: Vec<Vec<u8>> = indexes
        .iter()
        .map(|idx| {
            let values: Vec<&[u8]> = idx
                .columns
                .iter()
                .map(|&c| fields.get(c).copied().unwrap_or(b""))
                .collect();
            compose_key(&values)
        })
        .collect();

    let row_len = data[row_start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| p)
        .unwrap_or(data.len() - row_start);

    handler(ScanRow {
        worker_id,
        offset: row_start as i64,
        line: row_idx as i64 + 2, // header is line 1
        keys: &keys,
        fields,
    });

    stats.rows_scanned.fetch_add(1, Ordering::Relaxed);
    stats
        .bytes_consumed
        .fetch_add(row_len as u64, Ordering::Relaxed);
}

/// Memory-map a CSV file for scanning.
pub fn map_file(path: impl AsRef<std::path::Path>) -> Result<Mmap> {
    let file = std::fs::File::open(path)?;
    Ok(unsafe { Mmap::map(&file)? })
}

/// Find the end (exclusive, not including the newline) of the row that
/// starts at `start`, tracking quote parity from that known-safe anchor.
/// Used by the query engine's random-access row reads.
pub fn row_end(data: &[u8], start: usize) -> usize {
    let mut in_quotes = false;
    for (i, &b) in data[start..].iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => return start + i,
            _ => {}
        }
    }
    data.len()
}

/// Quote-aware split of one already-isolated line into its fields,
/// stripping one layer of surrounding quotes per field. The same
/// extraction rule the scanner uses per-row, exposed for single-row
/// random access so a row fetched outside the scan uses identical
/// quote-aware field extraction.
pub fn split_line(line: &[u8], separator: u8) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut field_start = 0;
    let mut in_quotes = false;
    for (i, &b) in line.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b if b == separator && !in_quotes => {
                fields.push(extract_field(&line[field_start..i]));
                field_start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(extract_field(&line[field_start..]));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect_rows(csv: &[u8], workers: usize, indexes: &[IndexDef]) -> Vec<(i64, i64, Vec<Vec<u8>>)> {
        let rows = Mutex::new(Vec::new());
        scan(csv, b',', workers, indexes, |row| {
            rows.lock()
                .unwrap()
                .push((row.offset, row.line, row.keys.to_vec()));
        })
        .unwrap();
        let mut out = rows.into_inner().unwrap();
        out.sort_by_key(|(offset, _, _)| *offset);
        out
    }

    #[test]
    fn header_parses_and_strips_bom() {
        let data = b"\xEF\xBB\xBFid,name\n1,a\n";
        let h = Header::parse(data, b',').unwrap();
        assert_eq!(h.names(), &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn header_rejects_utf16_bom() {
        let data = b"\xFF\xFEi\x00d\x00";
        assert!(Header::parse(data, b',').is_err());
    }

    #[test]
    fn point_lookup_offsets_and_lines_match_scenario_one() {
        let csv = b"id,name,status\n1,a,active\n2,b,inactive\n3,c,active\n";
        let header = Header::parse(csv, b',').unwrap();
        let status_col = header.position("status").unwrap();
        let indexes = vec![IndexDef {
            name: "status".into(),
            columns: vec![status_col],
        }];
        let rows = collect_rows(csv, 1, &indexes);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, 15); // offset right after "id,name,status\n"
        assert_eq!(rows[0].1, 2);
        assert_eq!(rows[0].2[0], b"active".to_vec());
    }

    #[test]
    fn composite_index_matches_scenario_two() {
        let csv = b"id,t,v\n1,x,10\n2,x,20\n2,y,30\n";
        let header = Header::parse(csv, b',').unwrap();
        let t = header.position("t").unwrap();
        let v = header.position("v").unwrap();
        let indexes = vec![IndexDef {
            name: "t_v".into(),
            columns: vec![t, v],
        }];
        let rows = collect_rows(csv, 1, &indexes);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].2[0], br#"["x","20"]"#.to_vec());
        assert_eq!(rows[1].1, 3);
    }

    #[test]
    fn quoted_multiline_field_does_not_inflate_row_count() {
        let csv = b"id,note\n1,plain\n2,\"a\nb\"\n3,last\n";
        for workers in [1usize, 2, 8] {
            let header = Header::parse(csv, b',').unwrap();
            let note = header.position("note").unwrap();
            let indexes = vec![IndexDef {
                name: "note".into(),
                columns: vec![note],
            }];
            let rows = collect_rows(csv, workers, &indexes);
            assert_eq!(rows.len(), 3, "workers={workers}");
            assert_eq!(rows[1].2[0], b"a\nb".to_vec(), "workers={workers}");
        }
    }

    #[test]
    fn row_end_and_split_line_handle_quoted_newlines() {
        let csv = b"id,note\n1,\"a\nb\"\n2,last\n";
        let row1_start = 9; // right after "id,note\n"
        let end = row_end(csv, row1_start);
        assert_eq!(&csv[row1_start..end], b"1,\"a\nb\"");
        let fields = split_line(&csv[row1_start..end], b',');
        assert_eq!(fields, vec![b"1".as_slice(), b"a\nb".as_slice()]);
    }

    #[test]
    fn last_line_without_trailing_newline_is_scanned() {
        let csv = b"id,name\n1,a\n2,b";
        let header = Header::parse(csv, b',').unwrap();
        let name = header.position("name").unwrap();
        let indexes = vec![IndexDef {
            name: "name".into(),
            columns: vec![name],
        }];
        let rows = collect_rows(csv, 1, &indexes);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].2[0], b"b".to_vec());
    }
}
