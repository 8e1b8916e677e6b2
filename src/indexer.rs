//! Indexer Orchestrator.
//!
//! Drives the scanner → per-index sorter pipeline: validates requested
//! column lists against the header, fans each scanned row's composed
//! keys out to one `crossbeam` bounded channel per index (batched, about
//! 1000 records per batch), and writes `<csv>_meta.json` once every
//! sorter reports back. All-or-nothing: a single sorter failure fails
//! the whole build, and best-effort cleanup runs regardless.
//!
//! Grounded on `platform/threading.rs`'s bounded-channel worker
//! dispatch, generalized from a single task queue to N independent
//! per-index pipelines.

use std::collections::BTreeMap;
use std::path::Path;

use crossbeam::channel;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Error;
use crate::scanner::{self, IndexDef};
use crate::sorter::{SortReport, Sorter};
use crate::types::{
    self, cidx_path, bloom_path, csv_fingerprint, csv_mtime, index_name, meta_path_for, IndexMeta,
    IndexRecord, IndexSummary,
};
use crate::Result;

/// Records handed to a sorter's channel in one batch.
const BATCH_SIZE: usize = 1000;

/// Build one or more indexes for `csv_path`, one per entry in
/// `column_lists` (each a single column name or several, for a
/// composite index). Writes `<csvBase>_<name>.cidx`,
/// `<csvBase>_<name>.cidx.bloom` into `output_dir`, and
/// `<csv>_meta.json` next to the CSV itself.
pub fn build_index(
    csv_path: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    column_lists: &[Vec<String>],
    config: &Config,
) -> Result<IndexMeta> {
    let csv_path = csv_path.as_ref();
    let output_dir = output_dir.as_ref();

    if column_lists.is_empty() {
        return Err(Error::invalid_input("at least one index column list is required"));
    }

    std::fs::create_dir_all(output_dir)?;

    let mmap = scanner::map_file(csv_path)?;
    let header = scanner::Header::parse(&mmap, config.separator)?;

    let mut index_defs = Vec::with_capacity(column_lists.len());
    let mut names = Vec::with_capacity(column_lists.len());
    for cols in column_lists {
        // `index_name` sorts columns lexicographically (by lower-cased
        // name) to pick the file name; the scanner must compose keys in
        // that same sorted order, or the on-disk key byte layout won't
        // match the search key the query engine composes at read time.
        let mut sorted_cols: Vec<String> = cols.iter().map(|c| c.to_lowercase()).collect();
        sorted_cols.sort();

        let mut positions = Vec::with_capacity(sorted_cols.len());
        for c in &sorted_cols {
            let pos = header
                .position(c)
                .ok_or_else(|| Error::invalid_input(format!("unknown column in index definition: {c}")))?;
            positions.push(pos);
        }
        let name = index_name(cols);
        names.push(name.clone());
        index_defs.push(IndexDef { name, columns: positions });
    }

    let csv_base = csv_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("index")
        .to_string();

    let tmp_dir = output_dir.join(format!(".tmp-{csv_base}"));
    std::fs::create_dir_all(&tmp_dir)?;

    let result = run_pipelines(&mmap, &index_defs, &names, &csv_base, output_dir, &tmp_dir, config);
    let _ = std::fs::remove_dir_all(&tmp_dir);

    let (total_rows, summaries) = result.map_err(|e| {
        for name in &names {
            let _ = std::fs::remove_file(cidx_path(output_dir, &csv_base, name));
            let _ = std::fs::remove_file(bloom_path(output_dir, &csv_base, name));
        }
        e
    })?;

    let meta = IndexMeta {
        captured_at: chrono::Utc::now().to_rfc3339(),
        total_rows,
        csv_size: mmap.len() as u64,
        csv_mtime: csv_mtime(csv_path)?,
        csv_hash: csv_fingerprint(&mmap),
        indexes: summaries,
        format_version: types::FORMAT_VERSION,
    };

    std::fs::write(meta_path_for(csv_path), serde_json::to_vec_pretty(&meta)?)?;
    Ok(meta)
}

fn run_pipelines(
    mmap: &[u8],
    index_defs: &[IndexDef],
    names: &[String],
    csv_base: &str,
    output_dir: &Path,
    tmp_dir: &Path,
    config: &Config,
) -> Result<(u64, BTreeMap<String, IndexSummary>)> {
    let n = index_defs.len();
    let memory_per_index = config.memory_per_index(n);

    let mut senders = Vec::with_capacity(n);
    let mut handles = Vec::with_capacity(n);

    for name in names {
        let (tx, rx) = channel::bounded::<Vec<IndexRecord>>(100);
        senders.push(tx);

        let index_tmp_dir = tmp_dir.join(name);
        std::fs::create_dir_all(&index_tmp_dir)?;
        let output_path = cidx_path(output_dir, csv_base, name);
        let bloom_out_path = bloom_path(output_dir, csv_base, name);
        let bloom_fp_rate = config.bloom_fp_rate;

        handles.push(std::thread::spawn(move || -> Result<SortReport> {
            let mut sorter = Sorter::new(index_tmp_dir, memory_per_index, bloom_fp_rate);
            for batch in rx {
                for rec in batch {
                    sorter.add(rec)?;
                }
            }
            sorter.finalize(output_path, bloom_out_path)
        }));
    }

    let workers = config.workers.max(1);
    let per_worker_batches: Vec<Mutex<Vec<Vec<IndexRecord>>>> = (0..workers)
        .map(|_| Mutex::new((0..n).map(|_| Vec::with_capacity(BATCH_SIZE)).collect()))
        .collect();

    let scan_result = scanner::scan(mmap, config.separator, workers, index_defs, |row| {
        let mut batches = per_worker_batches[row.worker_id].lock();
        for (i, key) in row.keys.iter().enumerate() {
            let rec = IndexRecord::new(key, row.offset, row.line);
            batches[i].push(rec);
            if batches[i].len() >= BATCH_SIZE {
                let full = std::mem::replace(&mut batches[i], Vec::with_capacity(BATCH_SIZE));
                let _ = senders[i].send(full);
            }
        }
    });

    // Flush whatever is left, regardless of whether the scan itself
    // failed, so sorters can still finalize cleanly before we propagate
    // the scan error.
    for worker_batches in &per_worker_batches {
        let mut batches = worker_batches.lock();
        for (i, batch) in batches.iter_mut().enumerate() {
            if !batch.is_empty() {
                let full = std::mem::take(batch);
                let _ = senders[i].send(full);
            }
        }
    }
    drop(senders);

    let mut total_rows = 0u64;
    let mut summaries = BTreeMap::new();
    let mut first_err = None;

    for (name, handle) in names.iter().zip(handles) {
        match handle.join().map_err(|_| Error::internal("sorter thread panicked"))? {
            Ok(report) => {
                total_rows = total_rows.max(report.total_records);
                let file_size = std::fs::metadata(cidx_path(output_dir, csv_base, name))?.len();
                summaries.insert(
                    name.clone(),
                    IndexSummary {
                        distinct_count: report.distinct_count,
                        file_size,
                    },
                );
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    scan_result?;
    if let Some(e) = first_err {
        return Err(e);
    }

    Ok((total_rows, summaries))
}
