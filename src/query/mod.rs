//! Query Engine.
//!
//! Chooses an index (or falls back to a full scan), binary-searches its
//! sparse footer, decompresses candidate blocks, and either answers
//! straight from the index (zero-I/O counting, distinct-block group-by
//! acceleration) or reads the matching rows back out of the
//! memory-mapped CSV for filter evaluation and aggregation.
//!
//! Grounded on `query/engine.rs`'s index-then-filter pipeline,
//! generalized from CQL's typed predicate evaluation to the filter tree
//! in [`crate::filter`] and widened with explicit zero-I/O shortcuts for
//! counting and distinct-block group-by.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Serialize;
use serde_json::Value;

use crate::codec::BlockReader;
use crate::config::Config;
use crate::error::Error;
use crate::filter::{Filter, RawFilter};
use crate::overlay::Overlay;
use crate::scanner::{self, Header};
use crate::types::{
    self, cidx_path, compose_key, csv_fingerprint, csv_mtime, index_name, meta_path_for,
    updates_path_for, IndexMeta, IndexRecord,
};
use crate::Result;

/// Aggregate function requested alongside a `groupBy`. `None` is the
/// "distinct mode": records presence per group only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    None,
}

impl AggFunc {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "count" => AggFunc::Count,
            "sum" => AggFunc::Sum,
            "avg" => AggFunc::Avg,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            _ => AggFunc::None,
        }
    }
}

/// One query, already decoded from its request shape.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub where_clause: Option<RawFilter>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub count_only: bool,
    pub group_by: Option<String>,
    pub agg_col: Option<String>,
    pub agg_func: AggFunc,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            where_clause: None,
            limit: None,
            offset: 0,
            count_only: false,
            group_by: None,
            agg_col: None,
            agg_func: AggFunc::None,
        }
    }
}

/// Integrity status against the captured `<csv>_meta.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Fresh,
    NoMetadata,
    Stale,
}

/// `explain` output: reports the chosen strategy without reading any
/// index blocks or touching the CSV.
#[derive(Debug, Clone, Serialize)]
pub struct Explain {
    pub strategy: String,
    pub index: Option<String>,
    #[serde(rename = "covered_columns")]
    pub covered_columns: Vec<String>,
    pub reason: String,
}

/// Result of running a query.
pub enum QueryOutcome {
    Count(u64),
    Rows(Vec<(i64, i64)>),
    Groups(BTreeMap<String, Value>),
}

struct IndexChoice {
    name: String,
    /// Columns (lower-cased) the index fully covers from the request's
    /// equality filter. Empty when the index was chosen only because it
    /// matches `groupBy`.
    covered_columns: Vec<String>,
}

/// A CSV plus its index directory, opened for querying.
pub struct QueryEngine {
    csv_path: PathBuf,
    index_dir: PathBuf,
    csv_base: String,
    mmap: Mmap,
    header: Header,
    overlay: Overlay,
    meta: Option<IndexMeta>,
    config: Config,
}

impl QueryEngine {
    pub fn open(csv_path: impl AsRef<Path>, index_dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let csv_path = csv_path.as_ref().to_path_buf();
        let index_dir = index_dir.as_ref().to_path_buf();
        let mmap = scanner::map_file(&csv_path)?;
        let header = Header::parse(&mmap, config.separator)?;
        let overlay = Overlay::load(updates_path_for(&csv_path))?;

        let meta_path = meta_path_for(&csv_path);
        let meta = if meta_path.exists() {
            let data = std::fs::read(&meta_path)?;
            Some(serde_json::from_slice(&data)?)
        } else {
            None
        };

        let csv_base = csv_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("index")
            .to_string();

        Ok(Self {
            csv_path,
            index_dir,
            csv_base,
            mmap,
            header,
            overlay,
            meta,
            config,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Total row count captured at the last index build, if any index
    /// has ever been built for this CSV.
    pub fn row_count(&self) -> Option<u64> {
        self.meta.as_ref().map(|m| m.total_rows)
    }

    /// Compare the CSV's current size/mtime/fingerprint against the
    /// captured metadata.
    pub fn validate_integrity(&self) -> Integrity {
        let Some(meta) = &self.meta else {
            return Integrity::NoMetadata;
        };
        if meta.csv_size != self.mmap.len() as u64 {
            return Integrity::Stale;
        }
        let mtime = csv_mtime(&self.csv_path).unwrap_or(meta.csv_mtime);
        if mtime != meta.csv_mtime {
            return Integrity::Stale;
        }
        if meta.csv_hash != csv_fingerprint(&self.mmap) {
            return Integrity::Stale;
        }
        Integrity::Fresh
    }

    fn index_exists(&self, name: &str) -> bool {
        cidx_path(&self.index_dir, &self.csv_base, name).exists()
    }

    fn open_index(&self, name: &str) -> Result<BlockReader> {
        BlockReader::open(cidx_path(&self.index_dir, &self.csv_base, name))
    }

    /// Picks the index that best serves `where_clause`/`group_by`: the
    /// longest equality-covering prefix index, falling back to an index
    /// named after `group_by` alone.
    fn find_best_index(&self, where_clause: Option<&RawFilter>, group_by: Option<&str>) -> Option<IndexChoice> {
        if let Some(filter) = where_clause {
            if let Some(keys) = filter.equality_keys() {
                let mut cols: Vec<String> = keys.keys().cloned().collect();
                cols.sort();
                for k in (1..=cols.len()).rev() {
                    let prefix = &cols[..k];
                    let name = index_name(prefix);
                    if self.index_exists(&name) {
                        return Some(IndexChoice {
                            name,
                            covered_columns: prefix.to_vec(),
                        });
                    }
                }
            }
        }
        if let Some(gb) = group_by {
            let name = index_name(&[gb.to_string()]);
            if self.index_exists(&name) {
                return Some(IndexChoice {
                    name,
                    covered_columns: vec![],
                });
            }
        }
        None
    }

    pub fn explain(&self, req: &QueryRequest) -> Explain {
        if !self.overlay.is_empty() {
            return Explain {
                strategy: "full-scan".into(),
                index: None,
                covered_columns: vec![],
                reason: "update overlay present".into(),
            };
        }
        if self.validate_integrity() == Integrity::Stale {
            return Explain {
                strategy: "full-scan".into(),
                index: None,
                covered_columns: vec![],
                reason: "integrity-stale".into(),
            };
        }

        let keys = req.where_clause.as_ref().and_then(RawFilter::equality_keys);
        let equality_col_count = keys.as_ref().map(|k| k.len()).unwrap_or(0);

        match self.find_best_index(req.where_clause.as_ref(), req.group_by.as_deref()) {
            Some(choice) => {
                let full_coverage = choice.covered_columns.len() == equality_col_count && equality_col_count > 0;
                Explain {
                    strategy: if full_coverage { "covered-index".into() } else { "index-assisted".into() },
                    index: Some(choice.name),
                    covered_columns: choice.covered_columns,
                    reason: "matching index found".into(),
                }
            }
            None => Explain {
                strategy: "full-scan".into(),
                index: None,
                covered_columns: vec![],
                reason: "no matching index".into(),
            },
        }
    }

    /// Run the query and return its structured outcome.
    pub fn run(&self, req: &QueryRequest) -> Result<QueryOutcome> {
        let force_full_scan = !self.overlay.is_empty() || self.validate_integrity() == Integrity::Stale;

        // Count-all shortcut: countOnly, no filter, no groupBy.
        if req.count_only
            && req.where_clause.is_none()
            && req.group_by.is_none()
            && !force_full_scan
        {
            if let Some(count) = self.try_count_all()? {
                return Ok(QueryOutcome::Count(count));
            }
        }

        let resolved_filter = req.where_clause.as_ref().map(|r| r.resolve(&self.header));
        let equality_keys = req.where_clause.as_ref().and_then(RawFilter::equality_keys);
        let equality_col_count = equality_keys.as_ref().map(|k| k.len()).unwrap_or(0);

        let choice = if force_full_scan {
            None
        } else {
            self.find_best_index(req.where_clause.as_ref(), req.group_by.as_deref())
        };

        match choice {
            Some(choice) if equality_col_count > 0 => {
                let full_coverage = choice.covered_columns.len() == equality_col_count;
                let search_key = equality_search_key(&equality_keys.unwrap(), &choice.covered_columns);
                let reader = self.open_index(&choice.name)?;
                let records = matching_records(&reader, &search_key)?;

                if req.count_only && full_coverage && req.group_by.is_none() {
                    return Ok(QueryOutcome::Count(records.len() as u64));
                }

                let residual = if full_coverage { None } else { resolved_filter.as_ref() };
                self.finish_with_records(req, records, residual)
            }
            Some(choice) => {
                // Reached only via the groupBy-named-index branch of
                // find_best_index (no equality filter to probe a prefix
                // with), so this index's key column IS the groupBy column.
                let agg_targets_group_col = req
                    .agg_col
                    .as_deref()
                    .map(|c| req.group_by.as_deref() == Some(c))
                    .unwrap_or(true);
                if matches!(req.agg_func, AggFunc::Count | AggFunc::None) && agg_targets_group_col {
                    let reader = self.open_index(&choice.name)?;
                    let groups = groupby_count_via_index(&reader)?;
                    return Ok(QueryOutcome::Groups(
                        groups
                            .into_iter()
                            .map(|(k, v)| (String::from_utf8_lossy(&k).into_owned(), Value::from(v)))
                            .collect(),
                    ));
                }
                self.full_scan(req, resolved_filter.as_ref())
            }
            None => self.full_scan(req, resolved_filter.as_ref()),
        }
    }

    /// Count-all shortcut: sum any existing index's record count if
    /// every block carries a known `recordCount`; otherwise `None` so
    /// the caller falls back.
    fn try_count_all(&self) -> Result<Option<u64>> {
        let Ok(entries) = std::fs::read_dir(&self.index_dir) else {
            return Ok(None);
        };
        let prefix = format!("{}_", self.csv_base);
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !name.starts_with(&prefix) || !name.ends_with(".cidx") {
                continue;
            }
            let reader = BlockReader::open(&path)?;
            if reader.blocks().is_empty() {
                continue;
            }
            let known = reader.blocks().iter().all(|b| b.record_count > 0);
            if !known {
                continue;
            }
            return Ok(Some(reader.total_records()));
        }
        Ok(None)
    }

    fn full_scan(&self, req: &QueryRequest, filter: Option<&Filter>) -> Result<QueryOutcome> {
        if req.group_by.is_some() {
            return self.full_scan_group_by(req, filter);
        }

        let mut rows = Vec::new();
        let mut count = 0u64;
        let mut skipped = 0usize;
        let limit = req.limit;

        let data_start = self.header.byte_len;
        let mut offset = data_start;
        let mut line = 2i64;

        while offset < self.mmap.len() {
            let end = scanner::row_end(&self.mmap, offset);
            let matched = self.row_matches(offset, end, filter)?;
            if matched {
                if req.count_only {
                    count += 1;
                } else if skipped < req.offset {
                    skipped += 1;
                } else {
                    rows.push((offset as i64, line));
                    if let Some(l) = limit {
                        if rows.len() >= l {
                            break;
                        }
                    }
                }
            }
            offset = if end < self.mmap.len() { end + 1 } else { self.mmap.len() };
            line += 1;
        }

        if req.count_only {
            Ok(QueryOutcome::Count(count))
        } else {
            Ok(QueryOutcome::Rows(rows))
        }
    }

    fn row_matches(&self, start: usize, end: usize, filter: Option<&Filter>) -> Result<bool> {
        let Some(filter) = filter else { return Ok(true) };
        let fields = self.read_row(start, end);
        let view: Vec<&str> = fields.iter().map(|s| s.as_str()).collect();
        Ok(filter.evaluate(&view))
    }

    /// Read one row at `[start, end)`, split into fields, overlay applied.
    fn read_row(&self, start: usize, end: usize) -> Vec<String> {
        let raw = scanner::split_line(&self.mmap[start..end], self.config.separator);
        let mut fields: Vec<String> = raw
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();
        fields.resize(self.header.len().max(fields.len()), String::new());
        self.overlay.apply_overrides(&self.header, &mut fields, start as i64);
        fields
    }

    fn finish_with_records(
        &self,
        req: &QueryRequest,
        records: Vec<IndexRecord>,
        residual: Option<&Filter>,
    ) -> Result<QueryOutcome> {
        if req.group_by.is_some() {
            return self.group_by_over_records(req, &records, residual);
        }

        let mut rows = Vec::new();
        let mut count = 0u64;
        let mut skipped = 0usize;

        for rec in &records {
            let end = scanner::row_end(&self.mmap, rec.offset as usize);
            let matched = self.row_matches(rec.offset as usize, end, residual)?;
            if !matched {
                continue;
            }
            if req.count_only {
                count += 1;
                continue;
            }
            if skipped < req.offset {
                skipped += 1;
                continue;
            }
            rows.push((rec.offset, rec.line));
            if let Some(l) = req.limit {
                if rows.len() >= l {
                    break;
                }
            }
        }

        if req.count_only {
            Ok(QueryOutcome::Count(count))
        } else {
            Ok(QueryOutcome::Rows(rows))
        }
    }

    fn group_by_over_records(
        &self,
        req: &QueryRequest,
        records: &[IndexRecord],
        residual: Option<&Filter>,
    ) -> Result<QueryOutcome> {
        let group_by = req.group_by.as_ref().unwrap();
        let Some(group_col) = self.header.position(group_by) else {
            return Err(Error::invalid_input(format!("unknown groupBy column: {group_by}")));
        };
        let agg_col = req
            .agg_col
            .as_ref()
            .and_then(|c| self.header.position(c));

        let mut agg = Aggregator::new(req.agg_func);
        for rec in records {
            let end = scanner::row_end(&self.mmap, rec.offset as usize);
            if !self.row_matches(rec.offset as usize, end, residual)? {
                continue;
            }
            let row = self.read_row(rec.offset as usize, end);
            let key = row.get(group_col).cloned().unwrap_or_default();
            let value = agg_col.and_then(|c| row.get(c)).cloned();
            agg.add(key, value.as_deref());
        }
        Ok(QueryOutcome::Groups(agg.finish()))
    }

    fn full_scan_group_by(&self, req: &QueryRequest, filter: Option<&Filter>) -> Result<QueryOutcome> {
        let group_by = req.group_by.as_ref().unwrap();
        let Some(group_col) = self.header.position(group_by) else {
            return Err(Error::invalid_input(format!("unknown groupBy column: {group_by}")));
        };
        let agg_col = req.agg_col.as_ref().and_then(|c| self.header.position(c));

        let mut agg = Aggregator::new(req.agg_func);
        let mut offset = self.header.byte_len;
        while offset < self.mmap.len() {
            let end = scanner::row_end(&self.mmap, offset);
            if self.row_matches(offset, end, filter)? {
                let row = self.read_row(offset, end);
                let key = row.get(group_col).cloned().unwrap_or_default();
                let value = agg_col.and_then(|c| row.get(c)).cloned();
                agg.add(key, value.as_deref());
            }
            offset = if end < self.mmap.len() { end + 1 } else { self.mmap.len() };
        }
        Ok(QueryOutcome::Groups(agg.finish()))
    }

    /// Write the outcome out: a single integer line for counts,
    /// `"offset,line"` lines for row selections, or a single JSON object
    /// line for groupings.
    pub fn run_query_to_writer(&self, req: &QueryRequest, out: &mut impl Write) -> Result<()> {
        match self.run(req)? {
            QueryOutcome::Count(n) => writeln!(out, "{n}")?,
            QueryOutcome::Rows(rows) => {
                for (offset, line) in rows {
                    writeln!(out, "{offset},{line}")?;
                }
            }
            QueryOutcome::Groups(groups) => {
                writeln!(out, "{}", serde_json::to_string(&groups)?)?
            }
        }
        Ok(())
    }
}

/// Compose the search key for an index covering `covered_columns` out of
/// the full equality key map (already lower-cased column names).
fn equality_search_key(keys: &BTreeMap<String, String>, covered_columns: &[String]) -> Vec<u8> {
    let values: Vec<&[u8]> = covered_columns
        .iter()
        .map(|c| keys.get(c).map(|v| v.as_bytes()).unwrap_or(b""))
        .collect();
    compose_key(&values)
}

/// Binary-search + block walk: every record whose key equals
/// `search_key`, reading blocks sequentially from the start block until
/// the first record whose key compares greater.
fn matching_records(reader: &BlockReader, search_key: &[u8]) -> Result<Vec<IndexRecord>> {
    let mut out = Vec::new();
    let Some(mut idx) = reader.find_start_block(search_key) else {
        return Ok(out);
    };

    loop {
        if idx >= reader.blocks().len() {
            break;
        }
        let meta = &reader.blocks()[idx];
        if meta.start_key.as_slice().cmp(search_key) == Ordering::Greater {
            break;
        }
        let records = reader.read_block(meta)?;
        let mut stop = false;
        for rec in &records {
            match rec.trimmed_key().cmp(search_key) {
                Ordering::Less => continue,
                Ordering::Equal => out.push(*rec),
                Ordering::Greater => {
                    stop = true;
                    break;
                }
            }
        }
        if stop {
            break;
        }
        idx += 1;
    }
    Ok(out)
}

/// Per-key counts computed straight from footer metadata when every
/// contributing block is `isDistinct`. Returns one entry per distinct
/// key across the whole index, with no block bodies read for distinct
/// blocks.
fn groupby_count_via_index(reader: &BlockReader) -> Result<BTreeMap<Vec<u8>, u64>> {
    let mut groups: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
    for meta in reader.blocks() {
        if meta.is_distinct {
            *groups.entry(meta.start_key.clone()).or_insert(0) += meta.record_count;
            continue;
        }
        let records = reader.read_block(meta)?;
        for rec in &records {
            *groups.entry(rec.trimmed_key().to_vec()).or_insert(0) += 1;
        }
    }
    Ok(groups)
}

/// Per-group aggregation state. Empty group keys are preserved, not
/// dropped.
struct Aggregator {
    func: AggFunc,
    groups: BTreeMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    count: u64,
    sum: f64,
    min: Option<String>,
    max: Option<String>,
}

impl Aggregator {
    fn new(func: AggFunc) -> Self {
        Self { func, groups: BTreeMap::new() }
    }

    fn add(&mut self, key: String, value: Option<&str>) {
        let state = self.groups.entry(key).or_default();
        state.count += 1;
        if let Some(v) = value {
            if let Ok(n) = v.parse::<f64>() {
                state.sum += n;
            }
            state.min = Some(match &state.min {
                Some(cur) if compare_group_values(cur, v) != Ordering::Greater => cur.clone(),
                _ => v.to_string(),
            });
            state.max = Some(match &state.max {
                Some(cur) if compare_group_values(cur, v) != Ordering::Less => cur.clone(),
                _ => v.to_string(),
            });
        }
    }

    fn finish(self) -> BTreeMap<String, Value> {
        self.groups
            .into_iter()
            .map(|(key, state)| {
                let value = match self.func {
                    AggFunc::Count => Value::from(state.count),
                    AggFunc::Sum => Value::from(state.sum),
                    AggFunc::Avg => {
                        let avg = if state.count > 0 { state.sum / state.count as f64 } else { 0.0 };
                        Value::from(avg)
                    }
                    AggFunc::Min => Value::from(state.min.unwrap_or_default()),
                    AggFunc::Max => Value::from(state.max.unwrap_or_default()),
                    AggFunc::None => Value::from(state.count),
                };
                (key, value)
            })
            .collect()
    }
}

fn compare_group_values(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::filter::parse_where;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_csv(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("data.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn build(dir: &Path, csv: &Path, cols: &[&str]) {
        let out_dir = dir.join("out");
        let config = Config::default();
        crate::indexer::build_index(
            csv,
            &out_dir,
            &[cols.iter().map(|s| s.to_string()).collect()],
            &config,
        )
        .unwrap();
    }

    #[test]
    fn scenario_one_point_lookup() {
        let dir = tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "id,name,status\n1,a,active\n2,b,inactive\n3,c,active\n",
        );
        build(dir.path(), &csv, &["status"]);

        let engine = QueryEngine::open(&csv, dir.path().join("out"), Config::default()).unwrap();
        let where_clause = parse_where(&json!({"status": "active"})).unwrap();

        let count_req = QueryRequest {
            where_clause: where_clause.clone(),
            count_only: true,
            ..Default::default()
        };
        match engine.run(&count_req).unwrap() {
            QueryOutcome::Count(n) => assert_eq!(n, 2),
            _ => panic!("expected count"),
        }

        let select_req = QueryRequest {
            where_clause,
            limit: Some(1),
            ..Default::default()
        };
        match engine.run(&select_req).unwrap() {
            QueryOutcome::Rows(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0], (15, 2));
            }
            _ => panic!("expected rows"),
        }
    }

    #[test]
    fn scenario_two_composite_index() {
        let dir = tempdir().unwrap();
        let csv = write_csv(dir.path(), "id,t,v\n1,x,10\n2,x,20\n2,y,30\n");
        let out_dir = dir.path().join("out");
        crate::indexer::build_index(
            &csv,
            &out_dir,
            &[vec!["t".to_string(), "v".to_string()]],
            &Config::default(),
        )
        .unwrap();

        let engine = QueryEngine::open(&csv, &out_dir, Config::default()).unwrap();
        let where_clause = parse_where(&json!({"t": "x", "v": "20"})).unwrap();
        let req = QueryRequest { where_clause, ..Default::default() };
        match engine.run(&req).unwrap() {
            QueryOutcome::Rows(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].1, 3);
            }
            _ => panic!("expected rows"),
        }
    }

    #[test]
    fn scenario_three_zero_io_count_matches_full_scan() {
        let dir = tempdir().unwrap();
        let mut csv_text = String::from("id,status\n");
        for i in 0..3000 {
            let status = ["A", "B", "C"][i % 3];
            csv_text.push_str(&format!("{i},{status}\n"));
        }
        let csv = write_csv(dir.path(), &csv_text);
        build(dir.path(), &csv, &["status"]);

        let engine = QueryEngine::open(&csv, dir.path().join("out"), Config::default()).unwrap();
        let where_clause = parse_where(&json!({"status": "A"})).unwrap();
        let req = QueryRequest { where_clause, count_only: true, ..Default::default() };
        match engine.run(&req).unwrap() {
            QueryOutcome::Count(n) => assert_eq!(n, 1000),
            _ => panic!("expected count"),
        }
    }

    #[test]
    fn count_all_shortcut_matches_total_rows() {
        let dir = tempdir().unwrap();
        let csv = write_csv(dir.path(), "id,status\n1,a\n2,b\n3,c\n");
        build(dir.path(), &csv, &["status"]);
        let engine = QueryEngine::open(&csv, dir.path().join("out"), Config::default()).unwrap();
        let req = QueryRequest { count_only: true, ..Default::default() };
        match engine.run(&req).unwrap() {
            QueryOutcome::Count(n) => assert_eq!(n, 3),
            _ => panic!("expected count"),
        }
    }

    #[test]
    fn scenario_four_group_by_distinct_block_acceleration() {
        let dir = tempdir().unwrap();
        let mut csv_text = String::from("id,category\n");
        for i in 0..4000 {
            let cat = if i < 2000 { "x" } else { "y" };
            csv_text.push_str(&format!("{i},{cat}\n"));
        }
        let csv = write_csv(dir.path(), &csv_text);
        build(dir.path(), &csv, &["category"]);

        let engine = QueryEngine::open(&csv, dir.path().join("out"), Config::default()).unwrap();
        let req = QueryRequest {
            group_by: Some("category".into()),
            agg_func: AggFunc::Count,
            ..Default::default()
        };
        match engine.run(&req).unwrap() {
            QueryOutcome::Groups(groups) => {
                assert_eq!(groups.get("x").unwrap(), &Value::from(2000));
                assert_eq!(groups.get("y").unwrap(), &Value::from(2000));
            }
            _ => panic!("expected groups"),
        }
    }

    #[test]
    fn scenario_five_quoted_multiline_field_row_count() {
        let dir = tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "id,note\n1,x\n2,\"a\nb\"\n3,y\n4,z\n5,w\n",
        );
        let out_dir = dir.path().join("out");
        crate::indexer::build_index(
            &csv,
            &out_dir,
            &[vec!["id".to_string()]],
            &Config { workers: 8, ..Config::default() },
        )
        .unwrap();
        let engine = QueryEngine::open(&csv, &out_dir, Config::default()).unwrap();
        let req = QueryRequest { count_only: true, ..Default::default() };
        match engine.run(&req).unwrap() {
            QueryOutcome::Count(n) => assert_eq!(n, 5),
            _ => panic!("expected count"),
        }
    }

    #[test]
    fn scenario_six_staleness_detection() {
        let dir = tempdir().unwrap();
        let csv = write_csv(dir.path(), "id,status\n1,a\n2,b\n");
        build(dir.path(), &csv, &["status"]);

        let mut contents = std::fs::read_to_string(&csv).unwrap();
        contents.push_str("3,c\n");
        std::fs::write(&csv, contents).unwrap();

        let engine = QueryEngine::open(&csv, dir.path().join("out"), Config::default()).unwrap();
        assert_eq!(engine.validate_integrity(), Integrity::Stale);

        let where_clause = parse_where(&json!({"status": "a"})).unwrap();
        let req = QueryRequest { where_clause, ..Default::default() };
        let explain = engine.explain(&req);
        assert_eq!(explain.strategy, "full-scan");
        assert_eq!(explain.reason, "integrity-stale");
    }

    #[test]
    fn overlay_overrides_are_visible_on_index_path() {
        let dir = tempdir().unwrap();
        let csv = write_csv(dir.path(), "id,status\n1,active\n2,active\n");
        build(dir.path(), &csv, &["status"]);

        std::fs::write(
            types::updates_path_for(&csv),
            r#"{"rows": {"9": {"status": "closed"}}}"#,
        )
        .unwrap();

        let engine = QueryEngine::open(&csv, dir.path().join("out"), Config::default()).unwrap();
        let where_clause = parse_where(&json!({"status": "active"})).unwrap();
        let req = QueryRequest { where_clause, count_only: true, ..Default::default() };
        match engine.run(&req).unwrap() {
            // One row's status was overridden away from "active", and the
            // overlay forces a full scan so it is honored.
            QueryOutcome::Count(n) => assert_eq!(n, 1),
            _ => panic!("expected count"),
        }
    }

    #[test]
    fn limit_and_offset_are_respected() {
        let dir = tempdir().unwrap();
        let csv = write_csv(dir.path(), "id,status\n1,a\n2,a\n3,a\n4,a\n");
        build(dir.path(), &csv, &["status"]);
        let engine = QueryEngine::open(&csv, dir.path().join("out"), Config::default()).unwrap();
        let where_clause = parse_where(&json!({"status": "a"})).unwrap();
        let req = QueryRequest { where_clause, limit: Some(2), offset: 1, ..Default::default() };
        match engine.run(&req).unwrap() {
            QueryOutcome::Rows(rows) => assert_eq!(rows.len(), 2),
            _ => panic!("expected rows"),
        }
    }
}
