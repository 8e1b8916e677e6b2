//! Update Overlay: sidecar `<csv>_updates.json` row-level value
//! overrides, applied at read time after CSV parse, before filter
//! evaluation.
//!
//! Grounded on `storage/memtable`-style "recent writes shadow the base
//! file" designs in the pack, narrowed to a load-once,
//! immutable-for-the-engine's-lifetime contract: mutation producers are
//! out of scope here and write a new file; a new engine picks it up.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::scanner::Header;
use crate::Result;

/// `{column → value}` overrides for one row.
pub type RowOverrides = BTreeMap<String, String>;

#[derive(Debug, Deserialize, Serialize)]
struct OverlayFile {
    rows: BTreeMap<String, RowOverrides>,
}

/// The loaded `<csv>_updates.json`, keyed by row byte offset (as a
/// string, matching the on-disk format).
#[derive(Debug, Default)]
pub struct Overlay {
    rows: BTreeMap<String, RowOverrides>,
}

impl Overlay {
    /// An overlay with no overrides — equivalent to no sidecar file
    /// existing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load `path` once. Missing file is treated as empty, not an error
    /// (most CSVs never get updates).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::empty());
        }
        let data = std::fs::read(path)?;
        let parsed: OverlayFile = serde_json::from_slice(&data)?;
        Ok(Self { rows: parsed.rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Overrides for the row at `offset`, if any.
    pub fn get_row(&self, offset: i64) -> Option<&RowOverrides> {
        self.rows.get(&offset.to_string())
    }

    /// Splice this row's overrides into `row` (already one string per
    /// header column) by column name. Unknown override columns are
    /// ignored.
    pub fn apply_overrides(&self, header: &Header, row: &mut [String], offset: i64) {
        let Some(overrides) = self.get_row(offset) else {
            return;
        };
        for (col, value) in overrides {
            if let Some(idx) = header.position(col) {
                if idx < row.len() {
                    row[idx] = value.clone();
                }
            }
        }
    }
}
