//! Reading, writing and summarizing diff files
//!
//! Diff files hold the JSON representation of a `CompositeDiff`, or its CBOR
//! encoding when the file extension is `.cbor`. The legacy side-major layout
//! is JSON only.

use anyhow::{bail, Context, Result};
use semstore_diff::{CompositeDiff, DiffSide, FlatIdList};
use std::fs;
use std::path::Path;

fn is_cbor(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("cbor"))
}

pub fn load_diff(path: &Path, legacy: bool) -> Result<CompositeDiff> {
    let diff = if is_cbor(path) {
        if legacy {
            bail!("legacy diffs are JSON only: {}", path.display());
        }
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        CompositeDiff::from_cbor(&bytes)
            .with_context(|| format!("decoding {}", path.display()))?
    } else {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let value: serde_json::Value =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        if legacy {
            CompositeDiff::from_legacy_representation(&value)?
        } else {
            CompositeDiff::from_representation(&value)?
        }
    };

    tracing::debug!(path = %path.display(), tables = diff.len(), "loaded diff");
    Ok(diff)
}

pub fn write_diff(path: &Path, diff: &CompositeDiff) -> Result<()> {
    let bytes = if is_cbor(path) {
        diff.to_cbor()?
    } else {
        diff.to_json_string_pretty()?.into_bytes()
    };
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

pub fn format_ids(ids: &FlatIdList) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Summary
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub table: String,
    pub inserts: usize,
    pub deletes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSummary {
    pub tables: Vec<TableSummary>,
    pub insert_ids: usize,
    pub delete_ids: usize,
    pub all_ids: usize,
}

/// One line per record, in record order.
pub fn summarize(diff: &CompositeDiff) -> DiffSummary {
    let tables = diff
        .iter()
        .map(|record| TableSummary {
            table: record.table.clone(),
            inserts: record.diff.side(DiffSide::Insert).len(),
            deletes: record.diff.side(DiffSide::Delete).len(),
        })
        .collect();

    DiffSummary {
        tables,
        insert_ids: diff.ids(Some(DiffSide::Insert)).len(),
        delete_ids: diff.ids(Some(DiffSide::Delete)).len(),
        all_ids: diff.ids(None).len(),
    }
}
