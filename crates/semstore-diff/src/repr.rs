//! Plain-data representation of a composite diff.
//!
//! The canonical representation is a sequence of `[table_name, diff]` pairs:
//!
//! ```text
//! [
//!   ["wikipage_refs", { "insert": [{"subject_id": 1706, "property_id": 1707, "object_id": 388}],
//!                       "delete": [] }],
//!   ["dates",         { "insert": [{"subject_id": 1706, "o_serialized": "1/2015/8/8/18/51/39"}],
//!                       "delete": [] }]
//! ]
//! ```
//!
//! It is available as a `serde_json::Value`, as JSON text, and as a CBOR blob
//! for audit logs. Older stores wrote diffs side-major instead
//! (`{"i": {table: [rows]}, "d": {table: [rows]}}` per entry); those are read
//! with [`CompositeDiff::from_legacy_representation`].

use serde_json::Value;

use crate::composite::{CompositeDiff, TableRecord};
use crate::error::DiffError;
use crate::row::Row;
use crate::table_diff::{DiffSide, TableDiff};

impl CompositeDiff {
    pub fn to_representation(&self) -> Value {
        Value::Array(
            self.iter()
                .map(|record| {
                    serde_json::json!([
                        record.table,
                        {
                            "insert": record.diff.insert,
                            "delete": record.diff.delete,
                        }
                    ])
                })
                .collect(),
        )
    }

    pub fn from_representation(value: &Value) -> Result<Self, DiffError> {
        if !value.is_array() {
            return Err(DiffError::InvalidRepresentation(
                "expected a sequence of [table, diff] pairs".to_string(),
            ));
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_json_string(&self) -> Result<String, DiffError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, DiffError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, DiffError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_representation(&value)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, DiffError> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| DiffError::CborEncode(e.to_string()))?;
        Ok(out)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DiffError> {
        ciborium::from_reader(bytes).map_err(|e| DiffError::CborDecode(e.to_string()))
    }

    /// Import the side-major layout.
    ///
    /// Accepts either one entry or a sequence of entries. Within an entry,
    /// tables keep the order they are first met; unknown side keys are
    /// skipped. An empty sequence where a table map is expected counts as no
    /// tables.
    pub fn from_legacy_representation(value: &Value) -> Result<Self, DiffError> {
        let entries: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![value],
            _ => {
                return Err(DiffError::InvalidRepresentation(
                    "legacy diff must be an object or a sequence of objects".to_string(),
                ))
            }
        };

        let mut out = CompositeDiff::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let sides = entry.as_object().ok_or_else(|| {
                DiffError::InvalidRepresentation(format!("legacy entry {index} is not an object"))
            })?;

            let mut tables: Vec<TableRecord> = Vec::new();
            for (key, by_table) in sides {
                let Some(side) = DiffSide::from_key(key) else {
                    tracing::debug!(key = %key, entry = index, "skipping unknown legacy side key");
                    continue;
                };

                for (table, rows) in legacy_tables(by_table, index)? {
                    let rows: Vec<Row> = serde_json::from_value(rows.clone())?;
                    let slot = match tables.iter().position(|r| r.table == *table) {
                        Some(pos) => &mut tables[pos],
                        None => {
                            tables.push(TableRecord::new(table.clone(), TableDiff::default()));
                            let last = tables.len() - 1;
                            &mut tables[last]
                        }
                    };
                    slot.diff.side_mut(side).extend(rows);
                }
            }
            out.extend(tables);
        }
        Ok(out)
    }
}

fn legacy_tables(value: &Value, entry: usize) -> Result<Vec<(&String, &Value)>, DiffError> {
    match value {
        Value::Object(map) => Ok(map.iter().collect()),
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        Value::Null => Ok(Vec::new()),
        _ => Err(DiffError::InvalidRepresentation(format!(
            "legacy entry {entry}: expected a table map"
        ))),
    }
}
