//! semstore Property Store
//!
//! Reference implementation of the store update routine that feeds the diff
//! engine:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    PROPERTY STORE                                   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────┐     ┌───────────────┐     ┌──────────────┐            │
//! │  │ Semantic │────►│  per-table    │────►│ CompositeDiff│            │
//! │  │   Data   │     │  compute()    │     │  (one update)│            │
//! │  └──────────┘     └───────────────┘     └──────┬───────┘            │
//! │                                                │                    │
//! │            ┌───────────────────┬───────────────┼──────────────┐     │
//! │            ▼                   ▼               ▼              ▼     │
//! │     ┌────────────┐     ┌─────────────┐  ┌───────────┐ ┌──────────┐  │
//! │     │ apply rows │     │ Propagation │  │ Audit log │ │ Listeners│  │
//! │     │ (tables)   │     │ Plan        │  │ (CBOR)    │ │          │  │
//! │     └────────────┘     └─────────────┘  └───────────┘ └──────────┘  │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Minimal writes**: only rows in `desired \ current` and `current \ desired` are touched
//! - **Propagation**: insert-side ids are re-indexed, delete-side ids evicted
//! - **Audited**: every applied diff is logged and can be replayed
//! - **Rollback**: later changes are undone by applying their inverted diffs

pub mod persistence;

#[cfg(test)]
mod tests;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use semstore_diff::{CompositeDiff, DiffSide, EntityId, FlatIdList, Row, TableDiff};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::persistence::AuditLog;

// ============================================================================
// Core Types
// ============================================================================

/// Unique identifier for an applied update
pub type ChangeId = Uuid;

/// Rows per property table
pub type TableSnapshot = BTreeMap<String, Vec<Row>>;

/// The rows one subject should have after re-annotation, per property table.
///
/// Tables that are not mentioned are treated as "no rows": any rows the
/// subject currently holds there get deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticData {
    pub tables: BTreeMap<String, Vec<Row>>,
}

impl SemanticData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, table: impl Into<String>, row: Row) -> Self {
        self.add_row(table, row);
        self
    }

    pub fn add_row(&mut self, table: impl Into<String>, row: Row) {
        self.tables.entry(table.into()).or_default().push(row);
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeStatus {
    Applied,
    RolledBack { reason: String },
}

/// One applied diff, as kept in the changelog and the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: ChangeId,
    pub timestamp: DateTime<Utc>,
    pub subject: EntityId,
    pub diff: CompositeDiff,
    pub status: ChangeStatus,
    /// Set on compensating entries written by a rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverts: Option<ChangeId>,
}

/// What downstream consumers should do about one update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationPlan {
    /// Ids that gained references: re-index, propagate to dependents
    pub reindex: FlatIdList,
    /// Ids that lost references: evict caches, clean up orphans
    pub evict: FlatIdList,
}

impl PropagationPlan {
    pub fn from_diff(diff: &CompositeDiff) -> Self {
        Self {
            reindex: diff.ids(Some(DiffSide::Insert)),
            evict: diff.ids(Some(DiffSide::Delete)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reindex.is_empty() && self.evict.is_empty()
    }

    /// Every id on either side.
    pub fn affected(&self) -> FlatIdList {
        self.reindex.union(&self.evict)
    }

    pub fn merge(&mut self, other: &PropagationPlan) {
        self.reindex.extend(other.reindex.iter());
        self.evict.extend(other.evict.iter());
    }
}

/// Result of one subject update
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// `None` when nothing changed and empty updates are not recorded
    pub change_id: Option<ChangeId>,
    pub subject: EntityId,
    pub diff: CompositeDiff,
    pub plan: PropagationPlan,
}

// ============================================================================
// Listeners
// ============================================================================

/// Downstream consumer of applied updates (cache invalidation, job queues, ...).
///
/// A failing listener is logged and skipped; it never undoes the update.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, outcome: &UpdateOutcome) -> anyhow::Result<()>;
}

/// Keeps every outcome it is told about.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<UpdateOutcome>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<UpdateOutcome> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<UpdateOutcome> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl ChangeListener for RecordingListener {
    fn on_change(&self, outcome: &UpdateOutcome) -> anyhow::Result<()> {
        self.events.lock().push(outcome.clone());
        Ok(())
    }
}

/// Accumulates propagation work across updates until drained.
#[derive(Debug, Default)]
pub struct PropagationQueue {
    pending: Mutex<PropagationPlan>,
}

impl PropagationQueue {
    pub fn drain(&self) -> PropagationPlan {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl ChangeListener for PropagationQueue {
    fn on_change(&self, outcome: &UpdateOutcome) -> anyhow::Result<()> {
        self.pending.lock().merge(&outcome.plan);
        Ok(())
    }
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Configuration for the property store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the JSON changelog snapshot
    pub changelog_path: PathBuf,
    /// Path to the append-only CBOR audit log
    pub audit_log_path: PathBuf,
    /// Write the changelog and audit log to disk
    pub persist_audit: bool,
    /// Changelog entries kept in memory (oldest dropped first)
    pub max_changelog: usize,
    /// Log updates that changed nothing
    pub record_empty_updates: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            changelog_path: PathBuf::from("./changelog.json"),
            audit_log_path: PathBuf::from("./audit.log"),
            persist_audit: true,
            max_changelog: 1000,
            record_empty_updates: false,
        }
    }
}

impl StorageConfig {
    /// No files touched; history stays in memory.
    pub fn in_memory() -> Self {
        Self {
            persist_audit: false,
            ..Default::default()
        }
    }
}

// ============================================================================
// Property Store
// ============================================================================

/// The store update routine and its tables
pub struct PropertyStore {
    /// Configuration
    config: StorageConfig,
    /// Property tables
    tables: Arc<RwLock<TableSnapshot>>,
    /// Applied updates, oldest first
    changelog: Arc<RwLock<Vec<AuditEntry>>>,
    /// Append-only audit log (when persisting)
    audit_log: Option<AuditLog>,
    /// Registered consumers
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl PropertyStore {
    /// Create the store, loading history and rebuilding tables from disk.
    pub fn new(config: StorageConfig) -> anyhow::Result<Self> {
        let changelog: Vec<AuditEntry> = if config.persist_audit && config.changelog_path.exists()
        {
            let contents = std::fs::read_to_string(&config.changelog_path).with_context(|| {
                format!("reading changelog {}", config.changelog_path.display())
            })?;
            serde_json::from_str(&contents)?
        } else {
            Vec::new()
        };

        let audit_log = if config.persist_audit {
            if let Some(parent) = config.audit_log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(AuditLog::open(&config.audit_log_path).with_context(|| {
                format!("opening audit log {}", config.audit_log_path.display())
            })?)
        } else {
            None
        };

        // The audit log holds every applied diff, compensations included, so
        // replaying it in order reproduces the tables.
        let mut tables = TableSnapshot::new();
        if let Some(log) = &audit_log {
            log.replay(|entry| {
                apply_diff(&mut tables, &entry.diff);
                Ok(())
            })
            .context("replaying audit log")?;
        }

        tracing::debug!(
            entries = changelog.len(),
            tables = tables.len(),
            "property store opened"
        );

        Ok(Self {
            config,
            tables: Arc::new(RwLock::new(tables)),
            changelog: Arc::new(RwLock::new(changelog)),
            audit_log,
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    // ========================================================================
    // Write Operations
    // ========================================================================

    /// Bring `subject`'s rows in line with `data`, touching only changed rows.
    ///
    /// The tables stay write-locked from diff computation until the diff is
    /// applied, and the audit entry is written before the tables change, so
    /// the audit log order is the application order and a failed write
    /// leaves the tables untouched.
    pub fn update_subject(
        &self,
        subject: EntityId,
        data: &SemanticData,
    ) -> anyhow::Result<UpdateOutcome> {
        let desired = normalize(subject, data)?;

        let (diff, change_id) = {
            let mut tables = self.tables.write();

            let mut names: BTreeSet<String> = desired.keys().cloned().collect();
            names.extend(
                tables
                    .iter()
                    .filter(|(_, rows)| rows.iter().any(|r| r.subject_id == Some(subject)))
                    .map(|(name, _)| name.clone()),
            );

            let mut diff = CompositeDiff::new();
            for name in names {
                let current = subject_rows(&tables, &name, subject);
                let wanted = desired.get(&name).map(Vec::as_slice).unwrap_or(&[]);
                let table_diff = TableDiff::compute(wanted, &current);
                if table_diff.is_empty() {
                    continue;
                }
                tracing::debug!(
                    table = %name,
                    subject,
                    inserted = table_diff.insert.len(),
                    deleted = table_diff.delete.len(),
                    "property table changed"
                );
                diff.append(name, table_diff);
            }

            let change_id = if diff.has_changes() || self.config.record_empty_updates {
                let entry = self.log_entry(subject, diff.clone(), None)?;
                apply_diff(&mut tables, &diff);
                Some(self.remember(entry))
            } else {
                None
            };
            (diff, change_id)
        };

        let plan = PropagationPlan::from_diff(&diff);
        tracing::info!(
            subject,
            tables = diff.len(),
            reindex = plan.reindex.len(),
            evict = plan.evict.len(),
            "subject updated"
        );

        let outcome = UpdateOutcome {
            change_id,
            subject,
            diff,
            plan,
        };
        self.notify(&outcome);
        Ok(outcome)
    }

    /// Remove every row of `subject`.
    pub fn delete_subject(&self, subject: EntityId) -> anyhow::Result<UpdateOutcome> {
        self.update_subject(subject, &SemanticData::default())
    }

    /// Build an entry and write it to the audit log (when persisting).
    fn log_entry(
        &self,
        subject: EntityId,
        diff: CompositeDiff,
        reverts: Option<ChangeId>,
    ) -> anyhow::Result<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            subject,
            diff,
            status: ChangeStatus::Applied,
            reverts,
        };

        if let Some(log) = &self.audit_log {
            log.append(&entry)
                .with_context(|| format!("appending change {} to audit log", entry.id))?;
        }
        Ok(entry)
    }

    /// Add an applied update to the bounded changelog.
    fn remember(&self, entry: AuditEntry) -> ChangeId {
        let id = entry.id;
        let mut changelog = self.changelog.write();
        changelog.push(entry);
        if changelog.len() > self.config.max_changelog {
            let excess = changelog.len() - self.config.max_changelog;
            changelog.drain(..excess);
        }
        id
    }

    fn notify(&self, outcome: &UpdateOutcome) {
        let listeners: Vec<Arc<dyn ChangeListener>> = self.listeners.read().clone();
        for listener in listeners {
            if let Err(err) = listener.on_change(outcome) {
                tracing::warn!(
                    subject = outcome.subject,
                    error = %err,
                    "change listener failed"
                );
            }
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write the changelog snapshot.
    pub fn flush(&self) -> anyhow::Result<()> {
        if !self.config.persist_audit {
            return Ok(());
        }
        let changelog = self.changelog.read();
        let json = serde_json::to_string_pretty(&*changelog)?;
        if let Some(parent) = self.config.changelog_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config.changelog_path, json)?;
        Ok(())
    }

    // ========================================================================
    // Read Operations
    // ========================================================================

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    pub fn rows_for_subject(&self, table: &str, subject: EntityId) -> Vec<Row> {
        subject_rows(&self.tables.read(), table, subject)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.tables.read().clone()
    }

    /// Get change history
    pub fn changelog(&self) -> Vec<AuditEntry> {
        self.changelog.read().clone()
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    /// Undo every applied change recorded after `change_id`, newest first.
    ///
    /// Compensations are written to the audit log only; the changelog marks
    /// the reverted entries instead. The tables stay write-locked for the
    /// whole rollback. If an audit write fails, the compensations applied so
    /// far are still reported to listeners before the error is returned.
    pub fn rollback_to(&self, change_id: ChangeId) -> anyhow::Result<Vec<UpdateOutcome>> {
        let mut outcomes = Vec::new();
        let mut failure = None;
        {
            let mut tables = self.tables.write();

            let targets: Vec<(ChangeId, EntityId, CompositeDiff)> = {
                let changelog = self.changelog.read();
                let idx = changelog
                    .iter()
                    .position(|c| c.id == change_id)
                    .ok_or_else(|| anyhow!("Change not found: {}", change_id))?;
                changelog
                    .iter()
                    .skip(idx + 1)
                    .filter(|c| c.status == ChangeStatus::Applied)
                    .rev()
                    .map(|c| (c.id, c.subject, c.diff.clone()))
                    .collect()
            };

            for (reverted, subject, diff) in targets {
                let inverse = diff.inverted();
                let entry = match self.log_entry(subject, inverse.clone(), Some(reverted)) {
                    Ok(entry) => entry,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                };
                apply_diff(&mut tables, &inverse);

                if let Some(original) = self
                    .changelog
                    .write()
                    .iter_mut()
                    .find(|c| c.id == reverted)
                {
                    original.status = ChangeStatus::RolledBack {
                        reason: format!("Rolled back to {}", change_id),
                    };
                }

                tracing::info!(%reverted, compensation = %entry.id, subject, "change rolled back");
                outcomes.push(UpdateOutcome {
                    change_id: Some(entry.id),
                    subject,
                    plan: PropagationPlan::from_diff(&inverse),
                    diff: inverse,
                });
            }
        }

        for outcome in &outcomes {
            self.notify(outcome);
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }
}

// ============================================================================
// Table maintenance
// ============================================================================

fn subject_rows(tables: &TableSnapshot, table: &str, subject: EntityId) -> Vec<Row> {
    tables
        .get(table)
        .map(|rows| {
            rows.iter()
                .filter(|r| r.subject_id == Some(subject))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Fill in missing subject ids; reject rows that name another subject.
fn normalize(subject: EntityId, data: &SemanticData) -> anyhow::Result<TableSnapshot> {
    let mut out = TableSnapshot::new();
    for (table, rows) in &data.tables {
        let mut normalized = Vec::with_capacity(rows.len());
        for row in rows {
            match row.subject_id {
                Some(other) if other != subject => {
                    bail!("row {row} in table `{table}` belongs to subject {other}, not {subject}")
                }
                _ => normalized.push(row.clone().with_subject(subject)),
            }
        }
        out.insert(table.clone(), normalized);
    }
    Ok(out)
}

/// Apply deletes then inserts of every record, in record order.
pub(crate) fn apply_diff(tables: &mut TableSnapshot, diff: &CompositeDiff) {
    for record in diff {
        let rows = tables.entry(record.table.clone()).or_default();
        for row in &record.diff.delete {
            match rows.iter().position(|r| r == row) {
                Some(pos) => {
                    rows.remove(pos);
                }
                None => {
                    tracing::warn!(table = %record.table, row = %row, "row to delete is not stored");
                }
            }
        }
        rows.extend(record.diff.insert.iter().cloned());
        if rows.is_empty() {
            tables.remove(&record.table);
        }
    }
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Create a persisted store rooted at a directory
pub fn open_storage(store_dir: &str) -> anyhow::Result<PropertyStore> {
    let dir = PathBuf::from(store_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating store directory {}", dir.display()))?;
    let config = StorageConfig {
        changelog_path: dir.join("changelog.json"),
        audit_log_path: dir.join("audit.log"),
        ..Default::default()
    };
    PropertyStore::new(config)
}
