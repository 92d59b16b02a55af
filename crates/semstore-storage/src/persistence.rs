//! Append-only audit log of applied diffs
//!
//! Every diff the store applies (updates and rollback compensations alike) is
//! appended as one record:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 LE  │ CBOR-encoded AuditEntry      │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! Replaying the log in order reproduces the property tables, which makes it
//! usable for crash recovery and for diagnosing what an update did.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{apply_diff, AuditEntry, TableSnapshot};

pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry; returns the bytes written.
    pub fn append(&self, entry: &AuditEntry) -> std::io::Result<u64> {
        let mut file = self.file.lock();

        let mut data = Vec::new();
        ciborium::into_writer(entry, &mut data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        let len = u32::try_from(data.len())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "entry too large"))?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&data)?;
        file.sync_data()?;

        Ok(u64::from(len) + 4)
    }

    /// Feed every entry, oldest first, to `handler`.
    ///
    /// A torn final record (a length prefix with a short body, or a partial
    /// prefix) is cut off so that later appends stay readable.
    pub fn replay<F: FnMut(AuditEntry) -> std::io::Result<()>>(
        &self,
        mut handler: F,
    ) -> std::io::Result<()> {
        let mut file = self.file.lock();
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let mut offset = 0u64;
        while offset < file_len {
            let remaining = file_len - offset;
            if remaining < 4 {
                return self.cut_torn_tail(&file, offset, file_len);
            }

            let mut len_bytes = [0u8; 4];
            file.read_exact(&mut len_bytes)?;
            let len = u64::from(u32::from_le_bytes(len_bytes));
            if len > remaining - 4 {
                return self.cut_torn_tail(&file, offset, file_len);
            }

            let mut data = vec![0u8; len as usize];
            file.read_exact(&mut data)?;

            let entry: AuditEntry = ciborium::from_reader(data.as_slice())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

            handler(entry)?;
            offset += 4 + len;
        }

        Ok(())
    }

    fn cut_torn_tail(&self, file: &File, valid: u64, file_len: u64) -> std::io::Result<()> {
        tracing::warn!(
            path = %self.path.display(),
            valid_bytes = valid,
            dropped_bytes = file_len - valid,
            "audit log ends in a torn record; truncating"
        );
        file.set_len(valid)?;
        file.sync_data()
    }

    pub fn read_all(&self) -> std::io::Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        self.replay(|entry| {
            entries.push(entry);
            Ok(())
        })?;
        Ok(entries)
    }

    pub fn truncate(&self) -> std::io::Result<()> {
        let file = self.file.lock();
        file.set_len(0)?;
        Ok(())
    }
}

/// Rebuild property tables from an audit log file.
pub fn replay_audit_log(path: &Path) -> anyhow::Result<TableSnapshot> {
    if !path.exists() {
        anyhow::bail!("audit log not found: {}", path.display());
    }
    let log = AuditLog::open(path)?;
    let mut tables = TableSnapshot::new();
    log.replay(|entry| {
        apply_diff(&mut tables, &entry.diff);
        Ok(())
    })?;
    Ok(tables)
}
