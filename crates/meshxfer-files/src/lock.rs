//! Persistent, atomically-rewritten lock file tracking per-file
//! transfer state, so a killed receiver can resume.

use crate::error::FilesError;
use chrono::{DateTime, Utc};
use meshxfer_proto::BatchMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

const LOCK_FILE_NAME: &str = ".transfer_lock.json";
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const FLUSH_BATCH_SIZE: usize = 150;
const STALE_AFTER: chrono::Duration = chrono::Duration::hours(24);
const COMPACT_THRESHOLD: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLockEntry {
    pub status: FileStatus,
    pub size: u64,
    pub transferred_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDocument {
    pub version: String,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sender_ip: String,
    pub total_files: u64,
    pub total_size: u64,
    pub files: HashMap<String, FileLockEntry>,
}

/// What reconciliation decided for one incoming file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciledAction {
    Fresh,
    Resume { transferred_bytes: u64 },
    Skip,
}

#[derive(Debug, Clone)]
pub struct ReconciliationPlan {
    pub actions: HashMap<String, ReconciledAction>,
}

pub struct LockManager {
    path: PathBuf,
    document: LockDocument,
    pending: HashMap<String, FileLockEntry>,
    last_flush: Instant,
    defer: bool,
}

impl LockManager {
    #[must_use]
    pub fn lock_path_for(output_root: &Path) -> PathBuf {
        output_root.join(LOCK_FILE_NAME)
    }

    /// Start a fresh lock document for a new session, recording every
    /// incoming file as `pending`.
    pub fn create_fresh(
        output_root: &Path,
        session_id: Uuid,
        sender_ip: String,
        metadata: &BatchMetadata,
    ) -> Self {
        let files = metadata
            .files
            .iter()
            .map(|f| {
                (
                    f.relative_path.clone(),
                    FileLockEntry {
                        status: FileStatus::Pending,
                        size: f.size,
                        transferred_bytes: 0,
                        original_hash: None,
                        partial_hash: None,
                        last_modified: None,
                    },
                )
            })
            .collect();

        Self {
            path: Self::lock_path_for(output_root),
            document: LockDocument {
                version: "1.0".to_string(),
                session_id,
                timestamp: Utc::now(),
                sender_ip,
                total_files: metadata.file_count,
                total_size: metadata.total_size,
                files,
            },
            pending: HashMap::new(),
            last_flush: Instant::now(),
            defer: false,
        }
    }

    /// Load an existing lock file, or `None` if absent, unreadable, or
    /// stale (age > 24h) — in which case it is deleted.
    pub fn load_existing(output_root: &Path) -> Option<LockDocument> {
        let path = Self::lock_path_for(output_root);
        let contents = fs::read_to_string(&path).ok()?;
        let doc: LockDocument = match serde_json::from_str(&contents) {
            Ok(doc) => doc,
            Err(_) => {
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        if Utc::now() - doc.timestamp > STALE_AFTER {
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(doc)
    }

    /// Reconcile a freshly loaded (or absent) lock document against
    /// incoming batch metadata, per the four-step algorithm.
    #[must_use]
    pub fn reconcile(existing: Option<&LockDocument>, metadata: &BatchMetadata) -> ReconciliationPlan {
        let mut actions = HashMap::new();
        for file in &metadata.files {
            let action = match existing.and_then(|d| d.files.get(&file.relative_path)) {
                Some(entry) if entry.size != file.size => ReconciledAction::Fresh,
                Some(entry) if entry.status == FileStatus::Completed => ReconciledAction::Skip,
                Some(entry) if entry.status == FileStatus::InProgress && entry.transferred_bytes > 0 => {
                    ReconciledAction::Resume {
                        transferred_bytes: entry.transferred_bytes,
                    }
                }
                _ => ReconciledAction::Fresh,
            };
            actions.insert(file.relative_path.clone(), action);
        }
        ReconciliationPlan { actions }
    }

    pub fn set_defer(&mut self, defer: bool) {
        self.defer = defer;
    }

    /// Buffer a status update for `relative_path`, flushing if a
    /// trigger condition is met (unless deferring).
    pub fn update_file_status(&mut self, relative_path: &str, entry: FileLockEntry) -> Result<(), FilesError> {
        let terminal = matches!(entry.status, FileStatus::Completed | FileStatus::Failed);
        self.pending.insert(relative_path.to_string(), entry);

        if self.defer {
            return Ok(());
        }

        let should_flush = terminal
            || self.pending.len() >= FLUSH_BATCH_SIZE
            || self.last_flush.elapsed() >= FLUSH_INTERVAL;

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Apply every buffered update in one atomic write, regardless of
    /// defer mode.
    pub fn flush_deferred(&mut self) -> Result<(), FilesError> {
        self.flush()
    }

    fn flush(&mut self) -> Result<(), FilesError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        for (path, entry) in self.pending.drain() {
            self.document.files.insert(path, entry);
        }
        self.document.timestamp = Utc::now();
        self.write_atomic()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    fn write_atomic(&self) -> Result<(), FilesError> {
        let compact = self.document.files.len() > COMPACT_THRESHOLD;
        let json = if compact {
            serde_json::to_string(&self.document)?
        } else {
            serde_json::to_string_pretty(&self.document)?
        };

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Remove the lock file on clean success.
    pub fn remove(&self) -> Result<(), FilesError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn document(&self) -> &LockDocument {
        &self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshxfer_proto::BatchMetadata;
    use tempfile::tempdir;

    fn sample_metadata() -> BatchMetadata {
        BatchMetadata::from_files(
            vec![("a.txt".to_string(), 10), ("b.txt".to_string(), 20)],
            false,
        )
    }

    #[test]
    fn fresh_document_marks_all_pending() {
        let dir = tempdir().unwrap();
        let manager = LockManager::create_fresh(
            dir.path(),
            Uuid::new_v4(),
            "10.0.0.1".to_string(),
            &sample_metadata(),
        );
        assert_eq!(manager.document().files.len(), 2);
        assert!(manager
            .document()
            .files
            .values()
            .all(|e| e.status == FileStatus::Pending));
    }

    #[test]
    fn terminal_update_flushes_immediately() {
        let dir = tempdir().unwrap();
        let mut manager = LockManager::create_fresh(
            dir.path(),
            Uuid::new_v4(),
            "10.0.0.1".to_string(),
            &sample_metadata(),
        );

        manager
            .update_file_status(
                "a.txt",
                FileLockEntry {
                    status: FileStatus::Completed,
                    size: 10,
                    transferred_bytes: 10,
                    original_hash: Some("deadbeef".to_string()),
                    partial_hash: Some("deadbeef".to_string()),
                    last_modified: None,
                },
            )
            .unwrap();

        assert!(LockManager::lock_path_for(dir.path()).exists());
    }

    #[test]
    fn reconcile_classifies_each_case() {
        let mut existing_files = HashMap::new();
        existing_files.insert(
            "same_size_done".to_string(),
            FileLockEntry {
                status: FileStatus::Completed,
                size: 10,
                transferred_bytes: 10,
                original_hash: None,
                partial_hash: None,
                last_modified: None,
            },
        );
        existing_files.insert(
            "resumable".to_string(),
            FileLockEntry {
                status: FileStatus::InProgress,
                size: 100,
                transferred_bytes: 40,
                original_hash: None,
                partial_hash: None,
                last_modified: None,
            },
        );
        existing_files.insert(
            "size_changed".to_string(),
            FileLockEntry {
                status: FileStatus::InProgress,
                size: 5,
                transferred_bytes: 5,
                original_hash: None,
                partial_hash: None,
                last_modified: None,
            },
        );
        let existing = LockDocument {
            version: "1.0".to_string(),
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sender_ip: "10.0.0.1".to_string(),
            total_files: 3,
            total_size: 115,
            files: existing_files,
        };

        let metadata = BatchMetadata::from_files(
            vec![
                ("same_size_done".to_string(), 10),
                ("resumable".to_string(), 100),
                ("size_changed".to_string(), 999),
                ("never_seen".to_string(), 1),
            ],
            false,
        );

        let plan = LockManager::reconcile(Some(&existing), &metadata);
        assert_eq!(plan.actions["same_size_done"], ReconciledAction::Skip);
        assert_eq!(
            plan.actions["resumable"],
            ReconciledAction::Resume {
                transferred_bytes: 40
            }
        );
        assert_eq!(plan.actions["size_changed"], ReconciledAction::Fresh);
        assert_eq!(plan.actions["never_seen"], ReconciledAction::Fresh);
    }

    #[test]
    fn stale_lock_file_is_deleted() {
        let dir = tempdir().unwrap();
        let path = LockManager::lock_path_for(dir.path());
        let stale = LockDocument {
            version: "1.0".to_string(),
            session_id: Uuid::new_v4(),
            timestamp: Utc::now() - chrono::Duration::hours(25),
            sender_ip: "10.0.0.1".to_string(),
            total_files: 0,
            total_size: 0,
            files: HashMap::new(),
        };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        assert!(LockManager::load_existing(dir.path()).is_none());
        assert!(!path.exists());
    }
}
