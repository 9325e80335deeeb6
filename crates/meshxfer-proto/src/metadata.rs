//! Batch metadata: the single record enumerating every file in the
//! transfer, sent once immediately after authentication.

use crate::error::ProtocolError;
use crate::path::{is_safe_relative_path, normalize_for_collision};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One file's entry in the batch metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(rename = "relative_path")]
    pub relative_path: String,
    pub size: u64,
    pub offset: u64,
}

/// Compression algorithm used for stream blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    Lz4,
    None,
}

/// The batch metadata record: `kind`, aggregate sizes, and the
/// ordered file list whose concatenation forms the logical stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub kind: String,
    pub file_count: u64,
    pub total_size: u64,
    pub compressed: bool,
    pub compressor: Compressor,
    pub files: Vec<FileDescriptor>,
}

impl BatchMetadata {
    /// Build batch metadata from an ordered file list, computing
    /// cumulative offsets.
    #[must_use]
    pub fn from_files(files: Vec<(String, u64)>, compressed: bool) -> Self {
        let mut offset = 0u64;
        let mut descriptors = Vec::with_capacity(files.len());
        for (relative_path, size) in &files {
            descriptors.push(FileDescriptor {
                relative_path: relative_path.clone(),
                size: *size,
                offset,
            });
            offset += size;
        }

        Self {
            kind: "stream".to_string(),
            file_count: descriptors.len() as u64,
            total_size: offset,
            compressed,
            compressor: if compressed {
                Compressor::Lz4
            } else {
                Compressor::None
            },
            files: descriptors,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Validate batch metadata per the receiver's acceptance checks:
/// correct `kind`, non-empty file list, safe paths, monotonic offsets
/// consistent with sizes, and no collisions after case-insensitive
/// normalization.
pub fn validate_batch(meta: &BatchMetadata) -> Result<(), ProtocolError> {
    if meta.kind != "stream" {
        return Err(ProtocolError::WrongKind(meta.kind.clone()));
    }
    if meta.files.is_empty() {
        return Err(ProtocolError::EmptyBatch);
    }

    let mut expected_offset = 0u64;
    let mut seen = HashSet::with_capacity(meta.files.len());

    for file in &meta.files {
        if !is_safe_relative_path(&file.relative_path) {
            return Err(ProtocolError::UnsafePath(file.relative_path.clone()));
        }

        let normalized = normalize_for_collision(&file.relative_path);
        if !seen.insert(normalized) {
            return Err(ProtocolError::DuplicatePath(file.relative_path.clone()));
        }

        if file.offset != expected_offset {
            return Err(ProtocolError::BadOffset {
                path: file.relative_path.clone(),
                offset: file.offset,
                expected: expected_offset,
            });
        }
        expected_offset += file.size;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatchMetadata {
        BatchMetadata::from_files(
            vec![("a.txt".to_string(), 10), ("b/c.txt".to_string(), 20)],
            true,
        )
    }

    #[test]
    fn offsets_are_cumulative() {
        let meta = sample();
        assert_eq!(meta.files[0].offset, 0);
        assert_eq!(meta.files[1].offset, 10);
        assert_eq!(meta.total_size, 30);
    }

    #[test]
    fn valid_metadata_passes() {
        assert!(validate_batch(&sample()).is_ok());
    }

    #[test]
    fn rejects_non_stream_kind() {
        let mut meta = sample();
        meta.kind = "single".to_string();
        assert!(matches!(
            validate_batch(&meta),
            Err(ProtocolError::WrongKind(_))
        ));
    }

    #[test]
    fn rejects_empty_batch() {
        let meta = BatchMetadata::from_files(vec![], false);
        assert!(matches!(
            validate_batch(&meta),
            Err(ProtocolError::EmptyBatch)
        ));
    }

    #[test]
    fn rejects_unsafe_path() {
        let meta = BatchMetadata::from_files(vec![("../evil".to_string(), 5)], false);
        assert!(matches!(
            validate_batch(&meta),
            Err(ProtocolError::UnsafePath(_))
        ));
    }

    #[test]
    fn rejects_case_insensitive_collision() {
        let mut meta = sample();
        meta.files.push(FileDescriptor {
            relative_path: "A.TXT".to_string(),
            size: 1,
            offset: 30,
        });
        meta.total_size = 31;
        meta.file_count = 3;
        assert!(matches!(
            validate_batch(&meta),
            Err(ProtocolError::DuplicatePath(_))
        ));
    }

    #[test]
    fn rejects_inconsistent_offset() {
        let mut meta = sample();
        meta.files[1].offset = 999;
        assert!(matches!(
            validate_batch(&meta),
            Err(ProtocolError::BadOffset { .. })
        ));
    }

    #[test]
    fn zero_size_files_do_not_advance_offset() {
        let meta = BatchMetadata::from_files(
            vec![
                ("empty.txt".to_string(), 0),
                ("also_empty.txt".to_string(), 0),
                ("data.bin".to_string(), 5),
            ],
            false,
        );
        assert_eq!(meta.files[0].offset, 0);
        assert_eq!(meta.files[1].offset, 0);
        assert_eq!(meta.files[2].offset, 0);
        assert!(validate_batch(&meta).is_ok());
    }

    #[test]
    fn json_roundtrip() {
        let meta = sample();
        let json = meta.to_json().unwrap();
        let back = BatchMetadata::from_json(&json).unwrap();
        assert_eq!(meta.files, back.files);
        assert_eq!(meta.total_size, back.total_size);
    }
}
