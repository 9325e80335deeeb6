//! Receiver-side lazy demultiplexing writer.
//!
//! `WriterTable` maps stream position to the file it belongs to via
//! binary search over a sorted offset index, and opens each file's
//! part-file only on first use — eager creation of tens of thousands
//! of handles up front would be its own O(N) I/O storm before any
//! data arrives.

use crate::error::FilesError;
use indexmap::IndexMap;
use meshxfer_proto::FileDescriptor;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How often to fsync an open part file, in bytes written since the
/// last sync.
const FSYNC_INTERVAL: u64 = 10 * 1024 * 1024;

/// Per-file resume hint computed by lock reconciliation (§4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeHint {
    pub resume_bytes: u64,
}

pub struct FileWriter {
    pub relative_path: String,
    pub size: u64,
    pub written: u64,
    hasher: Sha256,
    part_path: PathBuf,
    final_path: PathBuf,
    file: Option<File>,
    bytes_since_sync: u64,
    pub complete: bool,
    pub needs_rehash: bool,
}

impl FileWriter {
    fn new(
        output_root: &Path,
        descriptor: &FileDescriptor,
        resume: ResumeHint,
    ) -> Result<Self, FilesError> {
        let final_path = output_root.join(&descriptor.relative_path);
        let part_path = part_file_path(&final_path);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = Self {
            relative_path: descriptor.relative_path.clone(),
            size: descriptor.size,
            written: 0,
            hasher: Sha256::new(),
            part_path,
            final_path,
            file: None,
            bytes_since_sync: 0,
            complete: false,
            needs_rehash: false,
        };

        if descriptor.size == 0 {
            match fs::metadata(&writer.final_path) {
                Ok(meta) if meta.len() == 0 => {}
                Ok(_) => {
                    let target = conflict_free_path(&writer.final_path);
                    File::create(&target)?;
                    writer.final_path = target;
                }
                Err(_) => {
                    File::create(&writer.final_path)?;
                }
            }
            writer.complete = true;
            return Ok(writer);
        }

        if resume.resume_bytes >= descriptor.size && descriptor.size > 0 {
            writer.complete = true;
            return Ok(writer);
        }

        if resume.resume_bytes > 0 {
            let existing_len = fs::metadata(&writer.part_path).map(|m| m.len()).ok();
            if existing_len == Some(resume.resume_bytes) {
                writer.written = resume.resume_bytes;
                writer.needs_rehash = true;
                writer.open_for_append()?;
                return Ok(writer);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&writer.part_path)?;
        writer.file = Some(file);
        Ok(writer)
    }

    fn open_for_append(&mut self) -> Result<(), FilesError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.part_path)?;
        self.file = Some(file);
        Ok(())
    }

    fn rehash_existing(&mut self) -> Result<(), FilesError> {
        let mut existing = File::open(&self.part_path)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = existing.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.hasher.update(&buf[..n]);
        }
        self.needs_rehash = false;
        Ok(())
    }

    /// Append up to `size - written` bytes from `data`, update the
    /// hash, and return the number consumed.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<usize, FilesError> {
        if self.complete {
            return Ok(0);
        }
        if self.needs_rehash {
            self.rehash_existing()?;
        }

        let remaining = (self.size - self.written) as usize;
        let n = remaining.min(data.len());
        if n == 0 {
            return Ok(0);
        }

        let file = self.file.get_or_insert_with(|| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.part_path)
                .expect("part file must be openable")
        });
        file.write_all(&data[..n])?;
        self.hasher.update(&data[..n]);
        self.written += n as u64;
        self.bytes_since_sync += n as u64;

        if self.bytes_since_sync >= FSYNC_INTERVAL {
            file.sync_all()?;
            self.bytes_since_sync = 0;
        }

        if self.written == self.size {
            self.finalize()?;
        }

        Ok(n)
    }

    fn finalize(&mut self) -> Result<(), FilesError> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        let target = conflict_free_path(&self.final_path);
        fs::rename(&self.part_path, &target)?;
        self.final_path = target;
        self.complete = true;
        Ok(())
    }

    /// Hex SHA-256 of the bytes written so far. Only meaningful once
    /// `needs_rehash` has been resolved by a `write_chunk` call, or
    /// for files with `resume_bytes == 0`.
    #[must_use]
    pub fn current_hash_hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

fn part_file_path(final_path: &Path) -> PathBuf {
    let mut os_string = final_path.as_os_str().to_owned();
    os_string.push(".part");
    PathBuf::from(os_string)
}

fn conflict_free_path(final_path: &Path) -> PathBuf {
    if !final_path.exists() {
        return final_path.to_path_buf();
    }
    let stem = final_path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
    let ext = final_path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = final_path.parent().unwrap_or_else(|| Path::new(""));

    for n in 1u32.. {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("conflict suffix search is unbounded")
}

/// Offset-indexed table of lazily-opened writers.
pub struct WriterTable {
    output_root: PathBuf,
    descriptors: IndexMap<String, FileDescriptor>,
    resume_hints: IndexMap<String, ResumeHint>,
    writers: IndexMap<String, FileWriter>,
    /// Sorted `(start, end, path)` for binary search by stream position.
    index: Vec<(u64, u64, String)>,
}

impl WriterTable {
    #[must_use]
    pub fn new(output_root: PathBuf, descriptors: Vec<FileDescriptor>) -> Self {
        let mut index: Vec<(u64, u64, String)> = descriptors
            .iter()
            .map(|d| (d.offset, d.offset + d.size, d.relative_path.clone()))
            .collect();
        index.sort_by_key(|(start, _, _)| *start);

        let descriptors = descriptors
            .into_iter()
            .map(|d| (d.relative_path.clone(), d))
            .collect();

        Self {
            output_root,
            descriptors,
            resume_hints: IndexMap::new(),
            writers: IndexMap::new(),
            index,
        }
    }

    pub fn set_resume_hint(&mut self, relative_path: &str, hint: ResumeHint) {
        self.resume_hints.insert(relative_path.to_string(), hint);
    }

    /// Find the path owning stream position `pos`, via binary search
    /// for the greatest start offset `<= pos`.
    fn path_for_position(&self, pos: u64) -> Option<&str> {
        let idx = self.index.partition_point(|(start, _, _)| *start <= pos);
        if idx == 0 {
            return None;
        }
        let (start, end, path) = &self.index[idx - 1];
        if pos >= *start && pos < *end {
            Some(path.as_str())
        } else {
            None
        }
    }

    /// Route `data` (starting at absolute stream position `pos`) to
    /// the writer(s) it belongs to, opening lazily on first use.
    /// Returns the number of bytes consumed by the first matching
    /// writer (callers loop, advancing `pos`, until all of `data` is
    /// placed).
    pub fn route(&mut self, pos: u64, data: &[u8]) -> Result<usize, FilesError> {
        let Some(path) = self.path_for_position(pos).map(str::to_string) else {
            return Err(FilesError::NoWriterForPosition { position: pos });
        };

        if !self.writers.contains_key(&path) {
            let descriptor = self.descriptors[&path].clone();
            let hint = self.resume_hints.get(&path).copied().unwrap_or_default();
            let writer = FileWriter::new(&self.output_root, &descriptor, hint)?;
            self.writers.insert(path.clone(), writer);
        }

        let writer = self.writers.get_mut(&path).expect("just inserted");
        writer.write_chunk(data)
    }

    pub fn writers(&self) -> impl Iterator<Item = &FileWriter> {
        self.writers.values()
    }

    pub fn writer(&self, relative_path: &str) -> Option<&FileWriter> {
        self.writers.get(relative_path)
    }

    pub fn writer_mut(&mut self, relative_path: &str) -> Option<&mut FileWriter> {
        self.writers.get_mut(relative_path)
    }

    pub fn descriptor(&self, relative_path: &str) -> Option<&FileDescriptor> {
        self.descriptors.get(relative_path)
    }

    /// The final on-disk path a path would land at, regardless of
    /// whether a writer has been opened for it yet.
    #[must_use]
    pub fn expected_path(&self, relative_path: &str) -> PathBuf {
        self.output_root.join(relative_path)
    }

    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    /// Open (or re-verify) a writer by path directly, used when
    /// repositioning for a resend without going through `route`.
    pub fn ensure_open(&mut self, relative_path: &str) -> Result<(), FilesError> {
        if self.writers.contains_key(relative_path) {
            return Ok(());
        }
        let descriptor = self.descriptors[relative_path].clone();
        let hint = self
            .resume_hints
            .get(relative_path)
            .copied()
            .unwrap_or_default();
        let writer = FileWriter::new(&self.output_root, &descriptor, hint)?;
        self.writers.insert(relative_path.to_string(), writer);
        Ok(())
    }

    /// Discard any existing writer and part-file bytes for
    /// `relative_path` and open a fresh one, used by the retry engine
    /// before re-receiving a failed file.
    pub fn reset_for_retry(&mut self, relative_path: &str) -> Result<(), FilesError> {
        self.writers.shift_remove(relative_path);
        self.resume_hints.insert(relative_path.to_string(), ResumeHint::default());

        let descriptor = self.descriptors[relative_path].clone();
        let part_path = part_file_path(&self.output_root.join(relative_path));
        if part_path.exists() {
            fs::remove_file(&part_path)?;
        }

        let writer = FileWriter::new(&self.output_root, &descriptor, ResumeHint::default())?;
        self.writers.insert(relative_path.to_string(), writer);
        Ok(())
    }
}

/// Reopen a part file for final-hash verification once a transfer
/// round completes. Used by the integrity/retry engine when a writer
/// never saw `needs_rehash` resolved (e.g. a file whose bytes arrived
/// entirely from a prior completed session, adopted as complete).
pub fn rehash_file(path: &Path) -> Result<String, FilesError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Seek helper used by the sender's resend handling to reposition a
/// local file read cursor without re-reading from the start.
pub fn seek_to(file: &mut File, offset: u64) -> std::io::Result<u64> {
    file.seek(SeekFrom::Start(offset))
}
