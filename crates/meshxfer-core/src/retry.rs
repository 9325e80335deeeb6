//! Integrity verification and the bounded retry protocol: compare
//! every writer's hash against the sender's hash map, and for any
//! mismatch, run up to three resend-and-reverify rounds.

use crate::error::TransferError;
use crate::receiver::ReceiverOutcome;
use meshxfer_files::{rehash_file, FileLockEntry, FileStatus, LockManager, WriterTable};
use meshxfer_proto::RetryRequest;
use meshxfer_transport::framed::RecvOutcome;
use meshxfer_transport::AuthenticatedStream;
use std::collections::HashMap;
use std::fs;

const MAX_RETRY_ATTEMPTS: u32 = 3;

struct FailedFile {
    path: String,
    expected: String,
    received: String,
}

/// Hash a path that never got a materialized writer — a zero-size
/// file, or one adopted wholesale from a prior completed session —
/// straight off disk instead of silently passing it.
fn hash_unmaterialized(writers: &WriterTable, path: &str) -> Option<String> {
    let expected_size = writers.descriptor(path).map_or(0, |d| d.size);
    let on_disk = writers.expected_path(path);
    let meta = fs::metadata(&on_disk).ok()?;
    if meta.len() != expected_size {
        return None;
    }
    rehash_file(&on_disk).ok()
}

fn verify_once(writers: &WriterTable, hash_map: &HashMap<String, String>) -> Vec<FailedFile> {
    let mut failed = Vec::new();
    for path in writers.all_paths() {
        let expected = hash_map.get(path).cloned().unwrap_or_default();
        let received = match writers.writer(path) {
            Some(writer) => writer.current_hash_hex(),
            None => match hash_unmaterialized(writers, path) {
                Some(hash) => hash,
                None => {
                    failed.push(FailedFile {
                        path: path.to_string(),
                        expected,
                        received: String::new(),
                    });
                    continue;
                }
            },
        };
        if expected != received {
            failed.push(FailedFile {
                path: path.to_string(),
                expected,
                received,
            });
        }
    }
    failed
}

fn record_lock_status(
    lock_manager: &mut LockManager,
    writers: &WriterTable,
    path: &str,
    status: FileStatus,
) -> Result<(), TransferError> {
    let writer = writers.writer(path);
    let (size, transferred) = writer.map_or((0, 0), |w| (w.size, w.written));
    lock_manager.update_file_status(
        path,
        FileLockEntry {
            status,
            size,
            transferred_bytes: transferred,
            original_hash: None,
            partial_hash: writer.map(|w| w.current_hash_hex()),
            last_modified: None,
        },
    )?;
    Ok(())
}

/// Verify every received file against the hash map, running a bounded
/// number of retry rounds for any mismatch.
pub fn verify_and_retry(
    authenticated: &mut AuthenticatedStream,
    writers: &mut WriterTable,
    hash_map: &HashMap<String, String>,
    lock_manager: &mut LockManager,
) -> Result<ReceiverOutcome, TransferError> {
    let mut failed = verify_once(writers, hash_map);

    for path in writers.all_paths() {
        let status = if failed.iter().any(|f| f.path == path) {
            FileStatus::Failed
        } else {
            FileStatus::Completed
        };
        record_lock_status(lock_manager, writers, path, status)?;
    }

    if failed.is_empty() {
        return Ok(ReceiverOutcome::Completed);
    }

    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        tracing::warn!(
            attempt,
            files = ?failed.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
            "hash verification failed, requesting retry"
        );

        let failed_paths: Vec<String> = failed.iter().map(|f| f.path.clone()).collect();
        let request = RetryRequest::new(failed_paths.clone(), attempt);
        let payload = serde_json::to_vec(&request).expect("json encode");
        authenticated.stream.send_record(&authenticated.cipher, &payload)?;

        for path in &failed_paths {
            reset_writer_for_retry(writers, path)?;
        }

        let retry_hash_map = receive_retry_round(authenticated, writers, &failed_paths)?;

        failed = verify_once(writers, &retry_hash_map);
        for path in &failed_paths {
            let status = if failed.iter().any(|f| f.path == *path) {
                FileStatus::Failed
            } else {
                FileStatus::Completed
            };
            record_lock_status(lock_manager, writers, path, status)?;
        }

        if failed.is_empty() {
            return Ok(ReceiverOutcome::Completed);
        }
    }

    let remaining: Vec<String> = failed.into_iter().map(|f| f.path).collect();
    tracing::error!(files = ?remaining, "files still failed after all retry attempts, leaving part files for inspection");
    Ok(ReceiverOutcome::FailedFiles(remaining))
}

fn reset_writer_for_retry(writers: &mut WriterTable, path: &str) -> Result<(), TransferError> {
    writers.reset_for_retry(path)?;
    Ok(())
}

/// Receive one retry round's resent file bytes followed by its hash
/// map, mirroring the main stream's framing: the receiver already
/// knows exactly how many bytes the failed files carry (their
/// descriptor sizes), so the hash map is simply "the record after
/// that many bytes have arrived" — the same `stream_position >=
/// total_size` boundary `receive_loop` uses for the forward path,
/// never a guess about what a block's bytes decode as.
fn receive_retry_round(
    authenticated: &mut AuthenticatedStream,
    writers: &mut WriterTable,
    failed_paths: &[String],
) -> Result<HashMap<String, String>, TransferError> {
    let total_bytes: u64 = failed_paths
        .iter()
        .map(|p| writers.descriptor(p).map_or(0, |d| d.size))
        .sum();

    let mut cursor = 0usize;
    let mut received_bytes = 0u64;
    while received_bytes < total_bytes {
        let block = match authenticated.stream.recv_record(&authenticated.cipher)? {
            RecvOutcome::Ended => {
                return Err(TransferError::ProtocolError(
                    "retry stream ended before hash map".to_string(),
                ))
            }
            RecvOutcome::Record(block) => block,
        };

        let mut remaining = block.as_slice();
        while !remaining.is_empty() && cursor < failed_paths.len() {
            let path = &failed_paths[cursor];
            writers.ensure_open(path)?;
            let writer = writers.writer_mut(path).expect("just opened");
            let n = writer.write_chunk(remaining)?;
            if n == 0 {
                cursor += 1;
                continue;
            }
            remaining = &remaining[n..];
            received_bytes += n as u64;
        }
    }

    let hash_map_bytes = match authenticated.stream.recv_record(&authenticated.cipher)? {
        RecvOutcome::Ended => {
            return Err(TransferError::ProtocolError(
                "retry stream ended before hash map".to_string(),
            ))
        }
        RecvOutcome::Record(block) => block,
    };
    let hash_map: HashMap<String, String> = serde_json::from_slice(&hash_map_bytes)
        .map_err(|e| TransferError::ProtocolError(e.to_string()))?;

    match authenticated.stream.recv_record(&authenticated.cipher)? {
        RecvOutcome::Ended => Ok(hash_map),
        RecvOutcome::Record(_) => Err(TransferError::ProtocolError(
            "expected end marker after retry hash map".to_string(),
        )),
    }
}
