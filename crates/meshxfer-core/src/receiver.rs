//! Receiver core: authenticate, validate metadata, reconcile lock
//! state, demultiplex the stream into per-file writers, then verify
//! and retry.

use crate::error::TransferError;
use crate::progress::{ProgressMonitor, ProgressSnapshot, ProgressState};
use crate::retry::verify_and_retry;
use meshxfer_files::{FileLockEntry, FileStatus, LockManager, ReconciledAction, ResumeHint, WriterTable};
use meshxfer_proto::{validate_batch, BatchMetadata, ResendRequest};
use meshxfer_transport::framed::RecvOutcome;
use meshxfer_transport::{perform_receiver_handshake, AuthenticatedStream, FramedStream};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
const RECORD_READ_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub output_dir: PathBuf,
    pub enable_stall_detection: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverOutcome {
    Completed,
    FailedFiles(Vec<String>),
}

/// Connect to `sender_addr`, authenticate, and run the full receiver
/// protocol. `interrupted` is polled by the data loop so SIGINT can
/// abort cleanly, leaving `.part` files for resume.
pub fn run_receiver(
    sender_addr: SocketAddr,
    token: &str,
    opts: ReceiverOptions,
    interrupted: Arc<AtomicBool>,
    on_progress: Option<Box<dyn FnMut(ProgressSnapshot) + Send>>,
) -> Result<ReceiverOutcome, TransferError> {
    let socket = std::net::TcpStream::connect_timeout(&sender_addr, CONNECT_TIMEOUT)?;
    let framed = FramedStream::new(socket)?;
    let authenticated = perform_receiver_handshake(framed, token, HANDSHAKE_TIMEOUT)?;

    run_receiver_session(authenticated, opts, sender_addr, interrupted, on_progress)
}

fn run_receiver_session(
    mut authenticated: AuthenticatedStream,
    opts: ReceiverOptions,
    sender_addr: SocketAddr,
    interrupted: Arc<AtomicBool>,
    on_progress: Option<Box<dyn FnMut(ProgressSnapshot) + Send>>,
) -> Result<ReceiverOutcome, TransferError> {
    std::fs::create_dir_all(&opts.output_dir)?;

    authenticated
        .stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let metadata_bytes = match authenticated.stream.recv_record(&authenticated.cipher)? {
        RecvOutcome::Record(data) => data,
        RecvOutcome::Ended => {
            return Err(TransferError::ProtocolError("connection ended before metadata".to_string()))
        }
    };
    let metadata = BatchMetadata::from_json(&metadata_bytes)
        .map_err(|e| TransferError::ProtocolError(e.to_string()))?;
    validate_batch(&metadata)?;
    tracing::info!(file_count = metadata.file_count, total_size = metadata.total_size, "metadata validated");

    let existing_lock = LockManager::load_existing(&opts.output_dir);
    let plan = LockManager::reconcile(existing_lock.as_ref(), &metadata);
    let mut lock_manager = LockManager::create_fresh(
        &opts.output_dir,
        Uuid::new_v4(),
        sender_addr.ip().to_string(),
        &metadata,
    );

    let mut writers = WriterTable::new(opts.output_dir.clone(), metadata.files.clone());
    for file in &metadata.files {
        match plan.actions.get(&file.relative_path) {
            Some(ReconciledAction::Resume { transferred_bytes }) => {
                writers.set_resume_hint(
                    &file.relative_path,
                    ResumeHint {
                        resume_bytes: *transferred_bytes,
                    },
                );
                lock_manager.update_file_status(
                    &file.relative_path,
                    FileLockEntry {
                        status: FileStatus::InProgress,
                        size: file.size,
                        transferred_bytes: *transferred_bytes,
                        original_hash: None,
                        partial_hash: None,
                        last_modified: None,
                    },
                )?;
            }
            Some(ReconciledAction::Skip) => {
                writers.set_resume_hint(
                    &file.relative_path,
                    ResumeHint {
                        resume_bytes: file.size,
                    },
                );
                lock_manager.update_file_status(
                    &file.relative_path,
                    FileLockEntry {
                        status: FileStatus::Completed,
                        size: file.size,
                        transferred_bytes: file.size,
                        original_hash: None,
                        partial_hash: None,
                        last_modified: None,
                    },
                )?;
            }
            _ => {}
        }
    }

    // Zero-size files never own a stream-position range, so `route`
    // can never reach them; materialize them directly instead of
    // waiting for bytes that will never arrive.
    for file in &metadata.files {
        if file.size == 0 {
            writers.ensure_open(&file.relative_path)?;
        }
    }

    authenticated.stream.send_plain(b"READY")?;
    tracing::info!("sent READY, entering receive loop");

    let progress = ProgressState::new(metadata.total_size);
    let monitor = on_progress.map(|cb| ProgressMonitor::spawn(Arc::clone(&progress), cb, None));
    receive_loop(&mut authenticated, &mut writers, &progress, &interrupted, opts.enable_stall_detection)?;
    if let Some(monitor) = monitor {
        monitor.stop();
    }

    if interrupted.load(Ordering::Relaxed) {
        lock_manager.flush_deferred()?;
        return Err(TransferError::ProtocolError("interrupted by signal".to_string()));
    }

    let hash_map_bytes = match authenticated.stream.recv_record(&authenticated.cipher)? {
        RecvOutcome::Record(data) => data,
        RecvOutcome::Ended => {
            return Err(TransferError::ProtocolError("stream ended before hash map".to_string()))
        }
    };
    let hash_map: std::collections::HashMap<String, String> = serde_json::from_slice(&hash_map_bytes)
        .map_err(|e| TransferError::ProtocolError(e.to_string()))?;

    match authenticated.stream.recv_record(&authenticated.cipher)? {
        RecvOutcome::Ended => {}
        RecvOutcome::Record(_) => {
            return Err(TransferError::ProtocolError("expected end marker after hash map".to_string()))
        }
    }

    let outcome = verify_and_retry(&mut authenticated, &mut writers, &hash_map, &mut lock_manager)?;

    match &outcome {
        ReceiverOutcome::Completed => {
            let signal = meshxfer_proto::CompletionSignal::success("transfer complete", 0.0);
            let payload = serde_json::to_vec(&signal).expect("json encode");
            authenticated.stream.send_record(&authenticated.cipher, &payload)?;
            authenticated.stream.shutdown_write()?;
            lock_manager.remove()?;
        }
        ReceiverOutcome::FailedFiles(_) => {
            lock_manager.flush_deferred()?;
        }
    }

    Ok(outcome)
}

fn receive_loop(
    authenticated: &mut AuthenticatedStream,
    writers: &mut WriterTable,
    progress: &Arc<ProgressState>,
    interrupted: &Arc<AtomicBool>,
    enable_stall_detection: bool,
) -> Result<(), TransferError> {
    authenticated.stream.set_read_timeout(Some(RECORD_READ_TIMEOUT))?;
    let mut stream_position: u64 = 0;
    let mut last_stall_check = Instant::now();
    let mut last_progress_bytes: u64 = 0;
    let mut stall_attempts = 0u32;

    loop {
        if interrupted.load(Ordering::Relaxed) {
            return Ok(());
        }

        match authenticated.stream.recv_record(&authenticated.cipher)? {
            RecvOutcome::Ended => {
                return Err(TransferError::ProtocolError(
                    "end marker arrived before hash map".to_string(),
                ))
            }
            RecvOutcome::Record(block) => {
                // Hash-map and end-marker detection happens one layer
                // up; a block here is always forward data because the
                // sender never interleaves the hash map mid-stream.
                let mut remaining = block.as_slice();
                while !remaining.is_empty() {
                    let n = writers.route(stream_position, remaining)?;
                    if n == 0 {
                        return Err(TransferError::ProtocolError(
                            "writer accepted zero bytes at a valid position".to_string(),
                        ));
                    }
                    stream_position += n as u64;
                    remaining = &remaining[n..];
                    progress.advance(n as u64, stream_position);
                }

                if enable_stall_detection && last_stall_check.elapsed() >= Duration::from_secs(10) {
                    let current = progress.bytes_transferred();
                    if current == last_progress_bytes && stall_attempts < 3 {
                        stall_attempts += 1;
                        let req = ResendRequest::new(stream_position, 0.0, stall_attempts);
                        let payload = serde_json::to_vec(&req).expect("json encode");
                        authenticated.stream.send_record(&authenticated.cipher, &payload)?;
                        tracing::warn!(stream_position, stall_attempts, "stall detected, sent resend request");
                    } else if current > last_progress_bytes {
                        stall_attempts = 0;
                        progress.rearm_stall();
                    }
                    last_progress_bytes = current;
                    last_stall_check = Instant::now();
                }

                if stream_position >= progress.total_size() {
                    return Ok(());
                }
            }
        }
    }
}
