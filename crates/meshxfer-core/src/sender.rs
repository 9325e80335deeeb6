//! Sender core: accept one verified connection, establish the session,
//! stream files, then wait for confirmation or retry.

use crate::collab::PeerVerifier;
use crate::error::TransferError;
use crate::progress::{ProgressMonitor, ProgressSnapshot, ProgressState};
use meshxfer_files::{StreamWriter, BLOCK_SIZE};
use meshxfer_proto::{parse_control_message, BatchMetadata, ControlMessage, RetryRequest};
use meshxfer_transport::framed::RecvOutcome;
use meshxfer_transport::{perform_sender_handshake, AuthenticatedStream, FramedStream};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CONNECT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const COMPLETION_WAIT: Duration = Duration::from_secs(120);
const RESEND_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READ_SLICE: usize = 64 * 1024;

/// One file queued for sending, already resolved to an absolute path
/// on disk paired with the relative path that will appear on the wire.
#[derive(Debug, Clone)]
pub struct SendEntry {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct SenderOptions {
    pub compress: bool,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self { compress: true }
    }
}

/// Outcome of a sender run, distinguishing an explicit completion
/// signal from a socket close after data was fully sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderOutcome {
    Confirmed,
    SentUnconfirmed,
}

fn ready_timeout_for(file_count: usize) -> Duration {
    if file_count <= 1_000 {
        Duration::from_secs(60)
    } else if file_count <= 10_000 {
        Duration::from_secs(120)
    } else {
        Duration::from_secs(180)
    }
}

/// Accept one connection on `bind_addr`, verify the peer, then run the
/// full sender protocol against it.
pub fn run_sender(
    bind_addr: SocketAddr,
    token: &str,
    entries: Vec<SendEntry>,
    opts: SenderOptions,
    peer_verify: &dyn PeerVerifier,
    on_progress: Option<Box<dyn FnMut(ProgressSnapshot) + Send>>,
) -> Result<SenderOutcome, TransferError> {
    let listener = TcpListener::bind(bind_addr)?;
    tracing::info!(addr = %bind_addr, "sender listening");

    let (socket, peer_addr) = listener.accept()?;
    socket.set_read_timeout(Some(CONNECT_ACCEPT_TIMEOUT))?;

    let (trusted, peer_name) = peer_verify.verify(peer_addr.ip());
    if !trusted {
        tracing::warn!(peer = %peer_addr, "rejecting untrusted peer before handshake");
        drop(socket);
        return Err(TransferError::UntrustedPeer(peer_addr.ip().to_string()));
    }
    tracing::info!(peer = %peer_addr, name = ?peer_name, "peer verified");

    let framed = FramedStream::new(socket)?;
    let authenticated = perform_sender_handshake(framed, token, HANDSHAKE_TIMEOUT)?;

    run_sender_session(authenticated, entries, opts, on_progress)
}

fn run_sender_session(
    mut authenticated: AuthenticatedStream,
    entries: Vec<SendEntry>,
    opts: SenderOptions,
    on_progress: Option<Box<dyn FnMut(ProgressSnapshot) + Send>>,
) -> Result<SenderOutcome, TransferError> {
    let files: Vec<(String, u64)> = entries
        .iter()
        .map(|e| (e.relative_path.clone(), e.size))
        .collect();
    let metadata = BatchMetadata::from_files(files, opts.compress);

    authenticated
        .stream
        .send_record(&authenticated.cipher, &metadata.to_json().expect("json encode"))?;

    wait_for_ready(&mut authenticated, entries.len())?;
    tracing::info!(file_count = entries.len(), "receiver ready, starting stream");

    let progress = ProgressState::new(metadata.total_size);
    let monitor = on_progress.map(|cb| ProgressMonitor::spawn(Arc::clone(&progress), cb, None));
    let hashes = stream_files(&mut authenticated, &entries, opts.compress, &progress)?;
    if let Some(monitor) = monitor {
        monitor.stop();
    }

    let hash_json = serde_json::to_vec(&hashes).expect("json encode");
    authenticated
        .stream
        .send_record(&authenticated.cipher, &hash_json)?;
    authenticated.stream.send_end_marker()?;
    tracing::info!("hash map and end marker sent");

    await_retry_or_completion(&mut authenticated, &entries, &hashes, opts.compress)
}

fn wait_for_ready(authenticated: &mut AuthenticatedStream, file_count: usize) -> Result<(), TransferError> {
    let deadline = Instant::now() + ready_timeout_for(file_count);
    authenticated
        .stream
        .set_read_timeout(Some(READY_POLL_INTERVAL))?;

    loop {
        match authenticated.stream.recv_plain() {
            Ok(token) if token == b"READY" => {
                return Ok(());
            }
            Ok(_) => {
                return Err(TransferError::ProtocolError("expected READY token".to_string()));
            }
            Err(meshxfer_transport::TransportError::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if Instant::now() >= deadline {
                    return Err(TransferError::HandshakeTimeout("READY".to_string()));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn stream_files(
    authenticated: &mut AuthenticatedStream,
    entries: &[SendEntry],
    compress: bool,
    progress: &Arc<ProgressState>,
) -> Result<HashMap<String, String>, TransferError> {
    let mut writer = StreamWriter::new(compress);
    let mut stream_position: u64 = 0;
    let mut last_poll = Instant::now();

    authenticated.stream.set_read_timeout(Some(Duration::from_millis(1)))?;

    for entry in entries {
        progress.set_current_file(&entry.relative_path, entry.size);
        // Registers the per-file hasher even for zero-size files, which
        // otherwise never call `feed` and would be absent from the
        // finished hash map.
        writer.feed(&entry.relative_path, &[]);
        let mut file = File::open(&entry.absolute_path)?;
        let mut buf = vec![0u8; READ_SLICE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.feed(&entry.relative_path, &buf[..n]);

            for block in writer.drain_blocks() {
                authenticated.stream.send_record(&authenticated.cipher, &block)?;
                stream_position += BLOCK_SIZE as u64;
                progress.advance(BLOCK_SIZE as u64, stream_position);
            }

            if last_poll.elapsed() >= RESEND_POLL_INTERVAL {
                poll_for_resend(authenticated)?;
                last_poll = Instant::now();
            }
        }
    }

    if let Some(residue) = writer.flush() {
        let residue_len = residue.len() as u64;
        authenticated.stream.send_record(&authenticated.cipher, &residue)?;
        stream_position += residue_len;
        progress.advance(residue_len, stream_position);
    }

    Ok(writer.finish_hashes())
}

/// Check the socket for a pending resend request without blocking the
/// forward data path; a no-op unless the receiver has sent one.
fn poll_for_resend(authenticated: &mut AuthenticatedStream) -> Result<(), TransferError> {
    if !authenticated.stream.is_readable()? {
        return Ok(());
    }

    match authenticated.stream.recv_record(&authenticated.cipher) {
        Ok(RecvOutcome::Record(data)) => match parse_control_message(&data) {
            Ok(ControlMessage::Resend(req)) => {
                tracing::info!(
                    stream_position = req.stream_position,
                    attempt = req.retry_count,
                    "resend request received; abort-and-resume handled by the receiver's lock state"
                );
                Ok(())
            }
            Ok(other) => {
                tracing::warn!(?other, "unexpected control message during forward streaming");
                Ok(())
            }
            Err(e) => Err(TransferError::ProtocolError(e.to_string())),
        },
        Ok(RecvOutcome::Ended) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn await_retry_or_completion(
    authenticated: &mut AuthenticatedStream,
    entries: &[SendEntry],
    hashes: &HashMap<String, String>,
    compress: bool,
) -> Result<SenderOutcome, TransferError> {
    let deadline = Instant::now() + COMPLETION_WAIT;
    authenticated
        .stream
        .set_read_timeout(Some(Duration::from_millis(200)))?;

    loop {
        match authenticated.stream.recv_record(&authenticated.cipher) {
            Ok(RecvOutcome::Record(data)) => match parse_control_message(&data) {
                Ok(ControlMessage::Completion(_)) => {
                    tracing::info!("completion signal received");
                    return Ok(SenderOutcome::Confirmed);
                }
                Ok(ControlMessage::Retry(req)) => {
                    resend_failed_files(authenticated, entries, &req, hashes, compress)?;
                }
                Ok(other) => {
                    tracing::warn!(?other, "unexpected control message while awaiting completion");
                }
                Err(e) => return Err(TransferError::ProtocolError(e.to_string())),
            },
            Ok(RecvOutcome::Ended) => {
                return Ok(SenderOutcome::SentUnconfirmed);
            }
            Err(meshxfer_transport::TransportError::TransportClosed) => {
                return Ok(SenderOutcome::SentUnconfirmed);
            }
            Err(meshxfer_transport::TransportError::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if Instant::now() >= deadline {
                    return Ok(SenderOutcome::SentUnconfirmed);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn resend_failed_files(
    authenticated: &mut AuthenticatedStream,
    entries: &[SendEntry],
    req: &RetryRequest,
    hashes: &HashMap<String, String>,
    compress: bool,
) -> Result<(), TransferError> {
    tracing::info!(files = ?req.failed_files, attempt = req.attempt, "resending failed files");

    let by_path: HashMap<&str, &SendEntry> = entries
        .iter()
        .map(|e| (e.relative_path.as_str(), e))
        .collect();

    let mut writer = StreamWriter::new(compress);
    let mut retry_hashes = HashMap::new();

    for path in &req.failed_files {
        let Some(entry) = by_path.get(path.as_str()) else {
            continue;
        };
        writer.feed(path, &[]);
        let mut file = File::open(&entry.absolute_path)?;
        let mut buf = vec![0u8; READ_SLICE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.feed(path, &buf[..n]);
            for block in writer.drain_blocks() {
                authenticated.stream.send_record(&authenticated.cipher, &block)?;
            }
        }
        if let Some(expected) = hashes.get(path) {
            retry_hashes.insert(path.clone(), expected.clone());
        }
    }

    if let Some(residue) = writer.flush() {
        authenticated.stream.send_record(&authenticated.cipher, &residue)?;
    }
    let finished = writer.finish_hashes();
    for (path, hash) in finished {
        retry_hashes.insert(path, hash);
    }

    let hash_json = serde_json::to_vec(&retry_hashes).expect("json encode");
    authenticated
        .stream
        .send_record(&authenticated.cipher, &hash_json)?;
    authenticated.stream.send_end_marker()?;
    Ok(())
}
