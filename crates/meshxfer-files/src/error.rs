//! File-layer error taxonomy: compression, writer, and lock-file failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilesError {
    #[error("lz4 decompression failed: {0}")]
    Decompress(String),

    #[error("hash mismatch for {path}: expected {expected}, received {received}")]
    HashMismatch {
        path: String,
        expected: String,
        received: String,
    },

    #[error("stream position {position} matched no writer (protocol anomaly)")]
    NoWriterForPosition { position: u64 },

    #[error("lock file at {0} is malformed")]
    MalformedLockFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] meshxfer_proto::ProtocolError),
}
