//! The aggregate transfer error taxonomy. Every lower-crate error
//! converts into this one at the orchestration boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connection closed by peer (short read)")]
    TransportClosed,

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("authentication failed")]
    AuthFailure,

    #[error("handshake timed out waiting for {0}")]
    HandshakeTimeout(String),

    #[error("stall detected at stream position {stream_position}, resend attempt {attempt}")]
    StallDetected { stream_position: u64, attempt: u32 },

    #[error("stall could not be recovered after {attempts} attempts")]
    StallUnrecoverable { attempts: u32 },

    #[error("hash mismatch for {path}: expected {expected}, received {received}")]
    HashMismatch {
        path: String,
        expected: String,
        received: String,
    },

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("unsafe path rejected: {0}")]
    UnsafePath(String),

    #[error("peer {0} is not a trusted mesh peer")]
    UntrustedPeer(String),
}

impl From<meshxfer_transport::TransportError> for TransferError {
    fn from(e: meshxfer_transport::TransportError) -> Self {
        use meshxfer_transport::TransportError as TE;
        match e {
            TE::TransportClosed => Self::TransportClosed,
            TE::ProtocolError(msg) => Self::ProtocolError(msg),
            TE::AuthFailure => Self::AuthFailure,
            TE::Crypto(_) => Self::AuthFailure,
            TE::Io(io) => Self::IoError(io.to_string()),
        }
    }
}

impl From<meshxfer_proto::ProtocolError> for TransferError {
    fn from(e: meshxfer_proto::ProtocolError) -> Self {
        Self::ProtocolError(e.to_string())
    }
}

impl From<meshxfer_files::FilesError> for TransferError {
    fn from(e: meshxfer_files::FilesError) -> Self {
        use meshxfer_files::FilesError as FE;
        match e {
            FE::HashMismatch {
                path,
                expected,
                received,
            } => Self::HashMismatch {
                path,
                expected,
                received,
            },
            FE::Io(io) => Self::IoError(io.to_string()),
            other => Self::ProtocolError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}
