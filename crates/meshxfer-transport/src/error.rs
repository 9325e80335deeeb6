//! Transport-level error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer (short read)")]
    TransportClosed,

    #[error("malformed record framing: {0}")]
    ProtocolError(String),

    #[error("authentication failed")]
    AuthFailure,

    #[error(transparent)]
    Crypto(#[from] meshxfer_crypto::CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
