//! Protocol-level errors: malformed framing, invalid metadata.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("batch metadata has kind {0:?}, expected \"stream\"")]
    WrongKind(String),

    #[error("batch metadata declares zero files")]
    EmptyBatch,

    #[error("unsafe path in metadata: {0:?}")]
    UnsafePath(String),

    #[error("duplicate path after case-insensitive normalization: {0:?}")]
    DuplicatePath(String),

    #[error("file {path:?} offset {offset} is inconsistent with running total {expected}")]
    BadOffset {
        path: String,
        offset: u64,
        expected: u64,
    },

    #[error("malformed control message: {0}")]
    MalformedMessage(String),
}
