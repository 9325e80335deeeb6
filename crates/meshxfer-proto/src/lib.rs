//! # meshxfer-proto
//!
//! Wire-format types for meshxfer: the batch metadata record, its
//! validation rules, the in-band control messages, and safe relative
//! path checking. Pure data and validation — no socket I/O lives
//! here, see `meshxfer-transport` for that.

pub mod error;
pub mod messages;
pub mod metadata;
pub mod path;

pub use error::ProtocolError;
pub use messages::{
    parse_control_message, CompletionSignal, ControlMessage, HashMapRecord, ResendRequest,
    RetryRequest,
};
pub use metadata::{validate_batch, BatchMetadata, Compressor, FileDescriptor};
pub use path::{is_safe_relative_path, normalize_for_collision};
