//! # meshxfer-files
//!
//! The file layer: chunked LZ4 compression on the sender side, the
//! lazy demultiplexing writer with an offset index on the receiver
//! side, and the persistent lock-file manager that makes a transfer
//! crash-resumable.

pub mod compressor;
pub mod error;
pub mod lock;
pub mod stream;
pub mod writer;

pub use error::FilesError;
pub use lock::{FileLockEntry, FileStatus, LockDocument, LockManager, ReconciledAction, ReconciliationPlan};
pub use stream::{StreamWriter, BLOCK_SIZE};
pub use writer::{rehash_file, FileWriter, ResumeHint, WriterTable};
