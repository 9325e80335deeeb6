//! # meshxfer-core
//!
//! Session orchestration: the sender and receiver cores, the
//! progress/stall monitor, the integrity and retry engine, and the
//! aggregate error taxonomy every lower-crate error converges into.

pub mod collab;
pub mod error;
pub mod progress;
pub mod receiver;
pub mod retry;
pub mod sender;

pub use collab::{AlwaysNoPrompter, AlwaysTrustVerifier, AlwaysYesPrompter, NeverTrustVerifier, NoopSelfIp, PeerVerifier, Prompter, SelfIp};
pub use error::TransferError;
pub use progress::{format_bytes, format_duration, format_eta, format_speed, ProgressMonitor, ProgressSnapshot, ProgressState};
pub use receiver::{run_receiver, ReceiverOptions, ReceiverOutcome};
pub use sender::{run_sender, SendEntry, SenderOptions, SenderOutcome};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Install a SIGINT handler that flips a shared flag, polled by the
/// receiver's data loop. Safe to call at most once per process.
pub fn install_interrupt_handler() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    let _ = ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    });
    interrupted
}
