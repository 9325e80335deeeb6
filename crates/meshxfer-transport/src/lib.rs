//! # meshxfer-transport
//!
//! Length-prefixed record I/O over one blocking `TcpStream`, plus the
//! key-exchange and challenge-response handshake that turns a bare
//! connection into an `AuthenticatedStream` ready for the metadata
//! exchange.

pub mod error;
pub mod framed;
pub mod handshake;

pub use error::TransportError;
pub use framed::{FramedStream, RecvOutcome, END_MARKER};
pub use handshake::{perform_receiver_handshake, perform_sender_handshake, AuthenticatedStream};
