//! # meshxfer-crypto
//!
//! Session cryptography for meshxfer: ephemeral X25519 key exchange,
//! HKDF-SHA256 session key derivation, ChaCha20-Poly1305 AEAD framing,
//! and the shared-token / challenge-response authentication primitive.

pub mod aead;
pub mod error;
pub mod kdf;
pub mod token;
pub mod x25519;

pub use aead::SessionCipher;
pub use error::CryptoError;
pub use kdf::derive_session_key;
pub use token::{expected_response, generate_token};
pub use x25519::{PrivateKey, PublicKey, SharedSecret};
