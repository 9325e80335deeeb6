//! Error type for the crypto layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("AEAD decryption failed (tag mismatch or corrupted ciphertext)")]
    DecryptionFailed,

    #[error("peer public key is a low-order point")]
    LowOrderPoint,
}
