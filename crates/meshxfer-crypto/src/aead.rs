//! ChaCha20-Poly1305 AEAD over the derived session key.
//!
//! Nonces are 12 bytes, freshly random per record, with no associated
//! data. Uniqueness is probabilistic (2^96) rather than counter-based,
//! per the session's single-use-key-per-process lifetime.

use crate::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305,
};
use rand_core::{CryptoRng, RngCore};

/// AEAD cipher bound to one session key.
pub struct SessionCipher {
    cipher: ChaCha20Poly1305,
}

impl SessionCipher {
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a fresh random 12-byte nonce.
    pub fn random_nonce<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);
        nonce
    }

    pub fn encrypt(&self, nonce: &[u8; 12], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(nonce.into(), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    pub fn decrypt(&self, nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
