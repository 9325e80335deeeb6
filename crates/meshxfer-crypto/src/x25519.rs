//! X25519 Diffie-Hellman key exchange (RFC 7748).
//!
//! Ephemeral keys only: a fresh pair is generated per process and the
//! shared secret is never persisted.

use crate::error::CryptoError;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 private key (32 bytes).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// ECDH shared secret, pre-KDF.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl PrivateKey {
    /// Generate a new ephemeral private key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Diffie-Hellman exchange. Rejects low-order peer keys.
    pub fn exchange(&self, peer_public: &PublicKey) -> Result<SharedSecret, CryptoError> {
        let shared = self.0.diffie_hellman(&peer_public.0);
        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::LowOrderPoint);
        }
        Ok(SharedSecret(shared))
    }
}

impl PublicKey {
    #[must_use]
    pub fn to_bytes(self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }
}

impl SharedSecret {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn key_exchange_agrees() {
        let alice = PrivateKey::generate(&mut OsRng);
        let bob = PrivateKey::generate(&mut OsRng);

        let alice_shared = alice.exchange(&bob.public_key()).unwrap();
        let bob_shared = bob.exchange(&alice.public_key()).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn rejects_low_order_point() {
        let private = PrivateKey::generate(&mut OsRng);
        let zero_public = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(
            private.exchange(&zero_public),
            Err(CryptoError::LowOrderPoint)
        ));
    }

    #[test]
    fn public_key_roundtrips_through_bytes() {
        let private = PrivateKey::generate(&mut OsRng);
        let bytes = private.public_key().to_bytes();
        assert_eq!(PublicKey::from_bytes(bytes).to_bytes(), bytes);
    }
}
