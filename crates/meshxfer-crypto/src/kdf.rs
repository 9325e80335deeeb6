//! Session key derivation: ECDH shared secret + shared token -> 32-byte key.

use crate::x25519::SharedSecret;
use hkdf::Hkdf;
use sha2::Sha256;

const INFO: &[u8] = b"meshxfer-session-v1";

/// Derive the 32-byte session key from the ECDH shared secret, using
/// the human-readable session token as the HKDF salt.
#[must_use]
pub fn derive_session_key(shared: &SharedSecret, token: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(token.as_bytes()), shared.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x25519::PrivateKey;
    use rand_core::OsRng;

    #[test]
    fn deterministic_for_same_inputs() {
        let alice = PrivateKey::generate(&mut OsRng);
        let bob = PrivateKey::generate(&mut OsRng);

        let shared1 = alice.exchange(&bob.public_key()).unwrap();
        let shared2 = bob.exchange(&alice.public_key()).unwrap();

        let key1 = derive_session_key(&shared1, "ocean-forest");
        let key2 = derive_session_key(&shared2, "ocean-forest");
        assert_eq!(key1, key2);
    }

    #[test]
    fn different_tokens_diverge() {
        let alice = PrivateKey::generate(&mut OsRng);
        let bob = PrivateKey::generate(&mut OsRng);
        let shared = alice.exchange(&bob.public_key()).unwrap();

        let key_a = derive_session_key(&shared, "ocean-forest");
        let shared2 = alice.exchange(&bob.public_key()).unwrap();
        let key_b = derive_session_key(&shared2, "river-canyon");
        assert_ne!(key_a, key_b);
    }
}
