//! Key exchange and challenge-response authentication.
//!
//! Ordering is deterministic and asymmetric: the sender writes its
//! public key first and reads the receiver's second; the receiver
//! reads first and writes second. Both sides then derive the same
//! session key and the sender proves the receiver holds the shared
//! token via an encrypted challenge answered in plaintext.

use crate::error::TransportError;
use crate::framed::{FramedStream, RecvOutcome};
use meshxfer_crypto::{derive_session_key, expected_response, PrivateKey, PublicKey, SessionCipher};
use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use std::time::Duration;

/// A connection that has completed key exchange and authentication,
/// ready for the metadata exchange.
pub struct AuthenticatedStream {
    pub stream: FramedStream,
    pub cipher: SessionCipher,
}

fn exchange_keys_as_sender(
    stream: &mut FramedStream,
    private: &PrivateKey,
) -> Result<PublicKey, TransportError> {
    stream.send_plain(&private.public_key().to_bytes())?;
    let peer_bytes = stream.recv_plain()?;
    decode_public_key(&peer_bytes)
}

fn exchange_keys_as_receiver(
    stream: &mut FramedStream,
    private: &PrivateKey,
) -> Result<PublicKey, TransportError> {
    let peer_bytes = stream.recv_plain()?;
    let peer = decode_public_key(&peer_bytes)?;
    stream.send_plain(&private.public_key().to_bytes())?;
    Ok(peer)
}

fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, TransportError> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TransportError::ProtocolError(format!("bad public key length {}", bytes.len())))?;
    Ok(PublicKey::from_bytes(array))
}

/// Run the sender side of the handshake: key exchange, then issue a
/// random challenge and verify the plaintext response.
pub fn perform_sender_handshake(
    mut stream: FramedStream,
    token: &str,
    handshake_timeout: Duration,
) -> Result<AuthenticatedStream, TransportError> {
    stream.set_read_timeout(Some(handshake_timeout))?;

    let private = PrivateKey::generate(&mut OsRng);
    let peer_public = exchange_keys_as_sender(&mut stream, &private)?;
    let shared = private.exchange(&peer_public)?;
    let key = derive_session_key(&shared, token);
    let cipher = SessionCipher::new(&key);

    let mut challenge = [0u8; 32];
    OsRng.fill_bytes(&mut challenge);
    let expected = expected_response(&challenge, token);

    stream.send_record(&cipher, &challenge)?;
    let response = stream.recv_plain()?;

    if response.len() != 32 || !bool::from(response.as_slice().ct_eq(&expected)) {
        tracing::warn!("challenge response mismatch, rejecting peer");
        return Err(TransportError::AuthFailure);
    }

    tracing::debug!("sender handshake complete");
    Ok(AuthenticatedStream { stream, cipher })
}

/// Run the receiver side of the handshake: key exchange, then answer
/// the sender's encrypted challenge in plaintext.
pub fn perform_receiver_handshake(
    mut stream: FramedStream,
    token: &str,
    handshake_timeout: Duration,
) -> Result<AuthenticatedStream, TransportError> {
    stream.set_read_timeout(Some(handshake_timeout))?;

    let private = PrivateKey::generate(&mut OsRng);
    let peer_public = exchange_keys_as_receiver(&mut stream, &private)?;
    let shared = private.exchange(&peer_public)?;
    let key = derive_session_key(&shared, token);
    let cipher = SessionCipher::new(&key);

    let challenge = match stream.recv_record(&cipher)? {
        RecvOutcome::Record(data) => data,
        RecvOutcome::Ended => {
            return Err(TransportError::ProtocolError(
                "connection ended during challenge".to_string(),
            ))
        }
    };
    let challenge: [u8; 32] = challenge
        .as_slice()
        .try_into()
        .map_err(|_| TransportError::ProtocolError("challenge was not 32 bytes".to_string()))?;

    let response = expected_response(&challenge, token);
    stream.send_plain(&response)?;

    tracing::debug!("receiver handshake complete");
    Ok(AuthenticatedStream { stream, cipher })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || listener.accept().unwrap().0);
        let client = TcpStream::connect(addr).unwrap();
        let server = handle.join().unwrap();
        (client, server)
    }

    #[test]
    fn matching_tokens_authenticate() {
        let (sender_sock, receiver_sock) = connected_pair();
        let sender_stream = FramedStream::new(sender_sock).unwrap();
        let receiver_stream = FramedStream::new(receiver_sock).unwrap();

        let receiver_handle = thread::spawn(move || {
            perform_receiver_handshake(receiver_stream, "ocean-forest", Duration::from_secs(5))
        });

        let sender_result =
            perform_sender_handshake(sender_stream, "ocean-forest", Duration::from_secs(5));
        let receiver_result = receiver_handle.join().unwrap();

        assert!(sender_result.is_ok());
        assert!(receiver_result.is_ok());
    }

    #[test]
    fn mismatched_tokens_fail_auth() {
        let (sender_sock, receiver_sock) = connected_pair();
        let sender_stream = FramedStream::new(sender_sock).unwrap();
        let receiver_stream = FramedStream::new(receiver_sock).unwrap();

        let receiver_handle = thread::spawn(move || {
            perform_receiver_handshake(receiver_stream, "wrong-token", Duration::from_secs(5))
        });

        let sender_result =
            perform_sender_handshake(sender_stream, "ocean-forest", Duration::from_secs(5));
        let _ = receiver_handle.join();

        assert!(matches!(sender_result, Err(TransportError::AuthFailure)));
    }
}
