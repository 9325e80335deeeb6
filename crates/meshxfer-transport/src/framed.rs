//! Length-prefixed record I/O over one TCP connection.
//!
//! Every encrypted message on the wire is two concatenated
//! length-prefixed segments: a 12-byte nonce and the AEAD ciphertext,
//! each preceded by a big-endian `u32` length. `0x00000000` in the
//! nonce-length slot is reserved for the end marker and must never
//! appear mid-stream.

use crate::error::TransportError;
use meshxfer_crypto::SessionCipher;
use rand_core::OsRng;
use socket2::{SockRef, TcpKeepalive};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// The reserved all-zero length prefix signalling no further forward
/// data on this channel.
pub const END_MARKER: u32 = 0;

/// Result of a record read: either a payload or the end-of-stream
/// sentinel.
#[derive(Debug)]
pub enum RecvOutcome {
    Record(Vec<u8>),
    Ended,
}

/// A TCP connection wrapped for synchronous length-prefixed,
/// optionally-encrypted record I/O.
pub struct FramedStream {
    stream: TcpStream,
}

impl FramedStream {
    /// Wrap an already-connected socket, enabling `TCP_NODELAY`.
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        // Keepalive guards against a half-open peer going silent
        // without either side ever seeing a FIN or RST.
        let sock_ref = SockRef::from(&stream);
        let _ = sock_ref.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(30)));
        Ok(Self { stream })
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn shutdown_write(&self) -> std::io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Write)
    }

    /// `true` if the socket currently has bytes available to read
    /// without blocking. Used by the sender's 500ms resend-request
    /// poll between forward data blocks.
    pub fn is_readable(&self) -> std::io::Result<bool> {
        let mut buf = [0u8; 1];
        let original_timeout = self.stream.read_timeout()?;
        self.stream
            .set_read_timeout(Some(Duration::from_nanos(1)))?;
        let result = self.stream.peek(&mut buf);
        self.stream.set_read_timeout(original_timeout)?;
        match result {
            Ok(n) => Ok(n > 0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_exact_buf(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::TransportClosed
            } else {
                TransportError::Io(e)
            }
        })?;
        Ok(buf)
    }

    fn read_u32(&mut self) -> Result<u32, TransportError> {
        let mut buf = [0u8; 4];
        self.stream.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::TransportClosed
            } else {
                TransportError::Io(e)
            }
        })?;
        Ok(u32::from_be_bytes(buf))
    }

    fn write_length_prefixed(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(&(data.len() as u32).to_be_bytes())?;
        self.stream.write_all(data)?;
        Ok(())
    }

    /// Write a length-prefixed plaintext segment (used by the
    /// handshake for public keys, the plaintext challenge response,
    /// and the `READY` token).
    pub fn send_plain(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.write_length_prefixed(data)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn recv_plain(&mut self) -> Result<Vec<u8>, TransportError> {
        let len = self.read_u32()? as usize;
        self.read_exact_buf(len)
    }

    /// Encrypt and frame one record: fresh random nonce, AEAD
    /// ciphertext, each length-prefixed.
    pub fn send_record(&mut self, cipher: &SessionCipher, plaintext: &[u8]) -> Result<(), TransportError> {
        let nonce = SessionCipher::random_nonce(&mut OsRng);
        let ciphertext = cipher.encrypt(&nonce, plaintext)?;

        self.stream.write_all(&(nonce.len() as u32).to_be_bytes())?;
        self.stream.write_all(&nonce)?;
        self.write_length_prefixed(&ciphertext)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one record, decrypting it, or detect the end marker.
    pub fn recv_record(&mut self, cipher: &SessionCipher) -> Result<RecvOutcome, TransportError> {
        let nonce_len = self.read_u32()?;
        if nonce_len == END_MARKER {
            return Ok(RecvOutcome::Ended);
        }
        if nonce_len != 12 {
            return Err(TransportError::ProtocolError(format!(
                "unexpected nonce length {nonce_len}, expected 12"
            )));
        }

        let nonce_bytes = self.read_exact_buf(nonce_len as usize)?;
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&nonce_bytes);

        let ct_len = self.read_u32()? as usize;
        let ciphertext = self.read_exact_buf(ct_len)?;

        let plaintext = cipher.decrypt(&nonce, &ciphertext)?;
        Ok(RecvOutcome::Record(plaintext))
    }

    /// Write the four-byte end marker.
    pub fn send_end_marker(&mut self) -> Result<(), TransportError> {
        self.stream.write_all(&END_MARKER.to_be_bytes())?;
        self.stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (FramedStream, FramedStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            FramedStream::new(sock).unwrap()
        });
        let client = FramedStream::new(TcpStream::connect(addr).unwrap()).unwrap();
        let server = handle.join().unwrap();
        (client, server)
    }

    #[test]
    fn plain_record_roundtrip() {
        let (mut a, mut b) = pair();
        a.send_plain(b"READY").unwrap();
        assert_eq!(b.recv_plain().unwrap(), b"READY");
    }

    #[test]
    fn encrypted_record_roundtrip() {
        let (mut a, mut b) = pair();
        let cipher = SessionCipher::new(&[7u8; 32]);

        a.send_record(&cipher, b"hello").unwrap();
        match b.recv_record(&cipher).unwrap() {
            RecvOutcome::Record(data) => assert_eq!(data, b"hello"),
            RecvOutcome::Ended => panic!("expected a record"),
        }
    }

    #[test]
    fn end_marker_detected() {
        let (mut a, mut b) = pair();
        let cipher = SessionCipher::new(&[1u8; 32]);

        a.send_end_marker().unwrap();
        match b.recv_record(&cipher).unwrap() {
            RecvOutcome::Ended => {}
            RecvOutcome::Record(_) => panic!("expected end marker"),
        }
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let (mut a, mut b) = pair();
        let cipher_a = SessionCipher::new(&[1u8; 32]);
        let cipher_b = SessionCipher::new(&[2u8; 32]);

        a.send_record(&cipher_a, b"secret").unwrap();
        assert!(b.recv_record(&cipher_b).is_err());
    }

    #[test]
    fn short_read_reported_as_transport_closed() {
        let (a, mut b) = pair();
        drop(a);
        let cipher = SessionCipher::new(&[3u8; 32]);
        match b.recv_record(&cipher) {
            Err(TransportError::TransportClosed) => {}
            other => panic!("expected TransportClosed, got {other:?}"),
        }
    }
}
