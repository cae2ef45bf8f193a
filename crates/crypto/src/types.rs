//! Schluessel-Container
//!
//! Beide Typen nullen ihren Inhalt beim Drop und geben ihn nie im
//! Debug-Format aus.

use crate::digest;
use crate::error::CryptoResult;

/// Salt der UDP-Schluessel-Ableitung
pub const UDP_KEY_SALT: &[u8] = b"udp-audio";
/// Info der UDP-Schluessel-Ableitung
pub const UDP_KEY_INFO: &[u8] = b"stream-audio-v1";

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(pub Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Session-Schluessel einer Verbindung: `SHA256(X25519 Shared Secret)`
///
/// Lebt genau so lange wie die verbundene Session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Leitet den Session-Schluessel aus dem rohen Shared Secret ab
    pub fn aus_shared_secret(shared: &[u8]) -> Self {
        Self(digest::sha256(shared))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Schluessel des UDP-Audiostroms:
    /// `HMAC-SHA256(SessionKey, "udp-audio" || "stream-audio-v1")`
    pub fn udp_key(&self) -> CryptoResult<SecretBytes> {
        let key = digest::derive(&self.0, UDP_KEY_SALT, UDP_KEY_INFO)?;
        Ok(SecretBytes::new(key.to_vec()))
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_gibt_keine_bytes_aus() {
        let s = SecretBytes::new(vec![0xAB; 4]);
        assert_eq!(format!("{s:?}"), "SecretBytes([REDACTED] 4 bytes)");
        let k = SessionKey::from_bytes([0xAB; 32]);
        assert!(!format!("{k:?}").contains("171"));
    }

    #[test]
    fn udp_schluessel_ist_hmac_ueber_salt_und_info() {
        let session = SessionKey::from_bytes([3u8; 32]);
        let udp = session.udp_key().unwrap();
        let mut nachricht = UDP_KEY_SALT.to_vec();
        nachricht.extend_from_slice(UDP_KEY_INFO);
        let erwartet = digest::hmac_sha256(&[3u8; 32], &nachricht).unwrap();
        assert_eq!(udp.as_bytes(), &erwartet);
        assert_eq!(udp.len(), 32);
    }

    #[test]
    fn session_key_aus_shared_secret() {
        let shared = [9u8; 32];
        let k = SessionKey::aus_shared_secret(&shared);
        assert_eq!(k.as_bytes(), &digest::sha256(&shared));
    }
}
