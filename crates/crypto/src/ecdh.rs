//! X25519 Diffie-Hellman
//!
//! Pro Verbindung wird ein frisches Schluessel-Paar erzeugt. Der
//! Session-Schluessel ist `SHA256(shared secret)`. `StaticSecret` statt
//! `EphemeralSecret`, damit Tests feste Schluessel einsetzen koennen.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{SecretBytes, SessionKey};

/// X25519 Schluessel-Paar einer Verbindung
pub struct EcdhKeyPair {
    secret: StaticSecret,
    public_key: [u8; 32],
}

impl EcdhKeyPair {
    /// Erzeugt ein neues zufaelliges Schluessel-Paar
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Schluessel-Paar aus festen privaten Bytes
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public_key = X25519PublicKey::from(&secret).to_bytes();
        Self { secret, public_key }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key
    }

    /// Rohes Shared Secret mit dem Public Key der Gegenstelle
    ///
    /// Punkte kleiner Ordnung (nicht-kontributives Ergebnis) werden abgelehnt.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> CryptoResult<SecretBytes> {
        let shared = self
            .secret
            .diffie_hellman(&X25519PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchange(
                "Public Key der Gegenstelle hat kleine Ordnung".into(),
            ));
        }
        Ok(SecretBytes::new(shared.as_bytes().to_vec()))
    }

    /// Session-Schluessel: `SHA256(X25519(eigener privater, peer public))`
    pub fn session_key(&self, peer_public: &[u8; 32]) -> CryptoResult<SessionKey> {
        let shared = self.diffie_hellman(peer_public)?;
        Ok(SessionKey::aus_shared_secret(shared.as_bytes()))
    }
}

impl std::fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EcdhKeyPair {{ secret: [REDACTED] }}")
    }
}
