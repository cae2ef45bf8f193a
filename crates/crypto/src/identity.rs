//! Langzeit-Identitaetsschluessel (Ed25519)
//!
//! Jede Installation erzeugt einmalig ein Ed25519-Schluessel-Paar. Der
//! private Schluessel wird in der Konfiguration persistiert, der
//! oeffentliche beim Pairing an das Geraet uebertragen. Die Identitaet
//! wird einmal erzeugt und per `Arc` an Codec und Sessions gereicht.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::digest;
use crate::error::{CryptoError, CryptoResult};

/// Laenge einer Ed25519-Signatur
pub const SIGNATURE_LEN: usize = 64;

/// Langzeit-Identitaet eines Geraets (Ed25519)
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generiert ein neues Ed25519-Schluessel-Paar
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Erstellt eine Identity aus einem privaten Schluessel (32 Bytes)
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Erstellt eine Identity aus einem Base64-kodierten privaten Schluessel
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64.decode(encoded.trim())?;
        let seed: [u8; 32] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
                    erwartet: 32,
                    erhalten: bytes.len(),
                })?;
        Ok(Self::from_bytes(&seed))
    }

    /// Gibt den privaten Schluessel als Bytes zurueck (fuer Persistenz)
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Privater Schluessel als Base64 (fuer die Konfigurationsdatei)
    pub fn private_key_base64(&self) -> String {
        BASE64.encode(self.private_key_bytes())
    }

    /// Gibt den oeffentlichen Schluessel als Bytes zurueck
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Geraete-ID fuer die Authentifizierung: `SHA256(public key)`
    pub fn device_id(&self) -> [u8; 32] {
        digest::sha256(&self.public_key_bytes())
    }

    /// Signiert Daten mit dem privaten Schluessel
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(data).to_bytes()
    }

    /// Verifiziert eine Signatur mit einem oeffentlichen Schluessel
    pub fn verify(data: &[u8], signature_bytes: &[u8], public_key_bytes: &[u8; 32]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(public_key_bytes) else {
            return false;
        };
        let Ok(sig_array) = signature_bytes.try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(sig_array);
        verifying_key.verify(data, &signature).is_ok()
    }

    /// Wie [`Identity::verify`], aber als Result fuer `?`-Ketten
    pub fn verify_strict(
        data: &[u8],
        signature_bytes: &[u8],
        public_key_bytes: &[u8; 32],
    ) -> CryptoResult<()> {
        if Self::verify(data, signature_bytes, public_key_bytes) {
            Ok(())
        } else {
            Err(CryptoError::SignaturVerifikation(
                "Signatur passt nicht zum Public Key".into(),
            ))
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity {{ public_key: [Ed25519 VerifyingKey] }}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
