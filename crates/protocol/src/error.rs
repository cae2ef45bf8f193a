//! Uebersetzung von Krypto-Fehlern in die Streamsound-Taxonomie

use streamsound_core::StreamError;
use streamsound_crypto::CryptoError;

/// AEAD-Fehler werden zu `DecryptFailure`, alles andere zu `HandshakeFailed`
pub fn from_crypto(e: CryptoError) -> StreamError {
    match e {
        CryptoError::Entschluesselung(msg) => StreamError::DecryptFailure(msg),
        andere => StreamError::HandshakeFailed(andere.to_string()),
    }
}
