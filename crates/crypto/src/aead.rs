//! AES-GCM (128/256 Bit) mit 12- oder 16-Byte-IV
//!
//! Der Schluessel waehlt die Variante (16 Bytes = AES-128, 32 Bytes =
//! AES-256), die IV-Laenge den Nonce-Typ. Das Auth-Tag (16 Bytes) wird an
//! den Ciphertext angehaengt.
//!
//! ## Sealed Box
//! ```text
//! [iv(16)] [AES-256-GCM ciphertext + tag(16)]
//! ```
//! Wird fuer die Handshake-Bodies und den `ENCRYPTED`-Umschlag genutzt.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, Aead, KeyInit},
    aes::{Aes128, Aes256},
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};

/// Laenge des GCM-Auth-Tags
pub const TAG_LEN: usize = 16;
/// IV-Laenge der Sealed Box
pub const SEALED_IV_LEN: usize = 16;

type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Verschluesselt `plaintext`; Schluessel 16 oder 32 Bytes, IV 12 oder 16 Bytes
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    match (key.len(), iv.len()) {
        (16, 12) => seal_with::<Aes128Gcm>(key, iv, plaintext),
        (16, 16) => seal_with::<Aes128Gcm16>(key, iv, plaintext),
        (32, 12) => seal_with::<Aes256Gcm>(key, iv, plaintext),
        (32, 16) => seal_with::<Aes256Gcm16>(key, iv, plaintext),
        (16 | 32, n) => Err(CryptoError::UngueltigeIv(n)),
        (n, _) => Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: 32,
            erhalten: n,
        }),
    }
}

/// Entschluesselt und prueft das Auth-Tag
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Entschluesselung(format!(
            "Ciphertext zu kurz ({} Bytes)",
            ciphertext.len()
        )));
    }
    match (key.len(), iv.len()) {
        (16, 12) => open_with::<Aes128Gcm>(key, iv, ciphertext),
        (16, 16) => open_with::<Aes128Gcm16>(key, iv, ciphertext),
        (32, 12) => open_with::<Aes256Gcm>(key, iv, ciphertext),
        (32, 16) => open_with::<Aes256Gcm16>(key, iv, ciphertext),
        (16 | 32, n) => Err(CryptoError::UngueltigeIv(n)),
        (n, _) => Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: 32,
            erhalten: n,
        }),
    }
}

fn seal_with<C: KeyInit + Aead>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;
    cipher
        .encrypt(GenericArray::from_slice(iv), plaintext)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))
}

fn open_with<C: KeyInit + Aead>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| CryptoError::Entschluesselung(e.to_string()))?;
    cipher
        .decrypt(GenericArray::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Entschluesselung("Auth-Tag ungueltig".into()))
}

// ---------------------------------------------------------------------------
// Sealed Box
// ---------------------------------------------------------------------------

/// Verschluesselt mit zufaelligem 16-Byte-IV: `iv || ciphertext`
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut iv = [0u8; SEALED_IV_LEN];
    OsRng.fill_bytes(&mut iv);
    seal_with_iv(key, &iv, plaintext)
}

/// Wie [`seal`], aber mit vorgegebenem IV
pub fn seal_with_iv(
    key: &[u8; 32],
    iv: &[u8; SEALED_IV_LEN],
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let ct = encrypt(key, iv, plaintext)?;
    let mut out = Vec::with_capacity(SEALED_IV_LEN + ct.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Oeffnet eine Sealed Box
pub fn open(key: &[u8; 32], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < SEALED_IV_LEN + TAG_LEN {
        return Err(CryptoError::UngueltigeDaten(format!(
            "Sealed Box zu kurz ({} Bytes)",
            sealed.len()
        )));
    }
    let (iv, ct) = sealed.split_at(SEALED_IV_LEN);
    decrypt(key, iv, ct)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
