//! SHA-256, HMAC-SHA256 und HMAC-basierte Key-Ableitung

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 ueber beliebige Daten
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// HMAC-SHA256 mit beliebig langem Schluessel
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> CryptoResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Key-Ableitung: `HMAC(secret, salt || info)`
pub fn derive(secret: &[u8], salt: &[u8], info: &[u8]) -> CryptoResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(salt);
    mac.update(info);
    Ok(mac.finalize().into_bytes().into())
}
