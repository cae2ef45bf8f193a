//! XOR-Stream ("XOR_256")
//!
//! Wiederholendes XOR mit dem 32-Byte UDP-Schluessel. Keine Integritaet,
//! nur fuer die guenstigste Audio-Stufe gedacht. Ver- und Entschluesselung
//! sind dieselbe Operation.

use crate::error::{CryptoError, CryptoResult};

/// XOR in-place mit wiederholtem Schluessel
pub fn xor_in_place(data: &mut [u8], key: &[u8]) -> CryptoResult<()> {
    if key.is_empty() {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: 32,
            erhalten: 0,
        });
    }
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
    Ok(())
}

/// XOR mit neuem Ausgabepuffer
pub fn xor(data: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut out = data.to_vec();
    xor_in_place(&mut out, key)?;
    Ok(out)
}
