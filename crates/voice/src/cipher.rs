//! Entschluesselung des Audiostroms pro Paket
//!
//! - `NONE`: Klartext
//! - `XOR_256`: wiederholendes XOR mit dem UDP-Schluessel
//! - `AES128GCM` / `AES256GCM`: IV = `seq(4 BE) || udpKey[0..8]`,
//!   AES-128 nutzt die ersten 16 Bytes des Schluessels

use streamsound_core::{AudioEncryptionMethod, Result, StreamError};
use streamsound_crypto::{aead, xor, CryptoError, SecretBytes};

/// Laenge des UDP-Schluessels
pub const UDP_KEY_LEN: usize = 32;

/// Ver-/Entschluesselung einer Play-Session
#[derive(Debug, Clone)]
pub struct AudioCipher {
    method: AudioEncryptionMethod,
    key: SecretBytes,
}

impl AudioCipher {
    pub fn new(method: AudioEncryptionMethod, key: SecretBytes) -> Result<Self> {
        if method != AudioEncryptionMethod::None && key.len() != UDP_KEY_LEN {
            return Err(StreamError::Config(format!(
                "UDP-Schluessel hat {} statt {UDP_KEY_LEN} Bytes",
                key.len()
            )));
        }
        Ok(Self { method, key })
    }

    pub fn method(&self) -> AudioEncryptionMethod {
        self.method
    }

    fn iv(&self, sequence: u32) -> [u8; 12] {
        let mut iv = [0u8; 12];
        iv[..4].copy_from_slice(&sequence.to_be_bytes());
        iv[4..].copy_from_slice(&self.key.as_bytes()[..8]);
        iv
    }

    fn aes_key(&self) -> &[u8] {
        match self.method {
            AudioEncryptionMethod::Aes128Gcm => &self.key.as_bytes()[..16],
            _ => self.key.as_bytes(),
        }
    }

    /// Entschluesselt den Payload eines Pakets
    pub fn decrypt(&self, sequence: u32, payload: &[u8]) -> Result<Vec<u8>> {
        match self.method {
            AudioEncryptionMethod::None => Ok(payload.to_vec()),
            AudioEncryptionMethod::Xor256 => xor::xor(payload, self.key.as_bytes()).map_err(fehler),
            AudioEncryptionMethod::Aes128Gcm | AudioEncryptionMethod::Aes256Gcm => {
                aead::decrypt(self.aes_key(), &self.iv(sequence), payload).map_err(fehler)
            }
        }
    }

    /// Verschluesselt PCM (Sender-Seite und Tests)
    pub fn encrypt(&self, sequence: u32, pcm: &[u8]) -> Result<Vec<u8>> {
        match self.method {
            AudioEncryptionMethod::None => Ok(pcm.to_vec()),
            AudioEncryptionMethod::Xor256 => xor::xor(pcm, self.key.as_bytes()).map_err(fehler),
            AudioEncryptionMethod::Aes128Gcm | AudioEncryptionMethod::Aes256Gcm => {
                aead::encrypt(self.aes_key(), &self.iv(sequence), pcm).map_err(fehler)
            }
        }
    }
}

fn fehler(e: CryptoError) -> StreamError {
    StreamError::DecryptFailure(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(method: AudioEncryptionMethod) -> AudioCipher {
        let key: Vec<u8> = (0..32u8).collect();
        AudioCipher::new(method, SecretBytes::new(key)).unwrap()
    }

    #[test]
    fn alle_stufen_roundtrip() {
        let pcm: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(7)).collect();
        for method in [
            AudioEncryptionMethod::None,
            AudioEncryptionMethod::Xor256,
            AudioEncryptionMethod::Aes128Gcm,
            AudioEncryptionMethod::Aes256Gcm,
        ] {
            let c = cipher(method);
            let ct = c.encrypt(5, &pcm).unwrap();
            assert_eq!(c.decrypt(5, &ct).unwrap(), pcm, "{method:?}");
        }
    }

    #[test]
    fn xor_wiederholt_schluessel() {
        let c = cipher(AudioEncryptionMethod::Xor256);
        let ct = c.encrypt(0, &[0u8; 40]).unwrap();
        assert_eq!(&ct[..32], &(0..32u8).collect::<Vec<_>>()[..]);
        assert_eq!(&ct[32..], &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn aes_iv_haengt_von_sequenz_ab() {
        let c = cipher(AudioEncryptionMethod::Aes256Gcm);
        let ct = c.encrypt(1, b"audio").unwrap();
        assert!(matches!(
            c.decrypt(2, &ct),
            Err(StreamError::DecryptFailure(_))
        ));
    }

    #[test]
    fn aes128_nutzt_halben_schluessel() {
        let c = cipher(AudioEncryptionMethod::Aes128Gcm);
        let ct = c.encrypt(9, b"audio").unwrap();
        let key: Vec<u8> = (0..16u8).collect();
        let mut iv = [0u8; 12];
        iv[..4].copy_from_slice(&9u32.to_be_bytes());
        iv[4..].copy_from_slice(&(0..8u8).collect::<Vec<_>>());
        assert_eq!(aead::decrypt(&key, &iv, &ct).unwrap(), b"audio");
    }

    #[test]
    fn falsche_schluessellaenge() {
        assert!(AudioCipher::new(AudioEncryptionMethod::Xor256, SecretBytes::new(vec![1; 16])).is_err());
        assert!(AudioCipher::new(AudioEncryptionMethod::None, SecretBytes::new(vec![])).is_ok());
    }
}
