//! # streamsound-crypto
//!
//! Zustandslose Krypto-Primitiven fuer Streamsound.
//!
//! ## Module
//! - `identity` - Ed25519 Langzeit-Identitaet des Geraets
//! - `ecdh` - X25519 Schluessel-Paare pro Verbindung
//! - `digest` - SHA-256, HMAC-SHA256 und Key-Ableitung
//! - `aead` - AES-128/256-GCM mit 12- oder 16-Byte-IV, Sealed Boxes
//! - `xor` - Wiederholendes XOR fuer die guenstigste Audio-Stufe
//! - `types` - Schluessel-Container, die beim Drop genullt werden
//! - `error` - Fehlertypen

pub mod aead;
pub mod digest;
pub mod ecdh;
pub mod error;
pub mod identity;
pub mod types;
pub mod xor;

// Bequeme Re-Exports
pub use digest::{derive, hmac_sha256, sha256};
pub use ecdh::EcdhKeyPair;
pub use error::{CryptoError, CryptoResult};
pub use identity::Identity;
pub use types::{SecretBytes, SessionKey};
