//! streamsound-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von Protokoll, Voice-Transport
//! und Session-Verwaltung gemeinsam genutzt werden: Fehlertaxonomie,
//! Geraete-Konfiguration, Verbindungszustaende und den Pairing-URI-Parser.

pub mod error;
pub mod event;
pub mod pairing;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, StreamError};
pub use event::DeviceEvent;
pub use pairing::PairingUri;
pub use types::{
    AudioEncryptionMethod, AudioFormat, ConnectionState, DeviceConfig, StreamTunables,
};
