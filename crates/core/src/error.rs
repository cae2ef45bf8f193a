//! Fehlertypen fuer Streamsound
//!
//! Zentraler Fehler-Enum fuer Protokoll, Handshake, Session und
//! UDP-Audio-Transport. Untermodule mit eigenen Fehlern (z.B. Krypto)
//! konvertieren an ihrer Crate-Grenze in diese Taxonomie.

use thiserror::Error;

/// Globaler Result-Alias fuer Streamsound
pub type Result<T> = std::result::Result<T, StreamError>;

/// Alle moeglichen Fehler im Streamsound-System
#[derive(Debug, Error)]
pub enum StreamError {
    // --- Wire-Format ---
    /// Ungueltiger Frame (Magic, CRC oder Signatur). Der Frame wird verworfen,
    /// der Stream synchronisiert sich neu.
    #[error("Ungueltiger Frame: {0}")]
    FrameInvalid(String),

    // --- Krypto & Handshake ---
    #[error("Entschluesselung fehlgeschlagen: {0}")]
    DecryptFailure(String),

    #[error("Handshake fehlgeschlagen: {0}")]
    HandshakeFailed(String),

    // --- Gegenstelle ---
    /// Die Gegenstelle hat explizit mit einem `ERROR`-Frame geantwortet
    #[error("Protokollfehler der Gegenstelle: {0}")]
    ProtocolError(String),

    #[error("Unerwartete Antwort: erwartet {erwartet}, erhalten {erhalten}")]
    UnexpectedResponse { erwartet: String, erhalten: String },

    #[error("Zeitlimit ueberschritten: {0}")]
    Timeout(String),

    // --- Audio ---
    #[error("Nicht unterstuetztes Audioformat: {0}")]
    UnsupportedAudioFormat(String),

    // --- Verbindung ---
    #[error("Verbindung verloren: {0}")]
    ConnectionLost(String),

    #[error("Geraet nicht verbunden: {0}")]
    NotConnected(String),

    #[error("Geraet nicht gepaart: {0}")]
    NotPaired(String),

    // --- Konfiguration ---
    #[error("Ungueltige Pairing-URI: {0}")]
    InvalidPairingUri(String),

    #[error("Konfigurationsfehler: {0}")]
    Config(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Kurzform fuer einen Handshake-Fehler aus beliebiger Nachricht
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }

    /// Gibt true zurueck wenn ein erneuter Verbindungsversuch sinnvoll ist
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ConnectionLost(_) | Self::Io(_)
        )
    }
}
