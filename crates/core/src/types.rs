//! Gemeinsames Datenmodell
//!
//! Geraete-Konfiguration, Audio-Format, Verschluesselungsstufen und
//! Verbindungszustaende. Alle persistierbaren Typen sind serde-faehig,
//! damit die Geraete-Registry sie direkt aus TOML lesen kann.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Standard-Port eines Geraets, wenn die Adresse keinen Port enthaelt
pub const DEFAULT_DEVICE_PORT: u16 = 12345;

// ---------------------------------------------------------------------------
// AudioEncryptionMethod
// ---------------------------------------------------------------------------

/// Verschluesselungsstufe des UDP-Audiostroms
///
/// Der Client fordert eine Stufe an, der Server kann sie in `PLAY_RESPONSE`
/// aendern. Der Client uebernimmt immer den Wert des Servers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioEncryptionMethod {
    /// Keine Verschluesselung (PCM im Klartext)
    #[serde(rename = "NONE")]
    None,
    /// Wiederholendes XOR mit dem 32-Byte UDP-Schluessel
    #[default]
    #[serde(rename = "XOR_256")]
    Xor256,
    /// AES-128-GCM (erste 16 Bytes des UDP-Schluessels)
    #[serde(rename = "AES128GCM")]
    Aes128Gcm,
    /// AES-256-GCM
    #[serde(rename = "AES256GCM")]
    Aes256Gcm,
}

impl AudioEncryptionMethod {
    /// Wert auf der Leitung
    pub fn wire_value(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Xor256 => 1,
            Self::Aes128Gcm => 2,
            Self::Aes256Gcm => 3,
        }
    }

    /// Unbekannte Werte fallen auf `Xor256` zurueck
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => Self::None,
            2 => Self::Aes128Gcm,
            3 => Self::Aes256Gcm,
            _ => Self::Xor256,
        }
    }

    /// Menschenlesbare Bezeichnung
    pub fn bezeichnung(self) -> &'static str {
        match self {
            Self::None => "keine Verschluesselung",
            Self::Xor256 => "256-Bit XOR",
            Self::Aes128Gcm => "AES-128-GCM",
            Self::Aes256Gcm => "AES-256-GCM",
        }
    }
}

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// PCM-Format, wie es der Server in `PLAY_RESPONSE` aushandelt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Bits pro Sample
    pub bits: u16,
    /// Anzahl der Kanaele
    pub channels: u16,
    /// Format-Kennung des Servers (wird unveraendert durchgereicht)
    pub format_tag: u32,
}

impl AudioFormat {
    /// Minimale unterstuetzte Abtastrate
    pub const MIN_SAMPLE_RATE: u32 = 8_000;
    /// Maximale unterstuetzte Abtastrate
    pub const MAX_SAMPLE_RATE: u32 = 192_000;

    /// Prueft Abtastrate, Bittiefe und Kanalzahl
    pub fn validieren(&self) -> Result<()> {
        if !(Self::MIN_SAMPLE_RATE..=Self::MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(StreamError::UnsupportedAudioFormat(format!(
                "Abtastrate {} Hz ausserhalb [{}, {}]",
                self.sample_rate,
                Self::MIN_SAMPLE_RATE,
                Self::MAX_SAMPLE_RATE
            )));
        }
        if !matches!(self.bits, 8 | 16 | 24 | 32) {
            return Err(StreamError::UnsupportedAudioFormat(format!(
                "Bittiefe {} nicht unterstuetzt",
                self.bits
            )));
        }
        if !matches!(self.channels, 1 | 2) {
            return Err(StreamError::UnsupportedAudioFormat(format!(
                "Kanalzahl {} nicht unterstuetzt",
                self.channels
            )));
        }
        Ok(())
    }

    /// Bytes pro PCM-Frame (alle Kanaele eines Abtastzeitpunkts)
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits as usize / 8)
    }
}

// ---------------------------------------------------------------------------
// DeviceConfig
// ---------------------------------------------------------------------------

/// Persistierte Konfiguration eines gepaarten (oder zu pairenden) Geraets
///
/// Identitaetsschluessel ist `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Anzeigename
    pub name: String,
    /// `host:port` des Control-Kanals
    pub address: String,
    /// Ed25519 Public Key des Geraets (Base64, leer = noch nicht gepaart)
    pub public_key: String,
    /// Nach Verbindungsverlust automatisch neu verbinden
    pub auto_play: bool,
    /// Angeforderte Verschluesselung des Audiostroms
    pub audio_encryption: AudioEncryptionMethod,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            public_key: String::new(),
            auto_play: true,
            audio_encryption: AudioEncryptionMethod::default(),
        }
    }
}

impl DeviceConfig {
    /// Erstellt eine Konfiguration fuer ein noch ungepaartes Geraet
    pub fn neu(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    /// Adresse inklusive Standard-Port
    pub fn socket_address(&self) -> String {
        match self.address.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => self.address.clone(),
            _ => format!("{}:{}", self.address, DEFAULT_DEVICE_PORT),
        }
    }

    /// Dekodierter Public Key der Gegenstelle, `None` solange ungepaart
    pub fn peer_public_key(&self) -> Result<Option<[u8; 32]>> {
        let trimmed = self.public_key.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let bytes = BASE64
            .decode(trimmed)
            .map_err(|e| StreamError::Config(format!("Public Key von {}: {e}", self.address)))?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            StreamError::Config(format!(
                "Public Key von {} hat {} statt 32 Bytes",
                self.address,
                bytes.len()
            ))
        })?;
        Ok(Some(key))
    }

    /// Speichert den Public Key der Gegenstelle (nach erfolgreichem Pairing)
    pub fn set_peer_public_key(&mut self, key: &[u8; 32]) {
        self.public_key = BASE64.encode(key);
    }
}

// ---------------------------------------------------------------------------
// StreamTunables
// ---------------------------------------------------------------------------

/// Stellschrauben des Audio-Empfangs aus der Geraete-Registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamTunables {
    /// Groesse des Sink-Puffers in Bytes
    pub audio_buffer_size_bytes: usize,
    /// Toleranzfenster der Sequenz-Pruefung
    pub packet_sequence_threshold: u32,
    /// Maximale Laenge der Jitter-Queue (Pakete)
    pub max_audio_queue_size: usize,
    /// Bevorzugte Puffergroesse des Sinks in Frames (0 = Sink-Standard)
    pub preferred_buffer_frames: u32,
}

impl Default for StreamTunables {
    fn default() -> Self {
        Self {
            audio_buffer_size_bytes: 8192,
            packet_sequence_threshold: 100,
            max_audio_queue_size: 50,
            preferred_buffer_frames: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Verbindungszustand eines Geraets (nur der Connection Manager aendert ihn)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
