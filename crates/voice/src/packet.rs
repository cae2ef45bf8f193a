//! UDP-Audiopaket und Heartbeat
//!
//! ## Paket-Format
//!
//! ```text
//! +----------------+---------------------------+-----------------+
//! | Sequenz u32 BE | Capture-Zeit Server u64 BE | Ciphertext (PCM) |
//! +----------------+---------------------------+-----------------+
//! ```
//!
//! Der Heartbeat (Client -> Server) ist `"HB"` gefolgt von der letzten
//! angenommenen Sequenznummer (u32 BE).

use streamsound_core::{Result, StreamError};

/// Groesse des Paket-Headers
pub const HEADER_LEN: usize = 12;

/// Praefix eines Heartbeat-Datagramms
pub const HEARTBEAT_PREFIX: &[u8; 2] = b"HB";

/// Laenge eines Heartbeat-Datagramms
pub const HEARTBEAT_LEN: usize = 6;

/// Geparstes Audiopaket (Payload noch verschluesselt)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacket<'a> {
    pub sequence: u32,
    pub capture_time_server_ns: u64,
    pub payload: &'a [u8],
}

impl<'a> AudioPacket<'a> {
    /// Parst ein Datagramm; zu kurze Pakete sind `FrameInvalid`
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(StreamError::FrameInvalid(format!(
                "Audiopaket zu kurz: {} Bytes",
                data.len()
            )));
        }
        let sequence = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let mut zeit = [0u8; 8];
        zeit.copy_from_slice(&data[4..HEADER_LEN]);
        Ok(Self {
            sequence,
            capture_time_server_ns: u64::from_be_bytes(zeit),
            payload: &data[HEADER_LEN..],
        })
    }

    /// Kodiert ein Paket (Sender-Seite und Tests)
    pub fn encode(sequence: u32, capture_time_server_ns: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&sequence.to_be_bytes());
        out.extend_from_slice(&capture_time_server_ns.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }
}

/// Heartbeat mit der letzten angenommenen Sequenznummer
pub fn heartbeat(last_sequence: u32) -> [u8; HEARTBEAT_LEN] {
    let mut out = [0u8; HEARTBEAT_LEN];
    out[..2].copy_from_slice(HEARTBEAT_PREFIX);
    out[2..].copy_from_slice(&last_sequence.to_be_bytes());
    out
}

/// Liest die Sequenznummer aus einem Heartbeat (Server-Seite und Tests)
pub fn parse_heartbeat(data: &[u8]) -> Option<u32> {
    if data.len() != HEARTBEAT_LEN || &data[..2] != HEARTBEAT_PREFIX {
        return None;
    }
    Some(u32::from_be_bytes([data[2], data[3], data[4], data[5]]))
}
