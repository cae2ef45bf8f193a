//! Wire-Format des Control-Kanals
//!
//! ## Frame-Format
//!
//! ```text
//! +-------+---------+----------+------+--------+------+-----------+-------+
//! | Magic | Version | QueueNum | Id   | Laenge | Body | Signatur  | CRC16 |
//! | ASCII | u32 BE  | u32 BE   | u32  | u32 BE | ...  | 64 Bytes  | u16   |
//! +-------+---------+----------+------+--------+------+-----------+-------+
//! ```
//!
//! Die Ed25519-Signatur deckt Magic bis Body ab, die CRC alles bis
//! einschliesslich Signatur.

use streamsound_core::{Result, StreamError};
use streamsound_crypto::identity::SIGNATURE_LEN;
use streamsound_crypto::Identity;

use crate::body::MessageBody;
use crate::crc16::crc16;
use crate::magic::{Magic, MagicMatcher, Scan};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Aktuelle Protokoll-Version
pub const PROTOCOL_VERSION: u32 = 1;

/// Groesse von Version, QueueNum, Id und Laenge
pub const HEADER_LEN: usize = 16;

/// Groesse der CRC
pub const CRC_LEN: usize = 2;

/// Maximale Body-Groesse (1 MB)
pub const MAX_BODY_LEN: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Dekodierte, CRC-gepruefte Nachricht
///
/// Die Signatur ist noch nicht verifiziert; das passiert mit
/// [`Message::verify`], sobald der Public Key der Gegenstelle bekannt ist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub magic: Magic,
    pub version: u32,
    pub queue_num: u32,
    pub id: u32,
    pub body: MessageBody,
    pub signature: [u8; SIGNATURE_LEN],
    raw_body: Vec<u8>,
}

impl Message {
    /// Bytes, die die Signatur abdeckt (Magic bis Body)
    pub fn signed_bytes(&self) -> Vec<u8> {
        signed_region(
            self.magic,
            self.version,
            self.queue_num,
            self.id,
            &self.raw_body,
        )
    }

    /// Prueft die Ed25519-Signatur gegen den Public Key des Absenders
    pub fn verify(&self, public_key: &[u8; 32]) -> Result<()> {
        if Identity::verify(&self.signed_bytes(), &self.signature, public_key) {
            Ok(())
        } else {
            Err(StreamError::FrameInvalid(format!(
                "{} (id {}): Signatur ungueltig",
                self.magic, self.id
            )))
        }
    }

    /// Laenge des rohen Bodies auf der Leitung
    pub fn body_len(&self) -> usize {
        self.raw_body.len()
    }
}

fn signed_region(magic: Magic, version: u32, queue_num: u32, id: u32, body: &[u8]) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(magic.laenge() + HEADER_LEN + body.len() + SIGNATURE_LEN + CRC_LEN);
    out.extend_from_slice(magic.as_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&queue_num.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Kodiert, signiert und versieht einen Frame mit CRC
pub fn encode(
    identity: &Identity,
    magic: Magic,
    queue_num: u32,
    id: u32,
    body: &MessageBody,
) -> Result<Vec<u8>> {
    let raw = body.encode();
    if raw.len() > MAX_BODY_LEN {
        return Err(StreamError::FrameInvalid(format!(
            "Body zu gross: {} Bytes (Maximum: {} Bytes)",
            raw.len(),
            MAX_BODY_LEN
        )));
    }
    let mut out = signed_region(magic, PROTOCOL_VERSION, queue_num, id, &raw);
    let signature = identity.sign(&out);
    out.extend_from_slice(&signature);
    let crc = crc16(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Ergebnis eines Dekodier-Versuchs; der Puffer selbst wird nicht veraendert
#[derive(Debug)]
pub enum DecodeStep {
    /// Vollstaendige Nachricht; Bytes vor `end` koennen verworfen werden
    Frame { message: Message, start: usize, end: usize },
    /// Es fehlen Bytes; alles vor `keep_from` ist Muell
    NeedMore { keep_from: usize },
    /// Ungueltiger Frame bei `start`, weiter scannen ab `resume_at`
    Invalid {
        start: usize,
        resume_at: usize,
        error: StreamError,
    },
}

/// Sucht den naechsten Frame im Puffer
pub fn decode(buf: &[u8]) -> DecodeStep {
    let (start, magic) = match MagicMatcher::global().scan(buf, 0) {
        Scan::Found { offset, magic } => (offset, magic),
        Scan::Partial { offset } => return DecodeStep::NeedMore { keep_from: offset },
        Scan::NotFound => {
            return DecodeStep::NeedMore {
                keep_from: buf.len(),
            }
        }
    };

    let header_start = start + magic.laenge();
    let Some(header) = buf.get(header_start..header_start + HEADER_LEN) else {
        return DecodeStep::NeedMore { keep_from: start };
    };
    let feld = |i: usize| u32::from_be_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
    let version = feld(0);
    let queue_num = feld(4);
    let id = feld(8);
    let body_len = feld(12) as usize;

    if body_len > MAX_BODY_LEN {
        return DecodeStep::Invalid {
            start,
            resume_at: start + 1,
            error: StreamError::FrameInvalid(format!(
                "{magic}: Body-Laenge {body_len} ueber Maximum"
            )),
        };
    }

    let body_start = header_start + HEADER_LEN;
    let sig_start = body_start + body_len;
    let crc_start = sig_start + SIGNATURE_LEN;
    let end = crc_start + CRC_LEN;
    if buf.len() < end {
        return DecodeStep::NeedMore { keep_from: start };
    }

    let erwartet = u16::from_be_bytes([buf[crc_start], buf[crc_start + 1]]);
    let berechnet = crc16(&buf[start..crc_start]);
    if erwartet != berechnet {
        return DecodeStep::Invalid {
            start,
            resume_at: start + 1,
            error: StreamError::FrameInvalid(format!(
                "{magic}: CRC {berechnet:#06x} statt {erwartet:#06x}"
            )),
        };
    }

    let raw_body = &buf[body_start..sig_start];
    let body = match MessageBody::parse(magic, raw_body) {
        Ok(body) => body,
        // CRC stimmt, also ist der Frame vollstaendig und kann uebersprungen werden
        Err(error) => {
            return DecodeStep::Invalid {
                start,
                resume_at: end,
                error,
            }
        }
    };

    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&buf[sig_start..crc_start]);

    DecodeStep::Frame {
        message: Message {
            magic,
            version,
            queue_num,
            id,
            body,
            signature,
            raw_body: raw_body.to_vec(),
        },
        start,
        end,
    }
}

/// Dekodiert genau einen vollstaendigen Frame (z.B. den Inhalt von `ENCRYPTED`)
pub fn decode_exact(buf: &[u8]) -> Result<Message> {
    match decode(buf) {
        DecodeStep::Frame {
            message,
            start: 0,
            end,
        } if end == buf.len() => Ok(message),
        DecodeStep::Frame { start, end, .. } => Err(StreamError::FrameInvalid(format!(
            "innerer Frame bei {start}..{end} von {} Bytes",
            buf.len()
        ))),
        DecodeStep::NeedMore { .. } => Err(StreamError::FrameInvalid(
            "innerer Frame unvollstaendig".into(),
        )),
        DecodeStep::Invalid { error, .. } => Err(error),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
