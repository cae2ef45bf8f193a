//! Nachrichten-Bodies als geschlossener Summentyp
//!
//! Der Body wird einmal pro Frame anhand des Magics geparst. Die Formate
//! sind strikt: jede Laengen-Abweichung ist ein Fehler, damit das
//! Re-Encoding eines geparsten Bodies byte-identisch bleibt.
//!
//! | Verb | Body |
//! |---|---|
//! | `PAIR*`, `ECDH*`, `ENCRYPTED` | Sealed Box (`iv(16) ‖ ct ‖ tag`) |
//! | `AUTHENTICATION` | `deviceId(32) ‖ challenge(32)` |
//! | `AUTHENTICATION_RESPONSE` | `success(u8) ‖ Nachricht` |
//! | `PLAY` | `udpPort(u16) ‖ encryption(u8)` |
//! | `PLAY_RESPONSE` | `udpPort(u16) ‖ rate(u32) ‖ bits(u16) ‖ channels(u16) ‖ tag(u32) ‖ encryption(u8)` |
//! | `STOP*` | leer |
//! | `SYNC` | `t0(i64)` |
//! | `SYNC_RESPONSE` | `t0 ‖ t1 ‖ t2` (je i64) |
//! | `ERROR` | UTF-8 Nachricht |

use bytes::{Buf, BufMut};
use streamsound_core::{AudioEncryptionMethod, AudioFormat, Result, StreamError};

use crate::magic::Magic;

/// Typisierter Body einer Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// `STOP`, `STOP_RESPONSE`
    Empty,
    /// Verschluesselte Bytes (Handshake-Schluessel oder innerer Frame)
    Sealed(Vec<u8>),
    /// `AUTHENTICATION`
    AuthChallenge {
        device_id: [u8; 32],
        challenge: [u8; 32],
    },
    /// `AUTHENTICATION_RESPONSE`
    AuthResult { success: bool, message: String },
    /// `PLAY`: UDP-Port des Clients und gewuenschte Verschluesselung
    PlayRequest {
        udp_port: u16,
        encryption: AudioEncryptionMethod,
    },
    /// `PLAY_RESPONSE`: UDP-Port des Servers, Format und ausgehandelte Stufe
    PlayResponse {
        udp_port: u16,
        format: AudioFormat,
        encryption: AudioEncryptionMethod,
    },
    /// `SYNC`
    Sync { t0: i64 },
    /// `SYNC_RESPONSE`
    SyncResponse { t0: i64, t1: i64, t2: i64 },
    /// `ERROR`
    Error(String),
}

impl MessageBody {
    /// Parst den rohen Body passend zum Magic
    pub fn parse(magic: Magic, mut raw: &[u8]) -> Result<Self> {
        let laenge = raw.len();
        let falsche_laenge = |erwartet: usize| {
            StreamError::FrameInvalid(format!(
                "{magic}: Body hat {laenge} Bytes, erwartet {erwartet}"
            ))
        };

        let body = match magic {
            Magic::Pair
            | Magic::PairResponse
            | Magic::Ecdh
            | Magic::EcdhResponse
            | Magic::Encrypted => MessageBody::Sealed(raw.to_vec()),

            Magic::Stop | Magic::StopResponse => {
                if laenge != 0 {
                    return Err(falsche_laenge(0));
                }
                MessageBody::Empty
            }

            Magic::Authentication => {
                if laenge != 64 {
                    return Err(falsche_laenge(64));
                }
                let mut device_id = [0u8; 32];
                let mut challenge = [0u8; 32];
                raw.copy_to_slice(&mut device_id);
                raw.copy_to_slice(&mut challenge);
                MessageBody::AuthChallenge {
                    device_id,
                    challenge,
                }
            }

            Magic::AuthenticationResponse => {
                if laenge < 1 {
                    return Err(falsche_laenge(1));
                }
                let success = match raw.get_u8() {
                    0 => false,
                    1 => true,
                    andere => {
                        return Err(StreamError::FrameInvalid(format!(
                            "{magic}: ungueltiges Erfolgs-Flag {andere}"
                        )))
                    }
                };
                MessageBody::AuthResult {
                    success,
                    message: utf8(magic, raw)?,
                }
            }

            Magic::Play => {
                if laenge != 3 {
                    return Err(falsche_laenge(3));
                }
                MessageBody::PlayRequest {
                    udp_port: raw.get_u16(),
                    encryption: encryption_strikt(magic, raw.get_u8())?,
                }
            }

            Magic::PlayResponse => {
                if laenge != 15 {
                    return Err(falsche_laenge(15));
                }
                let udp_port = raw.get_u16();
                let format = AudioFormat {
                    sample_rate: raw.get_u32(),
                    bits: raw.get_u16(),
                    channels: raw.get_u16(),
                    format_tag: raw.get_u32(),
                };
                MessageBody::PlayResponse {
                    udp_port,
                    format,
                    encryption: encryption_strikt(magic, raw.get_u8())?,
                }
            }

            Magic::Sync => {
                if laenge != 8 {
                    return Err(falsche_laenge(8));
                }
                MessageBody::Sync { t0: raw.get_i64() }
            }

            Magic::SyncResponse => {
                if laenge != 24 {
                    return Err(falsche_laenge(24));
                }
                MessageBody::SyncResponse {
                    t0: raw.get_i64(),
                    t1: raw.get_i64(),
                    t2: raw.get_i64(),
                }
            }

            Magic::Error => MessageBody::Error(utf8(magic, raw)?),
        };
        Ok(body)
    }

    /// Serialisiert den Body
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            MessageBody::Empty => {}
            MessageBody::Sealed(bytes) => out.extend_from_slice(bytes),
            MessageBody::AuthChallenge {
                device_id,
                challenge,
            } => {
                out.put_slice(device_id);
                out.put_slice(challenge);
            }
            MessageBody::AuthResult { success, message } => {
                out.put_u8(u8::from(*success));
                out.put_slice(message.as_bytes());
            }
            MessageBody::PlayRequest {
                udp_port,
                encryption,
            } => {
                out.put_u16(*udp_port);
                out.put_u8(encryption.wire_value());
            }
            MessageBody::PlayResponse {
                udp_port,
                format,
                encryption,
            } => {
                out.put_u16(*udp_port);
                out.put_u32(format.sample_rate);
                out.put_u16(format.bits);
                out.put_u16(format.channels);
                out.put_u32(format.format_tag);
                out.put_u8(encryption.wire_value());
            }
            MessageBody::Sync { t0 } => out.put_i64(*t0),
            MessageBody::SyncResponse { t0, t1, t2 } => {
                out.put_i64(*t0);
                out.put_i64(*t1);
                out.put_i64(*t2);
            }
            MessageBody::Error(message) => out.put_slice(message.as_bytes()),
        }
        out
    }

    /// Kurzname der Variante fuer Fehlermeldungen
    pub fn art(&self) -> &'static str {
        match self {
            MessageBody::Empty => "Empty",
            MessageBody::Sealed(_) => "Sealed",
            MessageBody::AuthChallenge { .. } => "AuthChallenge",
            MessageBody::AuthResult { .. } => "AuthResult",
            MessageBody::PlayRequest { .. } => "PlayRequest",
            MessageBody::PlayResponse { .. } => "PlayResponse",
            MessageBody::Sync { .. } => "Sync",
            MessageBody::SyncResponse { .. } => "SyncResponse",
            MessageBody::Error(_) => "Error",
        }
    }
}

fn utf8(magic: Magic, raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| StreamError::FrameInvalid(format!("{magic}: Nachricht ist kein UTF-8")))
}

// Auf der Leitung nur bekannte Werte, damit die Signatur ueber das
// Re-Encoding stabil bleibt. Der Rueckfall auf XOR gilt fuer Konfiguration.
fn encryption_strikt(magic: Magic, wert: u8) -> Result<AudioEncryptionMethod> {
    if wert > 3 {
        return Err(StreamError::FrameInvalid(format!(
            "{magic}: unbekannte Verschluesselung {wert}"
        )));
    }
    Ok(AudioEncryptionMethod::from_wire(wert))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(magic: Magic, body: MessageBody) {
        let raw = body.encode();
        assert_eq!(MessageBody::parse(magic, &raw).unwrap(), body, "{magic}");
    }

    #[test]
    fn alle_varianten_roundtrip() {
        roundtrip(Magic::Stop, MessageBody::Empty);
        roundtrip(Magic::Encrypted, MessageBody::Sealed(vec![1, 2, 3]));
        roundtrip(
            Magic::Authentication,
            MessageBody::AuthChallenge {
                device_id: [1; 32],
                challenge: [2; 32],
            },
        );
        roundtrip(
            Magic::AuthenticationResponse,
            MessageBody::AuthResult {
                success: false,
                message: "unbekanntes Geraet".into(),
            },
        );
        roundtrip(
            Magic::Play,
            MessageBody::PlayRequest {
                udp_port: 9999,
                encryption: AudioEncryptionMethod::Aes256Gcm,
            },
        );
        roundtrip(
            Magic::PlayResponse,
            MessageBody::PlayResponse {
                udp_port: 40000,
                format: AudioFormat {
                    sample_rate: 48_000,
                    bits: 16,
                    channels: 2,
                    format_tag: 1,
                },
                encryption: AudioEncryptionMethod::Xor256,
            },
        );
        roundtrip(Magic::Sync, MessageBody::Sync { t0: -5 });
        roundtrip(
            Magic::SyncResponse,
            MessageBody::SyncResponse {
                t0: 1,
                t1: i64::MAX,
                t2: i64::MIN,
            },
        );
        roundtrip(Magic::Error, MessageBody::Error("Geraet belegt".into()));
    }

    #[test]
    fn play_response_layout() {
        let raw = MessageBody::PlayResponse {
            udp_port: 0x1234,
            format: AudioFormat {
                sample_rate: 48_000,
                bits: 16,
                channels: 2,
                format_tag: 7,
            },
            encryption: AudioEncryptionMethod::None,
        }
        .encode();
        assert_eq!(raw.len(), 15);
        assert_eq!(&raw[..2], &[0x12, 0x34]);
        assert_eq!(&raw[2..6], &48_000u32.to_be_bytes());
        assert_eq!(raw[14], 0);
    }

    #[test]
    fn falsche_laengen_werden_abgelehnt() {
        assert!(MessageBody::parse(Magic::Stop, &[0]).is_err());
        assert!(MessageBody::parse(Magic::Play, &[0, 1]).is_err());
        assert!(MessageBody::parse(Magic::Sync, &[0; 7]).is_err());
        assert!(MessageBody::parse(Magic::Authentication, &[0; 63]).is_err());
        assert!(MessageBody::parse(Magic::AuthenticationResponse, &[]).is_err());
    }

    #[test]
    fn ungueltige_werte_werden_abgelehnt() {
        assert!(MessageBody::parse(Magic::AuthenticationResponse, &[2]).is_err());
        assert!(MessageBody::parse(Magic::Play, &[0, 1, 9]).is_err());
        assert!(MessageBody::parse(Magic::Error, &[0xFF, 0xFE]).is_err());
    }
}
