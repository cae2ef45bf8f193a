//! streamsound-protocol – Control-Kanal des Streamsound-Protokolls
//!
//! Dieses Crate definiert das binaere Frame-Format (Magic, Header, Body,
//! Ed25519-Signatur, CRC16), den tokio-util Codec mit Resynchronisation,
//! den `ENCRYPTED`-Umschlag und die Handshakes `PAIR`, `AUTHENTICATION`
//! und `ECDH`.

pub mod body;
pub mod codec;
pub mod crc16;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod magic;

pub use body::MessageBody;
pub use codec::{MessageCodec, Outgoing};
pub use frame::{Message, PROTOCOL_VERSION};
pub use handshake::HandshakeState;
pub use magic::Magic;
