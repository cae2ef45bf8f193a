//! streamsound-voice – UDP-Audio-Transport
//!
//! Empfaengt verschluesselte PCM-Pakete, prueft Sequenzen, puffert sie in
//! einer begrenzten Jitter-Queue und spielt sie ueber einen externen
//! PCM-Sink ab.
//!
//! ## Module
//! - [`packet`] – Paket- und Heartbeat-Format
//! - [`sequence`] – Sequenz-Pruefung mit Resynchronisation
//! - [`cipher`] – Entschluesselung je Verschluesselungsstufe
//! - [`jitter_buffer`] – Begrenzte FIFO zwischen Empfang und Playback
//! - [`clock`] – Monotone Zeitbasis und Uhren-Offset
//! - [`telemetry`] – Zaehler, Latenzen, `PlaybackStats`
//! - [`sink`] – PCM-Sink-Schnittstelle
//! - [`receiver`] – Empfangs- und Playback-Schleife

pub mod cipher;
pub mod clock;
pub mod jitter_buffer;
pub mod packet;
pub mod receiver;
pub mod sequence;
pub mod sink;
pub mod telemetry;

pub use cipher::AudioCipher;
pub use clock::{monotonic_ns, ClockOffset, ClockSample};
pub use receiver::{ReceiverConfig, UdpAudioReceiver};
pub use sink::{PcmSink, RecordingSink, SinkFactory, SinkTimestamp};
pub use telemetry::PlaybackStats;
