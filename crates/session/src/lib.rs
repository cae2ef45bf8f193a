//! streamsound-session – Geraete-Sessions und Connection Manager
//!
//! ## Module
//! - [`session`] – TCP-Control-Kanal zu einem Geraet (Handshake, PLAY/STOP)
//! - [`manager`] – Registry aller Sessions, Zustandsautomat, Reconnect
//! - [`registry`] – Schnittstelle zur persistenten Geraeteliste

pub mod manager;
pub mod registry;
pub mod session;

pub use manager::{ConnectionManager, ManagerSettings};
pub use registry::{DeviceRegistry, InMemoryRegistry};
pub use session::{DeviceSession, SessionEnde, SessionSettings};
