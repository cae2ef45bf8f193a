//! Geraete-Ereignisse
//!
//! Der Connection Manager veroeffentlicht jede Zustandsaenderung eines
//! Geraets ueber einen tokio-broadcast-Kanal. Beobachter (CLI, Metriken)
//! abonnieren ihn, statt den Zustand zu pollen.

use serde::{Deserialize, Serialize};

use crate::types::ConnectionState;

/// Alle Ereignisse, die ein Geraet betreffen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Der Verbindungszustand hat sich geaendert
    ZustandGeaendert {
        adresse: String,
        zustand: ConnectionState,
    },
    /// Die Wiedergabe wurde gestartet oder gestoppt
    WiedergabeGeaendert { adresse: String, spielt: bool },
    /// Ein Fehler wurde fuer das Geraet hinterlegt
    Fehler { adresse: String, nachricht: String },
    /// Die Lese-Schleife einer Session hat sich beendet
    SessionBeendet { adresse: String, grund: String },
    /// Pairing war erfolgreich, der Public Key wurde gespeichert
    Gepaart { adresse: String },
}

impl DeviceEvent {
    /// Adresse des betroffenen Geraets
    pub fn adresse(&self) -> &str {
        match self {
            Self::ZustandGeaendert { adresse, .. }
            | Self::WiedergabeGeaendert { adresse, .. }
            | Self::Fehler { adresse, .. }
            | Self::SessionBeendet { adresse, .. }
            | Self::Gepaart { adresse } => adresse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adresse_aus_jedem_ereignis() {
        let events = [
            DeviceEvent::ZustandGeaendert {
                adresse: "a:1".into(),
                zustand: ConnectionState::Connected,
            },
            DeviceEvent::WiedergabeGeaendert {
                adresse: "a:1".into(),
                spielt: true,
            },
            DeviceEvent::Gepaart {
                adresse: "a:1".into(),
            },
        ];
        for e in &events {
            assert_eq!(e.adresse(), "a:1");
        }
    }
}
