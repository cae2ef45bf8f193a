//! Persistente Geraeteliste
//!
//! Die eigentliche Speicherung (Datei, Key-Value-Store) liegt ausserhalb
//! dieses Crates. Der Connection Manager liest die Liste beim Start und
//! bei `refresh_device_list`, und schreibt nach erfolgreichem Pairing.

use std::collections::HashMap;

use parking_lot::RwLock;
use streamsound_core::{DeviceConfig, Result, StreamTunables};

/// Schnittstelle zur Geraete-Registry
pub trait DeviceRegistry: Send + Sync {
    /// Alle bekannten Geraete
    fn devices(&self) -> Result<Vec<DeviceConfig>>;

    /// Stellschrauben des Audio-Empfangs
    fn tunables(&self) -> Result<StreamTunables>;

    /// Fuegt ein Geraet hinzu oder ersetzt es (Schluessel: `address`)
    fn upsert(&self, device: DeviceConfig) -> Result<()>;
}

/// Registry im Speicher (Tests, Betrieb ohne Konfigurationsdatei)
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    devices: RwLock<Vec<DeviceConfig>>,
    tunables: RwLock<StreamTunables>,
}

impl InMemoryRegistry {
    pub fn neu(devices: Vec<DeviceConfig>, tunables: StreamTunables) -> Self {
        Self {
            devices: RwLock::new(devices),
            tunables: RwLock::new(tunables),
        }
    }

    pub fn geraet(&self, address: &str) -> Option<DeviceConfig> {
        self.devices.read().iter().find(|d| d.address == address).cloned()
    }
}

impl DeviceRegistry for InMemoryRegistry {
    fn devices(&self) -> Result<Vec<DeviceConfig>> {
        Ok(self.devices.read().clone())
    }

    fn tunables(&self) -> Result<StreamTunables> {
        Ok(*self.tunables.read())
    }

    fn upsert(&self, device: DeviceConfig) -> Result<()> {
        let mut devices = self.devices.write();
        match devices.iter_mut().find(|d| d.address == device.address) {
            Some(vorhanden) => *vorhanden = device,
            None => devices.push(device),
        }
        Ok(())
    }
}

/// Indiziert eine Liste nach Adresse
pub(crate) fn nach_adresse(devices: Vec<DeviceConfig>) -> HashMap<String, DeviceConfig> {
    devices.into_iter().map(|d| (d.address.clone(), d)).collect()
}
