//! Geraete-Registry auf Basis der TOML-Konfigurationsdatei

use std::path::PathBuf;

use parking_lot::Mutex;
use streamsound_core::{DeviceConfig, Result, StreamError, StreamTunables};
use streamsound_session::DeviceRegistry;

use crate::config::AppConfig;

/// Liest `[[devices]]` bei jedem `devices()` neu ein und schreibt
/// gepaarte Geraete zurueck in die Datei.
pub struct TomlRegistry {
    pfad: PathBuf,
    config: Mutex<AppConfig>,
}

impl TomlRegistry {
    pub fn neu(pfad: impl Into<PathBuf>, config: AppConfig) -> Self {
        Self {
            pfad: pfad.into(),
            config: Mutex::new(config),
        }
    }

    /// Aktueller Stand der Konfiguration
    pub fn config(&self) -> AppConfig {
        self.config.lock().clone()
    }
}

fn config_fehler(e: anyhow::Error) -> StreamError {
    StreamError::Config(format!("{e:#}"))
}

impl DeviceRegistry for TomlRegistry {
    fn devices(&self) -> Result<Vec<DeviceConfig>> {
        let geladen = AppConfig::laden(&self.pfad).map_err(config_fehler)?;
        let mut config = self.config.lock();
        if self.pfad.exists() {
            config.devices = geladen.devices;
            config.audio.tunables = geladen.audio.tunables;
        }
        Ok(config.devices.clone())
    }

    fn tunables(&self) -> Result<StreamTunables> {
        Ok(self.config.lock().audio.tunables)
    }

    fn upsert(&self, device: DeviceConfig) -> Result<()> {
        let mut config = self.config.lock();
        match config.devices.iter_mut().find(|d| d.address == device.address) {
            Some(vorhanden) => *vorhanden = device,
            None => config.devices.push(device),
        }
        config.speichern(&self.pfad).map_err(config_fehler)?;
        tracing::debug!(pfad = %self.pfad.display(), geraete = config.devices.len(), "Registry gespeichert");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pfad(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("streamsound-{name}-{}.toml", std::process::id()))
    }

    #[test]
    fn upsert_schreibt_datei() {
        let pfad = temp_pfad("registry-upsert");
        let registry = TomlRegistry::neu(&pfad, AppConfig::default());

        let mut geraet = DeviceConfig::neu("Buero", "10.0.0.9:12345");
        registry.upsert(geraet.clone()).unwrap();
        geraet.set_peer_public_key(&[7; 32]);
        registry.upsert(geraet.clone()).unwrap();

        let geladen = AppConfig::laden(&pfad).unwrap();
        assert_eq!(geladen.devices, vec![geraet]);
        let _ = std::fs::remove_file(&pfad);
    }

    #[test]
    fn devices_liest_datei_neu() {
        let pfad = temp_pfad("registry-refresh");
        let registry = TomlRegistry::neu(&pfad, AppConfig::default());
        assert!(registry.devices().unwrap().is_empty());

        let mut extern_geaendert = AppConfig::default();
        extern_geaendert
            .devices
            .push(DeviceConfig::neu("Bad", "10.0.0.4"));
        extern_geaendert.speichern(&pfad).unwrap();

        let devices = registry.devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Bad");
        let _ = std::fs::remove_file(&pfad);
    }

    #[test]
    fn ohne_datei_bleiben_geraete_im_speicher() {
        let mut config = AppConfig::default();
        config.devices.push(DeviceConfig::neu("Flur", "10.0.0.5"));
        let registry = TomlRegistry::neu(temp_pfad("registry-ohne-datei"), config);
        assert_eq!(registry.devices().unwrap().len(), 1);
    }
}
