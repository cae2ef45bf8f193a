//! streamsound-client – Bibliotheks-Root
//!
//! Verbindet Konfiguration, Geraete-Registry, PCM-Ausgabe und Metriken mit
//! dem Connection Manager.

pub mod config;
pub mod registry;
pub mod sink;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use streamsound_core::{ConnectionState, DeviceEvent};
use streamsound_crypto::Identity;
use streamsound_observability::StreamMetrics;
use streamsound_session::ConnectionManager;

use config::AppConfig;
use registry::TomlRegistry;
use sink::PcmDateien;

/// Intervall fuer Metriken und Telemetrie-Ausgabe
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Haelt den laufenden Client-Zustand zusammen
pub struct Client {
    pub config_pfad: PathBuf,
    manager: ConnectionManager,
    metriken: StreamMetrics,
}

impl Client {
    /// Baut den Client aus der geladenen Konfiguration.
    ///
    /// Erzeugt beim ersten Start eine Identitaet und speichert sie.
    pub fn neu(config_pfad: impl Into<PathBuf>, mut config: AppConfig) -> Result<Self> {
        let config_pfad = config_pfad.into();
        let (identity, erzeugt) = config.identitaet()?;
        if erzeugt {
            config.speichern(&config_pfad)?;
            tracing::info!(pfad = %config_pfad.display(), "Neue Identitaet erzeugt und gespeichert");
        }
        tracing::info!(
            device_id = %hex(&identity.device_id()),
            "Identitaet geladen"
        );

        let settings = config.manager_settings();
        let sinks = Arc::new(PcmDateien::neu(config.audio.output.clone()));
        let registry = Arc::new(TomlRegistry::neu(config_pfad.clone(), config));
        let manager = ConnectionManager::neu(Arc::new(identity), registry, sinks, settings)?;

        Ok(Self {
            config_pfad,
            manager,
            metriken: StreamMetrics::neu()?,
        })
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Pairt ein Geraet aus einer Pairing-URI und startet ggf. die Wiedergabe
    pub async fn pairen(&self, uri: &str) -> Result<()> {
        let config = self.manager.pair_device(uri).await?;
        tracing::info!(adresse = %config.address, name = %config.name, "Pairing abgeschlossen");
        if config.auto_play {
            self.manager.toggle_playback(&config.address).await?;
        }
        Ok(())
    }

    /// Verbindet alle gepaarten Geraete mit `auto_play`
    pub async fn auto_play_verbinden(&self) {
        for device in self.manager.devices() {
            if !device.auto_play || device.public_key.trim().is_empty() {
                continue;
            }
            if let Err(e) = self.manager.connect_device(&device.address).await {
                tracing::warn!(adresse = %device.address, fehler = %e, "Verbinden fehlgeschlagen");
            }
        }
    }

    /// Laeuft bis Ctrl-C und raeumt danach alle Verbindungen ab
    pub async fn starten(self) -> Result<()> {
        let ereignisse = tokio::spawn(ereignisse_protokollieren(self.manager.clone()));

        self.auto_play_verbinden().await;

        let mut report = tokio::time::interval(REPORT_INTERVAL);
        let mut spielend: HashSet<String> = HashSet::new();
        tracing::info!("Client laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");

        loop {
            tokio::select! {
                _ = report.tick() => self.berichten(&mut spielend),
                ergebnis = tokio::signal::ctrl_c() => {
                    ergebnis?;
                    break;
                }
            }
        }

        tracing::info!("Shutdown-Signal empfangen, Client wird beendet");
        self.manager.cleanup().await;
        ereignisse.abort();
        Ok(())
    }

    /// Uebernimmt die Telemetrie aller Geraete in die Metriken
    fn berichten(&self, spielend: &mut HashSet<String>) {
        let stats = self.manager.stats();
        let aktuell: HashSet<String> = stats.iter().map(|(adresse, _)| adresse.clone()).collect();
        for weg in spielend.difference(&aktuell) {
            self.metriken.geraet_entfernen(weg);
        }
        *spielend = aktuell;

        self.metriken
            .connected_devices
            .set(self.manager.verbundene_geraete() as i64);
        for (adresse, s) in &stats {
            self.metriken.aktualisieren(adresse, s);
            tracing::debug!(adresse = %adresse, "{}", s.zusammenfassung());
        }

        match self.metriken.exportieren() {
            Ok(text) => tracing::trace!(metriken = %text, "Prometheus-Export"),
            Err(e) => tracing::warn!(fehler = %e, "Metriken-Export fehlgeschlagen"),
        }
    }
}

/// Protokolliert alle Geraete-Ereignisse des Managers
async fn ereignisse_protokollieren(manager: ConnectionManager) {
    let mut rx = manager.events_abonnieren();
    loop {
        match rx.recv().await {
            Ok(DeviceEvent::ZustandGeaendert { adresse, zustand }) => {
                if zustand == ConnectionState::Error {
                    let nachricht = manager.error_message(&adresse).unwrap_or_default();
                    tracing::warn!(adresse = %adresse, fehler = %nachricht, "Geraet im Fehlerzustand");
                } else {
                    tracing::info!(adresse = %adresse, zustand = %zustand, "Verbindungszustand");
                }
            }
            Ok(DeviceEvent::WiedergabeGeaendert { adresse, spielt }) => {
                tracing::info!(adresse = %adresse, spielt, "Wiedergabe");
            }
            Ok(DeviceEvent::Fehler { adresse, nachricht }) => {
                tracing::warn!(adresse = %adresse, fehler = %nachricht, "Geraetefehler");
            }
            Ok(DeviceEvent::SessionBeendet { adresse, grund }) => {
                tracing::info!(adresse = %adresse, grund = %grund, "Session beendet");
            }
            Ok(DeviceEvent::Gepaart { adresse }) => {
                tracing::info!(adresse = %adresse, "Geraet gepaart");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(verpasst = n, "Ereignisse uebersprungen");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
