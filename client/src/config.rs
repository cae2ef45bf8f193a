//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Client ohne Konfigurationsdatei
//! lauffaehig ist. Die Datei ist gleichzeitig die Geraete-Registry
//! (`[[devices]]`) und speichert die Identitaet des Clients.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use streamsound_core::{DeviceConfig, StreamTunables};
use streamsound_crypto::Identity;
use streamsound_session::{ManagerSettings, SessionSettings};

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identitaet des Clients
    pub identity: IdentitaetEinstellungen,
    /// Audio-Einstellungen inklusive Empfangs-Stellschrauben
    pub audio: AudioEinstellungen,
    /// Netzwerk-Einstellungen
    pub network: NetzwerkEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Bekannte Geraete
    pub devices: Vec<DeviceConfig>,
}

/// Ed25519-Identitaet des Clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitaetEinstellungen {
    /// Base64-kodierter Seed (leer = beim ersten Start erzeugen)
    pub private_key: String,
}

/// Audio-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Lokaler UDP-Port fuer den Audiostrom
    pub udp_port: u16,
    /// Anzahl SYNC-Messungen vor dem Start der Wiedergabe
    pub clock_sync_samples: usize,
    /// Ausgabe der PCM-Daten: Verzeichnis fuer `.pcm`-Dateien oder `-` fuer stdout
    pub output: String,
    #[serde(flatten)]
    pub tunables: StreamTunables,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            udp_port: 9999,
            clock_sync_samples: 3,
            output: ".".into(),
            tunables: StreamTunables::default(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Zeitlimit fuer Verbindungsaufbau und jede Anfrage
    pub request_timeout_ms: u64,
    /// Wartezeit vor einem automatischen Reconnect
    pub reconnect_delay_ms: u64,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            request_timeout_ms: 8000,
            reconnect_delay_ms: 2000,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level bzw. EnvFilter-Ausdruck
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl AppConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &Path) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str(&inhalt).map_err(|e| {
                anyhow!("Konfigurationsfehler in '{}': {e}", pfad.display())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = %pfad.display(),
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow!(
                "Konfigurationsdatei '{}' nicht lesbar: {e}",
                pfad.display()
            )),
        }
    }

    /// Schreibt die Konfiguration zurueck (ueber eine temporaere Datei)
    pub fn speichern(&self, pfad: &Path) -> Result<()> {
        let inhalt = toml::to_string_pretty(self)?;
        let tmp = pfad.with_extension("toml.tmp");
        std::fs::write(&tmp, inhalt)
            .map_err(|e| anyhow!("'{}' nicht schreibbar: {e}", tmp.display()))?;
        std::fs::rename(&tmp, pfad)
            .map_err(|e| anyhow!("'{}' nicht schreibbar: {e}", pfad.display()))?;
        Ok(())
    }

    /// Liefert die gespeicherte Identitaet oder erzeugt eine neue.
    ///
    /// Der zweite Wert ist `true`, wenn eine neue Identitaet erzeugt wurde
    /// und die Konfiguration gespeichert werden muss.
    pub fn identitaet(&mut self) -> Result<(Identity, bool)> {
        let seed = self.identity.private_key.trim();
        if !seed.is_empty() {
            let identity = Identity::from_base64(seed)
                .map_err(|e| anyhow!("[identity] private_key ungueltig: {e}"))?;
            return Ok((identity, false));
        }
        let identity = Identity::generate();
        self.identity.private_key = identity.private_key_base64();
        Ok((identity, true))
    }

    /// Einstellungen fuer den Connection Manager
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            session: SessionSettings {
                request_timeout: Duration::from_millis(self.network.request_timeout_ms),
                clock_sync_samples: self.audio.clock_sync_samples,
                tunables: self.audio.tunables,
            },
            udp_port: self.audio.udp_port,
            reconnect_delay: Duration::from_millis(self.network.reconnect_delay_ms),
        }
    }
}
