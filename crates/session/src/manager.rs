//! Connection Manager – Registry aller Geraete-Sessions
//!
//! Haelt pro Geraeteadresse die aktive Session, den Verbindungszustand,
//! den Wiedergabestatus und die letzte Fehlermeldung. Die Maps liegen
//! hinter einem Mutex, der nur fuer kurze Buchfuehrung gehalten wird;
//! Netzwerkoperationen laufen ausserhalb.
//!
//! ## Zustandsautomat
//! ```text
//! DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTED
//!                     |             |
//!                     v             v
//!                   ERROR         ERROR
//! ```
//!
//! ## Reconnect
//! Endet eine Session ohne manuelles Trennen, wird bei erreichbarem Netz
//! fuer Geraete mit `auto_play` nach `reconnect_delay` neu verbunden.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use streamsound_core::{
    ConnectionState, DeviceConfig, DeviceEvent, PairingUri, Result, StreamError, StreamTunables,
};
use streamsound_crypto::Identity;
use streamsound_voice::{PlaybackStats, SinkFactory};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::registry::{nach_adresse, DeviceRegistry};
use crate::session::{DeviceSession, SessionEnde, SessionSettings};

/// Groesse des Ereignis-Kanals
const EVENT_KANAL_GROESSE: usize = 256;

/// Meldung fuer Geraete ohne gespeicherten Public Key
pub const NOT_PAIRED_MESSAGE: &str = "device not paired";

// ---------------------------------------------------------------------------
// Einstellungen
// ---------------------------------------------------------------------------

/// Einstellungen des Connection Managers
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub session: SessionSettings,
    /// Lokaler UDP-Port fuer die Wiedergabe
    pub udp_port: u16,
    /// Wartezeit vor einem automatischen Reconnect
    pub reconnect_delay: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            udp_port: 9999,
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry-Zustand
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Zustand {
    devices: HashMap<String, DeviceConfig>,
    tunables: StreamTunables,
    sessions: HashMap<String, DeviceSession>,
    states: HashMap<String, ConnectionState>,
    playing: HashMap<String, bool>,
    errors: HashMap<String, String>,
    manuell_getrennt: HashSet<String>,
}

struct ManagerInner {
    identity: Arc<Identity>,
    registry: Arc<dyn DeviceRegistry>,
    sinks: Arc<dyn SinkFactory>,
    settings: ManagerSettings,
    zustand: Mutex<Zustand>,
    /// Hintergrund-Tasks pro Geraet (Session-Ueberwachung, Reconnect)
    tasks: DashMap<String, JoinHandle<()>>,
    netz_erreichbar: AtomicBool,
    event_tx: broadcast::Sender<DeviceEvent>,
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// Verwaltet alle Geraete-Sessions
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Erstellt den Manager und liest die Geraeteliste
    pub fn neu(
        identity: Arc<Identity>,
        registry: Arc<dyn DeviceRegistry>,
        sinks: Arc<dyn SinkFactory>,
        settings: ManagerSettings,
    ) -> Result<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        let manager = Self {
            inner: Arc::new(ManagerInner {
                identity,
                registry,
                sinks,
                settings,
                zustand: Mutex::new(Zustand::default()),
                tasks: DashMap::new(),
                netz_erreichbar: AtomicBool::new(true),
                event_tx,
            }),
        };
        manager.refresh_device_list()?;
        Ok(manager)
    }

    /// Abonniert Geraete-Ereignisse
    pub fn events_abonnieren(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.event_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn devices(&self) -> Vec<DeviceConfig> {
        let mut devices: Vec<_> = self.inner.zustand.lock().devices.values().cloned().collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        devices
    }

    pub fn connection_state(&self, address: &str) -> ConnectionState {
        self.inner
            .zustand
            .lock()
            .states
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_playing(&self, address: &str) -> bool {
        self.inner
            .zustand
            .lock()
            .playing
            .get(address)
            .copied()
            .unwrap_or(false)
    }

    pub fn error_message(&self, address: &str) -> Option<String> {
        self.inner.zustand.lock().errors.get(address).cloned()
    }

    pub fn session(&self, address: &str) -> Option<DeviceSession> {
        self.inner.zustand.lock().sessions.get(address).cloned()
    }

    /// Telemetrie aller laufenden Wiedergaben
    pub fn stats(&self) -> Vec<(String, PlaybackStats)> {
        let sessions: Vec<_> = self
            .inner
            .zustand
            .lock()
            .sessions
            .iter()
            .map(|(a, s)| (a.clone(), s.clone()))
            .collect();
        sessions
            .into_iter()
            .filter_map(|(a, s)| s.stats().map(|st| (a, st)))
            .collect()
    }

    pub fn verbundene_geraete(&self) -> usize {
        self.inner
            .zustand
            .lock()
            .states
            .values()
            .filter(|z| **z == ConnectionState::Connected)
            .count()
    }

    // -----------------------------------------------------------------------
    // Geraeteliste
    // -----------------------------------------------------------------------

    /// Liest Geraete und Stellschrauben neu aus der Registry
    pub fn refresh_device_list(&self) -> Result<Vec<DeviceConfig>> {
        let devices = self.inner.registry.devices()?;
        let tunables = self.inner.registry.tunables()?;
        {
            let mut z = self.inner.zustand.lock();
            z.devices = nach_adresse(devices.clone());
            z.tunables = tunables;
            let Zustand {
                devices: bekannte,
                states,
                ..
            } = &mut *z;
            for address in bekannte.keys() {
                states.entry(address.clone()).or_default();
            }
        }
        tracing::debug!(anzahl = devices.len(), "Geraeteliste aktualisiert");
        Ok(devices)
    }

    /// Meldet, ob das Netz erreichbar ist; bei Rueckkehr werden
    /// getrennte `auto_play`-Geraete neu verbunden
    pub fn set_network_available(&self, erreichbar: bool) {
        let vorher = self.inner.netz_erreichbar.swap(erreichbar, Ordering::Relaxed);
        if erreichbar && !vorher {
            tracing::info!("Netz wieder erreichbar, verbinde auto_play-Geraete");
            let kandidaten: Vec<String> = {
                let z = self.inner.zustand.lock();
                z.devices
                    .values()
                    .filter(|d| d.auto_play && !z.manuell_getrennt.contains(&d.address))
                    .filter(|d| {
                        matches!(
                            z.states.get(&d.address).copied().unwrap_or_default(),
                            ConnectionState::Disconnected
                        )
                    })
                    .map(|d| d.address.clone())
                    .collect()
            };
            for address in kandidaten {
                self.reconnect_planen(address, Duration::ZERO);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Verbinden / Trennen
    // -----------------------------------------------------------------------

    /// Verbindet ein bekanntes Geraet (AUTHENTICATION + ECDH)
    ///
    /// No-op, wenn das Geraet bereits verbindet oder verbunden ist.
    pub async fn connect_device(&self, address: &str) -> Result<()> {
        let config = {
            let mut z = self.inner.zustand.lock();
            let zustand = z.states.get(address).copied().unwrap_or_default();
            if matches!(zustand, ConnectionState::Connecting | ConnectionState::Connected) {
                tracing::debug!(adresse = %address, zustand = %zustand, "Verbinden ignoriert");
                return Ok(());
            }
            let Some(config) = z.devices.get(address).cloned() else {
                return Err(StreamError::Config(format!("unbekanntes Geraet {address}")));
            };
            z.manuell_getrennt.remove(address);
            z.errors.remove(address);
            z.states.insert(address.to_string(), ConnectionState::Connecting);
            config
        };
        self.zustand_melden(address, ConnectionState::Connecting);

        match self.verbinden(config.clone()).await {
            Ok(session) => {
                self.registrieren(session);
                if config.auto_play {
                    if let Err(e) = self.wiedergabe_starten(address).await {
                        tracing::warn!(adresse = %address, fehler = %e, "Auto-Play fehlgeschlagen");
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.fehler_setzen(address, &e);
                Err(e)
            }
        }
    }

    async fn verbinden(&self, config: DeviceConfig) -> Result<DeviceSession> {
        if config.peer_public_key()?.is_none() {
            return Err(StreamError::NotPaired(NOT_PAIRED_MESSAGE.into()));
        }
        let session = DeviceSession::connect(
            config,
            Arc::clone(&self.inner.identity),
            self.session_settings(),
        )
        .await?;
        let ergebnis = async {
            session.authenticate().await?;
            session.ecdh().await?;
            Ok(())
        }
        .await;
        if let Err(e) = ergebnis {
            session.disconnect().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Pairt ein neues Geraet aus einer Pairing-URI
    ///
    /// Speichert den Public Key in der Registry und fuehrt danach ECDH aus;
    /// das Geraet ist anschliessend verbunden. Eine bestehende Verbindung zum
    /// selben Geraet wird vorher getrennt.
    pub async fn pair_device(&self, uri: &str) -> Result<DeviceConfig> {
        let pairing = PairingUri::parse(uri)?;
        let mut config = pairing.device_config();
        let address = config.address.clone();
        let alt = {
            let mut z = self.inner.zustand.lock();
            if let Some(vorhanden) = z.devices.get(&address) {
                config.name = vorhanden.name.clone();
                config.auto_play = vorhanden.auto_play;
                config.audio_encryption = vorhanden.audio_encryption;
            }
            z.errors.remove(&address);
            z.playing.insert(address.clone(), false);
            z.states.insert(address.clone(), ConnectionState::Connecting);
            z.sessions.remove(&address)
        };
        if let Some(alt) = alt {
            tracing::info!(adresse = %address, "Bestehende Verbindung wird fuer das Pairing getrennt");
            if let Some((_, task)) = self.inner.tasks.remove(&address) {
                task.abort();
            }
            alt.disconnect().await;
        }
        self.zustand_melden(&address, ConnectionState::Connecting);

        let ergebnis = async {
            let session = DeviceSession::connect(
                config,
                Arc::clone(&self.inner.identity),
                self.session_settings(),
            )
            .await?;
            let gepaart = async {
                session.pair(&pairing.pair_code).await?;
                let config = session.config();
                self.inner.registry.upsert(config.clone())?;
                self.inner
                    .zustand
                    .lock()
                    .devices
                    .insert(config.address.clone(), config.clone());
                let _ = self.inner.event_tx.send(DeviceEvent::Gepaart {
                    adresse: config.address.clone(),
                });
                session.ecdh().await?;
                Ok::<_, StreamError>(config)
            }
            .await;
            match gepaart {
                Ok(config) => Ok((session, config)),
                Err(e) => {
                    session.disconnect().await;
                    Err(e)
                }
            }
        }
        .await;

        match ergebnis {
            Ok((session, config)) => {
                tracing::info!(adresse = %address, "Geraet gepaart und verbunden");
                self.registrieren(session);
                Ok(config)
            }
            Err(e) => {
                self.fehler_setzen(&address, &e);
                Err(e)
            }
        }
    }

    /// Trennt ein Geraet; `manual` unterdrueckt den automatischen Reconnect
    pub async fn disconnect_device(&self, address: &str, manual: bool) {
        let session = {
            let mut z = self.inner.zustand.lock();
            if manual {
                z.manuell_getrennt.insert(address.to_string());
            }
            z.sessions.remove(address)
        };
        if manual {
            if let Some((_, task)) = self.inner.tasks.remove(address) {
                task.abort();
            }
        }
        if let Some(session) = session {
            session.disconnect().await;
        }
        {
            let mut z = self.inner.zustand.lock();
            z.playing.insert(address.to_string(), false);
            if z.states.get(address) != Some(&ConnectionState::Error) {
                z.states.insert(address.to_string(), ConnectionState::Disconnected);
            }
        }
        tracing::info!(adresse = %address, manuell = manual, "Geraet getrennt");
        self.zustand_melden(address, self.connection_state(address));

        let auto_play = self
            .inner
            .zustand
            .lock()
            .devices
            .get(address)
            .is_some_and(|d| d.auto_play);
        if !manual && auto_play && self.inner.netz_erreichbar.load(Ordering::Relaxed) {
            self.reconnect_planen(address.to_string(), self.inner.settings.reconnect_delay);
        }
    }

    /// Startet oder stoppt die Wiedergabe; gibt den neuen Zustand zurueck
    pub async fn toggle_playback(&self, address: &str) -> Result<bool> {
        if self.is_playing(address) {
            let session = self.session(address);
            let ergebnis = match session {
                Some(session) => session.stop().await,
                None => Ok(()),
            };
            self.wiedergabe_setzen(address, false);
            if let Err(e) = &ergebnis {
                self.fehlermeldung_setzen(address, e);
            }
            ergebnis.map(|_| false)
        } else {
            self.wiedergabe_starten(address).await.map(|_| true)
        }
    }

    async fn wiedergabe_starten(&self, address: &str) -> Result<()> {
        let session = self
            .session(address)
            .ok_or_else(|| StreamError::NotConnected(address.to_string()))?;
        let sink = self.inner.sinks.create(address)?;
        match session.play(self.inner.settings.udp_port, sink).await {
            Ok(_) => {
                self.wiedergabe_setzen(address, true);
                Ok(())
            }
            Err(e) => {
                self.fehlermeldung_setzen(address, &e);
                Err(e)
            }
        }
    }

    /// Loescht die Fehlermeldung; ein ERROR-Zustand wird zu DISCONNECTED
    pub fn clear_error(&self, address: &str) {
        let geaendert = {
            let mut z = self.inner.zustand.lock();
            z.errors.remove(address);
            if z.states.get(address) == Some(&ConnectionState::Error) {
                z.states.insert(address.to_string(), ConnectionState::Disconnected);
                true
            } else {
                false
            }
        };
        if geaendert {
            self.zustand_melden(address, ConnectionState::Disconnected);
        }
    }

    /// Bricht alle Tasks ab, trennt alle Sessions und leert den Zustand
    pub async fn cleanup(&self) {
        let adressen: Vec<String> = self.inner.tasks.iter().map(|e| e.key().clone()).collect();
        for address in adressen {
            if let Some((_, task)) = self.inner.tasks.remove(&address) {
                task.abort();
            }
        }
        let sessions: Vec<DeviceSession> = {
            let mut z = self.inner.zustand.lock();
            let sessions = z.sessions.drain().map(|(_, s)| s).collect();
            z.states.clear();
            z.playing.clear();
            z.errors.clear();
            z.manuell_getrennt.clear();
            sessions
        };
        for session in sessions {
            session.disconnect().await;
        }
        tracing::info!("Connection Manager aufgeraeumt");
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    fn session_settings(&self) -> SessionSettings {
        let mut settings = self.inner.settings.session.clone();
        settings.tunables = self.inner.zustand.lock().tunables;
        settings
    }

    /// Traegt eine verbundene Session ein und startet ihre Ueberwachung
    fn registrieren(&self, session: DeviceSession) {
        let address = session.adresse().to_string();
        {
            let mut z = self.inner.zustand.lock();
            z.sessions.insert(address.clone(), session.clone());
            z.states.insert(address.clone(), ConnectionState::Connected);
            z.playing.insert(address.clone(), false);
        }
        self.zustand_melden(&address, ConnectionState::Connected);

        // Der alte Handle kann der gerade laufende Reconnect-Task sein,
        // daher nur ersetzen und nicht abbrechen
        let task = tokio::spawn(self.clone().ueberwachen(address.clone(), session));
        self.inner.tasks.insert(address, task);
    }

    /// Wartet auf das Ende einer Session und entscheidet ueber den Reconnect
    fn ueberwachen(self, address: String, session: DeviceSession) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let ende = session.beendet().await;
            let (manuell, auto_play, aktuell) = {
                let mut z = self.inner.zustand.lock();
                let aktuell = z
                    .sessions
                    .get(&address)
                    .is_some_and(|s| s.gleiche_verbindung(&session));
                if aktuell {
                    z.sessions.remove(&address);
                    z.playing.insert(address.clone(), false);
                    z.states.insert(address.clone(), ConnectionState::Disconnected);
                }
                let auto_play = z.devices.get(&address).is_some_and(|d| d.auto_play);
                (z.manuell_getrennt.contains(&address), auto_play, aktuell)
            };
            if !aktuell {
                return;
            }

            let _ = self.inner.event_tx.send(DeviceEvent::SessionBeendet {
                adresse: address.clone(),
                grund: ende.to_string(),
            });
            self.zustand_melden(&address, ConnectionState::Disconnected);

            let verloren = matches!(ende, SessionEnde::Verloren(_));
            if verloren
                && !manuell
                && auto_play
                && self.inner.netz_erreichbar.load(Ordering::Relaxed)
            {
                tracing::info!(adresse = %address, "Verbindung verloren, plane Reconnect");
                let verzoegerung = self.inner.settings.reconnect_delay;
                tokio::time::sleep(verzoegerung).await;
                if let Err(e) = self.connect_device(&address).await {
                    tracing::warn!(adresse = %address, fehler = %e, "Reconnect fehlgeschlagen");
                }
            }
        })
    }

    fn reconnect_planen(&self, address: String, verzoegerung: Duration) {
        let manager = self.clone();
        let schluessel = address.clone();
        let task = tokio::spawn(manager.reconnect(address, verzoegerung));
        self.inner.tasks.insert(schluessel, task);
    }

    fn reconnect(self, address: String, verzoegerung: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tokio::time::sleep(verzoegerung).await;
            if let Err(e) = self.connect_device(&address).await {
                tracing::warn!(adresse = %address, fehler = %e, "Reconnect fehlgeschlagen");
            }
        })
    }

    fn wiedergabe_setzen(&self, address: &str, spielt: bool) {
        self.inner
            .zustand
            .lock()
            .playing
            .insert(address.to_string(), spielt);
        let _ = self.inner.event_tx.send(DeviceEvent::WiedergabeGeaendert {
            adresse: address.to_string(),
            spielt,
        });
    }

    /// Hinterlegt eine Fehlermeldung ohne den Verbindungszustand zu aendern
    fn fehlermeldung_setzen(&self, address: &str, fehler: &StreamError) {
        let nachricht = fehler_text(fehler);
        tracing::error!(adresse = %address, fehler = %nachricht, "Geraetefehler");
        self.inner
            .zustand
            .lock()
            .errors
            .insert(address.to_string(), nachricht.clone());
        let _ = self.inner.event_tx.send(DeviceEvent::Fehler {
            adresse: address.to_string(),
            nachricht,
        });
    }

    /// Setzt ERROR samt Meldung
    fn fehler_setzen(&self, address: &str, fehler: &StreamError) {
        self.inner
            .zustand
            .lock()
            .states
            .insert(address.to_string(), ConnectionState::Error);
        self.fehlermeldung_setzen(address, fehler);
        self.zustand_melden(address, ConnectionState::Error);
    }

    fn zustand_melden(&self, address: &str, zustand: ConnectionState) {
        let _ = self.inner.event_tx.send(DeviceEvent::ZustandGeaendert {
            adresse: address.to_string(),
            zustand,
        });
    }
}

/// Fehlermeldung fuer die Oberflaeche
fn fehler_text(fehler: &StreamError) -> String {
    match fehler {
        StreamError::NotPaired(_) => NOT_PAIRED_MESSAGE.to_string(),
        andere => andere.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
