//! Device Session – TCP-Control-Kanal zu einem Geraet
//!
//! Eine Session besitzt eine TCP-Verbindung. Die Lese-Schleife laeuft in
//! einem eigenen tokio-Task und stellt jede Antwort ueber eine Tabelle
//! offener Anfragen (Id -> oneshot) zu. Beliebig viele Aufrufer koennen
//! gleichzeitig Anfragen stellen; geschrieben wird ueber einen
//! gemeinsamen, Mutex-geschuetzten `FramedWrite`.
//!
//! ## Ablauf
//!
//! ```text
//! connect()
//!   -> pair(code)            (erstes Pairing)
//!   -> authenticate()        (bereits gepaart)
//!   -> ecdh()                -> Session-Schluessel, ab hier ENCRYPTED
//!   -> play(udp_port, sink)  -> SYNC, UdpAudioReceiver
//!   -> stop()
//! disconnect()
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use streamsound_core::{AudioFormat, DeviceConfig, Result, StreamError, StreamTunables};
use streamsound_crypto::{EcdhKeyPair, Identity, SessionKey};
use streamsound_protocol::{
    envelope, error::from_crypto, handshake, HandshakeState, Magic, Message, MessageBody,
    MessageCodec, Outgoing,
};
use streamsound_voice::clock::{best_of, monotonic_ns, ClockOffset, ClockSample};
use streamsound_voice::{AudioCipher, PcmSink, PlaybackStats, ReceiverConfig, UdpAudioReceiver};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Groesse des Kanals fuer unaufgeforderte Nachrichten
const UNAUFGEFORDERT_KANAL_GROESSE: usize = 32;

// ---------------------------------------------------------------------------
// Einstellungen
// ---------------------------------------------------------------------------

/// Einstellungen einer Session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Zeitlimit fuer Verbindungsaufbau und jede Anfrage
    pub request_timeout: Duration,
    /// Anzahl SYNC-Messungen vor dem Start der Wiedergabe (0 = keine)
    pub clock_sync_samples: usize,
    pub tunables: StreamTunables,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(8),
            clock_sync_samples: 3,
            tunables: StreamTunables::default(),
        }
    }
}

/// Grund fuer das Ende der Lese-Schleife
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnde {
    /// `disconnect()` wurde aufgerufen
    Getrennt,
    /// Die Verbindung ist abgebrochen
    Verloren(String),
}

impl std::fmt::Display for SessionEnde {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEnde::Getrennt => write!(f, "getrennt"),
            SessionEnde::Verloren(grund) => write!(f, "verloren: {grund}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Innerer Zustand
// ---------------------------------------------------------------------------

type Writer = FramedWrite<OwnedWriteHalf, MessageCodec>;
type Reader = FramedRead<OwnedReadHalf, MessageCodec>;

struct SessionInner {
    adresse: String,
    identity: Arc<Identity>,
    settings: SessionSettings,
    config: parking_lot::RwLock<DeviceConfig>,
    handshake: parking_lot::Mutex<HandshakeState>,
    writer: tokio::sync::Mutex<Option<Writer>>,
    offen: DashMap<u32, oneshot::Sender<Message>>,
    unaufgefordert_tx: broadcast::Sender<Message>,
    next_id: AtomicU32,
    live: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    ende_tx: watch::Sender<Option<SessionEnde>>,
    listen_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    receiver: parking_lot::Mutex<Option<Arc<UdpAudioReceiver>>>,
}

impl SessionInner {
    /// Stellt eine empfangene Nachricht dem wartenden Aufrufer zu
    fn zustellen(&self, message: Message) {
        if let Some((_, tx)) = self.offen.remove(&message.id) {
            if tx.send(message).is_err() {
                tracing::trace!(adresse = %self.adresse, "Antwort nach Abbruch der Anfrage");
            }
            return;
        }
        tracing::debug!(
            adresse = %self.adresse,
            magic = %message.magic,
            id = message.id,
            "Unaufgeforderte Nachricht"
        );
        let _ = self.unaufgefordert_tx.send(message);
    }

    fn session_key(&self) -> Option<SessionKey> {
        self.handshake.lock().session_key().cloned()
    }
}

// ---------------------------------------------------------------------------
// DeviceSession
// ---------------------------------------------------------------------------

/// Verbindung zu einem Geraet
///
/// Clone teilt die Verbindung.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("adresse", &self.inner.adresse)
            .field("live", &self.is_live())
            .field("spielt", &self.is_playing())
            .finish()
    }
}

impl DeviceSession {
    /// Baut die TCP-Verbindung auf und startet die Lese-Schleife
    pub async fn connect(
        config: DeviceConfig,
        identity: Arc<Identity>,
        settings: SessionSettings,
    ) -> Result<Self> {
        let adresse = config.socket_address();
        let peer_public_key = config.peer_public_key()?;

        tracing::info!(adresse = %adresse, "Verbinde mit Geraet");
        let stream = tokio::time::timeout(settings.request_timeout, TcpStream::connect(&adresse))
            .await
            .map_err(|_| StreamError::Timeout(format!("Verbindungsaufbau zu {adresse}")))??;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(fehler = %e, "TCP_NODELAY nicht gesetzt");
        }
        let peer_addr = stream.peer_addr()?;
        let (lesen, schreiben) = stream.into_split();

        let reader = FramedRead::new(lesen, MessageCodec::new(Arc::clone(&identity)));
        let writer = FramedWrite::new(schreiben, MessageCodec::new(Arc::clone(&identity)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ende_tx, _) = watch::channel(None);
        let (unaufgefordert_tx, _) = broadcast::channel(UNAUFGEFORDERT_KANAL_GROESSE);

        let inner = Arc::new(SessionInner {
            adresse: config.address.clone(),
            identity,
            settings,
            config: parking_lot::RwLock::new(config),
            handshake: parking_lot::Mutex::new(HandshakeState::mit_peer(peer_public_key)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            offen: DashMap::new(),
            unaufgefordert_tx,
            next_id: AtomicU32::new(1),
            live: AtomicBool::new(true),
            shutdown_tx,
            ende_tx,
            listen_task: parking_lot::Mutex::new(None),
            receiver: parking_lot::Mutex::new(None),
        });

        let task = tokio::spawn(listen_loop(Arc::clone(&inner), reader, shutdown_rx));
        *inner.listen_task.lock() = Some(task);

        tracing::info!(adresse = %inner.adresse, peer = %peer_addr, "TCP-Verbindung hergestellt");
        Ok(Self { inner })
    }

    // -----------------------------------------------------------------------
    // Zustand
    // -----------------------------------------------------------------------

    pub fn adresse(&self) -> &str {
        &self.inner.adresse
    }

    /// true, wenn beide Handles dieselbe Verbindung teilen
    pub fn gleiche_verbindung(&self, andere: &DeviceSession) -> bool {
        Arc::ptr_eq(&self.inner, &andere.inner)
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.inner.receiver.lock().is_some()
    }

    /// Aktuelle Konfiguration (inklusive Public Key nach dem Pairing)
    pub fn config(&self) -> DeviceConfig {
        self.inner.config.read().clone()
    }

    pub fn peer_public_key(&self) -> Option<[u8; 32]> {
        self.inner.handshake.lock().peer_public_key()
    }

    pub fn session_key(&self) -> Option<SessionKey> {
        self.inner.session_key()
    }

    /// Telemetrie der laufenden Wiedergabe
    pub fn stats(&self) -> Option<PlaybackStats> {
        self.inner.receiver.lock().as_ref().map(|r| r.stats())
    }

    /// Nachrichten, die keiner offenen Anfrage zugeordnet werden konnten
    pub fn unaufgeforderte_nachrichten(&self) -> broadcast::Receiver<Message> {
        self.inner.unaufgefordert_tx.subscribe()
    }

    /// Wartet bis die Lese-Schleife endet
    pub async fn beendet(&self) -> SessionEnde {
        let mut rx = self.inner.ende_tx.subscribe();
        loop {
            let aktuell = rx.borrow_and_update().clone();
            if let Some(ende) = aktuell {
                return ende;
            }
            if rx.changed().await.is_err() {
                return SessionEnde::Getrennt;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Anfrage / Antwort
    // -----------------------------------------------------------------------

    async fn senden(&self, outgoing: Outgoing) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| StreamError::NotConnected(self.inner.adresse.clone()))?;
        writer.send(outgoing).await
    }

    /// Sendet eine Anfrage und wartet auf die Antwort mit derselben Id
    async fn anfrage(
        &self,
        magic: Magic,
        body: MessageBody,
        erwartet: Magic,
        versiegeln: bool,
    ) -> Result<Message> {
        if !self.is_live() {
            return Err(StreamError::NotConnected(self.inner.adresse.clone()));
        }
        let key = if versiegeln {
            Some(self.inner.session_key().ok_or_else(|| {
                StreamError::handshake("kein Session-Schluessel, ECDH fehlt")
            })?)
        } else {
            None
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.offen.insert(id, tx);

        tracing::debug!(adresse = %self.inner.adresse, magic = %magic, id, "Anfrage senden");
        if let Err(e) = self.senden(Outgoing::new(magic, id, body).versiegelt(key)).await {
            self.inner.offen.remove(&id);
            return Err(e);
        }
        self.wait_response(id, rx, erwartet).await
    }

    /// Wartet auf die Antwort, oeffnet `ENCRYPTED` und prueft das Magic
    async fn wait_response(
        &self,
        id: u32,
        rx: oneshot::Receiver<Message>,
        erwartet: Magic,
    ) -> Result<Message> {
        let antwort = match tokio::time::timeout(self.inner.settings.request_timeout, rx).await {
            Ok(Ok(antwort)) => antwort,
            Ok(Err(_)) => {
                return Err(StreamError::ConnectionLost(format!(
                    "{}: Verbindung waehrend {erwartet} geschlossen",
                    self.inner.adresse
                )))
            }
            Err(_) => {
                self.inner.offen.remove(&id);
                return Err(StreamError::Timeout(format!("{erwartet} (Id {id})")));
            }
        };

        let antwort = if antwort.magic == Magic::Encrypted {
            let key = self.inner.session_key().ok_or_else(|| {
                StreamError::handshake("ENCRYPTED-Antwort ohne Session-Schluessel")
            })?;
            envelope::unwrap(&antwort, &key)?
        } else {
            antwort
        };

        if antwort.magic == erwartet {
            return Ok(antwort);
        }
        match antwort.body {
            MessageBody::Error(ref text) => {
                // Vor dem Pairing ist kein Schluessel zum Pruefen bekannt
                let peer = self.peer_public_key().filter(|_| erwartet != Magic::PairResponse);
                if let Some(peer) = peer {
                    antwort
                        .verify(&peer)
                        .map_err(|e| StreamError::handshake(format!("ERROR-Antwort: {e}")))?;
                }
                Err(StreamError::ProtocolError(text.clone()))
            }
            _ => Err(StreamError::UnexpectedResponse {
                erwartet: erwartet.name().into(),
                erhalten: antwort.magic.name().into(),
            }),
        }
    }

    /// Verschluesselte Anfrage nach dem ECDH; die Antwort muss vom Peer signiert sein
    async fn rpc(&self, magic: Magic, body: MessageBody, erwartet: Magic) -> Result<Message> {
        let antwort = self.anfrage(magic, body, erwartet, true).await?;
        let peer = self
            .peer_public_key()
            .ok_or_else(|| StreamError::NotPaired(self.inner.adresse.clone()))?;
        antwort.verify(&peer)?;
        Ok(antwort)
    }

    // -----------------------------------------------------------------------
    // Handshakes
    // -----------------------------------------------------------------------

    /// Erstes Pairing mit dem out-of-band Pairing-Code
    ///
    /// Gibt den Public Key des Geraets zurueck, der auch in
    /// [`DeviceSession::config`] uebernommen wird.
    pub async fn pair(&self, pair_code: &str) -> Result<[u8; 32]> {
        let body = handshake::pair_request(&self.inner.identity, pair_code)?;
        let antwort = self.anfrage(Magic::Pair, body, Magic::PairResponse, false).await?;
        let peer = self
            .inner
            .handshake
            .lock()
            .apply_pair_response(&self.inner.identity, &antwort)?;
        self.inner.config.write().set_peer_public_key(&peer);
        tracing::info!(adresse = %self.inner.adresse, "Pairing erfolgreich");
        Ok(peer)
    }

    /// Authentifizierung eines bereits gepaarten Geraets
    pub async fn authenticate(&self) -> Result<()> {
        if self.peer_public_key().is_none() {
            return Err(StreamError::NotPaired(self.inner.adresse.clone()));
        }
        let body = handshake::auth_request(&self.inner.identity);
        let antwort = self
            .anfrage(Magic::Authentication, body, Magic::AuthenticationResponse, false)
            .await?;
        self.inner.handshake.lock().apply_auth_response(&antwort)?;
        tracing::info!(adresse = %self.inner.adresse, "Authentifizierung erfolgreich");
        Ok(())
    }

    /// ECDH mit frischem X25519-Schluesselpaar
    pub async fn ecdh(&self) -> Result<SessionKey> {
        self.ecdh_mit(EcdhKeyPair::generate()).await
    }

    /// ECDH mit vorgegebenem Schluesselpaar
    pub async fn ecdh_mit(&self, ecdh: EcdhKeyPair) -> Result<SessionKey> {
        let peer = self
            .peer_public_key()
            .ok_or_else(|| StreamError::NotPaired(self.inner.adresse.clone()))?;
        let body = handshake::ecdh_request(&ecdh, &peer)?;
        let antwort = self.anfrage(Magic::Ecdh, body, Magic::EcdhResponse, false).await?;
        let key = self
            .inner
            .handshake
            .lock()
            .apply_ecdh_response(&self.inner.identity, &ecdh, &antwort)?
            .clone();
        tracing::info!(adresse = %self.inner.adresse, "Session-Schluessel ausgehandelt");
        Ok(key)
    }

    // -----------------------------------------------------------------------
    // Uhren-Synchronisation
    // -----------------------------------------------------------------------

    /// SYNC-Austausch, die Messung mit der kleinsten RTT gewinnt
    pub async fn clock_sync(&self, samples: usize) -> Result<ClockOffset> {
        let mut messungen = Vec::with_capacity(samples.max(1));
        for _ in 0..samples.max(1) {
            let t0 = monotonic_ns();
            let antwort = self
                .rpc(Magic::Sync, MessageBody::Sync { t0 }, Magic::SyncResponse)
                .await?;
            let t3 = monotonic_ns();
            match antwort.body {
                MessageBody::SyncResponse { t0: echo, t1, t2 } if echo == t0 => {
                    messungen.push(ClockSample { t0, t1, t2, t3 });
                }
                MessageBody::SyncResponse { .. } => {
                    tracing::debug!(adresse = %self.inner.adresse, "SYNC-Antwort mit fremdem t0 verworfen");
                }
                andere => {
                    return Err(StreamError::UnexpectedResponse {
                        erwartet: "SyncResponse".into(),
                        erhalten: andere.art().into(),
                    })
                }
            }
        }
        let offset = best_of(&messungen)
            .ok_or_else(|| StreamError::ProtocolError("keine gueltige SYNC-Messung".into()))?;
        tracing::debug!(
            adresse = %self.inner.adresse,
            offset_ns = offset.offset_ns,
            rtt_ns = offset.rtt_ns,
            "Uhren synchronisiert"
        );
        Ok(offset)
    }

    /// Erneute Uhren-Synchronisation waehrend der Wiedergabe
    ///
    /// Der neue Offset gilt fuer alle danach empfangenen Pakete.
    pub async fn uhr_nachsynchronisieren(&self) -> Result<ClockOffset> {
        let offset = self
            .clock_sync(self.inner.settings.clock_sync_samples.max(1))
            .await?;
        let receiver = self.inner.receiver.lock().clone();
        if let Some(receiver) = receiver {
            receiver.set_clock_offset(Some(offset));
        }
        Ok(offset)
    }

    // -----------------------------------------------------------------------
    // PLAY / STOP
    // -----------------------------------------------------------------------

    /// Startet die Wiedergabe
    ///
    /// Bindet den UDP-Port (belegt: beliebiger freier Port), sendet `PLAY`,
    /// uebernimmt Format und Verschluesselung aus der Antwort und startet
    /// den Empfaenger mit dem abgeleiteten UDP-Schluessel.
    pub async fn play(&self, udp_port: u16, sink: Box<dyn PcmSink>) -> Result<AudioFormat> {
        let key = self
            .inner
            .session_key()
            .ok_or_else(|| StreamError::handshake("kein Session-Schluessel, ECDH fehlt"))?;
        if self.is_playing() {
            self.stop().await?;
        }

        let socket = udp_binden(udp_port).await?;
        let lokaler_port = socket.local_addr()?.port();
        let angefragt = self.inner.config.read().audio_encryption;

        let antwort = self
            .rpc(
                Magic::Play,
                MessageBody::PlayRequest {
                    udp_port: lokaler_port,
                    encryption: angefragt,
                },
                Magic::PlayResponse,
            )
            .await?;
        let MessageBody::PlayResponse {
            udp_port: server_port,
            format,
            encryption,
        } = antwort.body
        else {
            return Err(StreamError::UnexpectedResponse {
                erwartet: "PlayResponse".into(),
                erhalten: antwort.body.art().into(),
            });
        };
        format.validieren()?;
        if encryption != angefragt {
            tracing::info!(
                adresse = %self.inner.adresse,
                angefragt = angefragt.bezeichnung(),
                ausgehandelt = encryption.bezeichnung(),
                "Geraet hat die Verschluesselung geaendert"
            );
        }

        let cipher = AudioCipher::new(encryption, key.udp_key().map_err(from_crypto)?)?;
        let clock = if self.inner.settings.clock_sync_samples > 0 {
            match self.clock_sync(self.inner.settings.clock_sync_samples).await {
                Ok(offset) => Some(offset),
                Err(e) => {
                    tracing::warn!(adresse = %self.inner.adresse, fehler = %e, "Uhren-Synchronisation fehlgeschlagen");
                    None
                }
            }
        } else {
            None
        };

        let mut config = ReceiverConfig::neu(format, cipher, self.inner.settings.tunables);
        config.clock = clock;

        let receiver = UdpAudioReceiver::start(socket, config, sink)?;
        *self.inner.receiver.lock() = Some(Arc::new(receiver));

        tracing::info!(
            adresse = %self.inner.adresse,
            udp_port = lokaler_port,
            server_udp_port = server_port,
            sample_rate = format.sample_rate,
            verschluesselung = encryption.bezeichnung(),
            "Wiedergabe gestartet"
        );
        Ok(format)
    }

    /// Stoppt die Wiedergabe und gibt Socket und Sink frei
    pub async fn stop(&self) -> Result<()> {
        let receiver = self.inner.receiver.lock().take();
        let Some(receiver) = receiver else {
            return Ok(());
        };
        let ergebnis = if self.is_live() {
            self.rpc(Magic::Stop, MessageBody::Empty, Magic::StopResponse)
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        receiver.stop().await;
        tracing::info!(adresse = %self.inner.adresse, "Wiedergabe gestoppt");
        ergebnis
    }

    /// Trennt die Verbindung und wartet auf das Ende der Lese-Schleife
    pub async fn disconnect(&self) {
        if let Err(e) = self.stop().await {
            tracing::debug!(adresse = %self.inner.adresse, fehler = %e, "STOP beim Trennen fehlgeschlagen");
        }
        let _ = self.inner.shutdown_tx.send(true);
        let task = self.inner.listen_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(fehler = %e, "Lese-Task abgebrochen");
            }
        }
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.close().await;
        }
    }
}

/// Bindet den gewuenschten UDP-Port, bei Belegung einen freien
async fn udp_binden(port: u16) -> Result<UdpSocket> {
    match UdpSocket::bind(("0.0.0.0", port)).await {
        Ok(socket) => Ok(socket),
        Err(e) if port != 0 && e.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::warn!(port, "UDP-Port belegt, nutze freien Port");
            Ok(UdpSocket::bind(("0.0.0.0", 0)).await?)
        }
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Lese-Schleife
// ---------------------------------------------------------------------------

async fn listen_loop(
    inner: Arc<SessionInner>,
    mut reader: Reader,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(adresse = %inner.adresse, "Lese-Schleife gestartet");

    let ende = loop {
        tokio::select! {
            frame = reader.next() => {
                match frame {
                    Some(Ok(message)) => inner.zustellen(message),
                    Some(Err(e)) => {
                        tracing::warn!(adresse = %inner.adresse, fehler = %e, "Lesefehler");
                        break SessionEnde::Verloren(e.to_string());
                    }
                    None => {
                        tracing::info!(adresse = %inner.adresse, "Verbindung von der Gegenstelle geschlossen");
                        break SessionEnde::Verloren("Verbindung geschlossen".into());
                    }
                }
            }

            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break SessionEnde::Getrennt;
                }
            }
        }
    };

    // Aufraeumen: wartende Anfragen erhalten ConnectionLost
    inner.live.store(false, Ordering::Relaxed);
    inner.offen.clear();
    inner.handshake.lock().session_beenden();
    let receiver = inner.receiver.lock().take();
    if let Some(receiver) = receiver {
        receiver.stop().await;
    }

    tracing::info!(adresse = %inner.adresse, ende = %ende, "Lese-Schleife beendet");
    // send_replace speichert den Wert auch ohne aktiven Empfaenger
    inner.ende_tx.send_replace(Some(ende));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
