//! UDP-Audio-Empfaenger einer Play-Session
//!
//! ## Architektur
//!
//! ```text
//! UDP Socket (recv_from)                     tokio-Task
//!     |
//!     v
//! AudioPacket::parse()     <- zu kurz: gezaehlt, verworfen
//!     |
//!     v
//! SequenceGate::check()    <- zu alt: verworfen, Sprung: neu gesetzt
//!     |
//!     v
//! AudioCipher::decrypt()   <- Fehler: gezaehlt, verworfen
//!     |
//!     v
//! JitterQueue::push()      <- Ueberlauf: aeltestes Paket verworfen
//!     |
//!     v
//! Playback-Schleife        spawn_blocking
//!     |
//!     v
//! PcmSink::write()
//! ```
//!
//! Beide Schleifen enden gemeinsam ueber einen `watch`-Kanal; `stop()`
//! wartet auf beide, bevor Socket und Sink freigegeben sind.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use streamsound_core::{AudioFormat, Result, StreamError, StreamTunables};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cipher::AudioCipher;
use crate::clock::{monotonic_ns, ClockOffset};
use crate::jitter_buffer::{JitterQueue, QueuedPacket};
use crate::packet::{self, AudioPacket};
use crate::sequence::{GateDecision, SequenceGate};
use crate::sink::PcmSink;
use crate::telemetry::{PlaybackStats, StreamTelemetry};

/// Groesster moegliche UDP-Payload
const UDP_BUFFER_SIZE: usize = 65_536;

/// Abstand der Heartbeats an den Sender
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Wartezeit der Playback-Schleife auf neue Pakete
const PLAYBACK_POLL: Duration = Duration::from_millis(10);

/// Nach dieser Dauer durchgehender Stille werden stille Pakete verworfen
pub const SILENCE_SUPPRESS_AFTER_NS: i64 = 5_000_000_000;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Parameter einer Play-Session
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub format: AudioFormat,
    pub cipher: AudioCipher,
    pub tunables: StreamTunables,
    /// Uhren-Offset aus dem SYNC-Austausch, `None` ohne Synchronisation
    pub clock: Option<ClockOffset>,
}

impl ReceiverConfig {
    pub fn neu(format: AudioFormat, cipher: AudioCipher, tunables: StreamTunables) -> Self {
        Self {
            format,
            cipher,
            tunables,
            clock: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Geteilter Zustand
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Inner {
    queue: JitterQueue,
    telemetry: StreamTelemetry,
    clock: RwLock<Option<ClockOffset>>,
    expected: AtomicU32,
    laeuft: AtomicBool,
    port: u16,
}

impl Inner {
    /// Verarbeitet ein Datagramm, gibt die Sequenz angenommener Pakete zurueck
    fn paket_verarbeiten(&self, daten: &[u8], gate: &mut SequenceGate, cipher: &AudioCipher) -> Option<u32> {
        let jetzt = monotonic_ns();
        let paket = match AudioPacket::parse(daten) {
            Ok(p) => p,
            Err(_) => {
                self.telemetry.zu_kurz();
                tracing::trace!(bytes = daten.len(), "Audiopaket zu kurz");
                return None;
            }
        };
        self.telemetry.paket_empfangen(jetzt);

        match gate.check(paket.sequence) {
            GateDecision::Accept => {}
            GateDecision::TooOld => {
                self.telemetry.zu_alt();
                tracing::trace!(sequence = paket.sequence, erwartet = gate.expected(), "Paket zu alt");
                return None;
            }
            GateDecision::Gap { expected } => {
                self.telemetry.resync();
                tracing::warn!(sequence = paket.sequence, erwartet = expected, "Sequenz-Sprung, neu synchronisiert");
            }
            GateDecision::Resync { expected } => {
                self.telemetry.resync();
                tracing::info!(sequence = paket.sequence, erwartet = expected, "Sender-Neustart erkannt, neu synchronisiert");
            }
        }
        self.expected.store(gate.expected(), Ordering::Relaxed);

        let capture_client = (*self.clock.read()).map(|c| c.to_client_ns(paket.capture_time_server_ns));
        if let Some(capture) = capture_client {
            let netz = jetzt - capture;
            if netz >= 0 {
                self.telemetry.netzwerk_latenz(netz);
            }
        }

        let start = Instant::now();
        let pcm = match cipher.decrypt(paket.sequence, paket.payload) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.telemetry.entschluesselung_fehlgeschlagen();
                tracing::debug!(sequence = paket.sequence, fehler = %e, "Audiopaket nicht entschluesselbar");
                return None;
            }
        };
        self.telemetry.decrypt_dauer(start.elapsed().as_nanos() as i64);

        let verworfen = self.queue.push(QueuedPacket {
            sequence: paket.sequence,
            pcm,
            capture_time_client_ns: capture_client,
            receive_time_ns: jetzt,
        });
        if verworfen > 0 {
            tracing::debug!(verworfen, "Jitter-Queue voll, aelteste Pakete verworfen");
        }
        self.telemetry.ueberlauf(verworfen);
        Some(paket.sequence)
    }
}

// ---------------------------------------------------------------------------
// UdpAudioReceiver
// ---------------------------------------------------------------------------

/// Laufender Empfaenger: Empfangs-Task plus blockierender Playback-Thread
pub struct UdpAudioReceiver {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpAudioReceiver {
    /// Oeffnet den Sink und startet beide Schleifen
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn start(socket: UdpSocket, config: ReceiverConfig, mut sink: Box<dyn PcmSink>) -> Result<Self> {
        config.format.validieren()?;
        let port = socket.local_addr()?.port();

        sink.open(
            &config.format,
            config.tunables.audio_buffer_size_bytes,
            config.tunables.preferred_buffer_frames,
        )?;

        let inner = Arc::new(Inner {
            queue: JitterQueue::neu(config.tunables.max_audio_queue_size),
            telemetry: StreamTelemetry::default(),
            clock: RwLock::new(config.clock),
            expected: AtomicU32::new(0),
            laeuft: AtomicBool::new(true),
            port,
        });
        if let Some(clock) = config.clock {
            inner.telemetry.sync_rtt(clock.rtt_ns);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let empfang = tokio::spawn(empfangs_loop(
            socket,
            Arc::clone(&inner),
            config.cipher,
            config.tunables.packet_sequence_threshold,
            shutdown_rx.clone(),
        ));

        let playback_inner = Arc::clone(&inner);
        let format = config.format;
        let wiedergabe = tokio::task::spawn_blocking(move || {
            wiedergabe_loop(playback_inner, sink, format, shutdown_rx);
        });

        tracing::info!(
            port,
            sample_rate = config.format.sample_rate,
            bits = config.format.bits,
            channels = config.format.channels,
            "UDP-Audio-Empfaenger gestartet"
        );

        Ok(Self {
            inner,
            shutdown_tx,
            tasks: Mutex::new(vec![empfang, wiedergabe]),
        })
    }

    /// Lokaler UDP-Port
    pub fn local_port(&self) -> u16 {
        self.inner.port
    }

    pub fn laeuft(&self) -> bool {
        self.inner.laeuft.load(Ordering::Relaxed)
    }

    /// Setzt einen neuen Uhren-Offset (erneute Synchronisation waehrend der Wiedergabe)
    pub fn set_clock_offset(&self, clock: Option<ClockOffset>) {
        *self.inner.clock.write() = clock;
        if let Some(c) = clock {
            self.inner.telemetry.sync_rtt(c.rtt_ns);
        }
    }

    pub fn stats(&self) -> PlaybackStats {
        self.inner.telemetry.snapshot(
            self.inner.port,
            self.inner.queue.len(),
            self.inner.expected.load(Ordering::Relaxed),
        )
    }

    /// Beendet beide Schleifen und wartet auf sie
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(fehler = %e, "Audio-Task abgebrochen");
            }
        }
        self.inner.queue.leeren();
        if self.inner.laeuft.swap(false, Ordering::Relaxed) {
            tracing::info!(port = self.inner.port, "UDP-Audio-Empfaenger gestoppt");
        }
    }
}

impl Drop for UdpAudioReceiver {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl std::fmt::Debug for UdpAudioReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpAudioReceiver")
            .field("port", &self.inner.port)
            .field("laeuft", &self.laeuft())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Empfangs-Schleife
// ---------------------------------------------------------------------------

async fn empfangs_loop(
    socket: UdpSocket,
    inner: Arc<Inner>,
    cipher: AudioCipher,
    threshold: u32,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    let mut gate = SequenceGate::neu(threshold);
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Heartbeats gehen an den Absender des zuletzt angenommenen Pakets
    let mut absender: Option<SocketAddr> = None;
    let mut letzte_sequenz: Option<u32> = None;

    tracing::debug!(port = inner.port, "Audio-Empfangs-Schleife gestartet");

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, addr)) => {
                        if let Some(seq) = inner.paket_verarbeiten(&buf[..len], &mut gate, &cipher) {
                            letzte_sequenz = Some(seq);
                            if absender != Some(addr) {
                                tracing::debug!(absender = %addr, "Audio-Absender erkannt");
                                absender = Some(addr);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(fehler = %e, "UDP-Empfangsfehler");
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if let (Some(ziel), Some(seq)) = (absender, letzte_sequenz) {
                    if let Err(e) = socket.send_to(&packet::heartbeat(seq), ziel).await {
                        tracing::debug!(fehler = %e, ziel = %ziel, "Heartbeat nicht gesendet");
                    } else {
                        tracing::trace!(ziel = %ziel, sequence = seq, "Heartbeat gesendet");
                    }
                }
            }

            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!(port = inner.port, "Audio-Empfangs-Schleife beendet");
}

// ---------------------------------------------------------------------------
// Playback-Schleife
// ---------------------------------------------------------------------------

/// Geschaetzte Abspielzeit des Frames `frame_index`
fn abspielzeit(sink: &mut dyn PcmSink, frame_index: i64, sample_rate: i64) -> Option<i64> {
    let ts = sink.timestamp()?;
    let delta = frame_index - ts.frame_position;
    if delta < 0 || sample_rate <= 0 {
        return None;
    }
    Some(ts.nano_time + delta * 1_000_000_000 / sample_rate)
}

fn wiedergabe_loop(
    inner: Arc<Inner>,
    mut sink: Box<dyn PcmSink>,
    format: AudioFormat,
    shutdown_rx: watch::Receiver<bool>,
) {
    let bytes_pro_frame = format.bytes_per_frame().max(1);
    let sample_rate = i64::from(format.sample_rate);
    let mut frames_gesamt: i64 = 0;
    let mut stille_seit: Option<i64> = None;

    while !*shutdown_rx.borrow() {
        let Some(paket) = inner.queue.pop_timeout(PLAYBACK_POLL) else {
            continue;
        };

        let laenge = paket.pcm.len() - paket.pcm.len() % bytes_pro_frame;
        if laenge == 0 {
            continue;
        }
        let pcm = &paket.pcm[..laenge];

        if pcm.iter().all(|b| *b == 0) {
            let seit = *stille_seit.get_or_insert(paket.receive_time_ns);
            if paket.receive_time_ns - seit > SILENCE_SUPPRESS_AFTER_NS {
                inner.telemetry.stille_uebersprungen();
                continue;
            }
        } else {
            stille_seit = None;
        }

        let erster_frame = frames_gesamt;
        let mut geschrieben = 0;
        let mut gemessen = false;
        while geschrieben < pcm.len() && !*shutdown_rx.borrow() {
            match sink.write(&pcm[geschrieben..]) {
                Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                Ok(n) => {
                    geschrieben += n;
                    if !gemessen {
                        gemessen = true;
                        if let Some(play) = abspielzeit(sink.as_mut(), erster_frame, sample_rate) {
                            inner.telemetry.abspiel_latenzen(
                                play - paket.receive_time_ns,
                                paket.capture_time_client_ns.map(|c| play - c),
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(fehler = %e, sequence = paket.sequence, "PCM-Ausgabe fehlgeschlagen");
                    break;
                }
            }
        }
        frames_gesamt += (geschrieben / bytes_pro_frame) as i64;
        inner.telemetry.abgespielt();
        tracing::trace!(sequence = paket.sequence, bytes = geschrieben, "Paket abgespielt");
    }

    sink.close();
    tracing::debug!(port = inner.port, "Playback-Schleife beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Aufnahme, RecordingSink};
    use streamsound_core::AudioEncryptionMethod;
    use streamsound_crypto::SecretBytes;

    fn format() -> AudioFormat {
        AudioFormat {
            sample_rate: 48_000,
            bits: 16,
            channels: 2,
            format_tag: 1,
        }
    }

    fn xor_cipher() -> AudioCipher {
        AudioCipher::new(AudioEncryptionMethod::Xor256, SecretBytes::new((0u8..32).collect())).unwrap()
    }

    async fn starten(
        config: ReceiverConfig,
    ) -> (UdpAudioReceiver, Arc<Mutex<Aufnahme>>, UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ziel = socket.local_addr().unwrap();
        let (sink, aufnahme) = RecordingSink::neu();
        let receiver = UdpAudioReceiver::start(socket, config, Box::new(sink)).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (receiver, aufnahme, sender, ziel)
    }

    async fn warten_auf(aufnahme: &Arc<Mutex<Aufnahme>>, anzahl: usize) {
        for _ in 0..200 {
            if aufnahme.lock().writes.len() >= anzahl {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn pakete_kommen_geordnet_am_sink_an() {
        let cipher = xor_cipher();
        let config = ReceiverConfig::neu(format(), cipher.clone(), StreamTunables::default());
        let (receiver, aufnahme, sender, ziel) = starten(config).await;

        for seq in 0u32..3 {
            let pcm = vec![seq as u8 + 1; 16];
            let daten = AudioPacket::encode(seq, 0, &cipher.encrypt(seq, &pcm).unwrap());
            sender.send_to(&daten, ziel).await.unwrap();
        }
        warten_auf(&aufnahme, 3).await;
        receiver.stop().await;

        let a = aufnahme.lock();
        assert_eq!(a.writes, vec![vec![1u8; 16], vec![2u8; 16], vec![3u8; 16]]);
        assert!(a.geschlossen);
        let stats = receiver.stats();
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.expected_sequence, 3);
        assert!(!receiver.laeuft());
    }

    #[tokio::test]
    async fn kaputte_pakete_werden_gezaehlt() {
        let config = ReceiverConfig::neu(
            format(),
            AudioCipher::new(AudioEncryptionMethod::Aes256Gcm, SecretBytes::new(vec![7; 32])).unwrap(),
            StreamTunables::default(),
        );
        let (receiver, _aufnahme, sender, ziel) = starten(config).await;

        sender.send_to(&[1, 2, 3], ziel).await.unwrap();
        sender
            .send_to(&AudioPacket::encode(0, 0, &[0u8; 40]), ziel)
            .await
            .unwrap();

        for _ in 0..200 {
            let s = receiver.stats();
            if s.packets_too_short == 1 && s.decrypt_failures == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = receiver.stats();
        assert_eq!(stats.packets_too_short, 1);
        assert_eq!(stats.decrypt_failures, 1);
        receiver.stop().await;
    }

    #[tokio::test]
    async fn ungerade_laenge_wird_auf_frames_gekuerzt() {
        let config = ReceiverConfig::neu(
            format(),
            AudioCipher::new(AudioEncryptionMethod::None, SecretBytes::new(Vec::new())).unwrap(),
            StreamTunables::default(),
        );
        let (receiver, aufnahme, sender, ziel) = starten(config).await;

        sender
            .send_to(&AudioPacket::encode(0, 0, &[9u8; 10]), ziel)
            .await
            .unwrap();
        warten_auf(&aufnahme, 1).await;
        receiver.stop().await;

        assert_eq!(aufnahme.lock().writes, vec![vec![9u8; 8]]);
    }

    #[tokio::test]
    async fn heartbeat_an_absender() {
        let config = ReceiverConfig::neu(
            format(),
            AudioCipher::new(AudioEncryptionMethod::None, SecretBytes::new(Vec::new())).unwrap(),
            StreamTunables::default(),
        );
        let (receiver, _aufnahme, sender, ziel) = starten(config).await;

        sender
            .send_to(&AudioPacket::encode(41, 0, &[1u8; 4]), ziel)
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let (len, von) = tokio::time::timeout(Duration::from_secs(3), sender.recv_from(&mut buf))
            .await
            .expect("Heartbeat erwartet")
            .unwrap();
        assert_eq!(von, ziel);
        assert_eq!(packet::parse_heartbeat(&buf[..len]), Some(41));
        receiver.stop().await;
    }

    #[tokio::test]
    async fn heartbeat_folgt_dem_beobachteten_absender() {
        let config = ReceiverConfig::neu(
            format(),
            AudioCipher::new(AudioEncryptionMethod::None, SecretBytes::new(Vec::new())).unwrap(),
            StreamTunables::default(),
        );
        let (receiver, _aufnahme, erster, ziel) = starten(config).await;
        erster
            .send_to(&AudioPacket::encode(1, 0, &[1u8; 4]), ziel)
            .await
            .unwrap();

        // Der Sender wechselt den Port, ein kaputtes Paket aendert das Ziel nicht
        let zweiter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dritter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        zweiter
            .send_to(&AudioPacket::encode(2, 0, &[2u8; 4]), ziel)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        dritter.send_to(&[1, 2, 3], ziel).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = tokio::time::timeout(Duration::from_secs(3), zweiter.recv_from(&mut buf))
            .await
            .expect("Heartbeat erwartet")
            .unwrap();
        assert_eq!(packet::parse_heartbeat(&buf[..len]), Some(2));
        assert!(
            tokio::time::timeout(Duration::from_millis(200), dritter.recv_from(&mut buf))
                .await
                .is_err()
        );
        receiver.stop().await;
    }

    #[tokio::test]
    async fn zu_alte_pakete_aendern_die_netzlatenz_nicht() {
        let mut config = ReceiverConfig::neu(
            format(),
            AudioCipher::new(AudioEncryptionMethod::None, SecretBytes::new(Vec::new())).unwrap(),
            StreamTunables::default(),
        );
        config.clock = Some(ClockOffset { offset_ns: -1_000_000_000, rtt_ns: 0 });
        let (receiver, _aufnahme, sender, ziel) = starten(config).await;

        let frisch = (monotonic_ns() + 1_000_000_000 - 10_000_000) as u64;
        sender
            .send_to(&AudioPacket::encode(300, frisch, &[1u8; 4]), ziel)
            .await
            .unwrap();
        let alt = (monotonic_ns() + 1_000_000_000 - 900_000_000) as u64;
        sender
            .send_to(&AudioPacket::encode(0, alt, &[1u8; 4]), ziel)
            .await
            .unwrap();

        for _ in 0..200 {
            if receiver.stats().packets_too_old == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = receiver.stats();
        assert_eq!(stats.packets_too_old, 1);
        assert!(stats.network_latency_ms.unwrap() < 500, "{stats:?}");
        receiver.stop().await;
    }

    #[tokio::test]
    async fn neuer_uhren_offset_gilt_fuer_folgende_pakete() {
        let config = ReceiverConfig::neu(
            format(),
            AudioCipher::new(AudioEncryptionMethod::None, SecretBytes::new(Vec::new())).unwrap(),
            StreamTunables::default(),
        );
        let (receiver, aufnahme, sender, ziel) = starten(config).await;

        sender
            .send_to(&AudioPacket::encode(0, 0, &[1u8; 4]), ziel)
            .await
            .unwrap();
        warten_auf(&aufnahme, 1).await;
        assert!(receiver.stats().network_latency_ms.is_none());

        // Server-Uhr laeuft eine Sekunde vor
        receiver.set_clock_offset(Some(ClockOffset { offset_ns: -1_000_000_000, rtt_ns: 3_000_000 }));
        let capture = (monotonic_ns() + 1_000_000_000 - 20_000_000) as u64;
        sender
            .send_to(&AudioPacket::encode(1, capture, &[1u8; 4]), ziel)
            .await
            .unwrap();
        warten_auf(&aufnahme, 2).await;

        let stats = receiver.stats();
        assert_eq!(stats.sync_rtt_ms, Some(3));
        assert!(stats.network_latency_ms.unwrap() >= 20);
        receiver.stop().await;
    }

    #[tokio::test]
    async fn ungueltiges_format_wird_abgelehnt() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut f = format();
        f.sample_rate = 4_000;
        let config = ReceiverConfig::neu(f, xor_cipher(), StreamTunables::default());
        let err = UdpAudioReceiver::start(socket, config, Box::new(RecordingSink::neu().0)).unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedAudioFormat(_)));
    }

    #[tokio::test]
    async fn latenz_mit_uhren_offset() {
        let mut config = ReceiverConfig::neu(
            format(),
            AudioCipher::new(AudioEncryptionMethod::None, SecretBytes::new(Vec::new())).unwrap(),
            StreamTunables::default(),
        );
        // Server-Uhr laeuft eine Sekunde vor
        config.clock = Some(ClockOffset { offset_ns: -1_000_000_000, rtt_ns: 2_000_000 });
        let (receiver, aufnahme, sender, ziel) = starten(config).await;

        let capture = (monotonic_ns() + 1_000_000_000 - 30_000_000) as u64;
        sender
            .send_to(&AudioPacket::encode(0, capture, &[5u8; 8]), ziel)
            .await
            .unwrap();
        warten_auf(&aufnahme, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = receiver.stats();
        assert_eq!(stats.sync_rtt_ms, Some(2));
        assert!(stats.network_latency_ms.unwrap() >= 30);
        assert!(stats.end_to_end_latency_ms.unwrap() >= 30);
        assert!(stats.buffer_latency_ms.is_some());
        receiver.stop().await;
    }
}
