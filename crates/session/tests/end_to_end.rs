//! Szenarien gegen eine skriptgesteuerte Gegenstelle
//!
//! Die Gegenstelle nutzt die Responder-Haelfte des Handshake-Moduls und
//! sendet nach `PLAY` drei XOR-verschluesselte UDP-Pakete.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use streamsound_core::{
    AudioEncryptionMethod, AudioFormat, ConnectionState, DeviceConfig, StreamError,
    StreamTunables,
};
use streamsound_crypto::{sha256, EcdhKeyPair, Identity, SessionKey};
use streamsound_protocol::{envelope, handshake, Magic, MessageBody, MessageCodec, Outgoing};
use streamsound_session::{
    ConnectionManager, DeviceRegistry, DeviceSession, InMemoryRegistry, ManagerSettings,
    SessionSettings,
};
use streamsound_voice::packet::AudioPacket;
use streamsound_voice::sink::Aufnahme;
use streamsound_voice::{monotonic_ns, AudioCipher, PcmSink, RecordingSink, SinkFactory};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::codec::Framed;

const CODE: &str = "c2VjcmV0LWNvZGU=";
const SERVER_SEED: [u8; 32] = [2; 32];
const SERVER_X25519: [u8; 32] = [3; 32];
const CLIENT_SEED: [u8; 32] = [1; 32];
const CLIENT_X25519: [u8; 32] = [4; 32];

fn testformat() -> AudioFormat {
    AudioFormat {
        sample_rate: 48_000,
        bits: 16,
        channels: 2,
        format_tag: 1,
    }
}

fn pcm(seq: u32) -> Vec<u8> {
    vec![seq as u8 + 1; 64]
}

// ---------------------------------------------------------------------------
// Skript-Gegenstelle
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Skript {
    /// Bereits bekannter Client (Authentifizierung statt Pairing)
    client_public_key: Option<[u8; 32]>,
    /// PLAY mit ERROR beantworten
    play_fehler: Option<String>,
    /// Erste Verbindung nach dem ECDH schliessen
    erste_verbindung_trennen: bool,
}

struct Gegenstelle {
    adresse: String,
    verbindungen: Arc<AtomicUsize>,
}

async fn gegenstelle(skript: Skript) -> Gegenstelle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap().to_string();
    let verbindungen = Arc::new(AtomicUsize::new(0));
    let zaehler = Arc::clone(&verbindungen);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let nummer = zaehler.fetch_add(1, Ordering::SeqCst);
            let trennen = skript.erste_verbindung_trennen && nummer == 0;
            tokio::spawn(verbindung_bedienen(stream, skript.clone(), trennen));
        }
    });

    Gegenstelle {
        adresse,
        verbindungen,
    }
}

async fn verbindung_bedienen(stream: TcpStream, skript: Skript, nach_ecdh_trennen: bool) {
    let identity = Arc::new(Identity::from_bytes(&SERVER_SEED));
    let ecdh = EcdhKeyPair::from_secret_bytes(SERVER_X25519);
    let mut framed = Framed::new(stream, MessageCodec::new(Arc::clone(&identity)));
    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut client_pk = skript.client_public_key;
    let mut session_key: Option<SessionKey> = None;

    while let Some(Ok(nachricht)) = framed.next().await {
        let nachricht = match (&session_key, nachricht.magic) {
            (Some(key), Magic::Encrypted) => envelope::unwrap(&nachricht, key).unwrap(),
            _ => nachricht,
        };
        let id = nachricht.id;
        let mut audio_an: Option<u16> = None;

        let antwort = match nachricht.magic {
            Magic::Pair => {
                let pk = handshake::open_pair_request(CODE, &nachricht).unwrap();
                client_pk = Some(pk);
                Outgoing::new(
                    Magic::PairResponse,
                    id,
                    handshake::pair_response(&identity, &pk).unwrap(),
                )
            }
            Magic::Authentication => {
                let pk = client_pk.unwrap();
                let ok = handshake::verify_auth_request(&nachricht, &pk).is_ok();
                Outgoing::new(
                    Magic::AuthenticationResponse,
                    id,
                    MessageBody::AuthResult {
                        success: ok,
                        message: if ok { String::new() } else { "unbekannt".into() },
                    },
                )
            }
            Magic::Ecdh => {
                let pk = client_pk.unwrap();
                let peer_x25519 = handshake::open_ecdh_request(&identity, &pk, &nachricht).unwrap();
                let body = handshake::ecdh_response(&ecdh, &pk).unwrap();
                framed
                    .send(Outgoing::new(Magic::EcdhResponse, id, body))
                    .await
                    .unwrap();
                session_key = Some(ecdh.session_key(&peer_x25519).unwrap());
                if nach_ecdh_trennen {
                    return;
                }
                continue;
            }
            Magic::Sync => {
                let MessageBody::Sync { t0 } = nachricht.body else {
                    panic!("SYNC ohne t0");
                };
                let jetzt = monotonic_ns();
                Outgoing::new(
                    Magic::SyncResponse,
                    id,
                    MessageBody::SyncResponse {
                        t0,
                        t1: jetzt,
                        t2: jetzt,
                    },
                )
            }
            Magic::Play => match &skript.play_fehler {
                Some(text) => Outgoing::new(Magic::Error, id, MessageBody::Error(text.clone())),
                None => {
                    let MessageBody::PlayRequest { udp_port, .. } = nachricht.body else {
                        panic!("PLAY ohne Port");
                    };
                    audio_an = Some(udp_port);
                    Outgoing::new(
                        Magic::PlayResponse,
                        id,
                        MessageBody::PlayResponse {
                            udp_port: udp.local_addr().unwrap().port(),
                            format: testformat(),
                            encryption: AudioEncryptionMethod::Xor256,
                        },
                    )
                }
            },
            Magic::Stop => Outgoing::new(Magic::StopResponse, id, MessageBody::Empty),
            andere => Outgoing::new(Magic::Error, id, MessageBody::Error(format!("{andere}?"))),
        };

        framed
            .send(antwort.versiegelt(session_key.clone()))
            .await
            .unwrap();

        if let (Some(port), Some(key)) = (audio_an, &session_key) {
            let cipher =
                AudioCipher::new(AudioEncryptionMethod::Xor256, key.udp_key().unwrap()).unwrap();
            for seq in 0u32..3 {
                let daten = AudioPacket::encode(
                    seq,
                    monotonic_ns() as u64,
                    &cipher.encrypt(seq, &pcm(seq)).unwrap(),
                );
                udp.send_to(&daten, ("127.0.0.1", port)).await.unwrap();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

fn settings() -> SessionSettings {
    SessionSettings {
        request_timeout: Duration::from_secs(2),
        clock_sync_samples: 2,
        tunables: StreamTunables::default(),
    }
}

async fn warten_bis(mut bedingung: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bedingung()
}

/// Sink-Factory, die alle Aufnahmen sammelt
fn sammelnde_sinks() -> (Arc<dyn SinkFactory>, Arc<Mutex<Vec<Arc<Mutex<Aufnahme>>>>>) {
    let aufnahmen: Arc<Mutex<Vec<Arc<Mutex<Aufnahme>>>>> = Arc::default();
    let sammler = Arc::clone(&aufnahmen);
    let factory: Arc<dyn SinkFactory> =
        Arc::new(move |_: &str| -> std::io::Result<Box<dyn PcmSink>> {
            let (sink, aufnahme) = RecordingSink::neu();
            sammler.lock().push(aufnahme);
            Ok(Box::new(sink))
        });
    (factory, aufnahmen)
}

fn writes(aufnahmen: &Arc<Mutex<Vec<Arc<Mutex<Aufnahme>>>>>) -> Vec<Vec<u8>> {
    aufnahmen
        .lock()
        .last()
        .map(|a| a.lock().writes.clone())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Szenarien
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pairing_ecdh_und_wiedergabe() {
    let server = gegenstelle(Skript::default()).await;
    let client = Arc::new(Identity::from_bytes(&CLIENT_SEED));

    let session = DeviceSession::connect(
        DeviceConfig::neu("Skript", server.adresse.clone()),
        Arc::clone(&client),
        settings(),
    )
    .await
    .unwrap();

    let peer = session.pair(CODE).await.unwrap();
    assert_eq!(peer, Identity::from_bytes(&SERVER_SEED).public_key_bytes());
    assert!(!session.config().public_key.is_empty());

    let key = session
        .ecdh_mit(EcdhKeyPair::from_secret_bytes(CLIENT_X25519))
        .await
        .unwrap();

    // SessionKey == SHA256(X25519(clientPriv, serverPub))
    let server_pub = x25519_dalek::PublicKey::from(&x25519_dalek::StaticSecret::from(SERVER_X25519));
    let shared = x25519_dalek::StaticSecret::from(CLIENT_X25519).diffie_hellman(&server_pub);
    assert_eq!(key.as_bytes(), &sha256(shared.as_bytes()));

    let (sink, aufnahme) = RecordingSink::neu();
    let format = session.play(0, Box::new(sink)).await.unwrap();
    assert_eq!(format, testformat());
    assert!(session.is_playing());

    assert!(warten_bis(|| aufnahme.lock().writes.len() >= 3).await);
    assert_eq!(aufnahme.lock().writes, vec![pcm(0), pcm(1), pcm(2)]);

    let stats = session.stats().unwrap();
    assert_eq!(stats.packets_received, 3);
    assert!(stats.sync_rtt_ms.is_some());

    // Nachsynchronisieren waehrend der Wiedergabe
    let offset = session.uhr_nachsynchronisieren().await.unwrap();
    assert!(offset.rtt_ns >= 0);
    assert_eq!(
        session.stats().unwrap().sync_rtt_ms,
        Some(offset.rtt_ns / 1_000_000)
    );

    session.stop().await.unwrap();
    assert!(!session.is_playing());
    assert!(aufnahme.lock().geschlossen);
    session.disconnect().await;
    assert!(!session.is_live());
}

#[tokio::test]
async fn play_fehler_der_gegenstelle() {
    let server = gegenstelle(Skript {
        play_fehler: Some("device busy".into()),
        ..Skript::default()
    })
    .await;
    let session = DeviceSession::connect(
        DeviceConfig::neu("Skript", server.adresse.clone()),
        Arc::new(Identity::from_bytes(&CLIENT_SEED)),
        settings(),
    )
    .await
    .unwrap();
    session.pair(CODE).await.unwrap();
    session.ecdh().await.unwrap();

    let err = session
        .play(0, Box::new(RecordingSink::neu().0))
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::ProtocolError(ref t) if t == "device busy"), "{err}");
    assert!(!session.is_playing());
    session.disconnect().await;
}

#[tokio::test]
async fn falscher_pairing_code_scheitert() {
    let server = gegenstelle(Skript::default()).await;
    let session = DeviceSession::connect(
        DeviceConfig::neu("Skript", server.adresse.clone()),
        Arc::new(Identity::generate()),
        SessionSettings {
            request_timeout: Duration::from_millis(300),
            ..settings()
        },
    )
    .await
    .unwrap();

    // Die Gegenstelle kann den PAIR-Body nicht oeffnen und beendet die Verbindung
    let err = session.pair("YW5kZXJlcg==").await.unwrap_err();
    assert!(
        matches!(err, StreamError::ConnectionLost(_) | StreamError::Timeout(_)),
        "{err}"
    );
    assert!(session.peer_public_key().is_none());
    assert!(session.config().public_key.is_empty());
}

#[tokio::test]
async fn manager_pairt_und_spielt() {
    let server = gegenstelle(Skript::default()).await;
    let registry = Arc::new(InMemoryRegistry::default());
    let (sinks, aufnahmen) = sammelnde_sinks();
    let manager = ConnectionManager::neu(
        Arc::new(Identity::from_bytes(&CLIENT_SEED)),
        registry.clone(),
        sinks,
        ManagerSettings {
            session: settings(),
            udp_port: 0,
            reconnect_delay: Duration::from_millis(50),
        },
    )
    .unwrap();

    let uri = format!("streamsound://{CODE}@{}", server.adresse);
    let config = manager.pair_device(&uri).await.unwrap();
    assert_eq!(config.address, server.adresse);
    assert_eq!(manager.connection_state(&server.adresse), ConnectionState::Connected);

    // Public Key wurde in der Registry gespeichert
    let gespeichert = registry.geraet(&server.adresse).unwrap();
    assert_eq!(
        gespeichert.peer_public_key().unwrap(),
        Some(Identity::from_bytes(&SERVER_SEED).public_key_bytes())
    );
    assert_eq!(registry.devices().unwrap().len(), 1);

    assert!(manager.toggle_playback(&server.adresse).await.unwrap());
    assert!(manager.is_playing(&server.adresse));
    assert!(warten_bis(|| writes(&aufnahmen).len() >= 3).await);
    assert_eq!(writes(&aufnahmen), vec![pcm(0), pcm(1), pcm(2)]);
    assert_eq!(manager.stats().len(), 1);

    assert!(!manager.toggle_playback(&server.adresse).await.unwrap());
    assert!(!manager.is_playing(&server.adresse));

    manager.disconnect_device(&server.adresse, true).await;
    assert_eq!(
        manager.connection_state(&server.adresse),
        ConnectionState::Disconnected
    );
    manager.cleanup().await;
}

#[tokio::test]
async fn erneutes_pairing_ersetzt_verbindung() {
    let server = gegenstelle(Skript::default()).await;
    let (sinks, _aufnahmen) = sammelnde_sinks();
    let manager = ConnectionManager::neu(
        Arc::new(Identity::from_bytes(&CLIENT_SEED)),
        Arc::new(InMemoryRegistry::default()),
        sinks,
        ManagerSettings {
            session: settings(),
            udp_port: 0,
            reconnect_delay: Duration::from_millis(50),
        },
    )
    .unwrap();

    let uri = format!("streamsound://{CODE}@{}", server.adresse);
    manager.pair_device(&uri).await.unwrap();
    let erste = manager.session(&server.adresse).unwrap();

    manager.pair_device(&uri).await.unwrap();
    let zweite = manager.session(&server.adresse).unwrap();

    assert_eq!(server.verbindungen.load(Ordering::SeqCst), 2);
    assert!(!erste.is_live());
    assert!(zweite.is_live());
    assert!(!zweite.gleiche_verbindung(&erste));
    assert_eq!(manager.connection_state(&server.adresse), ConnectionState::Connected);

    // Die Ueberwachung der alten Session darf die neue nicht austragen
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager
        .session(&server.adresse)
        .is_some_and(|s| s.gleiche_verbindung(&zweite)));
    manager.cleanup().await;
}

#[tokio::test]
async fn gepaartes_geraet_verbindet_mit_auto_play() {
    let client = Arc::new(Identity::from_bytes(&CLIENT_SEED));
    let server = gegenstelle(Skript {
        client_public_key: Some(client.public_key_bytes()),
        ..Skript::default()
    })
    .await;

    let mut device = DeviceConfig::neu("Skript", server.adresse.clone());
    device.set_peer_public_key(&Identity::from_bytes(&SERVER_SEED).public_key_bytes());
    let registry = Arc::new(InMemoryRegistry::neu(vec![device], StreamTunables::default()));
    let (sinks, aufnahmen) = sammelnde_sinks();
    let manager = ConnectionManager::neu(
        client,
        registry,
        sinks,
        ManagerSettings {
            session: settings(),
            udp_port: 0,
            reconnect_delay: Duration::from_millis(50),
        },
    )
    .unwrap();

    manager.connect_device(&server.adresse).await.unwrap();
    assert_eq!(manager.connection_state(&server.adresse), ConnectionState::Connected);
    assert!(manager.is_playing(&server.adresse));
    assert!(warten_bis(|| writes(&aufnahmen).len() >= 3).await);

    // Zweiter Aufruf ist ein No-op
    manager.connect_device(&server.adresse).await.unwrap();
    assert_eq!(server.verbindungen.load(Ordering::SeqCst), 1);

    manager.cleanup().await;
}

#[tokio::test]
async fn reconnect_nach_verbindungsverlust() {
    let client = Arc::new(Identity::from_bytes(&CLIENT_SEED));
    let server = gegenstelle(Skript {
        client_public_key: Some(client.public_key_bytes()),
        erste_verbindung_trennen: true,
        ..Skript::default()
    })
    .await;

    let mut device = DeviceConfig::neu("Skript", server.adresse.clone());
    device.set_peer_public_key(&Identity::from_bytes(&SERVER_SEED).public_key_bytes());
    let registry = Arc::new(InMemoryRegistry::neu(vec![device], StreamTunables::default()));
    let (sinks, _aufnahmen) = sammelnde_sinks();
    let manager = ConnectionManager::neu(
        client,
        registry,
        sinks,
        ManagerSettings {
            session: settings(),
            udp_port: 0,
            reconnect_delay: Duration::from_millis(50),
        },
    )
    .unwrap();

    manager.connect_device(&server.adresse).await.unwrap();

    let adresse = server.adresse.clone();
    let verbindungen = Arc::clone(&server.verbindungen);
    assert!(
        warten_bis(|| {
            verbindungen.load(Ordering::SeqCst) >= 2
                && manager.connection_state(&adresse) == ConnectionState::Connected
        })
        .await
    );

    manager.cleanup().await;
}
