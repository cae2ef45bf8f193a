//! Handshake- und Pairing-Zustandsautomat
//!
//! Drei unabhaengige Anfrage/Antwort-Protokolle:
//!
//! - `PAIR`: tauscht die Ed25519-Langzeitschluessel aus, geschuetzt durch
//!   den out-of-band Pairing-Code.
//! - `AUTHENTICATION`: Schnellweg fuer bereits gepaarte Geraete.
//! - `ECDH`: ephemerer X25519-Austausch, Ergebnis ist der Session-Schluessel.
//!
//! Schluessel fuer versiegelte Handshake-Bodies: Nachrichten an eine
//! Gegenstelle werden mit `SHA256(Ed25519 Public Key des Empfaengers)`
//! versiegelt, `PAIR` mit `SHA256(base64decode(pairCode))`.
//!
//! Beide Haelften sind hier implementiert: der Client nutzt die
//! Initiator-Funktionen, Tests und Skript-Gegenstellen die Responder-Seite.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use streamsound_core::{Result, StreamError};
use streamsound_crypto::{aead, digest, EcdhKeyPair, Identity, SessionKey};

use crate::body::MessageBody;
use crate::error::from_crypto;
use crate::frame::Message;
use crate::magic::Magic;

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

/// Schluessel fuer Nachrichten an den Inhaber von `public_key`
pub fn sealing_key(public_key: &[u8; 32]) -> [u8; 32] {
    digest::sha256(public_key)
}

/// Schluessel fuer `PAIR`: `SHA256(base64decode(pairCode))`
pub fn pairing_key(pair_code: &str) -> Result<[u8; 32]> {
    let code = BASE64
        .decode(pair_code.trim())
        .map_err(|e| StreamError::handshake(format!("Pairing-Code ist kein Base64: {e}")))?;
    if code.is_empty() {
        return Err(StreamError::handshake("Pairing-Code ist leer"));
    }
    Ok(digest::sha256(&code))
}

fn erwarte(message: &Message, magic: Magic) -> Result<()> {
    if message.magic == magic {
        Ok(())
    } else if let MessageBody::Error(text) = &message.body {
        Err(StreamError::ProtocolError(text.clone()))
    } else {
        Err(StreamError::UnexpectedResponse {
            erwartet: magic.name().into(),
            erhalten: message.magic.name().into(),
        })
    }
}

fn sealed_body(message: &Message) -> Result<&[u8]> {
    match &message.body {
        MessageBody::Sealed(bytes) => Ok(bytes),
        andere => Err(StreamError::handshake(format!(
            "{}: Body ist {} statt Sealed",
            message.magic,
            andere.art()
        ))),
    }
}

/// Oeffnet einen versiegelten 32-Byte-Schluessel
fn open_key(key: &[u8; 32], message: &Message) -> Result<[u8; 32]> {
    let klartext = aead::open(key, sealed_body(message)?).map_err(|e| match from_crypto(e) {
        StreamError::DecryptFailure(msg) => {
            StreamError::handshake(format!("{}: {msg}", message.magic))
        }
        andere => andere,
    })?;
    klartext.as_slice().try_into().map_err(|_| {
        StreamError::handshake(format!(
            "{}: Schluessel hat {} statt 32 Bytes",
            message.magic,
            klartext.len()
        ))
    })
}

fn seal_key(key: &[u8; 32], public_key: &[u8; 32]) -> Result<MessageBody> {
    let sealed = aead::seal(key, public_key).map_err(from_crypto)?;
    Ok(MessageBody::Sealed(sealed))
}

fn signatur_pruefen(message: &Message, public_key: &[u8; 32]) -> Result<()> {
    message
        .verify(public_key)
        .map_err(|e| StreamError::handshake(e.to_string()))
}

// ---------------------------------------------------------------------------
// Initiator (Client)
// ---------------------------------------------------------------------------

/// Body fuer `PAIR`: eigener Ed25519 Public Key, versiegelt mit dem Pairing-Code
pub fn pair_request(identity: &Identity, pair_code: &str) -> Result<MessageBody> {
    seal_key(&pairing_key(pair_code)?, &identity.public_key_bytes())
}

/// Oeffnet `PAIR_RESPONSE` und prueft die Signatur mit dem enthaltenen Schluessel
///
/// Der Peer ist hier noch unbekannt, ein `ERROR` laesst sich nicht pruefen.
pub fn open_pair_response(identity: &Identity, message: &Message) -> Result<[u8; 32]> {
    erwarte(message, Magic::PairResponse)?;
    let peer = open_key(&sealing_key(&identity.public_key_bytes()), message)?;
    signatur_pruefen(message, &peer)?;
    Ok(peer)
}

/// Body fuer `AUTHENTICATION` samt zufaelliger Challenge
pub fn auth_request(identity: &Identity) -> MessageBody {
    let mut challenge = [0u8; 32];
    OsRng.fill_bytes(&mut challenge);
    MessageBody::AuthChallenge {
        device_id: identity.device_id(),
        challenge,
    }
}

/// Prueft `AUTHENTICATION_RESPONSE`
pub fn check_auth_response(message: &Message, peer_public_key: &[u8; 32]) -> Result<()> {
    signatur_pruefen(message, peer_public_key)?;
    erwarte(message, Magic::AuthenticationResponse)?;
    match &message.body {
        MessageBody::AuthResult { success: true, .. } => Ok(()),
        MessageBody::AuthResult {
            success: false,
            message,
        } => Err(StreamError::handshake(format!(
            "Authentifizierung abgelehnt: {message}"
        ))),
        andere => Err(StreamError::handshake(format!(
            "AUTHENTICATION_RESPONSE mit Body {}",
            andere.art()
        ))),
    }
}

/// Body fuer `ECDH`: eigener X25519 Public Key fuer den Peer versiegelt
pub fn ecdh_request(ecdh: &EcdhKeyPair, peer_public_key: &[u8; 32]) -> Result<MessageBody> {
    seal_key(&sealing_key(peer_public_key), &ecdh.public_key_bytes())
}

/// Oeffnet `ECDH_RESPONSE` und leitet den Session-Schluessel ab
pub fn open_ecdh_response(
    identity: &Identity,
    ecdh: &EcdhKeyPair,
    peer_public_key: &[u8; 32],
    message: &Message,
) -> Result<SessionKey> {
    signatur_pruefen(message, peer_public_key)?;
    erwarte(message, Magic::EcdhResponse)?;
    let peer_x25519 = open_key(&sealing_key(&identity.public_key_bytes()), message)?;
    ecdh.session_key(&peer_x25519).map_err(from_crypto)
}

// ---------------------------------------------------------------------------
// Responder (Geraet / Skript-Gegenstelle)
// ---------------------------------------------------------------------------

/// Oeffnet `PAIR` mit dem Pairing-Code und prueft die Signatur
pub fn open_pair_request(pair_code: &str, message: &Message) -> Result<[u8; 32]> {
    erwarte(message, Magic::Pair)?;
    let client = open_key(&pairing_key(pair_code)?, message)?;
    signatur_pruefen(message, &client)?;
    Ok(client)
}

/// Body fuer `PAIR_RESPONSE`: eigener Public Key fuer den Client versiegelt
pub fn pair_response(identity: &Identity, client_public_key: &[u8; 32]) -> Result<MessageBody> {
    seal_key(&sealing_key(client_public_key), &identity.public_key_bytes())
}

/// Prueft `AUTHENTICATION` gegen den gespeicherten Public Key des Clients
pub fn verify_auth_request(message: &Message, client_public_key: &[u8; 32]) -> Result<()> {
    erwarte(message, Magic::Authentication)?;
    signatur_pruefen(message, client_public_key)?;
    match &message.body {
        MessageBody::AuthChallenge { device_id, .. }
            if *device_id == digest::sha256(client_public_key) =>
        {
            Ok(())
        }
        MessageBody::AuthChallenge { .. } => {
            Err(StreamError::handshake("Geraete-Id passt nicht zum Public Key"))
        }
        andere => Err(StreamError::handshake(format!(
            "AUTHENTICATION mit Body {}",
            andere.art()
        ))),
    }
}

/// Oeffnet `ECDH` (versiegelt fuer den eigenen Public Key)
pub fn open_ecdh_request(
    identity: &Identity,
    client_public_key: &[u8; 32],
    message: &Message,
) -> Result<[u8; 32]> {
    erwarte(message, Magic::Ecdh)?;
    signatur_pruefen(message, client_public_key)?;
    open_key(&sealing_key(&identity.public_key_bytes()), message)
}

/// Body fuer `ECDH_RESPONSE`
pub fn ecdh_response(ecdh: &EcdhKeyPair, client_public_key: &[u8; 32]) -> Result<MessageBody> {
    seal_key(&sealing_key(client_public_key), &ecdh.public_key_bytes())
}

// ---------------------------------------------------------------------------
// HandshakeState
// ---------------------------------------------------------------------------

/// Ergebnis der Handshakes einer Verbindung
///
/// Felder werden nur bei Erfolg gesetzt; ein Fehler laesst den vorherigen
/// Zustand unveraendert.
#[derive(Debug, Default)]
pub struct HandshakeState {
    peer_public_key: Option<[u8; 32]>,
    session_key: Option<SessionKey>,
}

impl HandshakeState {
    /// Zustand fuer ein bereits gepaartes Geraet
    pub fn mit_peer(peer_public_key: Option<[u8; 32]>) -> Self {
        Self {
            peer_public_key,
            session_key: None,
        }
    }

    pub fn peer_public_key(&self) -> Option<[u8; 32]> {
        self.peer_public_key
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Verarbeitet `PAIR_RESPONSE`
    pub fn apply_pair_response(&mut self, identity: &Identity, message: &Message) -> Result<[u8; 32]> {
        let peer = open_pair_response(identity, message)?;
        self.peer_public_key = Some(peer);
        Ok(peer)
    }

    /// Verarbeitet `AUTHENTICATION_RESPONSE`
    pub fn apply_auth_response(&self, message: &Message) -> Result<()> {
        let peer = self.peer_oder_fehler()?;
        check_auth_response(message, &peer)
    }

    /// Verarbeitet `ECDH_RESPONSE` und setzt den Session-Schluessel
    pub fn apply_ecdh_response(
        &mut self,
        identity: &Identity,
        ecdh: &EcdhKeyPair,
        message: &Message,
    ) -> Result<&SessionKey> {
        let peer = self.peer_oder_fehler()?;
        let key = open_ecdh_response(identity, ecdh, &peer, message)?;
        Ok(self.session_key.insert(key))
    }

    /// Verwirft den Session-Schluessel (Verbindungsende)
    pub fn session_beenden(&mut self) {
        self.session_key = None;
    }

    fn peer_oder_fehler(&self) -> Result<[u8; 32]> {
        self.peer_public_key
            .ok_or_else(|| StreamError::NotPaired("Public Key der Gegenstelle unbekannt".into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode_exact, encode};

    const CODE: &str = "c2VjcmV0LWNvZGU=";

    fn als_nachricht(identity: &Identity, magic: Magic, body: &MessageBody) -> Message {
        decode_exact(&encode(identity, magic, 0, 1, body).unwrap()).unwrap()
    }

    #[test]
    fn pairing_tauscht_public_keys() {
        let client = Identity::generate();
        let server = Identity::generate();

        let pair = als_nachricht(&client, Magic::Pair, &pair_request(&client, CODE).unwrap());
        let client_pub = open_pair_request(CODE, &pair).unwrap();
        assert_eq!(client_pub, client.public_key_bytes());

        let antwort = als_nachricht(
            &server,
            Magic::PairResponse,
            &pair_response(&server, &client_pub).unwrap(),
        );
        let mut state = HandshakeState::default();
        let peer = state.apply_pair_response(&client, &antwort).unwrap();
        assert_eq!(peer, server.public_key_bytes());
        assert_eq!(state.peer_public_key(), Some(peer));
    }

    #[test]
    fn falscher_pairing_code_scheitert() {
        let client = Identity::generate();
        let pair = als_nachricht(&client, Magic::Pair, &pair_request(&client, CODE).unwrap());
        assert!(matches!(
            open_pair_request("YW5kZXJz", &pair),
            Err(StreamError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn fehlgeschlagenes_pairing_setzt_keinen_zustand() {
        let client = Identity::generate();
        let server = Identity::generate();
        let fremd = Identity::generate();
        // Antwort fuer einen anderen Client versiegelt
        let antwort = als_nachricht(
            &server,
            Magic::PairResponse,
            &pair_response(&server, &fremd.public_key_bytes()).unwrap(),
        );
        let mut state = HandshakeState::default();
        assert!(state.apply_pair_response(&client, &antwort).is_err());
        assert_eq!(state.peer_public_key(), None);
    }

    #[test]
    fn ecdh_ergibt_gleichen_session_key() {
        let client = Identity::generate();
        let server = Identity::generate();
        let client_ecdh = EcdhKeyPair::generate();
        let server_ecdh = EcdhKeyPair::generate();

        let anfrage = als_nachricht(
            &client,
            Magic::Ecdh,
            &ecdh_request(&client_ecdh, &server.public_key_bytes()).unwrap(),
        );
        let client_x = open_ecdh_request(&server, &client.public_key_bytes(), &anfrage).unwrap();
        assert_eq!(client_x, client_ecdh.public_key_bytes());
        let server_key = server_ecdh.session_key(&client_x).unwrap();

        let antwort = als_nachricht(
            &server,
            Magic::EcdhResponse,
            &ecdh_response(&server_ecdh, &client.public_key_bytes()).unwrap(),
        );
        let mut state = HandshakeState::mit_peer(Some(server.public_key_bytes()));
        let client_key = state
            .apply_ecdh_response(&client, &client_ecdh, &antwort)
            .unwrap()
            .clone();
        assert_eq!(client_key, server_key);
        assert_eq!(state.session_key(), Some(&server_key));
    }

    #[test]
    fn ecdh_mit_falscher_signatur_scheitert() {
        let client = Identity::generate();
        let server = Identity::generate();
        let angreifer = Identity::generate();
        let client_ecdh = EcdhKeyPair::generate();
        let antwort = als_nachricht(
            &angreifer,
            Magic::EcdhResponse,
            &ecdh_response(&EcdhKeyPair::generate(), &client.public_key_bytes()).unwrap(),
        );
        let mut state = HandshakeState::mit_peer(Some(server.public_key_bytes()));
        assert!(matches!(
            state.apply_ecdh_response(&client, &client_ecdh, &antwort),
            Err(StreamError::HandshakeFailed(_))
        ));
        assert!(state.session_key().is_none());
    }

    #[test]
    fn error_antwort_nur_mit_gueltiger_signatur() {
        let client = Identity::generate();
        let server = Identity::generate();
        let fremd = Identity::generate();
        let fehler = MessageBody::Error("device busy".into());

        let gefaelscht = als_nachricht(&fremd, Magic::Error, &fehler);
        assert!(matches!(
            check_auth_response(&gefaelscht, &server.public_key_bytes()),
            Err(StreamError::HandshakeFailed(_))
        ));
        let mut state = HandshakeState::mit_peer(Some(server.public_key_bytes()));
        assert!(matches!(
            state.apply_ecdh_response(&client, &EcdhKeyPair::generate(), &gefaelscht),
            Err(StreamError::HandshakeFailed(_))
        ));

        let echt = als_nachricht(&server, Magic::Error, &fehler);
        assert!(matches!(
            check_auth_response(&echt, &server.public_key_bytes()),
            Err(StreamError::ProtocolError(ref t)) if t == "device busy"
        ));
        assert!(matches!(
            state.apply_ecdh_response(&client, &EcdhKeyPair::generate(), &echt),
            Err(StreamError::ProtocolError(_))
        ));
    }

    #[test]
    fn ecdh_ohne_peer_ist_nicht_gepaart() {
        let client = Identity::generate();
        let antwort = als_nachricht(&client, Magic::EcdhResponse, &MessageBody::Sealed(vec![0; 64]));
        let mut state = HandshakeState::default();
        assert!(matches!(
            state.apply_ecdh_response(&client, &EcdhKeyPair::generate(), &antwort),
            Err(StreamError::NotPaired(_))
        ));
    }

    #[test]
    fn authentifizierung() {
        let client = Identity::generate();
        let server = Identity::generate();
        let anfrage = als_nachricht(&client, Magic::Authentication, &auth_request(&client));
        verify_auth_request(&anfrage, &client.public_key_bytes()).unwrap();
        assert!(verify_auth_request(&anfrage, &server.public_key_bytes()).is_err());

        let ok = als_nachricht(
            &server,
            Magic::AuthenticationResponse,
            &MessageBody::AuthResult {
                success: true,
                message: String::new(),
            },
        );
        let state = HandshakeState::mit_peer(Some(server.public_key_bytes()));
        state.apply_auth_response(&ok).unwrap();

        let abgelehnt = als_nachricht(
            &server,
            Magic::AuthenticationResponse,
            &MessageBody::AuthResult {
                success: false,
                message: "unbekannt".into(),
            },
        );
        let err = state.apply_auth_response(&abgelehnt).unwrap_err();
        assert!(err.to_string().contains("unbekannt"));
    }

    #[test]
    fn error_frame_wird_protokollfehler() {
        let server = Identity::generate();
        let fehler = als_nachricht(&server, Magic::Error, &MessageBody::Error("belegt".into()));
        assert!(matches!(
            open_pair_response(&Identity::generate(), &fehler),
            Err(StreamError::ProtocolError(m)) if m == "belegt"
        ));
    }

    #[test]
    fn pairing_code_muss_base64_sein() {
        assert!(pairing_key("***").is_err());
        assert!(pairing_key("").is_err());
        assert!(pairing_key(CODE).is_ok());
    }
}
