//! Protokoll-Verben und Magic-Erkennung
//!
//! Jedes Verb beginnt mit seinem ASCII-Namen als Magic. Die Kandidaten
//! sind nach dem ersten Byte gruppiert und absteigend nach Laenge
//! sortiert, damit `PLAY_RESPONSE` vor `PLAY` gewinnt.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Kuerzestes Magic (`ECDH`, `PAIR`, `PLAY`, `STOP`, `SYNC`)
pub const MIN_MAGIC_LEN: usize = 4;
/// Laengstes Magic (`AUTHENTICATION_RESPONSE`)
pub const MAX_MAGIC_LEN: usize = 23;

/// Alle Verben des Control-Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Magic {
    Ecdh,
    EcdhResponse,
    Pair,
    PairResponse,
    Authentication,
    AuthenticationResponse,
    Play,
    PlayResponse,
    Stop,
    StopResponse,
    Encrypted,
    Error,
    Sync,
    SyncResponse,
}

impl Magic {
    pub const ALL: [Magic; 14] = [
        Magic::Ecdh,
        Magic::EcdhResponse,
        Magic::Pair,
        Magic::PairResponse,
        Magic::Authentication,
        Magic::AuthenticationResponse,
        Magic::Play,
        Magic::PlayResponse,
        Magic::Stop,
        Magic::StopResponse,
        Magic::Encrypted,
        Magic::Error,
        Magic::Sync,
        Magic::SyncResponse,
    ];

    /// Verbname, gleichzeitig die Magic-Bytes auf der Leitung
    pub fn name(self) -> &'static str {
        match self {
            Magic::Ecdh => "ECDH",
            Magic::EcdhResponse => "ECDH_RESPONSE",
            Magic::Pair => "PAIR",
            Magic::PairResponse => "PAIR_RESPONSE",
            Magic::Authentication => "AUTHENTICATION",
            Magic::AuthenticationResponse => "AUTHENTICATION_RESPONSE",
            Magic::Play => "PLAY",
            Magic::PlayResponse => "PLAY_RESPONSE",
            Magic::Stop => "STOP",
            Magic::StopResponse => "STOP_RESPONSE",
            Magic::Encrypted => "ENCRYPTED",
            Magic::Error => "ERROR",
            Magic::Sync => "SYNC",
            Magic::SyncResponse => "SYNC_RESPONSE",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.name().as_bytes()
    }

    pub fn laenge(self) -> usize {
        self.name().len()
    }

    /// Passende Antwort auf eine Anfrage (`None` fuer Antworten selbst)
    pub fn response(self) -> Option<Magic> {
        match self {
            Magic::Ecdh => Some(Magic::EcdhResponse),
            Magic::Pair => Some(Magic::PairResponse),
            Magic::Authentication => Some(Magic::AuthenticationResponse),
            Magic::Play => Some(Magic::PlayResponse),
            Magic::Stop => Some(Magic::StopResponse),
            Magic::Sync => Some(Magic::SyncResponse),
            _ => None,
        }
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Ergebnis eines Scans ueber den Empfangspuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Vollstaendiges Magic ab `offset`
    Found { offset: usize, magic: Magic },
    /// Ab `offset` steht der Anfang eines Magics, es fehlen Bytes
    Partial { offset: usize },
    /// Kein Byte im Puffer kann ein Magic beginnen
    NotFound,
}

/// Magic-Kandidaten gruppiert nach erstem Byte, laengste zuerst
#[derive(Debug)]
pub struct MagicMatcher {
    gruppen: HashMap<u8, Vec<Magic>>,
}

impl MagicMatcher {
    fn neu() -> Self {
        let mut gruppen: HashMap<u8, Vec<Magic>> = HashMap::new();
        for magic in Magic::ALL {
            gruppen.entry(magic.as_bytes()[0]).or_default().push(magic);
        }
        for kandidaten in gruppen.values_mut() {
            kandidaten.sort_by_key(|m| std::cmp::Reverse(m.laenge()));
        }
        Self { gruppen }
    }

    /// Prozessweite Instanz
    pub fn global() -> &'static MagicMatcher {
        static MATCHER: OnceLock<MagicMatcher> = OnceLock::new();
        MATCHER.get_or_init(MagicMatcher::neu)
    }

    /// Gleitendes Fenster ab `start`
    ///
    /// Passt ein laengerer Kandidat bis zum Pufferende als Praefix, wird
    /// `Partial` gemeldet statt auf einen kuerzeren Treffer auszuweichen.
    pub fn scan(&self, buf: &[u8], start: usize) -> Scan {
        for offset in start..buf.len() {
            let Some(kandidaten) = self.gruppen.get(&buf[offset]) else {
                continue;
            };
            let rest = &buf[offset..];
            for &magic in kandidaten {
                let bytes = magic.as_bytes();
                if rest.len() >= bytes.len() {
                    if &rest[..bytes.len()] == bytes {
                        return Scan::Found { offset, magic };
                    }
                } else if bytes.starts_with(rest) {
                    return Scan::Partial { offset };
                }
            }
        }
        Scan::NotFound
    }
}
