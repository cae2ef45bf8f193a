//! Pairing-URI
//!
//! Der QR-Code des Geraets enthaelt eine URI in einer der beiden Formen
//!
//! ```text
//! scheme://pairCode@host:port
//! scheme://host:port?pairCodeBase64
//! ```
//!
//! Ohne Port wird [`DEFAULT_PAIRING_PORT`] angenommen.

use std::fmt;

use crate::error::{Result, StreamError};
use crate::types::DeviceConfig;

/// Standard-Schema der Pairing-URI
pub const PAIRING_SCHEME: &str = "streamsound";

/// Port, wenn die Pairing-URI keinen enthaelt
pub const DEFAULT_PAIRING_PORT: u16 = 8888;

/// Zerlegte Pairing-URI
#[derive(Clone, PartialEq, Eq)]
pub struct PairingUri {
    /// Schema (z.B. `streamsound`)
    pub scheme: String,
    /// Host ohne Port
    pub host: String,
    /// Control-Port
    pub port: u16,
    /// Base64-kodierter Pairing-Code (out-of-band Geheimnis)
    pub pair_code: String,
}

impl PairingUri {
    /// Parst eine Pairing-URI in beiden unterstuetzten Formen
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let fehler = |grund: &str| StreamError::InvalidPairingUri(format!("{grund}: {uri}"));

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| fehler("Schema fehlt"))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
            return Err(fehler("ungueltiges Schema"));
        }

        // Form 1: code@host:port, Form 2: host:port?code
        let (pair_code, authority) = match (rest.split_once('@'), rest.split_once('?')) {
            (Some((code, authority)), None) => (code, authority),
            (None, Some((authority, code))) => (code, authority),
            (Some(_), Some(_)) => return Err(fehler("Pairing-Code doppelt angegeben")),
            (None, None) => return Err(fehler("Pairing-Code fehlt")),
        };
        let authority = authority.trim_end_matches('/');

        if pair_code.is_empty() {
            return Err(fehler("Pairing-Code leer"));
        }
        if !pair_code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        {
            return Err(fehler("Pairing-Code ist kein Base64"));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| fehler("ungueltiger Port"))?;
                (host, port)
            }
            None => (authority, DEFAULT_PAIRING_PORT),
        };
        if host.is_empty() || host.contains(['/', '@', '?', ':']) {
            return Err(fehler("ungueltiger Host"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            pair_code: pair_code.to_string(),
        })
    }

    /// `host:port` des Control-Kanals
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Neue, noch ungepaarte Geraete-Konfiguration (Name = Host)
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::neu(self.host.clone(), self.address())
    }
}

// Der Pairing-Code ist ein Geheimnis und landet nicht in Logs
impl fmt::Debug for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingUri")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("pair_code", &"[VERBORGEN]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_mit_at() {
        let uri = PairingUri::parse("streamsound://c2VjcmV0@192.168.0.5:7000").unwrap();
        assert_eq!(uri.host, "192.168.0.5");
        assert_eq!(uri.port, 7000);
        assert_eq!(uri.pair_code, "c2VjcmV0");
        assert_eq!(uri.address(), "192.168.0.5:7000");
    }

    #[test]
    fn form_mit_query() {
        let uri = PairingUri::parse("streamsound://desktop.local:8888?YWJjZA==").unwrap();
        assert_eq!(uri.host, "desktop.local");
        assert_eq!(uri.port, 8888);
        assert_eq!(uri.pair_code, "YWJjZA==");
    }

    #[test]
    fn standard_port_ohne_angabe() {
        let uri = PairingUri::parse("streamsound://pc?YWJj").unwrap();
        assert_eq!(uri.port, DEFAULT_PAIRING_PORT);
    }

    #[test]
    fn device_config_aus_uri() {
        let cfg = PairingUri::parse("streamsound://YWJj@pc:9000")
            .unwrap()
            .device_config();
        assert_eq!(cfg.name, "pc");
        assert_eq!(cfg.address, "pc:9000");
        assert!(cfg.public_key.is_empty());
        assert!(cfg.auto_play);
    }

    #[test]
    fn ungueltige_uris() {
        for uri in [
            "",
            "pc:9000?YWJj",
            "streamsound://pc:9000",
            "streamsound://pc:abc?YWJj",
            "streamsound://?YWJj",
            "streamsound://YWJj@pc:1?YWJj",
            "streamsound://pc:1?ab%cd",
        ] {
            assert!(
                matches!(PairingUri::parse(uri), Err(StreamError::InvalidPairingUri(_))),
                "sollte abgelehnt werden: {uri}"
            );
        }
    }

    #[test]
    fn debug_verbirgt_pairing_code() {
        let uri = PairingUri::parse("streamsound://geheim@pc:1").unwrap();
        assert!(!format!("{uri:?}").contains("geheim"));
    }
}
