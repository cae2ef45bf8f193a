//! Structured Logging Setup via tracing-subscriber
//!
//! Level und Format kommen aus der Konfigurationsdatei und koennen per
//! Umgebungsvariable ueberschrieben werden:
//! - `SS_LOG_LEVEL`: EnvFilter-Ausdruck (z.B. `debug` oder
//!   `info,streamsound_voice=trace`)
//! - `SS_LOG_FORMAT`: `text` oder `json`

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

pub const LEVEL_ENV: &str = "SS_LOG_LEVEL";
pub const FORMAT_ENV: &str = "SS_LOG_FORMAT";

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parst `text` / `json`; alles andere faellt auf `Text` zurueck
    pub fn parse(wert: &str) -> Self {
        match wert {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Initialisiert das Logging-System.
///
/// `level` und `format` sind die Werte aus der Konfiguration; gesetzte
/// Umgebungsvariablen haben Vorrang. Ein ungueltiger Filter faellt auf
/// `info` zurueck. Schlaegt fehl, wenn bereits ein globaler Subscriber
/// installiert ist.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<()> {
    let level = aufloesen(std::env::var(LEVEL_ENV).ok(), level);
    let format = LogFormat::parse(&aufloesen(std::env::var(FORMAT_ENV).ok(), format));

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    ergebnis.map_err(|e| anyhow!("Logging-Initialisierung fehlgeschlagen: {e}"))?;

    tracing::debug!(level = %level, format = ?format, "Logging initialisiert");
    Ok(())
}

/// Umgebungswert vor Konfigurationswert; leere Werte zaehlen nicht
fn aufloesen(env: Option<String>, config: &str) -> String {
    match env {
        Some(wert) if !wert.trim().is_empty() => wert.trim().to_string(),
        _ if config.trim().is_empty() => "info".to_string(),
        _ => config.trim().to_string(),
    }
}

/// Validiert ob ein einfacher Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
