//! Streamsound Client – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging, pairt optional ein
//! neues Geraet (`STREAMSOUND_PAIR_URI`) und spielt bis Ctrl-C.

use std::path::PathBuf;

use anyhow::Result;
use streamsound_client::{config::AppConfig, Client};
use streamsound_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = PathBuf::from(
        std::env::var("STREAMSOUND_CONFIG").unwrap_or_else(|_| "streamsound.toml".into()),
    );

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = AppConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad.display(),
        geraete = config.devices.len(),
        "Streamsound Client wird initialisiert"
    );

    let client = Client::neu(config_pfad, config)?;

    if let Ok(uri) = std::env::var("STREAMSOUND_PAIR_URI") {
        if let Err(e) = client.pairen(uri.trim()).await {
            tracing::error!(fehler = %e, "Pairing fehlgeschlagen");
        }
    }

    client.starten().await
}
