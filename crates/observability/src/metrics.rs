//! Prometheus-kompatible Metriken fuer Streamsound
//!
//! Registrierte Metriken (Label `geraet` = Adresse des Geraets):
//! - `streamsound_connected_devices` – Gauge: Verbundene Geraete
//! - `streamsound_packets_received_total` – Counter: Empfangene Audio-Pakete
//! - `streamsound_packets_played_total` – Counter: Abgespielte Audio-Pakete
//! - `streamsound_packets_dropped_total` – Counter: Verworfene Pakete (Label `grund`)
//! - `streamsound_decrypt_failures_total` – Counter: Fehlgeschlagene Entschluesselungen
//! - `streamsound_latency_ms` – Gauge: Latenzen (Label `art`: end_to_end, network, buffer, sync_rtt)
//! - `streamsound_queue_depth` – Gauge: Pakete in der Jitter-Queue
//!
//! Die Werte werden periodisch aus `PlaybackStats`-Snapshots nachgezogen.
//! Counter wachsen um die Differenz zum letzten Snapshot desselben
//! Empfaengers; ein neuer Empfaenger zaehlt ab 0.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use prometheus::{
    Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use streamsound_voice::PlaybackStats;

/// Alle Streamsound-Prometheus-Metriken
#[derive(Clone)]
pub struct StreamMetrics {
    pub registry: Arc<Registry>,

    pub connected_devices: IntGauge,
    pub packets_received_total: IntCounterVec,
    pub packets_played_total: IntCounterVec,
    pub packets_dropped_total: IntCounterVec,
    pub decrypt_failures_total: IntCounterVec,
    pub latency_ms: IntGaugeVec,
    pub queue_depth: IntGaugeVec,

    staende: Arc<Mutex<HashMap<String, Stand>>>,
}

/// Zuletzt uebernommene Zaehlerstaende eines Geraets
#[derive(Default)]
struct Stand {
    started_ns: i64,
    werte: HashMap<(&'static str, &'static str), u64>,
}

impl Stand {
    /// Zuwachs seit dem letzten Snapshot
    ///
    /// Ein kleinerer Wert bedeutet einen neu gestarteten Zaehler.
    fn zuwachs(&mut self, metrik: &'static str, grund: &'static str, snapshot: u64) -> u64 {
        let vorher = self.werte.insert((metrik, grund), snapshot).unwrap_or(0);
        if snapshot >= vorher {
            snapshot - vorher
        } else {
            snapshot
        }
    }
}

impl StreamMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_devices = IntGauge::with_opts(Opts::new(
            "streamsound_connected_devices",
            "Anzahl aktuell verbundener Geraete",
        ))?;
        registry.register(Box::new(connected_devices.clone()))?;

        let packets_received_total = IntCounterVec::new(
            Opts::new(
                "streamsound_packets_received_total",
                "Gesamtanzahl empfangener Audio-Pakete",
            ),
            &["geraet"],
        )?;
        registry.register(Box::new(packets_received_total.clone()))?;

        let packets_played_total = IntCounterVec::new(
            Opts::new(
                "streamsound_packets_played_total",
                "Gesamtanzahl abgespielter Audio-Pakete",
            ),
            &["geraet"],
        )?;
        registry.register(Box::new(packets_played_total.clone()))?;

        let packets_dropped_total = IntCounterVec::new(
            Opts::new(
                "streamsound_packets_dropped_total",
                "Gesamtanzahl verworfener Audio-Pakete",
            ),
            &["geraet", "grund"],
        )?;
        registry.register(Box::new(packets_dropped_total.clone()))?;

        let decrypt_failures_total = IntCounterVec::new(
            Opts::new(
                "streamsound_decrypt_failures_total",
                "Gesamtanzahl fehlgeschlagener Entschluesselungen",
            ),
            &["geraet"],
        )?;
        registry.register(Box::new(decrypt_failures_total.clone()))?;

        let latency_ms = IntGaugeVec::new(
            Opts::new("streamsound_latency_ms", "Zuletzt gemessene Latenz in Millisekunden"),
            &["geraet", "art"],
        )?;
        registry.register(Box::new(latency_ms.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("streamsound_queue_depth", "Pakete in der Jitter-Queue"),
            &["geraet"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_devices,
            packets_received_total,
            packets_played_total,
            packets_dropped_total,
            decrypt_failures_total,
            latency_ms,
            queue_depth,
            staende: Arc::default(),
        })
    }

    /// Uebernimmt einen Telemetrie-Snapshot eines Geraets
    pub fn aktualisieren(&self, geraet: &str, stats: &PlaybackStats) {
        let mut staende = self.staende.lock();
        let stand = staende.entry(geraet.to_string()).or_default();
        if stand.started_ns != stats.started_ns {
            stand.started_ns = stats.started_ns;
            stand.werte.clear();
        }

        for (metrik, counter, wert) in [
            ("received", &self.packets_received_total, stats.packets_received),
            ("played", &self.packets_played_total, stats.packets_played),
            ("decrypt", &self.decrypt_failures_total, stats.decrypt_failures),
        ] {
            counter
                .with_label_values(&[geraet])
                .inc_by(stand.zuwachs(metrik, "", wert));
        }
        for (grund, wert) in [
            ("too_short", stats.packets_too_short),
            ("too_old", stats.packets_too_old),
            ("decrypt", stats.decrypt_failures),
            ("overflow", stats.dropped_overflow),
            ("silence", stats.silence_skipped),
        ] {
            self.packets_dropped_total
                .with_label_values(&[geraet, grund])
                .inc_by(stand.zuwachs("dropped", grund, wert));
        }
        drop(staende);

        for (art, wert) in [
            ("end_to_end", stats.end_to_end_latency_ms),
            ("network", stats.network_latency_ms),
            ("buffer", stats.buffer_latency_ms),
            ("sync_rtt", stats.sync_rtt_ms),
        ] {
            if let Some(ms) = wert {
                self.latency_ms.with_label_values(&[geraet, art]).set(ms);
            }
        }

        self.queue_depth
            .with_label_values(&[geraet])
            .set(i64::try_from(stats.queue_len).unwrap_or(i64::MAX));
    }

    /// Entfernt die Latenz- und Queue-Gauges eines nicht mehr spielenden Geraets
    pub fn geraet_entfernen(&self, geraet: &str) {
        self.staende.lock().remove(geraet);
        for art in ["end_to_end", "network", "buffer", "sync_rtt"] {
            let _ = self.latency_ms.remove_label_values(&[geraet, art]);
        }
        let _ = self.queue_depth.remove_label_values(&[geraet]);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
