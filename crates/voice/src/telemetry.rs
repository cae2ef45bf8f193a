//! Latenz- und Paket-Telemetrie einer Play-Session
//!
//! Empfangs- und Playback-Schleife schreiben lock-frei in Atomics, die
//! Abfrage erstellt einen `PlaybackStats`-Snapshot.
//!
//! ## Gemessene Latenzen
//! - Netzwerk: Empfang - Capture (nur mit gueltiger Uhren-Synchronisation)
//! - Puffer: geschaetzte Abspielzeit - Empfang
//! - Ende-zu-Ende: geschaetzte Abspielzeit - Capture
//! - Entschluesselung: Dauer des Decrypts pro Paket

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::clock::monotonic_ns;

const UNBEKANNT: i64 = -1;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Momentaufnahme einer laufenden Wiedergabe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub udp_port: u16,
    /// Startzeit des Empfaengers, unterscheidet aufeinanderfolgende Wiedergaben
    pub started_ns: i64,
    pub end_to_end_latency_ms: Option<i64>,
    pub network_latency_ms: Option<i64>,
    pub buffer_latency_ms: Option<i64>,
    pub decrypt_latency_us: Option<i64>,
    pub sync_rtt_ms: Option<i64>,
    pub queue_len: usize,
    pub expected_sequence: u32,
    pub packets_received: u64,
    pub packets_too_short: u64,
    pub packets_too_old: u64,
    pub gap_resyncs: u64,
    pub decrypt_failures: u64,
    pub dropped_overflow: u64,
    pub silence_skipped: u64,
    pub packets_played: u64,
    pub ms_since_last_packet: Option<i64>,
}

impl PlaybackStats {
    /// Gibt eine lesbare Zusammenfassung zurueck
    pub fn zusammenfassung(&self) -> String {
        fn ms(v: Option<i64>) -> String {
            v.map_or_else(|| "-".into(), |v| format!("{v}ms"))
        }
        format!(
            "Port {}: Queue={} Erwartet={} E2E={} Netz={} Puffer={} RTT={} Empfangen={} Verworfen={} LetztesPaket={}",
            self.udp_port,
            self.queue_len,
            self.expected_sequence,
            ms(self.end_to_end_latency_ms),
            ms(self.network_latency_ms),
            ms(self.buffer_latency_ms),
            ms(self.sync_rtt_ms),
            self.packets_received,
            self.packets_too_old + self.decrypt_failures + self.dropped_overflow + self.packets_too_short,
            ms(self.ms_since_last_packet),
        )
    }
}

// ---------------------------------------------------------------------------
// StreamTelemetry
// ---------------------------------------------------------------------------

/// Zaehler und Latenzen, geteilt zwischen Empfangs- und Playback-Schleife
#[derive(Debug)]
pub struct StreamTelemetry {
    started_ns: i64,
    received: AtomicU64,
    too_short: AtomicU64,
    too_old: AtomicU64,
    gap_resyncs: AtomicU64,
    decrypt_failures: AtomicU64,
    dropped_overflow: AtomicU64,
    silence_skipped: AtomicU64,
    played: AtomicU64,
    end_to_end_ns: AtomicI64,
    network_ns: AtomicI64,
    buffer_ns: AtomicI64,
    decrypt_ns: AtomicI64,
    sync_rtt_ns: AtomicI64,
    last_packet_ns: AtomicI64,
}

impl Default for StreamTelemetry {
    fn default() -> Self {
        Self {
            started_ns: monotonic_ns(),
            received: AtomicU64::new(0),
            too_short: AtomicU64::new(0),
            too_old: AtomicU64::new(0),
            gap_resyncs: AtomicU64::new(0),
            decrypt_failures: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            silence_skipped: AtomicU64::new(0),
            played: AtomicU64::new(0),
            end_to_end_ns: AtomicI64::new(UNBEKANNT),
            network_ns: AtomicI64::new(UNBEKANNT),
            buffer_ns: AtomicI64::new(UNBEKANNT),
            decrypt_ns: AtomicI64::new(UNBEKANNT),
            sync_rtt_ns: AtomicI64::new(UNBEKANNT),
            last_packet_ns: AtomicI64::new(UNBEKANNT),
        }
    }
}

impl StreamTelemetry {
    pub fn paket_empfangen(&self, jetzt_ns: i64) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.last_packet_ns.store(jetzt_ns, Ordering::Relaxed);
    }

    pub fn zu_kurz(&self) {
        self.too_short.fetch_add(1, Ordering::Relaxed);
    }

    pub fn zu_alt(&self) {
        self.too_old.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resync(&self) {
        self.gap_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entschluesselung_fehlgeschlagen(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ueberlauf(&self, verworfen: usize) {
        if verworfen > 0 {
            self.dropped_overflow
                .fetch_add(verworfen as u64, Ordering::Relaxed);
        }
    }

    pub fn stille_uebersprungen(&self) {
        self.silence_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abgespielt(&self) {
        self.played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrypt_dauer(&self, ns: i64) {
        self.decrypt_ns.store(ns, Ordering::Relaxed);
    }

    pub fn netzwerk_latenz(&self, ns: i64) {
        self.network_ns.store(ns, Ordering::Relaxed);
    }

    /// Latenzen der Playback-Schleife; negative Werte werden ignoriert
    pub fn abspiel_latenzen(&self, puffer_ns: i64, ende_zu_ende_ns: Option<i64>) {
        if puffer_ns >= 0 {
            self.buffer_ns.store(puffer_ns, Ordering::Relaxed);
        }
        if let Some(e2e) = ende_zu_ende_ns.filter(|v| *v >= 0) {
            self.end_to_end_ns.store(e2e, Ordering::Relaxed);
        }
    }

    pub fn sync_rtt(&self, ns: i64) {
        self.sync_rtt_ns.store(ns, Ordering::Relaxed);
    }

    /// Erstellt einen Snapshot
    pub fn snapshot(&self, udp_port: u16, queue_len: usize, expected_sequence: u32) -> PlaybackStats {
        let laden = |a: &AtomicI64| Some(a.load(Ordering::Relaxed)).filter(|v| *v >= 0);
        let ms = |a: &AtomicI64| laden(a).map(|v| v / 1_000_000);
        PlaybackStats {
            udp_port,
            started_ns: self.started_ns,
            end_to_end_latency_ms: ms(&self.end_to_end_ns),
            network_latency_ms: ms(&self.network_ns),
            buffer_latency_ms: ms(&self.buffer_ns),
            decrypt_latency_us: laden(&self.decrypt_ns).map(|v| v / 1_000),
            sync_rtt_ms: ms(&self.sync_rtt_ns),
            queue_len,
            expected_sequence,
            packets_received: self.received.load(Ordering::Relaxed),
            packets_too_short: self.too_short.load(Ordering::Relaxed),
            packets_too_old: self.too_old.load(Ordering::Relaxed),
            gap_resyncs: self.gap_resyncs.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            silence_skipped: self.silence_skipped.load(Ordering::Relaxed),
            packets_played: self.played.load(Ordering::Relaxed),
            ms_since_last_packet: laden(&self.last_packet_ns)
                .map(|t| (monotonic_ns() - t) / 1_000_000),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
