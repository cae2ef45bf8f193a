//! Uhren-Synchronisation und monotone Zeitbasis
//!
//! Der Client sendet `t0`, der Server stempelt Empfang (`t1`) und Versand
//! (`t2`), der Client notiert den Empfang der Antwort (`t3`).
//!
//! ```text
//! offset = -((t1 - t0) + (t2 - t3)) / 2     (Server -> Client)
//! rtt    = (t3 - t0) - (t2 - t1)
//! ```
//!
//! Von mehreren Messungen gewinnt die mit der kleinsten RTT.

use std::sync::OnceLock;
use std::time::Instant;

/// Monotone Prozessuhr in Nanosekunden
///
/// Alle Zeitstempel des Clients (SYNC, Empfang, Sink) nutzen diese Basis.
pub fn monotonic_ns() -> i64 {
    static BASIS: OnceLock<Instant> = OnceLock::new();
    let basis = BASIS.get_or_init(Instant::now);
    i64::try_from(basis.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Eine SYNC-Messung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub t0: i64,
    pub t1: i64,
    pub t2: i64,
    pub t3: i64,
}

impl ClockSample {
    /// `None`, wenn das Ergebnis nicht in i64 passt
    pub fn offset_ns(&self) -> Option<i64> {
        let (t0, t1, t2, t3) = self.breit();
        i64::try_from(-((t1 - t0) + (t2 - t3)) / 2).ok()
    }

    pub fn rtt_ns(&self) -> Option<i64> {
        let (t0, t1, t2, t3) = self.breit();
        i64::try_from((t3 - t0) - (t2 - t1)).ok()
    }

    pub fn offset(&self) -> Option<ClockOffset> {
        Some(ClockOffset {
            offset_ns: self.offset_ns()?,
            rtt_ns: self.rtt_ns()?,
        })
    }

    // Zeitstempel vom Server sind beliebig, gerechnet wird in i128
    fn breit(&self) -> (i128, i128, i128, i128) {
        (
            i128::from(self.t0),
            i128::from(self.t1),
            i128::from(self.t2),
            i128::from(self.t3),
        )
    }
}

/// Geschaetzte Differenz Server-Uhr -> Client-Uhr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockOffset {
    pub offset_ns: i64,
    pub rtt_ns: i64,
}

impl ClockOffset {
    /// Rechnet eine Server-Zeit in die Client-Uhr um
    pub fn to_client_ns(&self, server_ns: u64) -> i64 {
        (server_ns as i64).wrapping_add(self.offset_ns)
    }
}

/// Waehlt die Messung mit der kleinsten nicht-negativen RTT
///
/// Messungen, deren Offset oder RTT nicht in i64 passt, fallen heraus.
pub fn best_of(samples: &[ClockSample]) -> Option<ClockOffset> {
    samples
        .iter()
        .filter_map(ClockSample::offset)
        .filter(|o| o.rtt_ns >= 0)
        .min_by_key(|o| o.rtt_ns)
}
