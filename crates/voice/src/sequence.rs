//! Sequenz-Pruefung des Audiostroms
//!
//! Haelt die erwartete naechste Sequenznummer. Pakete weit hinter dem
//! Fenster werden verworfen, Spruenge weit nach vorne setzen das Fenster
//! neu. Nach vielen aufeinanderfolgenden "zu alten" Paketen wird ebenfalls
//! neu synchronisiert (Neustart des Senders).

/// Anzahl aufeinanderfolgender zu alter Pakete bis zur Resynchronisation
pub const TOO_OLD_RESYNC_AFTER: u32 = 50;

/// Entscheidung fuer ein einzelnes Paket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Im Fenster, wird abgespielt
    Accept,
    /// Grosser Sprung nach vorne, Fenster neu gesetzt, wird abgespielt
    Gap { expected: u32 },
    /// Zu alt, wird verworfen
    TooOld,
    /// Nach zu vielen alten Paketen neu synchronisiert, wird abgespielt
    Resync { expected: u32 },
}

impl GateDecision {
    pub fn angenommen(self) -> bool {
        !matches!(self, GateDecision::TooOld)
    }
}

/// Zustand der Sequenz-Pruefung
#[derive(Debug, Clone)]
pub struct SequenceGate {
    expected: i64,
    threshold: i64,
    zu_alt_in_folge: u32,
}

impl SequenceGate {
    pub fn neu(threshold: u32) -> Self {
        Self {
            expected: 0,
            threshold: i64::from(threshold),
            zu_alt_in_folge: 0,
        }
    }

    /// Erwartete naechste Sequenznummer
    pub fn expected(&self) -> u32 {
        self.expected as u32
    }

    /// Prueft ein Paket und aktualisiert den Zustand
    pub fn check(&mut self, sequence: u32) -> GateDecision {
        let seq = i64::from(sequence);
        let mut decision = GateDecision::Accept;

        if seq < self.expected - self.threshold {
            self.zu_alt_in_folge += 1;
            if self.zu_alt_in_folge < TOO_OLD_RESYNC_AFTER {
                return GateDecision::TooOld;
            }
            self.expected = seq;
            decision = GateDecision::Resync { expected: sequence };
        }
        self.zu_alt_in_folge = 0;

        if seq > self.expected + self.threshold {
            self.expected = seq + 1;
            return GateDecision::Gap {
                expected: self.expected as u32,
            };
        }
        self.expected = self.expected.max(seq + 1);
        decision
    }
}
