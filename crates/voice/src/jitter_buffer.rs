//! Jitter-Queue zwischen Empfangs- und Playback-Schleife
//!
//! Begrenzte FIFO: bei Ueberlauf wird das aelteste Paket verworfen
//! (begrenzte Latenz vor Vollstaendigkeit). Die Empfangs-Schleife blockiert
//! nie auf den Playback; der Playback wartet mit Timeout auf neue Pakete.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Entschluesseltes Paket in der Queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    pub sequence: u32,
    pub pcm: Vec<u8>,
    /// Capture-Zeit in Client-Uhr, `None` ohne gueltige Uhren-Synchronisation
    pub capture_time_client_ns: Option<i64>,
    pub receive_time_ns: i64,
}

/// Begrenzte, thread-sichere FIFO
#[derive(Debug)]
pub struct JitterQueue {
    pakete: Mutex<VecDeque<QueuedPacket>>,
    signal: Condvar,
    kapazitaet: usize,
}

impl JitterQueue {
    pub fn neu(kapazitaet: usize) -> Self {
        let kapazitaet = kapazitaet.max(1);
        Self {
            pakete: Mutex::new(VecDeque::with_capacity(kapazitaet)),
            signal: Condvar::new(),
            kapazitaet,
        }
    }

    /// Fuegt ein Paket an; gibt die Anzahl verworfener alter Pakete zurueck
    pub fn push(&self, paket: QueuedPacket) -> usize {
        let mut pakete = self.pakete.lock();
        pakete.push_back(paket);
        let mut verworfen = 0;
        while pakete.len() > self.kapazitaet {
            pakete.pop_front();
            verworfen += 1;
        }
        drop(pakete);
        self.signal.notify_one();
        verworfen
    }

    /// Naechstes Paket, wartet hoechstens `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueuedPacket> {
        let mut pakete = self.pakete.lock();
        if pakete.is_empty() {
            self.signal.wait_for(&mut pakete, timeout);
        }
        pakete.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pakete.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pakete.lock().is_empty()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    pub fn leeren(&self) {
        self.pakete.lock().clear();
    }
}
