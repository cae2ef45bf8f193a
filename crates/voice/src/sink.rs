//! PCM-Sink-Schnittstelle
//!
//! Die Plattform-Audioausgabe ist ein externer Baustein. Der Empfaenger
//! braucht von ihr nur `write` und einen Zeitstempel `(framePosition,
//! nanoTime)` zur Latenzschaetzung. Alle Aufrufe erfolgen aus dem
//! blockierenden Playback-Thread.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use streamsound_core::AudioFormat;

use crate::clock::monotonic_ns;

/// Letzter bekannter Abspielpunkt des Sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkTimestamp {
    /// Index des Frames, der zu `nano_time` abgespielt wurde
    pub frame_position: i64,
    /// Zeitpunkt in der Zeitbasis von [`monotonic_ns`]
    pub nano_time: i64,
}

/// Externe PCM-Ausgabe
pub trait PcmSink: Send {
    /// Oeffnet die Ausgabe fuer das ausgehandelte Format
    fn open(&mut self, format: &AudioFormat, buffer_bytes: usize, preferred_frames: u32) -> io::Result<()>;

    /// Schreibt PCM, gibt die Anzahl geschriebener Bytes zurueck
    fn write(&mut self, pcm: &[u8]) -> io::Result<usize>;

    /// Aktueller Abspielpunkt, `None` solange die Ausgabe keinen liefert
    fn timestamp(&mut self) -> Option<SinkTimestamp>;

    fn close(&mut self) {}
}

impl<S: PcmSink + ?Sized> PcmSink for Box<S> {
    fn open(&mut self, format: &AudioFormat, buffer_bytes: usize, preferred_frames: u32) -> io::Result<()> {
        (**self).open(format, buffer_bytes, preferred_frames)
    }

    fn write(&mut self, pcm: &[u8]) -> io::Result<usize> {
        (**self).write(pcm)
    }

    fn timestamp(&mut self) -> Option<SinkTimestamp> {
        (**self).timestamp()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Erzeugt pro Play-Session einen Sink fuer ein Geraet
pub trait SinkFactory: Send + Sync {
    fn create(&self, address: &str) -> io::Result<Box<dyn PcmSink>>;
}

impl<F> SinkFactory for F
where
    F: Fn(&str) -> io::Result<Box<dyn PcmSink>> + Send + Sync,
{
    fn create(&self, address: &str) -> io::Result<Box<dyn PcmSink>> {
        self(address)
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Sink, der jeden Schreibaufruf aufzeichnet (Tests, Diagnose)
///
/// Simuliert eine Ausgabe ohne Puffer: der zuletzt geschriebene Block
/// beginnt sofort zu spielen.
#[derive(Debug, Default)]
pub struct RecordingSink {
    aufnahme: Arc<Mutex<Aufnahme>>,
    frames: i64,
    spielt_ab: i64,
    bytes_pro_frame: usize,
}

/// Gemeinsame Sicht auf die Aufzeichnung
#[derive(Debug, Default)]
pub struct Aufnahme {
    pub format: Option<AudioFormat>,
    pub writes: Vec<Vec<u8>>,
    pub geschlossen: bool,
}

impl RecordingSink {
    pub fn neu() -> (Self, Arc<Mutex<Aufnahme>>) {
        let sink = Self::default();
        let aufnahme = Arc::clone(&sink.aufnahme);
        (sink, aufnahme)
    }
}

impl PcmSink for RecordingSink {
    fn open(&mut self, format: &AudioFormat, _buffer_bytes: usize, _preferred_frames: u32) -> io::Result<()> {
        self.bytes_pro_frame = format.bytes_per_frame().max(1);
        self.aufnahme.lock().format = Some(*format);
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> io::Result<usize> {
        self.aufnahme.lock().writes.push(pcm.to_vec());
        self.spielt_ab = self.frames;
        self.frames += (pcm.len() / self.bytes_pro_frame.max(1)) as i64;
        Ok(pcm.len())
    }

    fn timestamp(&mut self) -> Option<SinkTimestamp> {
        Some(SinkTimestamp {
            frame_position: self.spielt_ab,
            nano_time: monotonic_ns(),
        })
    }

    fn close(&mut self) {
        self.aufnahme.lock().geschlossen = true;
    }
}
