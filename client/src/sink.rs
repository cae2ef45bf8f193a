//! Roh-PCM-Ausgabe fuer den Kommandozeilen-Client
//!
//! Schreibt die empfangenen Samples in eine Datei pro Geraet oder nach
//! stdout und simuliert dabei die Uhr eines Audiogeraets: ein Puffer fester
//! Groesse wird in Echtzeit mit der Abtastrate geleert. Ist der Puffer voll,
//! nimmt `write` nichts an und die Wiedergabe-Schleife wartet.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use streamsound_core::AudioFormat;
use streamsound_voice::{monotonic_ns, PcmSink, SinkFactory, SinkTimestamp};

/// Ziel `-` schreibt nach stdout
pub const STDOUT_ZIEL: &str = "-";

/// Erzeugt pro Geraet eine `.pcm`-Datei im Zielverzeichnis
pub struct PcmDateien {
    ziel: String,
}

impl PcmDateien {
    pub fn neu(ziel: impl Into<String>) -> Self {
        Self { ziel: ziel.into() }
    }

    /// Dateipfad fuer ein Geraet (`10.0.0.2:12345` -> `10.0.0.2_12345.pcm`)
    pub fn pfad(&self, address: &str) -> PathBuf {
        let name: String = address
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        PathBuf::from(&self.ziel).join(format!("{name}.pcm"))
    }
}

impl SinkFactory for PcmDateien {
    fn create(&self, address: &str) -> io::Result<Box<dyn PcmSink>> {
        let writer: Box<dyn Write + Send> = if self.ziel == STDOUT_ZIEL {
            Box::new(io::stdout())
        } else {
            let pfad = self.pfad(address);
            tracing::info!(adresse = %address, pfad = %pfad.display(), "PCM-Ausgabe in Datei");
            Box::new(File::create(pfad)?)
        };
        Ok(Box::new(RawPcmSink::neu(writer)))
    }
}

// ---------------------------------------------------------------------------
// RawPcmSink
// ---------------------------------------------------------------------------

pub struct RawPcmSink {
    writer: BufWriter<Box<dyn Write + Send>>,
    bytes_pro_frame: usize,
    sample_rate: i64,
    kapazitaet_frames: i64,
    geschrieben_frames: i64,
    /// Zeitpunkt, zu dem Frame 0 gespielt wurde (`None` vor dem ersten Write)
    start_ns: Option<i64>,
}

impl RawPcmSink {
    pub fn neu(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
            bytes_pro_frame: 1,
            sample_rate: 48_000,
            kapazitaet_frames: 1,
            geschrieben_frames: 0,
            start_ns: None,
        }
    }

    /// Dauer von `frames` bei der aktuellen Abtastrate
    fn frames_in_ns(&self, frames: i64) -> i64 {
        let ns = i128::from(frames) * 1_000_000_000 / i128::from(self.sample_rate);
        i64::try_from(ns).unwrap_or(i64::MAX)
    }

    /// Bis `jetzt` abgespielte Frames
    fn gespielt(&self, jetzt: i64) -> i64 {
        match self.start_ns {
            Some(start) => ((jetzt - start).max(0) as i128 * self.sample_rate as i128
                / 1_000_000_000) as i64,
            None => 0,
        }
        .min(self.geschrieben_frames)
    }
}

impl PcmSink for RawPcmSink {
    fn open(&mut self, format: &AudioFormat, buffer_bytes: usize, preferred_frames: u32) -> io::Result<()> {
        self.bytes_pro_frame = format.bytes_per_frame().max(1);
        self.sample_rate = i64::from(format.sample_rate.max(1));
        self.kapazitaet_frames = if preferred_frames > 0 {
            i64::from(preferred_frames)
        } else {
            (buffer_bytes / self.bytes_pro_frame).max(1) as i64
        };
        tracing::debug!(
            sample_rate = format.sample_rate,
            kanaele = format.channels,
            bits = format.bits,
            puffer_frames = self.kapazitaet_frames,
            "PCM-Ausgabe geoeffnet"
        );
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> io::Result<usize> {
        let jetzt = monotonic_ns();
        let gespielt = self.gespielt(jetzt);

        // Unterlauf: die Uhr laeuft ab dem naechsten Frame weiter
        if self.start_ns.is_none() || gespielt >= self.geschrieben_frames {
            self.start_ns = Some(jetzt.saturating_sub(self.frames_in_ns(self.geschrieben_frames)));
        }

        let frei = self.kapazitaet_frames - (self.geschrieben_frames - gespielt);
        let frames = ((pcm.len() / self.bytes_pro_frame) as i64).min(frei.max(0));
        if frames == 0 {
            return Ok(0);
        }
        let bytes = frames as usize * self.bytes_pro_frame;
        self.writer.write_all(&pcm[..bytes])?;
        self.geschrieben_frames += frames;
        Ok(bytes)
    }

    fn timestamp(&mut self) -> Option<SinkTimestamp> {
        self.start_ns?;
        let jetzt = monotonic_ns();
        Some(SinkTimestamp {
            frame_position: self.gespielt(jetzt),
            nano_time: jetzt,
        })
    }

    fn close(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(fehler = %e, "PCM-Ausgabe konnte nicht geleert werden");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Writer, dessen Inhalt der Test nachtraeglich lesen kann
    #[derive(Clone, Default)]
    struct Geteilt(Arc<Mutex<Vec<u8>>>);

    impl Write for Geteilt {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn format() -> AudioFormat {
        AudioFormat {
            sample_rate: 48_000,
            bits: 16,
            channels: 2,
            format_tag: 1,
        }
    }

    #[test]
    fn voller_puffer_nimmt_nichts_an() {
        let ziel = Geteilt::default();
        let mut sink = RawPcmSink::neu(Box::new(ziel.clone()));
        // 4800 Frames = 100 ms Puffer
        sink.open(&format(), 0, 4800).unwrap();

        let block = vec![1u8; 4800 * 4];
        assert_eq!(sink.write(&block).unwrap(), block.len());
        // Nur was seitdem abgespielt wurde, passt wieder hinein
        let zweites = sink.write(&block).unwrap();
        assert!(zweites < block.len() / 2);

        sink.close();
        assert_eq!(ziel.0.lock().len(), block.len() + zweites);
    }

    #[test]
    fn teilweises_schreiben_bei_wenig_platz() {
        let mut sink = RawPcmSink::neu(Box::new(io::sink()));
        sink.open(&format(), 400, 0).unwrap(); // 100 Frames
        assert_eq!(sink.write(&[0u8; 600]).unwrap(), 400);
    }

    #[test]
    fn zeitstempel_erst_nach_erstem_write() {
        let mut sink = RawPcmSink::neu(Box::new(io::sink()));
        sink.open(&format(), 8192, 0).unwrap();
        assert!(sink.timestamp().is_none());

        sink.write(&[0u8; 4096]).unwrap();
        let ts = sink.timestamp().unwrap();
        assert!(ts.frame_position >= 0 && ts.frame_position <= 1024);
    }

    #[test]
    fn lange_wiedergabe_ohne_ueberlauf() {
        let mut sink = RawPcmSink::neu(Box::new(io::sink()));
        sink.open(&format(), 0, 4800).unwrap();
        sink.write(&[0u8; 400]).unwrap();

        // Etwa 60 Stunden bei 48 kHz, alles bereits abgespielt
        sink.geschrieben_frames = 48_000 * 3600 * 60;
        sink.start_ns = Some(i64::MIN / 2);
        assert_eq!(sink.write(&[0u8; 400]).unwrap(), 400);
        let ts = sink.timestamp().unwrap();
        assert!(ts.frame_position <= sink.geschrieben_frames);
    }

    #[test]
    fn dateiname_pro_geraet() {
        let dateien = PcmDateien::neu("/tmp/pcm");
        assert_eq!(
            dateien.pfad("10.0.0.2:12345"),
            PathBuf::from("/tmp/pcm/10.0.0.2_12345.pcm")
        );
    }
}
