//! CRC16-CCITT (Polynom 0x1021, Startwert 0xFFFF), tabellengesteuert

const POLYNOM: u16 = 0x1021;
const STARTWERT: u16 = 0xFFFF;

static TABELLE: [u16; 256] = tabelle_erzeugen();

const fn tabelle_erzeugen() -> [u16; 256] {
    let mut tabelle = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLYNOM
            } else {
                crc << 1
            };
            bit += 1;
        }
        tabelle[i] = crc;
        i += 1;
    }
    tabelle
}

/// Berechnet die CRC ueber `data`
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(STARTWERT, |crc, &byte| {
        (crc << 8) ^ TABELLE[(((crc >> 8) as u8) ^ byte) as usize]
    })
}
