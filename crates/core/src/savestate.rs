//! Runtime snapshots.
//!
//! A snapshot captures everything inside the chip: CPU registers, data
//! space, EEPROM, port state and every on-chip peripheral. Flash is not
//! stored; a snapshot is restored into a runtime already holding the same
//! program. Devices outside the chip are not part of it.
//!
//! ## Format
//!
//! ```text
//! +------------------+
//! | Magic "BBSS"     |  4 bytes
//! +------------------+
//! | Format version   |  u8 (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};

use crate::cpu::Cpu;
use crate::error::{Result, SimError};
use crate::gpio::Gpio;
use crate::peripherals::{Adc, EepromCtrl, Timer16, Timer8, Twi, Usart};
use crate::runtime::Runtime;

const MAGIC: &[u8; 4] = b"BBSS";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;

#[derive(Serialize, Deserialize)]
pub struct RuntimeState {
    pub cpu: Cpu,
    pub data: Vec<u8>,
    pub eeprom: Vec<u8>,
    pub gpio: Gpio,
    pub timer0: Timer8,
    pub timer1: Timer16,
    pub timer2: Timer8,
    pub usart: Usart,
    pub adc: Adc,
    pub twi: Twi,
    pub eeprom_ctrl: EepromCtrl,
}

impl RuntimeState {
    pub fn capture(rt: &Runtime) -> Self {
        RuntimeState {
            cpu: rt.cpu.clone(),
            data: rt.mem.data.clone(),
            eeprom: rt.mem.eeprom.clone(),
            gpio: rt.gpio.clone(),
            timer0: rt.timer0.clone(),
            timer1: rt.timer1.clone(),
            timer2: rt.timer2.clone(),
            usart: rt.usart.clone(),
            adc: rt.adc.clone(),
            twi: rt.twi.clone(),
            eeprom_ctrl: rt.eeprom.clone(),
        }
    }

    /// Write the state back into `rt`. Memory sizes must match the chip.
    pub fn restore(self, rt: &mut Runtime) -> Result<()> {
        if self.data.len() != rt.mem.data.len() || self.eeprom.len() != rt.mem.eeprom.len() {
            return Err(SimError::SaveState("memory size mismatch".into()));
        }
        rt.cpu = self.cpu;
        rt.mem.data = self.data;
        rt.mem.eeprom = self.eeprom;
        rt.gpio = self.gpio;
        rt.timer0 = self.timer0;
        rt.timer1 = self.timer1;
        rt.timer2 = self.timer2;
        rt.usart = self.usart;
        rt.adc = self.adc;
        rt.twi = self.twi;
        rt.eeprom = self.eeprom_ctrl;
        Ok(())
    }
}

/// Serialize and compress a runtime into a snapshot blob.
pub fn save(rt: &Runtime) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&RuntimeState::capture(rt))
        .map_err(|e| SimError::SaveState(format!("serialize: {}", e)))?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&compressed);
    log::debug!("snapshot: {} bytes ({} uncompressed)", out.len(), payload.len());
    Ok(out)
}

/// Verify and restore a snapshot blob into `rt`.
pub fn load(rt: &mut Runtime, blob: &[u8]) -> Result<()> {
    if blob.len() < HEADER_LEN {
        return Err(SimError::SaveState("snapshot too small".into()));
    }
    if &blob[..MAGIC.len()] != MAGIC {
        return Err(SimError::SaveState("bad magic".into()));
    }
    let version = blob[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(SimError::SaveState(format!(
            "unsupported version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    let payload = miniz_oxide::inflate::decompress_to_vec(&blob[HEADER_LEN..])
        .map_err(|e| SimError::SaveState(format!("decompress: {:?}", e)))?;
    let state: RuntimeState = bincode::deserialize(&payload)
        .map_err(|e| SimError::SaveState(format!("deserialize: {}", e)))?;
    state.restore(rt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{Pin, Port};
    use crate::runtime::NullBoard;

    fn blink() -> Runtime {
        // SBI DDRB,5 / SBI PORTB,5 / CBI PORTB,5 / RJMP back to 0
        let words = [0x9A25u16, 0x9A2D, 0x982D, 0xCFFC];
        let image: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        Runtime::with_program(&image)
    }

    #[test]
    fn test_restore_resumes_where_saved() {
        let mut rt = blink();
        rt.execute(2, &mut NullBoard).unwrap();
        rt.mem.eeprom[3] = 0x42;
        let blob = save(&rt).unwrap();
        assert_eq!(&blob[..4], b"BBSS");

        rt.execute(5, &mut NullBoard).unwrap();
        load(&mut rt, &blob).unwrap();
        assert_eq!(rt.cpu.pc, 2);
        assert_eq!(rt.cpu.tick, 4);
        assert_eq!(rt.mem.eeprom[3], 0x42);
        assert!(rt.pin_level(Pin::new(Port::B, 5)));
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut rt = blink();
        let mut blob = save(&rt).unwrap();
        assert!(matches!(load(&mut rt, b"BB"), Err(SimError::SaveState(_))));
        blob[4] = 9;
        assert!(matches!(load(&mut rt, &blob), Err(SimError::SaveState(_))));
        blob[0] = b'X';
        assert!(matches!(load(&mut rt, &blob), Err(SimError::SaveState(_))));
    }

    #[test]
    fn test_corrupt_payload() {
        let mut rt = blink();
        let mut blob = save(&rt).unwrap();
        blob.truncate(HEADER_LEN + 3);
        assert!(load(&mut rt, &blob).is_err());
    }
}
