//! EEPROM controller.
//!
//! Registers EECR (0x3F), EEDR (0x40), EEARL/EEARH (0x41/0x42). The data
//! itself lives in [`crate::memory::Memory::eeprom`] and is passed in on each
//! access. A programming cycle stores the byte at once but holds EEPE for
//! the 3.4 ms the part needs, so `eeprom_busy_wait()` spins realistically.

use serde::{Deserialize, Serialize};

use super::INT_EE_READY;
use crate::us_to_cycles;

const EECR: u16 = 0x3F;
const EEDR: u16 = 0x40;
const EEARL: u16 = 0x41;
const EEARH: u16 = 0x42;

const EERE: u8 = 0x01;
const EEPE: u8 = 0x02;
const EEMPE: u8 = 0x04;
const EERIE: u8 = 0x08;

/// Window after setting EEMPE in which EEPE is accepted
const EEMPE_WINDOW: u64 = 4;
const WRITE_CYCLES: u64 = us_to_cycles(3400);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EepromCtrl {
    eecr: u8,
    eedr: u8,
    eear: u16,
    /// Last cycle at which EEPE is accepted, while EEMPE is armed
    mpe_until: Option<u64>,
    busy_until: u64,
    /// Set when the firmware has programmed a byte since the last save
    pub dirty: bool,
}

impl EepromCtrl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        let dirty = self.dirty;
        *self = Self::default();
        self.dirty = dirty;
    }

    pub fn write(&mut self, addr: u16, value: u8, tick: u64, eeprom: &mut [u8]) -> bool {
        match addr {
            EECR => self.write_control(value, tick, eeprom),
            EEDR => self.eedr = value,
            EEARL => self.eear = (self.eear & 0x0300) | value as u16,
            EEARH => self.eear = (self.eear & 0x00FF) | (((value & 0x03) as u16) << 8),
            _ => return false,
        }
        true
    }

    fn write_control(&mut self, value: u8, tick: u64, eeprom: &mut [u8]) {
        self.update(tick);
        let busy = tick < self.busy_until;
        self.eecr = (self.eecr & EEPE) | (value & (EERIE | 0x30));
        if value & EEMPE != 0 && value & EEPE == 0 {
            self.mpe_until = Some(tick + EEMPE_WINDOW);
            self.eecr |= EEMPE;
        }
        let armed = self.mpe_until.is_some_and(|until| tick <= until);
        if value & EEPE != 0 && armed && !busy {
            if let Some(cell) = eeprom.get_mut(self.eear as usize) {
                // EEPM bits: 00 erase+write, 01 erase only, 10 write only
                *cell = match (value >> 4) & 3 {
                    1 => 0xFF,
                    2 => *cell & self.eedr,
                    _ => self.eedr,
                };
                self.dirty = true;
            }
            self.busy_until = tick + WRITE_CYCLES;
            self.eecr |= EEPE;
            self.mpe_until = None;
        }
        if value & EERE != 0 && !busy {
            self.eedr = eeprom.get(self.eear as usize).copied().unwrap_or(0xFF);
        }
    }

    pub fn read(&mut self, addr: u16, tick: u64) -> Option<u8> {
        self.update(tick);
        match addr {
            EECR => Some(self.eecr),
            EEDR => Some(self.eedr),
            EEARL => Some(self.eear as u8),
            EEARH => Some((self.eear >> 8) as u8),
            _ => None,
        }
    }

    pub fn update(&mut self, tick: u64) {
        if tick >= self.busy_until {
            self.eecr &= !EEPE;
        }
        if self.mpe_until.map_or(true, |until| tick > until) {
            self.eecr &= !EEMPE;
        }
    }

    pub fn check_interrupt(&mut self) -> Option<u16> {
        // Level-triggered while the controller is ready
        (self.eecr & (EERIE | EEPE) == EERIE).then_some(INT_EE_READY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(ctrl: &mut EepromCtrl, rom: &mut [u8], addr: u16, value: u8, tick: u64) {
        ctrl.write(EEARL, addr as u8, tick, rom);
        ctrl.write(EEARH, (addr >> 8) as u8, tick, rom);
        ctrl.write(EEDR, value, tick, rom);
        ctrl.write(EECR, EEMPE, tick, rom);
        ctrl.write(EECR, EEPE, tick + 1, rom);
    }

    #[test]
    fn test_write_then_read_back() {
        let mut rom = vec![0xFF; crate::EEPROM_SIZE];
        let mut c = EepromCtrl::new();
        program(&mut c, &mut rom, 0x123, 0x5A, 0);
        assert_eq!(rom[0x123], 0x5A);
        assert!(c.dirty);
        assert_eq!(c.read(EECR, 100).map(|v| v & EEPE), Some(EEPE));
        assert_eq!(c.read(EECR, WRITE_CYCLES + 1).map(|v| v & EEPE), Some(0));

        c.write(EEDR, 0, WRITE_CYCLES + 2, &mut rom);
        c.write(EECR, EERE, WRITE_CYCLES + 2, &mut rom);
        assert_eq!(c.read(EEDR, WRITE_CYCLES + 3), Some(0x5A));
    }

    #[test]
    fn test_eepe_without_master_enable_is_ignored() {
        let mut rom = vec![0xFF; crate::EEPROM_SIZE];
        let mut c = EepromCtrl::new();
        c.write(EEDR, 0x11, 0, &mut rom);
        c.write(EECR, EEPE, 0, &mut rom);
        assert_eq!(rom[0], 0xFF);

        c.write(EECR, EEMPE, 10, &mut rom);
        c.write(EECR, EEPE, 20, &mut rom);
        assert_eq!(rom[0], 0xFF);
        assert!(!c.dirty);
    }

    #[test]
    fn test_master_enable_is_single_use() {
        let mut rom = vec![0xFF; crate::EEPROM_SIZE];
        let mut c = EepromCtrl::new();
        program(&mut c, &mut rom, 0, 0x22, 0);
        assert_eq!(rom[0], 0x22);

        // A second EEPE after the write completes needs a fresh EEMPE
        let later = WRITE_CYCLES + 10;
        c.write(EEDR, 0x33, later, &mut rom);
        c.write(EECR, EEPE, later, &mut rom);
        assert_eq!(rom[0], 0x22);
    }

    #[test]
    fn test_ready_interrupt_waits_for_write() {
        let mut rom = vec![0xFF; crate::EEPROM_SIZE];
        let mut c = EepromCtrl::new();
        program(&mut c, &mut rom, 0, 1, 0);
        c.write(EECR, EERIE, 2, &mut rom);
        assert_eq!(c.check_interrupt(), None);
        c.update(WRITE_CYCLES + 1);
        assert_eq!(c.check_interrupt(), Some(INT_EE_READY));
    }
}
