//! External interrupts INT0 (PD2), INT1 (PD3) and pin-change groups PCINT0–2.
//!
//! Level changes are reported by [`crate::gpio::Gpio`] as they happen, so
//! edges produced by attached devices between two instructions still latch
//! their flags.

use serde::{Deserialize, Serialize};

use super::{INT_INT0, INT_INT1, INT_PCINT0, INT_PCINT1, INT_PCINT2};
use crate::gpio::Port;

const PCIFR: u16 = 0x3B;
const EIFR: u16 = 0x3C;
const EIMSK: u16 = 0x3D;
const PCICR: u16 = 0x68;
const EICRA: u16 = 0x69;
const PCMSK0: u16 = 0x6B;
const PCMSK2: u16 = 0x6D;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtInterrupts {
    eicra: u8,
    eimsk: u8,
    eifr: u8,
    pcicr: u8,
    pcifr: u8,
    pcmsk: [u8; 3],
    /// Current level of PD2/PD3, for low-level sensing
    int_high: [bool; 2],
}

impl ExtInterrupts {
    pub fn write(&mut self, addr: u16, value: u8) -> bool {
        match addr {
            EIFR => self.eifr &= !value,
            EIMSK => self.eimsk = value & 0x03,
            EICRA => self.eicra = value & 0x0F,
            PCIFR => self.pcifr &= !value,
            PCICR => self.pcicr = value & 0x07,
            PCMSK0..=PCMSK2 => self.pcmsk[(addr - PCMSK0) as usize] = value,
            _ => return false,
        }
        true
    }

    pub fn read(&self, addr: u16) -> Option<u8> {
        match addr {
            EIFR => Some(self.eifr),
            EIMSK => Some(self.eimsk),
            EICRA => Some(self.eicra),
            PCIFR => Some(self.pcifr),
            PCICR => Some(self.pcicr),
            PCMSK0..=PCMSK2 => Some(self.pcmsk[(addr - PCMSK0) as usize]),
            _ => None,
        }
    }

    /// Latch flags for pins whose level just changed.
    pub fn pin_changed(&mut self, port: Port, changed: u8, level: u8) {
        // PCMSK0 covers port B, PCMSK1 port C, PCMSK2 port D
        let group = port.index();
        if changed & self.pcmsk[group] != 0 {
            self.pcifr |= 1 << group;
        }
        if port != Port::D {
            return;
        }
        for n in 0..2 {
            let mask = 1u8 << (2 + n);
            let high = level & mask != 0;
            self.int_high[n] = high;
            if changed & mask == 0 {
                continue;
            }
            let fire = match (self.eicra >> (2 * n)) & 3 {
                1 => true,
                2 => !high,
                3 => high,
                _ => false,
            };
            if fire {
                self.eifr |= 1 << n;
            }
        }
    }

    pub fn check_interrupt(&mut self) -> Option<u16> {
        const INT_VECTORS: [u16; 2] = [INT_INT0, INT_INT1];
        const PC_VECTORS: [u16; 3] = [INT_PCINT0, INT_PCINT1, INT_PCINT2];

        for n in 0..2 {
            if self.eimsk & (1 << n) == 0 {
                continue;
            }
            let low_level = (self.eicra >> (2 * n)) & 3 == 0;
            if low_level && !self.int_high[n] {
                return Some(INT_VECTORS[n]);
            }
            if self.eifr & (1 << n) != 0 {
                self.eifr &= !(1 << n);
                return Some(INT_VECTORS[n]);
            }
        }
        for g in 0..3 {
            let bit = 1 << g;
            if self.pcicr & bit != 0 && self.pcifr & bit != 0 {
                self.pcifr &= !bit;
                return Some(PC_VECTORS[g]);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int0_falling_edge() {
        let mut ei = ExtInterrupts::default();
        ei.write(EICRA, 0b10);
        ei.write(EIMSK, 1);
        ei.pin_changed(Port::D, 0x04, 0x04);
        assert_eq!(ei.check_interrupt(), None);
        ei.pin_changed(Port::D, 0x04, 0x00);
        assert_eq!(ei.check_interrupt(), Some(INT_INT0));
        assert_eq!(ei.check_interrupt(), None);
    }

    #[test]
    fn test_pin_change_group_masking() {
        let mut ei = ExtInterrupts::default();
        ei.write(PCICR, 0b001);
        ei.write(PCMSK0, 0x01);
        ei.pin_changed(Port::B, 0x02, 0x02);
        assert_eq!(ei.check_interrupt(), None);
        ei.pin_changed(Port::B, 0x01, 0x01);
        assert_eq!(ei.read(PCIFR), Some(1));
        assert_eq!(ei.check_interrupt(), Some(INT_PCINT0));
    }

    #[test]
    fn test_flag_cleared_by_writing_one() {
        let mut ei = ExtInterrupts::default();
        ei.write(EICRA, 0b0100);
        ei.pin_changed(Port::D, 0x08, 0x08);
        assert_eq!(ei.read(EIFR), Some(0b10));
        ei.write(EIFR, 0b10);
        assert_eq!(ei.read(EIFR), Some(0));
    }
}
