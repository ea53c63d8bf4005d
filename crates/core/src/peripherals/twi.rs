//! Two-wire interface (I2C) in master mode.
//!
//! Bus actions are carried out as soon as the firmware writes TWCR with
//! TWINT set: the addressed device answers through the [`Board`] in the
//! same instruction, TWSR is loaded with the matching status code and
//! TWINT is raised again. The Wire library only ever polls TWINT or waits
//! for the TWI vector, so no bit-level timing is modelled.

use serde::{Deserialize, Serialize};

use super::INT_TWI;
use crate::runtime::Board;

const TWBR: u16 = 0xB8;
const TWSR: u16 = 0xB9;
const TWAR: u16 = 0xBA;
const TWDR: u16 = 0xBB;
const TWCR: u16 = 0xBC;
const TWAMR: u16 = 0xBD;

const TWINT: u8 = 0x80;
const TWEA: u8 = 0x40;
const TWSTA: u8 = 0x20;
const TWSTO: u8 = 0x10;
const TWEN: u8 = 0x04;
const TWIE: u8 = 0x01;

// Master status codes (TWSR with prescaler bits masked)
pub const TW_START: u8 = 0x08;
pub const TW_REP_START: u8 = 0x10;
pub const TW_MT_SLA_ACK: u8 = 0x18;
pub const TW_MT_SLA_NACK: u8 = 0x20;
pub const TW_MT_DATA_ACK: u8 = 0x28;
pub const TW_MT_DATA_NACK: u8 = 0x30;
pub const TW_MR_SLA_ACK: u8 = 0x40;
pub const TW_MR_SLA_NACK: u8 = 0x48;
pub const TW_MR_DATA_ACK: u8 = 0x50;
pub const TW_MR_DATA_NACK: u8 = 0x58;
pub const TW_NO_INFO: u8 = 0xF8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
enum Phase {
    #[default]
    Idle,
    /// START sent, next TWDR byte is SLA+R/W
    Address,
    Transmit,
    Receive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Twi {
    twbr: u8,
    twsr: u8,
    twar: u8,
    twdr: u8,
    twcr: u8,
    twamr: u8,
    phase: Phase,
}

impl Default for Twi {
    fn default() -> Self {
        Self::new()
    }
}

impl Twi {
    pub fn new() -> Self {
        Twi {
            twbr: 0,
            twsr: TW_NO_INFO,
            twar: 0xFE,
            twdr: 0xFF,
            twcr: 0,
            twamr: 0,
            phase: Phase::Idle,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// SCL frequency for the configured bit rate.
    pub fn scl_hz(&self, clock_hz: u32) -> u32 {
        let prescale = 1u32 << (2 * (self.twsr & 3));
        clock_hz / (16 + 2 * self.twbr as u32 * prescale)
    }

    pub fn write(&mut self, addr: u16, value: u8, board: &mut dyn Board) -> bool {
        match addr {
            TWBR => self.twbr = value,
            TWSR => self.twsr = (self.twsr & !3) | (value & 3),
            TWAR => self.twar = value,
            TWDR => self.twdr = value,
            TWAMR => self.twamr = value,
            TWCR => self.write_control(value, board),
            _ => return false,
        }
        true
    }

    pub fn read(&self, addr: u16) -> Option<u8> {
        match addr {
            TWBR => Some(self.twbr),
            TWSR => Some(self.twsr),
            TWAR => Some(self.twar),
            TWDR => Some(self.twdr),
            TWCR => Some(self.twcr),
            TWAMR => Some(self.twamr),
            _ => None,
        }
    }

    fn set_status(&mut self, status: u8) {
        self.twsr = (self.twsr & 3) | status;
    }

    pub fn write_control(&mut self, value: u8, board: &mut dyn Board) {
        // Writing TWINT clears the flag and kicks off the next action
        let kick = value & TWINT != 0;
        self.twcr = (self.twcr & TWINT) | (value & !TWINT);
        if !kick || value & TWEN == 0 {
            if value & TWEN == 0 {
                self.phase = Phase::Idle;
            }
            return;
        }
        self.twcr &= !TWINT;

        if value & TWSTA != 0 {
            let status = if self.phase == Phase::Idle { TW_START } else { TW_REP_START };
            board.i2c_start();
            self.phase = Phase::Address;
            self.set_status(status);
        } else if value & TWSTO != 0 {
            board.i2c_stop();
            self.phase = Phase::Idle;
            self.set_status(TW_NO_INFO);
            // STOP completes without raising TWINT
            self.twcr &= !TWSTO;
            return;
        } else {
            match self.phase {
                Phase::Idle => {
                    log::debug!("TWI: TWINT written outside a transaction");
                    return;
                }
                Phase::Address => {
                    let addr = self.twdr >> 1;
                    let write = self.twdr & 1 == 0;
                    let ack = board.i2c_connect(addr, write);
                    let status = match (write, ack) {
                        (true, true) => TW_MT_SLA_ACK,
                        (true, false) => TW_MT_SLA_NACK,
                        (false, true) => TW_MR_SLA_ACK,
                        (false, false) => TW_MR_SLA_NACK,
                    };
                    self.phase = if write { Phase::Transmit } else { Phase::Receive };
                    self.set_status(status);
                }
                Phase::Transmit => {
                    let ack = board.i2c_write(self.twdr);
                    self.set_status(if ack { TW_MT_DATA_ACK } else { TW_MT_DATA_NACK });
                }
                Phase::Receive => {
                    let ack = value & TWEA != 0;
                    self.twdr = board.i2c_read(ack);
                    self.set_status(if ack { TW_MR_DATA_ACK } else { TW_MR_DATA_NACK });
                }
            }
        }
        self.twcr |= TWINT;
    }

    pub fn check_interrupt(&mut self) -> Option<u16> {
        // TWINT is cleared by software, not by vectoring
        (self.twcr & (TWINT | TWIE | TWEN) == TWINT | TWIE | TWEN).then_some(INT_TWI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Single slave at 0x3C that records written bytes and returns a counter.
    #[derive(Default)]
    struct Probe {
        written: Vec<u8>,
        next: u8,
        stops: usize,
    }

    impl Board for Probe {
        fn i2c_connect(&mut self, addr: u8, _write: bool) -> bool {
            addr == 0x3C
        }
        fn i2c_write(&mut self, byte: u8) -> bool {
            self.written.push(byte);
            true
        }
        fn i2c_read(&mut self, _ack: bool) -> u8 {
            self.next += 1;
            self.next
        }
        fn i2c_stop(&mut self) {
            self.stops += 1;
        }
    }

    fn status(t: &Twi) -> u8 {
        t.read(TWSR).unwrap() & 0xF8
    }

    #[test]
    fn test_master_transmit() {
        let mut t = Twi::new();
        let mut b = Probe::default();
        t.write(TWCR, TWINT | TWSTA | TWEN, &mut b);
        assert_eq!(status(&t), TW_START);
        assert_ne!(t.read(TWCR).unwrap() & TWINT, 0);
        t.write(TWDR, 0x3C << 1, &mut b);
        t.write(TWCR, TWINT | TWEN, &mut b);
        assert_eq!(status(&t), TW_MT_SLA_ACK);
        t.write(TWDR, 0xAE, &mut b);
        t.write(TWCR, TWINT | TWEN, &mut b);
        assert_eq!(status(&t), TW_MT_DATA_ACK);
        t.write(TWCR, TWINT | TWSTO | TWEN, &mut b);
        assert_eq!(status(&t), TW_NO_INFO);
        assert_eq!(b.written, vec![0xAE]);
        assert_eq!(b.stops, 1);
    }

    #[test]
    fn test_master_receive_with_repeated_start() {
        let mut t = Twi::new();
        let mut b = Probe::default();
        t.write(TWCR, TWINT | TWSTA | TWEN, &mut b);
        t.write(TWDR, 0x3C << 1, &mut b);
        t.write(TWCR, TWINT | TWEN, &mut b);
        t.write(TWCR, TWINT | TWSTA | TWEN, &mut b);
        assert_eq!(status(&t), TW_REP_START);
        t.write(TWDR, (0x3C << 1) | 1, &mut b);
        t.write(TWCR, TWINT | TWEN, &mut b);
        assert_eq!(status(&t), TW_MR_SLA_ACK);
        t.write(TWCR, TWINT | TWEA | TWEN, &mut b);
        assert_eq!((status(&t), t.read(TWDR)), (TW_MR_DATA_ACK, Some(1)));
        t.write(TWCR, TWINT | TWEN, &mut b);
        assert_eq!((status(&t), t.read(TWDR)), (TW_MR_DATA_NACK, Some(2)));
    }

    #[test]
    fn test_address_nack_and_interrupt() {
        let mut t = Twi::new();
        let mut b = Probe::default();
        t.write(TWCR, TWINT | TWSTA | TWEN | TWIE, &mut b);
        assert_eq!(t.check_interrupt(), Some(INT_TWI));
        t.write(TWDR, 0x50 << 1, &mut b);
        t.write(TWCR, TWINT | TWEN, &mut b);
        assert_eq!(status(&t), TW_MT_SLA_NACK);
        assert_eq!(t.check_interrupt(), None);
    }

    #[test]
    fn test_bit_rate() {
        let mut t = Twi::new();
        let mut b = Probe::default();
        // Wire.setClock(100000): TWBR = 72
        t.write(TWBR, 72, &mut b);
        assert_eq!(t.scl_hz(16_000_000), 100_000);
    }
}
