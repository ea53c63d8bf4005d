//! I2C device contract and single-master bus arbiter.
//!
//! The bus keeps the indices of attached devices in attachment order. The
//! address phase selects the first device that acknowledges; it stays
//! active until STOP. Byte traffic with no active device is dropped and
//! reads return 0xFF, which is what an idle, pulled-up SDA line gives.

use serde::{Deserialize, Serialize};

/// A device that answers on the TWI bus.
pub trait I2cDevice {
    /// START or repeated START seen on the bus.
    fn start(&mut self) {}

    /// Address phase. Returns true to acknowledge.
    fn connect(&mut self, addr: u8, write: bool) -> bool;

    /// Byte from the master. Returns the device's ACK.
    fn write_byte(&mut self, byte: u8) -> bool;

    /// Byte to the master; `ack` is the master's response to it.
    fn read_byte(&mut self, ack: bool) -> u8;

    fn stop(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BusState {
    #[default]
    Idle,
    AddressPhase,
    DataPhase { write: bool },
}

#[derive(Debug, Clone, Default)]
pub struct I2cBus {
    attached: Vec<usize>,
    active: Option<usize>,
    state: BusState,
}

impl I2cBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the device at `index` in the caller's device list.
    pub fn attach(&mut self, index: usize) {
        if !self.attached.contains(&index) {
            self.attached.push(index);
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    /// Index of the device selected by the last address phase.
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn start<D: I2cDevice>(&mut self, devices: &mut [D]) {
        for &i in &self.attached {
            if let Some(d) = devices.get_mut(i) {
                d.start();
            }
        }
        self.active = None;
        self.state = BusState::AddressPhase;
    }

    pub fn connect<D: I2cDevice>(&mut self, devices: &mut [D], addr: u8, write: bool) -> bool {
        self.active = self
            .attached
            .iter()
            .copied()
            .find(|&i| devices.get_mut(i).is_some_and(|d| d.connect(addr, write)));
        match self.active {
            Some(_) => {
                self.state = BusState::DataPhase { write };
                true
            }
            None => {
                log::warn!("I2C: no device acknowledged address {:#04x}", addr);
                self.state = BusState::Idle;
                false
            }
        }
    }

    pub fn write_byte<D: I2cDevice>(&mut self, devices: &mut [D], byte: u8) -> bool {
        match self.active.and_then(|i| devices.get_mut(i)) {
            Some(d) if self.state == (BusState::DataPhase { write: true }) => d.write_byte(byte),
            _ => false,
        }
    }

    pub fn read_byte<D: I2cDevice>(&mut self, devices: &mut [D], ack: bool) -> u8 {
        match self.active.and_then(|i| devices.get_mut(i)) {
            Some(d) if self.state == (BusState::DataPhase { write: false }) => d.read_byte(ack),
            _ => 0xFF,
        }
    }

    pub fn stop<D: I2cDevice>(&mut self, devices: &mut [D]) {
        if let Some(d) = self.active.and_then(|i| devices.get_mut(i)) {
            d.stop();
        }
        self.active = None;
        self.state = BusState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reg {
        addr: u8,
        value: u8,
        writes: Vec<u8>,
        starts: usize,
    }

    impl Reg {
        fn new(addr: u8, value: u8) -> Self {
            Reg { addr, value, writes: Vec::new(), starts: 0 }
        }
    }

    impl I2cDevice for Reg {
        fn start(&mut self) {
            self.starts += 1;
        }
        fn connect(&mut self, addr: u8, _write: bool) -> bool {
            addr == self.addr
        }
        fn write_byte(&mut self, byte: u8) -> bool {
            self.writes.push(byte);
            true
        }
        fn read_byte(&mut self, _ack: bool) -> u8 {
            self.value
        }
    }

    #[test]
    fn test_first_acknowledging_device_wins() {
        let mut devs = vec![Reg::new(0x3C, 1), Reg::new(0x68, 2), Reg::new(0x68, 3)];
        let mut bus = I2cBus::new();
        for i in 0..3 {
            bus.attach(i);
        }
        bus.start(&mut devs);
        assert!(devs.iter().all(|d| d.starts == 1));
        assert!(bus.connect(&mut devs, 0x68, false));
        assert_eq!(bus.active(), Some(1));
        assert_eq!(bus.read_byte(&mut devs, true), 2);
        bus.stop(&mut devs);
        assert_eq!(bus.state(), BusState::Idle);
    }

    #[test]
    fn test_nack_leaves_no_active_device() {
        let mut devs = vec![Reg::new(0x3C, 1)];
        let mut bus = I2cBus::new();
        bus.attach(0);
        bus.start(&mut devs);
        assert!(!bus.connect(&mut devs, 0x50, true));
        assert!(!bus.write_byte(&mut devs, 0xAA));
        assert_eq!(bus.read_byte(&mut devs, false), 0xFF);
        assert!(devs[0].writes.is_empty());
    }

    #[test]
    fn test_repeated_start_switches_direction() {
        let mut devs = vec![Reg::new(0x3C, 7)];
        let mut bus = I2cBus::new();
        bus.attach(0);
        bus.start(&mut devs);
        bus.connect(&mut devs, 0x3C, true);
        assert!(bus.write_byte(&mut devs, 0x40));
        // Reads are refused in a write transfer
        assert_eq!(bus.read_byte(&mut devs, true), 0xFF);
        bus.start(&mut devs);
        assert_eq!(bus.state(), BusState::AddressPhase);
        bus.connect(&mut devs, 0x3C, false);
        assert_eq!(bus.read_byte(&mut devs, false), 7);
        assert_eq!(devs[0].writes, vec![0x40]);
    }
}
