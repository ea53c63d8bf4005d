//! GPIO ports B, C and D.
//!
//! Each pin has three inputs to its level: the firmware's DDRx/PORTx bits,
//! an optional external drive from an attached device, and the pull-up.
//! Output pins follow PORTx. Input pins follow the external drive if there
//! is one, otherwise the PORTx bit (pull-up high, floating low).
//!
//! Every level change is timestamped in CPU cycles so that duty cycle and
//! pulse width can be reported per pin.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::peripherals::exint::ExtInterrupts;
use crate::VCC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Port {
    B,
    C,
    D,
}

/// Which of the three registers of a port an address refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortReg {
    Pin,
    Ddr,
    Port,
}

impl Port {
    pub const ALL: [Port; 3] = [Port::B, Port::C, Port::D];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Port::B => 0,
            Port::C => 1,
            Port::D => 2,
        }
    }

    /// PINx address in data space; DDRx and PORTx follow it.
    #[inline]
    pub fn pin_addr(self) -> u16 {
        0x23 + 3 * self.index() as u16
    }

    pub fn decode_addr(addr: u16) -> Option<(Port, PortReg)> {
        if !(0x23..=0x2B).contains(&addr) {
            return None;
        }
        let off = addr - 0x23;
        let port = Port::ALL[(off / 3) as usize];
        let reg = match off % 3 {
            0 => PortReg::Pin,
            1 => PortReg::Ddr,
            _ => PortReg::Port,
        };
        Some((port, reg))
    }
}

/// A single port/bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pin {
    pub port: Port,
    pub bit: u8,
}

impl Pin {
    pub const fn new(port: Port, bit: u8) -> Self {
        Pin { port, bit }
    }

    #[inline]
    pub fn mask(self) -> u8 {
        1 << self.bit
    }

    /// Map an Uno header label to its port bit.
    ///
    /// `0`–`7` are PORTD, `8`–`13` are PORTB, `A0`–`A5` are PORTC. A `D`
    /// prefix on digital pins is accepted.
    pub fn from_arduino(name: &str) -> Option<Pin> {
        let name = name.trim();
        if let Some(n) = name.strip_prefix(['A', 'a']) {
            let n: u8 = n.parse().ok()?;
            return (n <= 5).then_some(Pin::new(Port::C, n));
        }
        let digits = name.strip_prefix(['D', 'd']).unwrap_or(name);
        match digits.parse::<u8>().ok()? {
            n @ 0..=7 => Some(Pin::new(Port::D, n)),
            n @ 8..=13 => Some(Pin::new(Port::B, n - 8)),
            _ => None,
        }
    }

    /// ADC multiplexer channel for analog-capable pins.
    pub fn adc_channel(self) -> Option<u8> {
        (self.port == Port::C && self.bit <= 5).then_some(self.bit)
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = match self.port {
            Port::B => 'B',
            Port::C => 'C',
            Port::D => 'D',
        };
        write!(f, "P{}{}", p, self.bit)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct PinTiming {
    /// Cycle of the most recent rising edge
    last_rise: u64,
    /// Start of the current high stretch within this frame
    last_toggle: u64,
    /// High time accumulated in this frame
    high_cycles: u64,
    /// Width of the last complete high pulse
    pulse_width: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PortState {
    ddr: u8,
    port: u8,
    ext_level: u8,
    ext_driven: u8,
    level: u8,
}

impl PortState {
    fn resolve(&self) -> u8 {
        let input = (self.ext_level & self.ext_driven) | (self.port & !self.ext_driven);
        (self.port & self.ddr) | (input & !self.ddr)
    }
}

/// Firmware write to DDRx, PORTx or PINx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortChange {
    pub port: Port,
    pub old_ddr: u8,
    pub old_port: u8,
    pub ddr: u8,
    pub value: u8,
    pub cycle: u64,
}

impl PortChange {
    /// Bits whose direction or output latch changed.
    pub fn host_changed(&self) -> u8 {
        (self.old_ddr ^ self.ddr) | (self.old_port ^ self.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gpio {
    ports: [PortState; 3],
    timing: [[PinTiming; 8]; 3],
    /// Externally applied voltage on ADC channels 0–7
    analog: [f64; 8],
    frame_start: u64,
    pub irq: ExtInterrupts,
}

impl Default for Gpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpio {
    pub fn new() -> Self {
        Gpio {
            ports: Default::default(),
            timing: [[PinTiming::default(); 8]; 3],
            analog: [0.0; 8],
            frame_start: 0,
            irq: ExtInterrupts::default(),
        }
    }

    /// Value seen by the firmware when reading PINx.
    pub fn read_pin_reg(&self, port: Port) -> u8 {
        self.ports[port.index()].level
    }

    pub fn ddr(&self, port: Port) -> u8 {
        self.ports[port.index()].ddr
    }

    pub fn port_latch(&self, port: Port) -> u8 {
        self.ports[port.index()].port
    }

    pub fn write_ddr(&mut self, port: Port, value: u8, now: u64) -> PortChange {
        let s = &self.ports[port.index()];
        let latch = s.port;
        self.host_write(port, value, latch, now)
    }

    pub fn write_port(&mut self, port: Port, value: u8, now: u64) -> PortChange {
        let s = &self.ports[port.index()];
        let ddr = s.ddr;
        self.host_write(port, ddr, value, now)
    }

    fn host_write(&mut self, port: Port, ddr: u8, value: u8, now: u64) -> PortChange {
        let s = &mut self.ports[port.index()];
        let change = PortChange {
            port,
            old_ddr: s.ddr,
            old_port: s.port,
            ddr,
            value,
            cycle: now,
        };
        s.ddr = ddr;
        s.port = value;
        self.refresh(port, now);
        change
    }

    /// Drive a pin from outside the MCU.
    pub fn drive(&mut self, pin: Pin, high: bool, now: u64) {
        let s = &mut self.ports[pin.port.index()];
        s.ext_driven |= pin.mask();
        if high {
            s.ext_level |= pin.mask();
        } else {
            s.ext_level &= !pin.mask();
        }
        if let Some(ch) = pin.adc_channel() {
            self.analog[ch as usize] = if high { VCC } else { 0.0 };
        }
        self.refresh(pin.port, now);
    }

    /// Stop driving a pin; it falls back to the pull-up or floats low.
    pub fn release(&mut self, pin: Pin, now: u64) {
        let s = &mut self.ports[pin.port.index()];
        s.ext_driven &= !pin.mask();
        if let Some(ch) = pin.adc_channel() {
            self.analog[ch as usize] = 0.0;
        }
        self.refresh(pin.port, now);
    }

    /// Apply an analog voltage to an ADC-capable pin.
    ///
    /// The digital level follows at the VCC/2 threshold.
    pub fn set_voltage(&mut self, pin: Pin, volts: f64, now: u64) {
        let volts = volts.clamp(0.0, VCC);
        self.drive(pin, volts >= VCC / 2.0, now);
        if let Some(ch) = pin.adc_channel() {
            self.analog[ch as usize] = volts;
        }
    }

    /// Voltage seen by the ADC multiplexer on channel 0–7.
    pub fn channel_voltage(&self, channel: u8) -> f64 {
        if channel > 5 {
            return self.analog.get(channel as usize).copied().unwrap_or(0.0);
        }
        let pin = Pin::new(Port::C, channel);
        let s = &self.ports[1];
        if s.ddr & pin.mask() != 0 || s.ext_driven & pin.mask() == 0 {
            return if self.level(pin) { VCC } else { 0.0 };
        }
        self.analog[channel as usize]
    }

    #[inline]
    pub fn level(&self, pin: Pin) -> bool {
        self.ports[pin.port.index()].level & pin.mask() != 0
    }

    #[inline]
    pub fn is_output(&self, pin: Pin) -> bool {
        self.ports[pin.port.index()].ddr & pin.mask() != 0
    }

    /// The firmware's own drive on a pin: `Some(level)` for outputs.
    pub fn host_level(&self, pin: Pin) -> Option<bool> {
        let s = &self.ports[pin.port.index()];
        (s.ddr & pin.mask() != 0).then_some(s.port & pin.mask() != 0)
    }

    /// Level forced onto the pin from outside the MCU, if any.
    pub fn external_level(&self, pin: Pin) -> Option<bool> {
        let s = &self.ports[pin.port.index()];
        (s.ext_driven & pin.mask() != 0).then_some(s.ext_level & pin.mask() != 0)
    }

    /// True while the firmware actively pulls the pin low.
    #[inline]
    pub fn host_drives_low(&self, pin: Pin) -> bool {
        self.host_level(pin) == Some(false)
    }

    fn refresh(&mut self, port: Port, now: u64) {
        let i = port.index();
        let s = &mut self.ports[i];
        let level = s.resolve();
        let changed = level ^ s.level;
        s.level = level;
        if changed == 0 {
            return;
        }
        for bit in 0..8 {
            if changed & (1 << bit) == 0 {
                continue;
            }
            let t = &mut self.timing[i][bit];
            if level & (1 << bit) != 0 {
                t.last_rise = now;
                t.last_toggle = now;
            } else {
                t.high_cycles += now.saturating_sub(t.last_toggle);
                t.pulse_width = Some(now.saturating_sub(t.last_rise));
                t.last_toggle = now;
            }
        }
        self.irq.pin_changed(port, changed, level);
    }

    /// Start a new duty-cycle window.
    pub fn begin_frame(&mut self, now: u64) {
        self.frame_start = now;
        for (i, port) in self.ports.iter().enumerate() {
            for (bit, t) in self.timing[i].iter_mut().enumerate() {
                t.high_cycles = 0;
                if port.level & (1 << bit) != 0 {
                    t.last_toggle = now;
                }
            }
        }
    }

    /// Fraction of the current frame the pin has been high, in [0, 1].
    pub fn duty_cycle(&self, pin: Pin, now: u64) -> f64 {
        let frame = now.saturating_sub(self.frame_start);
        let high_now = self.level(pin);
        if frame == 0 {
            return if high_now { 1.0 } else { 0.0 };
        }
        let t = &self.timing[pin.port.index()][pin.bit as usize];
        let mut high = t.high_cycles;
        if high_now {
            high += now.saturating_sub(t.last_toggle);
        }
        (high as f64 / frame as f64).clamp(0.0, 1.0)
    }

    /// Width in cycles of the last complete high pulse.
    pub fn pulse_width(&self, pin: Pin) -> Option<u64> {
        self.timing[pin.port.index()][pin.bit as usize].pulse_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LED: Pin = Pin::new(Port::B, 5);

    #[test]
    fn test_arduino_pin_names() {
        assert_eq!(Pin::from_arduino("13"), Some(Pin::new(Port::B, 5)));
        assert_eq!(Pin::from_arduino("D2"), Some(Pin::new(Port::D, 2)));
        assert_eq!(Pin::from_arduino("0"), Some(Pin::new(Port::D, 0)));
        assert_eq!(Pin::from_arduino("A4"), Some(Pin::new(Port::C, 4)));
        assert_eq!(Pin::from_arduino("A6"), None);
        assert_eq!(Pin::from_arduino("14"), None);
        assert_eq!(Pin::from_arduino("GND"), None);
        assert_eq!(Pin::new(Port::B, 5).to_string(), "PB5");
    }

    #[test]
    fn test_decode_register_addresses() {
        assert_eq!(Port::decode_addr(0x25), Some((Port::B, PortReg::Port)));
        assert_eq!(Port::decode_addr(0x27), Some((Port::C, PortReg::Ddr)));
        assert_eq!(Port::decode_addr(0x29), Some((Port::D, PortReg::Pin)));
        assert_eq!(Port::decode_addr(0x2C), None);
    }

    #[test]
    fn test_input_resolution() {
        let mut g = Gpio::new();
        // Floating input reads low; pull-up reads high
        assert!(!g.level(LED));
        g.write_port(Port::B, 0x20, 0);
        assert!(g.level(LED));
        // External drive overrides the pull-up
        g.drive(LED, false, 0);
        assert_eq!(g.read_pin_reg(Port::B) & 0x20, 0);
        // Output wins over external drive
        g.write_ddr(Port::B, 0x20, 0);
        assert!(g.level(LED));
        assert_eq!(g.host_level(LED), Some(true));
        g.release(LED, 0);
        g.write_port(Port::B, 0, 0);
        assert!(g.host_drives_low(LED));
    }

    #[test]
    fn test_half_duty_cycle() {
        let mut g = Gpio::new();
        g.write_ddr(Port::B, 0x20, 0);
        g.begin_frame(0);
        g.write_port(Port::B, 0x20, 0);
        g.write_port(Port::B, 0x00, 500);
        let duty = g.duty_cycle(LED, 1000);
        assert!((duty - 0.5).abs() < 1e-6, "duty = {}", duty);
    }

    #[test]
    fn test_duty_includes_still_high_and_frame_restart() {
        let mut g = Gpio::new();
        g.write_ddr(Port::B, 0x20, 0);
        g.write_port(Port::B, 0x20, 100);
        g.begin_frame(1000);
        // High for the whole new frame so far
        assert!((g.duty_cycle(LED, 2000) - 1.0).abs() < 1e-6);
        g.write_port(Port::B, 0, 1250);
        assert!((g.duty_cycle(LED, 2000) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_pulse_width_spans_frames() {
        let mut g = Gpio::new();
        g.write_ddr(Port::B, 0x20, 0);
        g.write_port(Port::B, 0x20, 1000);
        g.begin_frame(1500);
        g.write_port(Port::B, 0, 1000 + 24_000);
        assert_eq!(g.pulse_width(LED), Some(24_000));
    }

    #[test]
    fn test_analog_channel_voltage() {
        let mut g = Gpio::new();
        let a0 = Pin::new(Port::C, 0);
        g.set_voltage(a0, 2.0, 0);
        assert!((g.channel_voltage(0) - 2.0).abs() < 1e-9);
        assert!(!g.level(a0));
        g.set_voltage(a0, 9.0, 0);
        assert!((g.channel_voltage(0) - VCC).abs() < 1e-9);
        assert!(g.level(a0));
    }
}
