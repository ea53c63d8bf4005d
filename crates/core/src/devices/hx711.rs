//! HX711 24-bit load-cell ADC with a clocked serial output.
//!
//! DOUT low means a reading is ready. Each rising edge on PD_SCK shifts out
//! the next bit, MSB first. After the 24 data bits the host sends one to
//! three more pulses to choose the gain for the next conversion; DOUT is held
//! high while they arrive.

use serde_json::Value;

use super::{detail_f64, PinWatch, Wiring};
use crate::gpio::{Gpio, Pin, PortChange};

const DATA_BITS: u8 = 24;
/// Clock-low time after the gain pulses that ends a read.
pub const IDLE_RESET_CYCLES: u64 = 800;

const MAX_READING: i64 = (1 << 23) - 1;
const MIN_READING: i64 = -(1 << 23);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gain {
    A128,
    B32,
    A64,
}

#[derive(Debug, Clone)]
pub struct Hx711 {
    dout: Option<Pin>,
    sck: PinWatch,
    /// Clock pulses seen in the current read
    pulses: u8,
    last_fall: u64,
    weight: f64,
    calibration: f64,
    gain: Gain,
}

impl Hx711 {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let mut hx = Hx711::new(w.pin("DT"), w.pin("SCK"));
        if let Some(k) = w.attr_f64("calibration") {
            hx.calibration = k;
        }
        if let Some(weight) = w.attr_f64("weight") {
            hx.weight = weight;
        }
        hx
    }

    pub fn new(dout: Option<Pin>, sck: Option<Pin>) -> Self {
        Hx711 {
            dout,
            sck: PinWatch::new(sck),
            pulses: 0,
            last_fall: 0,
            weight: 0.0,
            calibration: 1.0,
            gain: Gain::A128,
        }
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    pub fn set_calibration(&mut self, factor: f64) {
        self.calibration = factor;
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    /// Signed 24-bit conversion result.
    pub fn reading(&self) -> i32 {
        ((self.weight * self.calibration).round() as i64).clamp(MIN_READING, MAX_READING) as i32
    }

    pub(crate) fn attach(&mut self, gpio: &mut Gpio, now: u64) {
        self.sck.sync(gpio);
        if let Some(pin) = self.dout {
            gpio.drive(pin, false, now);
        }
    }

    pub(crate) fn port_written(&mut self, gpio: &mut Gpio, change: &PortChange) {
        if !self.sck.on_port(change) {
            return;
        }
        match self.sck.poll(gpio) {
            Some(true) => self.clock_rise(gpio, change.cycle),
            Some(false) => self.last_fall = change.cycle,
            None => {}
        }
    }

    fn clock_rise(&mut self, gpio: &mut Gpio, now: u64) {
        let bit = if self.pulses < DATA_BITS {
            let raw = self.reading() as u32 & 0x00FF_FFFF;
            raw & (1 << (DATA_BITS - 1 - self.pulses)) != 0
        } else {
            true
        };
        self.pulses = self.pulses.saturating_add(1);
        if let Some(pin) = self.dout {
            gpio.drive(pin, bit, now);
        }
    }

    pub(crate) fn update(&mut self, gpio: &mut Gpio, now: u64) {
        if self.pulses <= DATA_BITS || self.sck.level {
            return;
        }
        if now.saturating_sub(self.last_fall) < IDLE_RESET_CYCLES {
            return;
        }
        self.gain = match self.pulses - DATA_BITS {
            1 => Gain::A128,
            2 => Gain::B32,
            _ => Gain::A64,
        };
        self.pulses = 0;
        // Next conversion is ready straight away
        if let Some(pin) = self.dout {
            gpio.drive(pin, false, now);
        }
    }

    pub(crate) fn handle_event(&mut self, event: &str, detail: &Value) -> bool {
        let Some(v) = detail_f64(detail) else { return false };
        match event {
            "weight" => self.set_weight(v),
            "calibration" => self.set_calibration(v),
            _ => return false,
        }
        true
    }
}
