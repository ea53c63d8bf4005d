//! DHT22 temperature/humidity sensor on a single open-drain data line.
//!
//! The host holds the line low for at least 500 µs and releases it. The
//! sensor answers with an 80 µs low / 80 µs high handshake, then 40 bits,
//! each a 50 µs low followed by a 27 µs (`0`) or 70 µs (`1`) high, and a
//! final 50 µs low before letting the line float high again.

use serde_json::Value;

use super::{detail_f64, Wiring};
use crate::gpio::{Gpio, Pin, PortChange};
use crate::us_to_cycles;

/// Shortest host start pulse the sensor accepts.
pub const START_LOW_CYCLES: u64 = 8000;

const RESPONSE_LOW: u64 = us_to_cycles(80);
const RESPONSE_HIGH: u64 = us_to_cycles(80);
const BIT_LOW: u64 = us_to_cycles(50);
const BIT_ZERO_HIGH: u64 = us_to_cycles(27);
const BIT_ONE_HIGH: u64 = us_to_cycles(70);
const END_LOW: u64 = us_to_cycles(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtState {
    Idle,
    ResponseLow,
    ResponseHigh,
    /// Bit `bit` of the frame; `high` once its low preamble is over
    SendingData { bit: u8, high: bool },
    ResponseEnd,
}

#[derive(Debug, Clone)]
pub struct Dht22 {
    pin: Option<Pin>,
    state: DhtState,
    /// Cycle of the next transition while responding
    next_at: u64,
    /// When the host started pulling the line low
    host_low_since: Option<u64>,
    frame: [u8; 5],
    temperature: f64,
    humidity: f64,
}

impl Dht22 {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let mut dht = Dht22::new(w.pin("SDA"));
        if let Some(t) = w.attr_f64("temperature") {
            dht.set_temperature(t);
        }
        if let Some(h) = w.attr_f64("humidity") {
            dht.set_humidity(h);
        }
        dht
    }

    pub fn new(pin: Option<Pin>) -> Self {
        Dht22 {
            pin,
            state: DhtState::Idle,
            next_at: 0,
            host_low_since: None,
            frame: [0; 5],
            temperature: 24.0,
            humidity: 40.0,
        }
    }

    pub fn state(&self) -> DhtState {
        self.state
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    /// Clamped to the sensor's -40…80 °C range.
    pub fn set_temperature(&mut self, celsius: f64) {
        self.temperature = celsius.clamp(-40.0, 80.0);
    }

    pub fn set_humidity(&mut self, percent: f64) {
        self.humidity = percent.clamp(0.0, 100.0);
    }

    /// The 5-byte frame for a reading: humidity and temperature in tenths,
    /// temperature sign-magnitude, then the checksum.
    pub fn encode(humidity: f64, temperature: f64) -> [u8; 5] {
        let h = (humidity * 10.0).round() as u16;
        let t = (temperature.abs() * 10.0).round() as u16 & 0x7FFF;
        let t = if temperature < 0.0 { t | 0x8000 } else { t };
        let mut frame = [(h >> 8) as u8, h as u8, (t >> 8) as u8, t as u8, 0];
        frame[4] = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        frame
    }

    pub(crate) fn attach(&mut self, gpio: &mut Gpio, now: u64) {
        // Module pull-up holds the idle line high
        if let Some(pin) = self.pin {
            gpio.drive(pin, true, now);
        }
    }

    pub(crate) fn port_written(&mut self, gpio: &mut Gpio, change: &PortChange) {
        let Some(pin) = self.pin else { return };
        if pin.port != change.port || self.state != DhtState::Idle {
            return;
        }
        let now = change.cycle;
        match (gpio.host_drives_low(pin), self.host_low_since) {
            (true, None) => self.host_low_since = Some(now),
            (false, Some(since)) => {
                self.host_low_since = None;
                if now.saturating_sub(since) >= START_LOW_CYCLES {
                    self.respond(gpio, pin, now);
                } else {
                    log::debug!("DHT22: start pulse of {} cycles too short", now - since);
                }
            }
            _ => {}
        }
    }

    fn respond(&mut self, gpio: &mut Gpio, pin: Pin, now: u64) {
        self.frame = Self::encode(self.humidity, self.temperature);
        gpio.drive(pin, false, now);
        self.state = DhtState::ResponseLow;
        self.next_at = now + RESPONSE_LOW;
    }

    fn bit(&self, index: u8) -> bool {
        self.frame[index as usize / 8] & (0x80 >> (index % 8)) != 0
    }

    pub(crate) fn update(&mut self, gpio: &mut Gpio, now: u64) {
        let Some(pin) = self.pin else { return };
        while self.state != DhtState::Idle && self.next_at <= now {
            let at = self.next_at;
            let (state, high, hold) = match self.state {
                DhtState::ResponseLow => (DhtState::ResponseHigh, true, RESPONSE_HIGH),
                DhtState::ResponseHigh => (DhtState::SendingData { bit: 0, high: false }, false, BIT_LOW),
                DhtState::SendingData { bit, high: false } => {
                    let hold = if self.bit(bit) { BIT_ONE_HIGH } else { BIT_ZERO_HIGH };
                    (DhtState::SendingData { bit, high: true }, true, hold)
                }
                DhtState::SendingData { bit, high: true } if bit < 39 => {
                    (DhtState::SendingData { bit: bit + 1, high: false }, false, BIT_LOW)
                }
                DhtState::SendingData { .. } => (DhtState::ResponseEnd, false, END_LOW),
                DhtState::ResponseEnd | DhtState::Idle => (DhtState::Idle, true, 0),
            };
            gpio.drive(pin, high, at);
            self.state = state;
            self.next_at = at + hold;
        }
    }

    pub(crate) fn handle_event(&mut self, event: &str, detail: &Value) -> bool {
        let Some(v) = detail_f64(detail) else { return false };
        match event {
            "temperature" => self.set_temperature(v),
            "humidity" => self.set_humidity(v),
            _ => return false,
        }
        true
    }
}
