//! HC-SR04 ultrasonic ranger.
//!
//! A high pulse on TRIG starts a measurement. After its processing delay the
//! module raises ECHO for the sound's round-trip time: 58 µs per centimetre.

use serde_json::Value;

use super::{detail_f64, PinWatch, PulseSchedule, Wiring};
use crate::gpio::{Gpio, Pin, PortChange};
use crate::{us_to_cycles, CYCLES_PER_US};

pub const PROCESSING_DELAY: u64 = us_to_cycles(500);
const US_PER_CM: f64 = 58.0;
const MIN_CM: f64 = 2.0;
const MAX_CM: f64 = 400.0;

#[derive(Debug, Clone)]
pub struct HcSr04 {
    trig: PinWatch,
    echo: Option<Pin>,
    schedule: PulseSchedule,
    distance_cm: f64,
}

impl HcSr04 {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let mut ranger = HcSr04::new(w.pin("TRIG"), w.pin("ECHO"));
        if let Some(d) = w.attr_f64("distance") {
            ranger.set_distance(d);
        }
        ranger
    }

    pub fn new(trig: Option<Pin>, echo: Option<Pin>) -> Self {
        HcSr04 {
            trig: PinWatch::new(trig),
            echo,
            schedule: PulseSchedule::new(),
            distance_cm: 100.0,
        }
    }

    pub fn distance(&self) -> f64 {
        self.distance_cm
    }

    pub fn set_distance(&mut self, cm: f64) {
        self.distance_cm = cm.clamp(MIN_CM, MAX_CM);
    }

    /// Echo high time for the current distance.
    pub fn echo_cycles(&self) -> u64 {
        (self.distance_cm * US_PER_CM * CYCLES_PER_US as f64).round() as u64
    }

    pub(crate) fn attach(&mut self, gpio: &mut Gpio, now: u64) {
        self.trig.sync(gpio);
        if let Some(pin) = self.echo {
            gpio.drive(pin, false, now);
        }
    }

    pub(crate) fn port_written(&mut self, gpio: &mut Gpio, change: &PortChange) {
        if !self.trig.on_port(change) {
            return;
        }
        // Measure on the falling edge of the trigger pulse
        if self.trig.poll(gpio) != Some(false) {
            return;
        }
        let Some(echo) = self.echo else { return };
        if !self.schedule.is_empty() {
            log::debug!("HC-SR04: trigger ignored, measurement in progress");
            return;
        }
        let rise = change.cycle + PROCESSING_DELAY;
        self.schedule.push(rise, echo, true);
        self.schedule.push(rise + self.echo_cycles(), echo, false);
    }

    pub(crate) fn update(&mut self, gpio: &mut Gpio, now: u64) {
        self.schedule.play(gpio, now);
    }

    pub(crate) fn handle_event(&mut self, event: &str, detail: &Value) -> bool {
        match (event, detail_f64(detail)) {
            ("distance", Some(cm)) => {
                self.set_distance(cm);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::Port;

    const TRIG: Pin = Pin::new(Port::B, 1);
    const ECHO: Pin = Pin::new(Port::B, 0);

    fn trigger(r: &mut HcSr04, g: &mut Gpio, t: u64) {
        let c = g.write_port(Port::B, 0x02, t);
        r.port_written(g, &c);
        let c = g.write_port(Port::B, 0x00, t + us_to_cycles(10));
        r.port_written(g, &c);
    }

    #[test]
    fn test_echo_width_tracks_distance() {
        let mut g = Gpio::new();
        g.write_ddr(Port::B, 0x02, 0);
        let mut r = HcSr04::new(Some(TRIG), Some(ECHO));
        r.attach(&mut g, 0);
        r.set_distance(10.0);
        trigger(&mut r, &mut g, 1000);

        let fall = 1000 + us_to_cycles(10);
        r.update(&mut g, fall + PROCESSING_DELAY - 1);
        assert!(!g.level(ECHO));
        r.update(&mut g, fall + PROCESSING_DELAY);
        assert!(g.level(ECHO));
        r.update(&mut g, fall + PROCESSING_DELAY + us_to_cycles(2000));
        assert!(!g.level(ECHO));
        assert_eq!(g.pulse_width(ECHO), Some(us_to_cycles(580)));
    }

    #[test]
    fn test_distance_clamped() {
        let mut r = HcSr04::new(None, None);
        assert!(r.handle_event("distance", &serde_json::json!(1000)));
        assert_eq!(r.distance(), 400.0);
        r.set_distance(0.5);
        assert_eq!(r.distance(), 2.0);
    }
}
