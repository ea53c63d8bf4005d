//! KY-040 rotary encoder with push switch.
//!
//! CLK and DT idle high. One detent clockwise pulls CLK low first, then DT,
//! then releases them in the same order; counter-clockwise swaps the two.
//! The switch pulls SW low while pressed.

use super::{PulseSchedule, Wiring};
use crate::gpio::{Gpio, Pin};
use crate::us_to_cycles;

/// Delay between quadrature phases.
pub const PHASE_CYCLES: u64 = us_to_cycles(1000);

#[derive(Debug, Clone)]
pub struct Ky040 {
    clk: Option<Pin>,
    dt: Option<Pin>,
    sw: Option<Pin>,
    schedule: PulseSchedule,
    position: i64,
    pressed: bool,
}

impl Ky040 {
    pub(crate) fn wire(w: &Wiring) -> Self {
        Ky040::new(w.pin("CLK"), w.pin("DT"), w.optional_pin("SW"))
    }

    pub fn new(clk: Option<Pin>, dt: Option<Pin>, sw: Option<Pin>) -> Self {
        Ky040 { clk, dt, sw, schedule: PulseSchedule::new(), position: 0, pressed: false }
    }

    /// Net detents turned, clockwise positive.
    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub(crate) fn attach(&mut self, gpio: &mut Gpio, now: u64) {
        for pin in [self.clk, self.dt, self.sw].into_iter().flatten() {
            gpio.drive(pin, true, now);
        }
    }

    /// Queue one detent. Steps queued while another is playing follow it.
    pub fn rotate(&mut self, clockwise: bool, now: u64) {
        let (Some(clk), Some(dt)) = (self.clk, self.dt) else { return };
        let (first, second) = if clockwise { (clk, dt) } else { (dt, clk) };
        let t = self.schedule.end().map_or(now, |end| end.max(now) + PHASE_CYCLES);
        self.schedule.push(t, first, false);
        self.schedule.push(t + PHASE_CYCLES, second, false);
        self.schedule.push(t + 2 * PHASE_CYCLES, first, true);
        self.schedule.push(t + 3 * PHASE_CYCLES, second, true);
        self.position += if clockwise { 1 } else { -1 };
    }

    pub fn set_pressed(&mut self, pressed: bool, gpio: &mut Gpio, now: u64) {
        self.pressed = pressed;
        if let Some(pin) = self.sw {
            gpio.drive(pin, !pressed, now);
        }
    }

    pub(crate) fn update(&mut self, gpio: &mut Gpio, now: u64) {
        self.schedule.play(gpio, now);
    }

    pub(crate) fn handle_event(&mut self, event: &str, gpio: &mut Gpio, now: u64) -> bool {
        match event {
            "rotate-cw" | "cw" => self.rotate(true, now),
            "rotate-ccw" | "ccw" => self.rotate(false, now),
            "press" | "button-press" => self.set_pressed(true, gpio, now),
            "release" | "button-release" => self.set_pressed(false, gpio, now),
            _ => return false,
        }
        true
    }
}
