//! Passive inputs and indicators: LED, pushbutton, slide switch and
//! potentiometer.

use serde_json::Value;

use super::{detail_bool, detail_f64, Wiring};
use crate::gpio::{Gpio, Pin};
use crate::netlist::NetId;
use crate::VCC;

/// Single-colour LED. Its state is read from the nets on either side.
#[derive(Debug, Clone, Default)]
pub struct Led {
    pub anode: Option<NetId>,
    pub cathode: Option<NetId>,
}

impl Led {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let led = Led { anode: w.net("A"), cathode: w.net("C") };
        if led.anode.is_none() || led.cathode.is_none() {
            log::warn!("{}: LED is not fully wired", w.id());
        }
        led
    }
}

/// Momentary switch between the `1.*` and `2.*` terminal pairs.
///
/// Pressing it puts the level of whichever side sits on a rail onto the
/// MCU pin on the other side.
#[derive(Debug, Clone, Default)]
pub struct Pushbutton {
    target: Option<(Pin, bool)>,
    pressed: bool,
}

impl Pushbutton {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let target = match (w.optional_pin("1.l"), w.optional_pin("2.l")) {
            (Some(pin), _) if w.rail("2.l").is_some() => w.rail("2.l").map(|l| (pin, l)),
            (_, Some(pin)) if w.rail("1.l").is_some() => w.rail("1.l").map(|l| (pin, l)),
            _ => None,
        };
        if target.is_none() {
            log::warn!("{}: button does not join a microcontroller pin to a rail", w.id());
        }
        Pushbutton { target, pressed: false }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn set_pressed(&mut self, pressed: bool, gpio: &mut Gpio, now: u64) {
        self.pressed = pressed;
        self.apply(gpio, now);
    }

    pub(crate) fn apply(&self, gpio: &mut Gpio, now: u64) {
        if let Some((pin, level)) = self.target {
            if self.pressed {
                gpio.drive(pin, level, now);
            } else {
                gpio.release(pin, now);
            }
        }
    }

    pub(crate) fn handle_event(&mut self, event: &str, gpio: &mut Gpio, now: u64) -> bool {
        match event {
            "press" | "button-press" => self.set_pressed(true, gpio, now),
            "release" | "button-release" => self.set_pressed(false, gpio, now),
            _ => return false,
        }
        true
    }
}

/// SPDT slide switch: terminal 2 is common, joined to 1 or to 3.
#[derive(Debug, Clone, Default)]
pub struct SlideSwitch {
    /// (MCU pin, rail level) per terminal 1, 2, 3
    terminals: [(Option<Pin>, Option<bool>); 3],
    /// false: 1–2 joined, true: 2–3 joined
    position: bool,
    driven: [bool; 3],
}

impl SlideSwitch {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let t = |name: &str| (w.optional_pin(name), w.rail(name));
        SlideSwitch {
            terminals: [t("1"), t("2"), t("3")],
            position: w.attr_f64("value").is_some_and(|v| v != 0.0),
            driven: [false; 3],
        }
    }

    pub fn position(&self) -> bool {
        self.position
    }

    pub fn set_position(&mut self, position: bool, gpio: &mut Gpio, now: u64) {
        self.position = position;
        self.apply(gpio, now);
    }

    pub(crate) fn apply(&mut self, gpio: &mut Gpio, now: u64) {
        let (a, b) = if self.position { (1, 2) } else { (0, 1) };
        for i in 0..3 {
            let Some(pin) = self.terminals[i].0 else { continue };
            let level = if i == a {
                self.terminals[b].1
            } else if i == b {
                self.terminals[a].1
            } else {
                None
            };
            match level {
                Some(high) => {
                    gpio.drive(pin, high, now);
                    self.driven[i] = true;
                }
                None if self.driven[i] => {
                    gpio.release(pin, now);
                    self.driven[i] = false;
                }
                None => {}
            }
        }
    }

    pub(crate) fn handle_event(&mut self, event: &str, detail: &Value, gpio: &mut Gpio, now: u64) -> bool {
        match event {
            "toggle" => self.set_position(!self.position, gpio, now),
            "set" | "value" => match detail_bool(detail) {
                Some(p) => self.set_position(p, gpio, now),
                None => return false,
            },
            _ => return false,
        }
        true
    }
}

/// Voltage divider with its wiper on an analog input.
#[derive(Debug, Clone, Default)]
pub struct Potentiometer {
    sig: Option<Pin>,
    /// VCC and GND terminals swapped
    reversed: bool,
    value: u16,
}

impl Potentiometer {
    pub const MAX: u16 = 1023;

    pub(crate) fn wire(w: &Wiring) -> Self {
        let reversed = w.rail("VCC") == Some(false) && w.rail("GND") == Some(true);
        let value = w.attr_f64("value").unwrap_or(0.0).clamp(0.0, Self::MAX as f64) as u16;
        Potentiometer { sig: w.pin("SIG"), reversed, value }
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    /// Wiper voltage for the current position.
    pub fn voltage(&self) -> f64 {
        let frac = self.value as f64 / Self::MAX as f64;
        if self.reversed {
            (1.0 - frac) * VCC
        } else {
            frac * VCC
        }
    }

    pub fn set_value(&mut self, value: f64, gpio: &mut Gpio, now: u64) {
        self.value = value.round().clamp(0.0, Self::MAX as f64) as u16;
        self.apply(gpio, now);
    }

    pub(crate) fn apply(&self, gpio: &mut Gpio, now: u64) {
        if let Some(pin) = self.sig {
            gpio.set_voltage(pin, self.voltage(), now);
        }
    }

    pub(crate) fn handle_event(&mut self, event: &str, detail: &Value, gpio: &mut Gpio, now: u64) -> bool {
        match (event, detail_f64(detail)) {
            ("value" | "input" | "change", Some(v)) => {
                self.set_value(v, gpio, now);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{Component, Connection, Design};
    use crate::gpio::Port;
    use crate::netlist::Netlist;
    use serde_json::json;

    fn netlist(parts: &[(&str, &str)], wires: &[(&str, &str)]) -> (Design, Netlist) {
        let design = Design {
            components: parts.iter().map(|(id, kind)| Component::new(id, kind)).collect(),
            connections: wires.iter().map(|(a, b)| Connection::new(a, b)).collect(),
            config: None,
        };
        let nl = Netlist::build(&design);
        (design, nl)
    }

    #[test]
    fn test_button_pulls_input_low() {
        let (d, nl) = netlist(
            &[("uno", "arduino-uno"), ("btn", "pushbutton")],
            &[("btn:1.l", "uno:2"), ("btn:2.r", "uno:GND.1")],
        );
        let mut b = Pushbutton::wire(&Wiring { component: d.component("btn").unwrap(), netlist: &nl });
        let pin = Pin::new(Port::D, 2);
        let mut g = Gpio::new();
        g.write_port(Port::D, 0x04, 0);
        assert!(g.level(pin));
        assert!(b.handle_event("press", &mut g, 10));
        assert!(!g.level(pin));
        b.handle_event("release", &mut g, 20);
        assert!(g.level(pin));
        assert!(!b.handle_event("wiggle", &mut g, 30));
    }

    #[test]
    fn test_switch_selects_rail() {
        let (d, nl) = netlist(
            &[("uno", "arduino-uno"), ("sw", "slide-switch")],
            &[("sw:1", "uno:GND.1"), ("sw:2", "uno:7"), ("sw:3", "uno:5V")],
        );
        let mut s = SlideSwitch::wire(&Wiring { component: d.component("sw").unwrap(), netlist: &nl });
        let pin = Pin::new(Port::D, 7);
        let mut g = Gpio::new();
        s.apply(&mut g, 0);
        assert!(!g.level(pin));
        s.handle_event("toggle", &json!(null), &mut g, 5);
        assert!(g.level(pin));
        s.handle_event("set", &json!(false), &mut g, 6);
        assert!(!g.level(pin));
    }

    #[test]
    fn test_pot_sets_channel_voltage() {
        let (d, nl) = netlist(
            &[("uno", "arduino-uno"), ("pot", "potentiometer")],
            &[("pot:SIG", "uno:A0"), ("pot:VCC", "uno:5V"), ("pot:GND", "uno:GND.2")],
        );
        let mut p = Potentiometer::wire(&Wiring { component: d.component("pot").unwrap(), netlist: &nl });
        let mut g = Gpio::new();
        p.handle_event("value", &json!(1023), &mut g, 0);
        assert!((g.channel_voltage(0) - 5.0).abs() < 1e-9);
        p.handle_event("value", &json!(2000), &mut g, 0);
        assert_eq!(p.value(), 1023);
        p.set_value(0.0, &mut g, 0);
        assert_eq!(g.channel_voltage(0), 0.0);
    }

    #[test]
    fn test_led_nets() {
        let (d, nl) = netlist(
            &[("uno", "arduino-uno"), ("led1", "led")],
            &[("led1:A", "uno:13"), ("led1:C", "uno:GND.1")],
        );
        let led = Led::wire(&Wiring { component: d.component("led1").unwrap(), netlist: &nl });
        assert_eq!(led.anode, nl.net_of("uno", "13"));
        assert!(led.cathode.is_some());
    }
}
