//! NEC infrared remote and demodulating receiver.
//!
//! The remote itself has no pins: pressing a key makes every receiver in the
//! design play the NEC frame on its output. The receiver output is active
//! low, so each carrier burst appears as a low pulse.

use serde_json::Value;

use super::{detail_f64, PulseSchedule, Wiring};
use crate::gpio::{Gpio, Pin};

const fn us_x10(tenths: u64) -> u64 {
    tenths * crate::CYCLES_PER_US / 10
}

const LEADER_MARK: u64 = us_x10(90_000);
const LEADER_SPACE: u64 = us_x10(45_000);
const BIT_MARK: u64 = us_x10(5625);
const ZERO_SPACE: u64 = us_x10(5625);
const ONE_SPACE: u64 = us_x10(16_875);

/// Key names of the standard 21-key remote and their NEC commands.
const KEYS: &[(&str, u8)] = &[
    ("power", 0xA2),
    ("menu", 0xE2),
    ("test", 0x22),
    ("plus", 0x02),
    ("back", 0xC2),
    ("prev", 0xE0),
    ("play", 0xA8),
    ("next", 0x90),
    ("0", 0x68),
    ("minus", 0x98),
    ("c", 0xB0),
    ("1", 0x30),
    ("2", 0x18),
    ("3", 0x7A),
    ("4", 0x10),
    ("5", 0x38),
    ("6", 0x5A),
    ("7", 0x42),
    ("8", 0x4A),
    ("9", 0x52),
];

/// An NEC address/command pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NecCode {
    pub address: u8,
    pub command: u8,
}

impl NecCode {
    /// The 32 bits as sent: address, inverted address, command, inverted
    /// command, each LSB first.
    pub fn frame(self) -> u32 {
        u32::from_le_bytes([self.address, !self.address, self.command, !self.command])
    }
}

#[derive(Debug, Clone, Default)]
pub struct IrRemote;

impl IrRemote {
    /// NEC command for a key label such as `"power"` or `"5"`.
    pub fn key_command(key: &str) -> Option<u8> {
        let key = key.trim().to_ascii_lowercase();
        KEYS.iter().find(|(name, _)| *name == key).map(|&(_, cmd)| cmd)
    }

    /// The code sent by a `press` event. The detail is a key label, a
    /// numeric command, or an object with `key`/`command` and `address`.
    pub fn decode(event: &str, detail: &Value) -> Option<NecCode> {
        if !matches!(event, "press" | "button-press" | "send") {
            return None;
        }
        let address = detail
            .get("address")
            .and_then(detail_f64)
            .map(|a| a as u8)
            .unwrap_or(0);
        let key = detail.get("key").or_else(|| detail.get("command")).unwrap_or(detail);
        let command = match key {
            Value::String(s) => Self::key_command(s).or_else(|| s.trim().parse().ok()),
            other => detail_f64(other).map(|c| c as u8),
        };
        if command.is_none() {
            log::warn!("IR remote: unknown key {}", detail);
        }
        command.map(|command| NecCode { address, command })
    }
}

#[derive(Debug, Clone)]
pub struct IrReceiver {
    out: Option<Pin>,
    schedule: PulseSchedule,
    last: Option<NecCode>,
}

impl IrReceiver {
    pub(crate) fn wire(w: &Wiring) -> Self {
        IrReceiver::new(w.pin("DAT"))
    }

    pub fn new(out: Option<Pin>) -> Self {
        IrReceiver { out, schedule: PulseSchedule::new(), last: None }
    }

    /// Last code transmitted to this receiver.
    pub fn last_code(&self) -> Option<NecCode> {
        self.last
    }

    pub fn is_busy(&self) -> bool {
        !self.schedule.is_empty()
    }

    pub(crate) fn attach(&mut self, gpio: &mut Gpio, now: u64) {
        if let Some(pin) = self.out {
            gpio.drive(pin, true, now);
        }
    }

    /// Replace any frame in flight with `code`, starting at `now`.
    pub fn transmit(&mut self, code: NecCode, now: u64) {
        self.last = Some(code);
        self.schedule.clear();
        let Some(pin) = self.out else { return };
        let mut t = now;
        let mark = |s: &mut PulseSchedule, t: &mut u64, mark: u64, space: u64| {
            s.push(*t, pin, false);
            s.push(*t + mark, pin, true);
            *t += mark + space;
        };
        mark(&mut self.schedule, &mut t, LEADER_MARK, LEADER_SPACE);
        let frame = code.frame();
        for i in 0..32 {
            let space = if frame & (1 << i) != 0 { ONE_SPACE } else { ZERO_SPACE };
            mark(&mut self.schedule, &mut t, BIT_MARK, space);
        }
        // Stop bit
        mark(&mut self.schedule, &mut t, BIT_MARK, 0);
    }

    pub(crate) fn update(&mut self, gpio: &mut Gpio, now: u64) {
        self.schedule.play(gpio, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::Port;
    use serde_json::json;

    const OUT: Pin = Pin::new(Port::D, 2);

    #[test]
    fn test_key_lookup() {
        assert_eq!(IrRemote::key_command("Power"), Some(0xA2));
        assert_eq!(IrRemote::key_command("5"), Some(0x38));
        assert_eq!(IrRemote::decode("press", &json!("play")), Some(NecCode { address: 0, command: 0xA8 }));
        assert_eq!(IrRemote::decode("press", &json!(0x45)).map(|c| c.command), Some(0x45));
        assert_eq!(
            IrRemote::decode("press", &json!({ "command": 7, "address": 4 })),
            Some(NecCode { address: 4, command: 7 })
        );
        assert_eq!(IrRemote::decode("release", &json!("play")), None);
    }

    #[test]
    fn test_nec_frame_timing() {
        let mut g = Gpio::new();
        let mut rx = IrReceiver::new(Some(OUT));
        rx.attach(&mut g, 0);
        let code = NecCode { address: 0x00, command: 0xA2 };
        rx.transmit(code, 1000);

        // Collect low-pulse widths and the spaces between them
        let mut t = 1000;
        let mut marks = Vec::new();
        let mut spaces = Vec::new();
        let mut prev = true;
        let mut edge = 1000;
        while t < 1000 + us_x10(800_000) {
            rx.update(&mut g, t);
            let level = g.level(OUT);
            if level != prev {
                if level {
                    marks.push(t - edge);
                } else if t > 1000 {
                    spaces.push(t - edge);
                }
                edge = t;
                prev = level;
            }
            t += 8;
        }
        assert!(!rx.is_busy());
        assert_eq!(marks.len(), 34);
        assert_eq!(marks[0], LEADER_MARK);
        assert_eq!(spaces[0], LEADER_SPACE);
        let bits: u32 = spaces[1..33]
            .iter()
            .enumerate()
            .map(|(i, &s)| ((s > ZERO_SPACE) as u32) << i)
            .sum();
        assert_eq!(bits, code.frame());
        assert_eq!(bits.to_le_bytes(), [0x00, 0xFF, 0xA2, 0x5D]);
        assert!(g.level(OUT));
    }

    #[test]
    fn test_resend_replaces_frame() {
        let mut rx = IrReceiver::new(Some(OUT));
        rx.transmit(NecCode { address: 0, command: 1 }, 0);
        rx.transmit(NecCode { address: 0, command: 2 }, 100);
        assert_eq!(rx.last_code().map(|c| c.command), Some(2));
        assert_eq!(rx.schedule.len(), 68);
    }
}
