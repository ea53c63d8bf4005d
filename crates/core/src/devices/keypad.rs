//! 4×4 membrane keypad.
//!
//! A pressed key is a plain contact between its row and column lines, so
//! there is no output of its own. The firmware scans by driving one line low
//! and reading the others through their pull-ups. On every scan the keypad
//! looks at which lines the firmware actively drives low (from DDRx and
//! PORTx, not the read-back level) and pulls the line across each pressed
//! key low to match. A line it no longer needs to hold goes back to
//! whatever outside drive it had before the keypad took it over.

use serde_json::Value;

use super::Wiring;
use crate::gpio::{Gpio, Pin};

pub const LABELS: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

#[derive(Debug, Clone, Default)]
pub struct Keypad {
    rows: [Option<Pin>; 4],
    cols: [Option<Pin>; 4],
    pressed: [[bool; 4]; 4],
    /// Lines currently pulled low by a key: rows 0–3, then columns 4–7
    holding: [bool; 8],
    /// Outside drive on each held line when the hold began
    displaced: [Option<bool>; 8],
}

impl Keypad {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let rows = [1, 2, 3, 4].map(|i| w.pin(&format!("R{}", i)));
        let cols = [1, 2, 3, 4].map(|i| w.pin(&format!("C{}", i)));
        Keypad::new(rows, cols)
    }

    pub fn new(rows: [Option<Pin>; 4], cols: [Option<Pin>; 4]) -> Self {
        Keypad { rows, cols, ..Default::default() }
    }

    /// Row and column of a key label.
    pub fn locate(label: char) -> Option<(usize, usize)> {
        let label = label.to_ascii_uppercase();
        LABELS.iter().enumerate().find_map(|(r, row)| row.iter().position(|&c| c == label).map(|c| (r, c)))
    }

    pub fn is_pressed(&self, row: usize, col: usize) -> bool {
        self.pressed.get(row).and_then(|r| r.get(col)).copied().unwrap_or(false)
    }

    /// Labels of the keys held down, in row-major order.
    pub fn pressed_keys(&self) -> Vec<char> {
        let mut keys = Vec::new();
        for (r, row) in self.pressed.iter().enumerate() {
            for (c, &down) in row.iter().enumerate() {
                if down {
                    keys.push(LABELS[r][c]);
                }
            }
        }
        keys
    }

    pub fn set_key(&mut self, row: usize, col: usize, down: bool) {
        if row < 4 && col < 4 {
            self.pressed[row][col] = down;
        }
    }

    fn line(&self, i: usize) -> Option<Pin> {
        if i < 4 {
            self.rows[i]
        } else {
            self.cols[i - 4]
        }
    }

    /// Mirror the firmware's low drive across every pressed key.
    pub fn scan(&mut self, gpio: &mut Gpio, now: u64) {
        let drives_low = |p: Option<Pin>| p.is_some_and(|p| gpio.host_drives_low(p));
        let mut want = [false; 8];
        for r in 0..4 {
            for c in 0..4 {
                if !self.pressed[r][c] {
                    continue;
                }
                if drives_low(self.rows[r]) {
                    want[4 + c] = true;
                }
                if drives_low(self.cols[c]) {
                    want[r] = true;
                }
            }
        }
        for (i, &hold) in want.iter().enumerate() {
            if hold == self.holding[i] {
                continue;
            }
            let Some(pin) = self.line(i) else { continue };
            if hold {
                self.displaced[i] = gpio.external_level(pin);
                gpio.drive(pin, false, now);
            } else {
                match self.displaced[i].take() {
                    Some(level) => gpio.drive(pin, level, now),
                    None => gpio.release(pin, now),
                }
            }
        }
        self.holding = want;
    }

    pub(crate) fn handle_event(&mut self, event: &str, detail: &Value) -> bool {
        let down = match event {
            "press" | "button-press" => true,
            "release" | "button-release" => false,
            _ => return false,
        };
        let key = detail.get("key").unwrap_or(detail).as_str().and_then(|s| s.trim().chars().next());
        match key.and_then(Keypad::locate) {
            Some((r, c)) => {
                self.set_key(r, c, down);
                true
            }
            None => {
                log::warn!("keypad: unknown key {}", detail);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::Port;
    use serde_json::json;

    // Rows on PD4–PD7, columns on PB0–PB3 with pull-ups
    fn setup() -> (Keypad, Gpio) {
        let rows = [4, 5, 6, 7].map(|b| Some(Pin::new(Port::D, b)));
        let cols = [0, 1, 2, 3].map(|b| Some(Pin::new(Port::B, b)));
        let mut g = Gpio::new();
        g.write_port(Port::B, 0x0F, 0);
        g.write_port(Port::D, 0xF0, 0);
        (Keypad::new(rows, cols), g)
    }

    fn col(g: &Gpio, c: u8) -> bool {
        g.level(Pin::new(Port::B, c))
    }

    #[test]
    fn test_row_low_reaches_column() {
        let (mut kp, mut g) = setup();
        assert!(kp.handle_event("press", &json!("6")));
        kp.scan(&mut g, 0);
        assert!(col(&g, 2));
        // Drive row 1 (PD5) low
        g.write_ddr(Port::D, 0x20, 10);
        g.write_port(Port::D, 0xD0, 10);
        kp.scan(&mut g, 10);
        assert!(!col(&g, 2));
        assert!(col(&g, 1) && col(&g, 3));
        kp.handle_event("release", &json!({ "key": "6" }));
        kp.scan(&mut g, 20);
        assert!(col(&g, 2));
    }

    #[test]
    fn test_column_low_reaches_row() {
        let (mut kp, mut g) = setup();
        kp.set_key(3, 0, true);
        g.write_ddr(Port::B, 0x01, 0);
        g.write_port(Port::B, 0x0E, 0);
        kp.scan(&mut g, 0);
        assert!(!g.level(Pin::new(Port::D, 7)));
        assert!(g.level(Pin::new(Port::D, 6)));
        kp.set_key(3, 0, false);
        kp.scan(&mut g, 5);
        assert!(g.level(Pin::new(Port::D, 7)));
        assert_eq!(kp.pressed_keys(), Vec::<char>::new());
    }

    #[test]
    fn test_release_keeps_shared_line_drive() {
        let (mut kp, mut g) = setup();
        // Another part on the same net holds column 0 low
        let c0 = Pin::new(Port::B, 0);
        g.drive(c0, false, 0);
        kp.set_key(0, 0, true);
        g.write_ddr(Port::D, 0x10, 5);
        g.write_port(Port::D, 0xE0, 5);
        kp.scan(&mut g, 5);
        assert!(!col(&g, 0));

        g.write_ddr(Port::D, 0x00, 10);
        g.write_port(Port::D, 0xF0, 10);
        kp.scan(&mut g, 10);
        assert_eq!(g.external_level(c0), Some(false));
        assert!(!col(&g, 0));

        // An untouched line is released back to its pull-up
        kp.set_key(0, 1, true);
        g.write_ddr(Port::D, 0x10, 20);
        g.write_port(Port::D, 0xE0, 20);
        kp.scan(&mut g, 20);
        assert!(!col(&g, 1));
        kp.set_key(0, 1, false);
        kp.scan(&mut g, 30);
        assert_eq!(g.external_level(Pin::new(Port::B, 1)), None);
        assert!(col(&g, 1));
    }

    #[test]
    fn test_labels() {
        assert_eq!(Keypad::locate('#'), Some((3, 2)));
        assert_eq!(Keypad::locate('b'), Some((1, 3)));
        assert_eq!(Keypad::locate('x'), None);
        let mut kp = Keypad::default();
        assert!(!kp.handle_event("press", &json!("?")));
        assert!(!kp.handle_event("hold", &json!("1")));
    }
}
