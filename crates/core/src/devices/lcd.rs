//! HD44780 character LCD on a parallel bus.
//!
//! The controller latches RS and the data lines on the falling edge of E.
//! It powers up in 8-bit mode; with only D4–D7 wired each strobe then
//! carries the upper four bits of a byte, which is how the 4-bit init
//! sequence reaches the function-set command that switches modes. In 4-bit
//! mode a byte arrives as two strobes, high nibble first.

use super::{PinWatch, Wiring};
use crate::gpio::{Gpio, Pin, PortChange};

/// DDRAM address of the first cell of each display row.
const ROW_OFFSETS: [u8; 4] = [0x00, 0x40, 0x14, 0x54];

#[derive(Debug, Clone)]
pub struct Lcd {
    cols: u8,
    rows: u8,
    rs: Option<Pin>,
    enable: PinWatch,
    /// D0–D7; D0–D3 are None when wired for 4-bit mode
    data: [Option<Pin>; 8],
    four_bit: bool,
    /// High nibble waiting for its partner in 4-bit mode
    pending: Option<u8>,
    cells: Vec<u8>,
    cgram: [u8; 64],
    /// Data writes go to CGRAM until the next DDRAM address set
    cgram_addr: Option<u8>,
    row: u8,
    col: u8,
    increment: bool,
    display_on: bool,
    cursor_on: bool,
    blink_on: bool,
}

impl Lcd {
    pub(crate) fn wire(w: &Wiring, cols: u8, rows: u8) -> Self {
        let mut data = [None; 8];
        for (i, slot) in data.iter_mut().enumerate() {
            let name = format!("D{}", i);
            *slot = if i < 4 { w.optional_pin(&name) } else { w.pin(&name) };
        }
        Lcd::new(cols, rows, w.pin("RS"), w.pin("E"), data)
    }

    pub fn new(cols: u8, rows: u8, rs: Option<Pin>, enable: Option<Pin>, data: [Option<Pin>; 8]) -> Self {
        let cols = cols.clamp(1, 40);
        let rows = rows.clamp(1, ROW_OFFSETS.len() as u8);
        Lcd {
            cols,
            rows,
            rs,
            enable: PinWatch::new(enable),
            data,
            four_bit: false,
            pending: None,
            cells: vec![b' '; cols as usize * rows as usize],
            cgram: [0; 64],
            cgram_addr: None,
            row: 0,
            col: 0,
            increment: true,
            display_on: false,
            cursor_on: false,
            blink_on: false,
        }
    }

    pub fn cols(&self) -> u8 {
        self.cols
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    pub fn cursor(&self) -> (u8, u8) {
        (self.row, self.col)
    }

    pub fn is_four_bit(&self) -> bool {
        self.four_bit
    }

    pub fn display_on(&self) -> bool {
        self.display_on
    }

    pub fn cursor_visible(&self) -> (bool, bool) {
        (self.cursor_on, self.blink_on)
    }

    /// Raw character codes of one row.
    pub fn row_bytes(&self, row: u8) -> &[u8] {
        let start = row.min(self.rows - 1) as usize * self.cols as usize;
        &self.cells[start..start + self.cols as usize]
    }

    /// Text of one row. Codes outside printable ASCII become `?`.
    pub fn row_text(&self, row: u8) -> String {
        self.row_bytes(row)
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '?' })
            .collect()
    }

    pub fn text(&self) -> Vec<String> {
        (0..self.rows).map(|r| self.row_text(r)).collect()
    }

    /// Custom character pattern for code 0–7.
    pub fn glyph(&self, code: u8) -> &[u8] {
        let start = (code & 7) as usize * 8;
        &self.cgram[start..start + 8]
    }

    pub(crate) fn attach(&mut self, gpio: &Gpio) {
        self.enable.sync(gpio);
    }

    pub(crate) fn port_written(&mut self, gpio: &mut Gpio, change: &PortChange) {
        if !self.enable.on_port(change) {
            return;
        }
        if self.enable.poll(gpio) == Some(false) {
            self.strobe(gpio);
        }
    }

    fn strobe(&mut self, gpio: &Gpio) {
        let level = |p: Option<Pin>| p.is_some_and(|p| gpio.level(p));
        let rs = level(self.rs);
        let high = (4..8).fold(0u8, |acc, i| acc | ((level(self.data[i]) as u8) << (i - 4)));
        let wired_low = self.data[..4].iter().any(Option::is_some);

        let byte = if self.four_bit {
            match self.pending.take() {
                Some(h) => (h << 4) | high,
                None => {
                    self.pending = Some(high);
                    return;
                }
            }
        } else if wired_low {
            let low = (0..4).fold(0u8, |acc, i| acc | ((level(self.data[i]) as u8) << i));
            (high << 4) | low
        } else {
            high << 4
        };

        if rs {
            self.write_data(byte);
        } else {
            self.command(byte);
        }
    }

    fn command(&mut self, cmd: u8) {
        match cmd {
            0x80..=0xFF => {
                self.cgram_addr = None;
                self.set_ddram_addr(cmd & 0x7F);
            }
            0x40..=0x7F => self.cgram_addr = Some(cmd & 0x3F),
            0x20..=0x3F => {
                // Function set: DL selects the bus width
                let four = cmd & 0x10 == 0;
                if four != self.four_bit {
                    log::debug!("LCD: {}-bit mode", if four { 4 } else { 8 });
                }
                self.four_bit = four;
                self.pending = None;
            }
            0x10..=0x1F => {
                // Cursor/display shift; only cursor moves are tracked
                if cmd & 0x08 == 0 {
                    self.step_cursor(cmd & 0x04 != 0);
                }
            }
            0x08..=0x0F => {
                self.display_on = cmd & 0x04 != 0;
                self.cursor_on = cmd & 0x02 != 0;
                self.blink_on = cmd & 0x01 != 0;
            }
            0x04..=0x07 => self.increment = cmd & 0x02 != 0,
            0x02 | 0x03 => {
                self.row = 0;
                self.col = 0;
            }
            0x01 => {
                self.cells.fill(b' ');
                self.row = 0;
                self.col = 0;
                self.increment = true;
            }
            _ => {}
        }
    }

    fn set_ddram_addr(&mut self, addr: u8) {
        let row = (0..self.rows as usize)
            .rev()
            .find(|&r| addr >= ROW_OFFSETS[r] && addr < ROW_OFFSETS[r] + self.cols)
            .unwrap_or(if addr >= 0x40 { 1 } else { 0 });
        let row = (row as u8).min(self.rows - 1);
        self.row = row;
        self.col = addr.wrapping_sub(ROW_OFFSETS[row as usize]) % self.cols;
    }

    fn write_data(&mut self, byte: u8) {
        if let Some(addr) = self.cgram_addr {
            self.cgram[addr as usize] = byte & 0x1F;
            self.cgram_addr = Some((addr + 1) & 0x3F);
            return;
        }
        let idx = self.row as usize * self.cols as usize + self.col as usize;
        if let Some(cell) = self.cells.get_mut(idx) {
            *cell = byte;
        }
        self.step_cursor(self.increment);
    }

    /// Move one cell, wrapping at the row width and the last row.
    fn step_cursor(&mut self, forward: bool) {
        if forward {
            self.col += 1;
            if self.col >= self.cols {
                self.col = 0;
                self.row = (self.row + 1) % self.rows;
            }
        } else if self.col > 0 {
            self.col -= 1;
        } else {
            self.col = self.cols - 1;
            self.row = self.row.checked_sub(1).unwrap_or(self.rows - 1);
        }
    }
}
