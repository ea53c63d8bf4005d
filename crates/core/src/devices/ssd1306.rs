//! SSD1306 128×64 monochrome OLED controller on I2C.
//!
//! Keeps the 1 KB page-addressed GDDRAM: byte `page * 128 + column` holds
//! eight vertically stacked pixels, LSB on top. Every I2C write starts with
//! a control byte whose Co bit says whether another control byte follows
//! the next byte and whose D/C# bit selects data or command.

use super::Wiring;
use crate::i2c::I2cDevice;

pub const WIDTH: usize = 128;
pub const HEIGHT: usize = 64;
const PAGES: u8 = (HEIGHT / 8) as u8;
pub const DEFAULT_ADDRESS: u8 = 0x3C;

const CO: u8 = 0x80;
const DC: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Horizontal,
    Vertical,
    Page,
}

/// Parameter bytes still owed to a multi-byte command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdState {
    Ready,
    AddressingMode,
    ColStart,
    ColEnd,
    PageStart,
    PageEnd,
    Contrast,
    Skip(u8),
}

#[derive(Debug, Clone)]
pub struct Ssd1306 {
    address: u8,
    vram: Vec<u8>,
    col: u8,
    page: u8,
    col_start: u8,
    col_end: u8,
    page_start: u8,
    page_end: u8,
    mode: AddressingMode,
    cmd_state: CmdState,
    inverted: bool,
    display_on: bool,
    segment_remap: bool,
    com_reversed: bool,
    contrast: u8,
    /// Expecting a control byte next
    want_control: bool,
    /// Bytes after the current control byte are data
    data_mode: bool,
    /// Co was set: one byte, then another control byte
    single: bool,
    selected: bool,
    frames: u64,
}

fn parse_address(text: &str) -> Option<u8> {
    let t = text.trim();
    match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => t.parse().ok(),
    }
}

impl Default for Ssd1306 {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

impl Ssd1306 {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let address = w
            .component
            .attr_str("i2cAddress")
            .and_then(parse_address)
            .or_else(|| w.attr_f64("i2cAddress").map(|a| a as u8))
            .unwrap_or(DEFAULT_ADDRESS);
        Ssd1306::new(address)
    }

    pub fn new(address: u8) -> Self {
        Ssd1306 {
            address,
            vram: vec![0; WIDTH * HEIGHT / 8],
            col: 0,
            page: 0,
            col_start: 0,
            col_end: (WIDTH - 1) as u8,
            page_start: 0,
            page_end: PAGES - 1,
            mode: AddressingMode::Page,
            cmd_state: CmdState::Ready,
            inverted: false,
            display_on: false,
            segment_remap: false,
            com_reversed: false,
            contrast: 0x7F,
            want_control: true,
            data_mode: false,
            single: false,
            selected: false,
            frames: 0,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Raw GDDRAM, one byte per 8-pixel column strip.
    pub fn buffer(&self) -> &[u8] {
        &self.vram
    }

    pub fn is_on(&self) -> bool {
        self.display_on
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn contrast(&self) -> u8 {
        self.contrast
    }

    pub fn addressing_mode(&self) -> AddressingMode {
        self.mode
    }

    /// Number of data transfers that ended with a STOP.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Lit state of a pixel in GDDRAM order, honoring inversion.
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        if x >= WIDTH || y >= HEIGHT {
            return false;
        }
        let on = self.vram[(y / 8) * WIDTH + x] & (1 << (y % 8)) != 0;
        on ^ self.inverted
    }

    /// Segment remap (0xA1) and COM scan reversal (0xC8) as last set.
    pub fn orientation(&self) -> (bool, bool) {
        (self.segment_remap, self.com_reversed)
    }

    pub fn receive_command(&mut self, byte: u8) {
        match self.cmd_state {
            CmdState::AddressingMode => {
                self.mode = match byte & 0x03 {
                    0 => AddressingMode::Horizontal,
                    1 => AddressingMode::Vertical,
                    _ => AddressingMode::Page,
                };
                self.cmd_state = CmdState::Ready;
                return;
            }
            CmdState::ColStart => {
                self.col_start = byte & 0x7F;
                self.col = self.col_start;
                self.cmd_state = CmdState::ColEnd;
                return;
            }
            CmdState::ColEnd => {
                self.col_end = (byte & 0x7F).max(self.col_start);
                self.cmd_state = CmdState::Ready;
                return;
            }
            CmdState::PageStart => {
                self.page_start = byte & 0x07;
                self.page = self.page_start;
                self.cmd_state = CmdState::PageEnd;
                return;
            }
            CmdState::PageEnd => {
                self.page_end = (byte & 0x07).max(self.page_start);
                self.cmd_state = CmdState::Ready;
                return;
            }
            CmdState::Contrast => {
                self.contrast = byte;
                self.cmd_state = CmdState::Ready;
                return;
            }
            CmdState::Skip(n) => {
                self.cmd_state = if n > 1 { CmdState::Skip(n - 1) } else { CmdState::Ready };
                return;
            }
            CmdState::Ready => {}
        }

        match byte {
            0x00..=0x0F => self.col = (self.col & 0xF0) | byte,
            0x10..=0x1F => self.col = ((byte & 0x07) << 4) | (self.col & 0x0F),
            0x20 => self.cmd_state = CmdState::AddressingMode,
            0x21 => self.cmd_state = CmdState::ColStart,
            0x22 => self.cmd_state = CmdState::PageStart,
            0x81 => self.cmd_state = CmdState::Contrast,
            0xB0..=0xB7 => self.page = byte & 0x07,
            0xA0 | 0xA1 => self.segment_remap = byte & 1 != 0,
            0xC0 => self.com_reversed = false,
            0xC8 => self.com_reversed = true,
            0xA6 => self.inverted = false,
            0xA7 => self.inverted = true,
            0xAE => self.display_on = false,
            0xAF => self.display_on = true,
            // Scrolling setup
            0x26 | 0x27 => self.cmd_state = CmdState::Skip(6),
            0x29 | 0x2A => self.cmd_state = CmdState::Skip(5),
            0xA3 => self.cmd_state = CmdState::Skip(2),
            // One parameter: multiplex, offset, clock, precharge, COM pins,
            // VCOMH, charge pump
            0xA8 | 0xD3 | 0xD5 | 0xD9 | 0xDA | 0xDB | 0x8D => self.cmd_state = CmdState::Skip(1),
            _ => {}
        }
    }

    pub fn receive_data(&mut self, byte: u8) {
        let idx = self.page as usize * WIDTH + self.col as usize;
        if let Some(cell) = self.vram.get_mut(idx) {
            *cell = byte;
        }
        match self.mode {
            AddressingMode::Horizontal => {
                if self.col >= self.col_end {
                    self.col = self.col_start;
                    self.page = if self.page >= self.page_end { self.page_start } else { self.page + 1 };
                } else {
                    self.col += 1;
                }
            }
            AddressingMode::Vertical => {
                if self.page >= self.page_end {
                    self.page = self.page_start;
                    self.col = if self.col >= self.col_end { self.col_start } else { self.col + 1 };
                } else {
                    self.page += 1;
                }
            }
            AddressingMode::Page => {
                self.col = if self.col as usize >= WIDTH - 1 { 0 } else { self.col + 1 };
            }
        }
    }
}

impl I2cDevice for Ssd1306 {
    fn start(&mut self) {
        self.want_control = true;
    }

    fn connect(&mut self, addr: u8, _write: bool) -> bool {
        self.selected = addr == self.address;
        self.want_control = true;
        self.selected
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        if self.want_control {
            self.single = byte & CO != 0;
            self.data_mode = byte & DC != 0;
            self.want_control = false;
            return true;
        }
        if self.data_mode {
            self.receive_data(byte);
        } else {
            self.receive_command(byte);
        }
        if self.single {
            self.want_control = true;
        }
        true
    }

    /// Status byte: bit 6 set while the panel is off.
    fn read_byte(&mut self, _ack: bool) -> u8 {
        if self.display_on {
            0x00
        } else {
            0x40
        }
    }

    fn stop(&mut self) {
        if self.selected && self.data_mode {
            self.frames += 1;
        }
        self.selected = false;
        self.want_control = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(d: &mut Ssd1306, bytes: &[u8]) {
        d.start();
        assert!(d.connect(DEFAULT_ADDRESS, true));
        for &b in bytes {
            assert!(d.write_byte(b));
        }
        d.stop();
    }

    #[test]
    fn test_ignores_other_addresses() {
        let mut d = Ssd1306::default();
        assert!(!d.connect(0x3D, true));
        assert_eq!(Ssd1306::new(0x3D).address(), 0x3D);
        assert_eq!(parse_address("0x3d"), Some(0x3D));
        assert_eq!(parse_address("60"), Some(60));
    }

    #[test]
    fn test_column_window_and_horizontal_wrap() {
        let mut d = Ssd1306::default();
        send(&mut d, &[0x00, 0x20, 0x00, 0x21, 10, 11, 0x22, 2, 3]);
        assert_eq!(d.addressing_mode(), AddressingMode::Horizontal);
        send(&mut d, &[0x40, 1, 2, 3, 4, 5]);
        let b = d.buffer();
        assert_eq!(b[2 * WIDTH + 11], 2);
        assert_eq!(b[3 * WIDTH + 10], 3);
        assert_eq!(b[3 * WIDTH + 11], 4);
        // The fifth byte wrapped back onto the window's first cell
        assert_eq!(b[2 * WIDTH + 10], 5);
        send(&mut d, &[0x40, 9]);
        assert_eq!(d.buffer()[2 * WIDTH + 11], 9);
        assert_eq!(d.frame_count(), 2);
    }

    #[test]
    fn test_vertical_addressing() {
        let mut d = Ssd1306::default();
        send(&mut d, &[0x00, 0x20, 0x01, 0x21, 0, 127, 0x22, 0, 7]);
        send(&mut d, &[0x40, 0xFF, 0x01]);
        assert!(d.pixel(0, 0) && d.pixel(0, 7));
        assert!(d.pixel(0, 8));
        assert!(!d.pixel(0, 9));
    }

    #[test]
    fn test_page_mode_and_co_bit() {
        let mut d = Ssd1306::default();
        // Co-framed single commands: page 3, column 0x25
        send(&mut d, &[0x80, 0xB3, 0x80, 0x05, 0x80, 0x12, 0xC0, 0x81]);
        assert_eq!(d.buffer()[3 * WIDTH + 0x25], 0x81);
        send(&mut d, &[0x00, 0x81, 0x10, 0xAF, 0xA7]);
        assert_eq!(d.contrast(), 0x10);
        assert!(d.is_on());
        // Inverted: unset pixels read lit
        assert!(d.pixel(0, 0));
        assert!(!d.pixel(0x25, 24));
    }

    #[test]
    fn test_scroll_parameters_consumed() {
        let mut d = Ssd1306::default();
        send(&mut d, &[0x00, 0x26, 0, 0, 0, 7, 0, 0xFF, 0xAF]);
        assert!(d.is_on());
    }
}
