//! ATmega328P memory spaces.
//!
//! | Address Range | Content                        |
//! |---------------|--------------------------------|
//! | 0x0000–0x001F | General registers R0–R31       |
//! | 0x0020–0x005F | I/O registers (IN/OUT space)   |
//! | 0x0060–0x00FF | Extended I/O registers         |
//! | 0x0100–0x08FF | SRAM (2048 bytes)              |
//!
//! Flash (32 KB) and EEPROM (1 KB) are separate address spaces.

use crate::{DATA_SIZE, EEPROM_SIZE, FLASH_SIZE};

/// One of the three 16-bit pointer registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    /// R27:R26
    X,
    /// R29:R28
    Y,
    /// R31:R30
    Z,
}

impl Pointer {
    fn low_reg(self) -> usize {
        match self {
            Pointer::X => 26,
            Pointer::Y => 28,
            Pointer::Z => 30,
        }
    }
}

pub struct Memory {
    /// Registers, I/O and SRAM in one flat array
    pub data: Vec<u8>,
    pub flash: Vec<u8>,
    pub eeprom: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            data: vec![0u8; DATA_SIZE],
            flash: vec![0xFFu8; FLASH_SIZE],
            eeprom: vec![0xFFu8; EEPROM_SIZE],
        }
    }

    /// Clear registers, I/O and SRAM. Flash and EEPROM survive a reset.
    pub fn clear_data(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }

    #[inline(always)]
    pub fn reg(&self, r: u8) -> u8 {
        self.data[(r & 0x1F) as usize]
    }

    #[inline(always)]
    pub fn set_reg(&mut self, r: u8, v: u8) {
        self.data[(r & 0x1F) as usize] = v;
    }

    /// Little-endian register pair starting at `r` (R(r+1):R(r)).
    #[inline(always)]
    pub fn reg_word(&self, r: u8) -> u16 {
        let r = (r & 0x1E) as usize;
        u16::from_le_bytes([self.data[r], self.data[r + 1]])
    }

    #[inline(always)]
    pub fn set_reg_word(&mut self, r: u8, v: u16) {
        let r = (r & 0x1E) as usize;
        let [lo, hi] = v.to_le_bytes();
        self.data[r] = lo;
        self.data[r + 1] = hi;
    }

    #[inline(always)]
    pub fn ptr(&self, p: Pointer) -> u16 {
        self.reg_word(p.low_reg() as u8)
    }

    #[inline(always)]
    pub fn set_ptr(&mut self, p: Pointer, v: u16) {
        self.set_reg_word(p.low_reg() as u8, v);
    }

    /// Flash word at a word address; erased (0xFFFF) past the end.
    #[inline(always)]
    pub fn program_word(&self, word_addr: usize) -> u16 {
        let b = word_addr * 2;
        match self.flash.get(b..b + 2) {
            Some(w) => u16::from_le_bytes([w[0], w[1]]),
            None => 0xFFFF,
        }
    }

    #[inline(always)]
    pub fn flash_byte(&self, byte_addr: usize) -> u8 {
        self.flash.get(byte_addr).copied().unwrap_or(0xFF)
    }

    /// Copy a program image to the start of flash, erasing the remainder.
    pub fn load_program(&mut self, image: &[u8]) {
        let n = image.len().min(self.flash.len());
        self.flash[..n].copy_from_slice(&image[..n]);
        self.flash[n..].iter_mut().for_each(|b| *b = 0xFF);
    }

    #[inline(always)]
    pub fn read_raw(&self, addr: u16) -> u8 {
        self.data.get(addr as usize).copied().unwrap_or(0)
    }

    #[inline(always)]
    pub fn write_raw(&mut self, addr: u16, v: u8) {
        if let Some(b) = self.data.get_mut(addr as usize) {
            *b = v;
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_registers() {
        let mut mem = Memory::new();
        mem.set_ptr(Pointer::Z, 0x1234);
        assert_eq!(mem.ptr(Pointer::Z), 0x1234);
        assert_eq!(mem.data[30], 0x34);
        assert_eq!(mem.data[31], 0x12);
        mem.set_ptr(Pointer::X, 0xBEEF);
        assert_eq!(mem.reg_word(26), 0xBEEF);
    }

    #[test]
    fn test_program_word_and_erased_tail() {
        let mut mem = Memory::new();
        mem.load_program(&[0x0C, 0x94]);
        assert_eq!(mem.program_word(0), 0x940C);
        assert_eq!(mem.program_word(1), 0xFFFF);
        assert_eq!(mem.program_word(FLASH_SIZE), 0xFFFF);
    }

    #[test]
    fn test_raw_access_out_of_range_is_ignored() {
        let mut mem = Memory::new();
        mem.write_raw(0xFFFF, 1);
        assert_eq!(mem.read_raw(0xFFFF), 0);
    }
}
