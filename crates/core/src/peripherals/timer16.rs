//! 16-bit Timer/Counter1.
//!
//! All sixteen waveform modes resolve to a TOP value and a single- or
//! dual-slope count. 16-bit registers go through the shared TEMP byte the
//! way the hardware does: the high byte is written first and latched, the
//! low byte is read first and latches the high byte.
//!
//! The Servo library runs Timer1 in Normal mode with compare-A interrupts;
//! `analogWrite()` on D9/D10 uses 8-bit phase-correct PWM.

use serde::{Deserialize, Serialize};

use super::{INT_TIMER1_COMPA, INT_TIMER1_COMPB, INT_TIMER1_OVF};
use super::TimerChannel;
use crate::gpio::{Pin, Port};

const TIFR1: u16 = 0x36;
const TIMSK1: u16 = 0x6F;
const TCCR1A: u16 = 0x80;
const TCCR1B: u16 = 0x81;
const TCCR1C: u16 = 0x82;
const TCNT1L: u16 = 0x84;
const TCNT1H: u16 = 0x85;
const ICR1L: u16 = 0x86;
const ICR1H: u16 = 0x87;
const OCR1AL: u16 = 0x88;
const OCR1AH: u16 = 0x89;
const OCR1BL: u16 = 0x8A;
const OCR1BH: u16 = 0x8B;

const TOV: u8 = 0x01;
const OCFA: u8 = 0x02;
const OCFB: u8 = 0x04;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timer16 {
    tick: u64,
    tccra: u8,
    tccrb: u8,
    tcnt: u16,
    icr: u16,
    ocra: u16,
    ocrb: u16,
    timsk: u8,
    tifr: u8,
    /// High-byte latch shared by all 16-bit registers
    temp: u8,
    counting_down: bool,
}

impl Timer16 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn prescale(&self) -> u64 {
        [0, 1, 8, 64, 256, 1024, 0, 0][(self.tccrb & 7) as usize]
    }

    fn wgm(&self) -> u8 {
        (self.tccra & 3) | ((self.tccrb >> 1) & 0x0C)
    }

    fn top(&self) -> u16 {
        match self.wgm() {
            1 | 5 => 0x00FF,
            2 | 6 => 0x01FF,
            3 | 7 => 0x03FF,
            4 | 9 | 11 | 15 => self.ocra,
            8 | 10 | 12 | 14 => self.icr,
            _ => 0xFFFF,
        }
    }

    fn dual_slope(&self) -> bool {
        matches!(self.wgm(), 1 | 2 | 3 | 8 | 9 | 10 | 11)
    }

    pub fn write(&mut self, addr: u16, value: u8, tick: u64) -> bool {
        if !(addr == TIFR1 || addr == TIMSK1 || (TCCR1A..=OCR1BH).contains(&addr)) {
            return false;
        }
        self.advance(tick);
        let word = ((self.temp as u16) << 8) | value as u16;
        match addr {
            TIFR1 => self.tifr &= !value,
            TIMSK1 => self.timsk = value & 0x27,
            TCCR1A => self.tccra = value,
            TCCR1B => self.tccrb = value & 0xDF,
            TCCR1C => {}
            TCNT1H | ICR1H | OCR1AH | OCR1BH => self.temp = value,
            TCNT1L => self.tcnt = word,
            ICR1L => self.icr = word,
            OCR1AL => self.ocra = word,
            OCR1BL => self.ocrb = word,
            _ => {}
        }
        true
    }

    pub fn read(&mut self, addr: u16, tick: u64) -> Option<u8> {
        let v = match addr {
            TIFR1 => {
                self.advance(tick);
                self.tifr
            }
            TIMSK1 => self.timsk,
            TCCR1A => self.tccra,
            TCCR1B => self.tccrb,
            TCCR1C => 0,
            TCNT1L => {
                self.advance(tick);
                self.latch_low(self.tcnt)
            }
            ICR1L => self.latch_low(self.icr),
            OCR1AL => self.latch_low(self.ocra),
            OCR1BL => self.latch_low(self.ocrb),
            TCNT1H | ICR1H | OCR1AH | OCR1BH => self.temp,
            _ => return None,
        };
        Some(v)
    }

    /// Low-byte read: returns the low byte and latches the high byte.
    fn latch_low(&mut self, word: u16) -> u8 {
        self.temp = (word >> 8) as u8;
        word as u8
    }

    pub fn update(&mut self, tick: u64) {
        self.advance(tick);
    }

    fn advance(&mut self, tick: u64) {
        let ps = self.prescale();
        if ps == 0 {
            self.tick = tick;
            return;
        }
        let counts = tick.saturating_sub(self.tick) / ps;
        self.tick += counts * ps;
        for _ in 0..counts {
            self.count();
        }
    }

    fn count(&mut self) {
        let top = self.top();
        if self.dual_slope() {
            if self.counting_down {
                self.tcnt = self.tcnt.saturating_sub(1);
                if self.tcnt == 0 {
                    self.counting_down = false;
                    self.tifr |= TOV;
                }
            } else if self.tcnt >= top {
                self.counting_down = true;
                self.tcnt = top.saturating_sub(1);
            } else {
                self.tcnt += 1;
            }
        } else if self.tcnt == top {
            self.tcnt = 0;
            // CTC modes only overflow at MAX
            if !matches!(self.wgm(), 4 | 12) || top == 0xFFFF {
                self.tifr |= TOV;
            }
        } else {
            self.tcnt = self.tcnt.wrapping_add(1);
        }
        if self.tcnt == self.ocra {
            self.tifr |= OCFA;
        }
        if self.tcnt == self.ocrb {
            self.tifr |= OCFB;
        }
    }

    pub fn check_interrupt(&mut self) -> Option<u16> {
        let pending = self.tifr & self.timsk;
        for (flag, vector) in [(OCFA, INT_TIMER1_COMPA), (OCFB, INT_TIMER1_COMPB), (TOV, INT_TIMER1_OVF)] {
            if pending & flag != 0 {
                self.tifr &= !flag;
                return Some(vector);
            }
        }
        None
    }

    pub fn output_pin(&self, ch: TimerChannel) -> Pin {
        match ch {
            TimerChannel::A => Pin::new(Port::B, 1),
            TimerChannel::B => Pin::new(Port::B, 2),
        }
    }

    pub fn pwm_duty(&self, ch: TimerChannel) -> Option<f64> {
        let (com, ocr) = match ch {
            TimerChannel::A => (self.tccra >> 6, self.ocra),
            TimerChannel::B => ((self.tccra >> 4) & 3, self.ocrb),
        };
        let wgm = self.wgm();
        if com < 2 || self.prescale() == 0 || matches!(wgm, 0 | 4 | 12 | 13) {
            return None;
        }
        let top = self.top() as f64;
        if top == 0.0 {
            return None;
        }
        let duty = if self.dual_slope() {
            ocr as f64 / top
        } else {
            (ocr as f64 + 1.0) / (top + 1.0)
        };
        let duty = duty.clamp(0.0, 1.0);
        Some(if com == 3 { 1.0 - duty } else { duty })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixteen_bit_temp_register() {
        let mut t = Timer16::new();
        t.write(OCR1AH, 0x12, 0);
        t.write(OCR1AL, 0x34, 0);
        assert_eq!(t.read(OCR1AL, 0), Some(0x34));
        assert_eq!(t.read(OCR1AH, 0), Some(0x12));
    }

    #[test]
    fn test_ctc_on_ocr1a() {
        let mut t = Timer16::new();
        // WGM 4, clk/8, OCR1A = 1999 → 1 kHz compare rate
        t.write(OCR1AH, (1999u16 >> 8) as u8, 0);
        t.write(OCR1AL, (1999u16 & 0xFF) as u8, 0);
        t.write(TIMSK1, 0x02, 0);
        t.write(TCCR1B, 0x0A, 0);
        t.update(8 * 1999);
        assert_eq!(t.check_interrupt(), Some(INT_TIMER1_COMPA));
        t.update(8 * 2000);
        assert_eq!(t.read(TCNT1L, 8 * 2000), Some(0));
        assert_eq!(t.read(TIFR1, 8 * 2000).map(|f| f & TOV), Some(0));
    }

    #[test]
    fn test_phase_correct_8bit_pwm_duty() {
        let mut t = Timer16::new();
        t.write(TCCR1A, 0x81, 0); // COM1A1, WGM10
        t.write(TCCR1B, 0x03, 0);
        t.write(OCR1AH, 0, 0);
        t.write(OCR1AL, 51, 0);
        let duty = t.pwm_duty(TimerChannel::A).unwrap();
        assert!((duty - 0.2).abs() < 1e-9);
        assert_eq!(t.output_pin(TimerChannel::A), Pin::new(Port::B, 1));
    }

    #[test]
    fn test_normal_mode_overflow() {
        let mut t = Timer16::new();
        t.write(TIMSK1, 0x01, 0);
        t.write(TCCR1B, 0x01, 0);
        t.update(0x1_0000);
        assert_eq!(t.check_interrupt(), Some(INT_TIMER1_OVF));
    }
}
