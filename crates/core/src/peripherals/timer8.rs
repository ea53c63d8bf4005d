//! 8-bit Timer/Counter0 and Timer/Counter2.
//!
//! Counts lazily: the counter is brought up to date whenever one of its
//! registers is touched or [`Timer8::update`] runs. Supports Normal, CTC,
//! Fast PWM and Phase Correct PWM with overflow and compare-match A/B
//! interrupts. The Arduino core runs `millis()` off Timer0 in Fast PWM
//! mode with a /64 prescaler.

use serde::{Deserialize, Serialize};

use super::{
    INT_TIMER0_COMPA, INT_TIMER0_COMPB, INT_TIMER0_OVF, INT_TIMER2_COMPA, INT_TIMER2_COMPB,
    INT_TIMER2_OVF,
};
use crate::gpio::{Pin, Port};

const TOV: u8 = 0x01;
const OCFA: u8 = 0x02;
const OCFB: u8 = 0x04;

/// Output-compare channel of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerChannel {
    A,
    B,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Timer8Regs {
    tifr: u16,
    tccra: u16,
    tccrb: u16,
    tcnt: u16,
    ocra: u16,
    ocrb: u16,
    timsk: u16,
    vec_compa: u16,
    vec_compb: u16,
    vec_ovf: u16,
    /// Timer2 has the extended /32 and /128 prescaler table
    async_prescaler: bool,
    oc_a: Pin,
    oc_b: Pin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer8 {
    regs: Timer8Regs,
    /// Cycle the counter state corresponds to
    tick: u64,
    tccra: u8,
    tccrb: u8,
    tcnt: u8,
    ocra: u8,
    ocrb: u8,
    timsk: u8,
    tifr: u8,
    counting_down: bool,
}

impl Timer8 {
    fn with_regs(regs: Timer8Regs) -> Self {
        Timer8 {
            regs,
            tick: 0,
            tccra: 0,
            tccrb: 0,
            tcnt: 0,
            ocra: 0,
            ocrb: 0,
            timsk: 0,
            tifr: 0,
            counting_down: false,
        }
    }

    pub fn timer0() -> Self {
        Self::with_regs(Timer8Regs {
            tifr: 0x35,
            tccra: 0x44,
            tccrb: 0x45,
            tcnt: 0x46,
            ocra: 0x47,
            ocrb: 0x48,
            timsk: 0x6E,
            vec_compa: INT_TIMER0_COMPA,
            vec_compb: INT_TIMER0_COMPB,
            vec_ovf: INT_TIMER0_OVF,
            async_prescaler: false,
            oc_a: Pin::new(Port::D, 6),
            oc_b: Pin::new(Port::D, 5),
        })
    }

    pub fn timer2() -> Self {
        Self::with_regs(Timer8Regs {
            tifr: 0x37,
            tccra: 0xB0,
            tccrb: 0xB1,
            tcnt: 0xB2,
            ocra: 0xB3,
            ocrb: 0xB4,
            timsk: 0x70,
            vec_compa: INT_TIMER2_COMPA,
            vec_compb: INT_TIMER2_COMPB,
            vec_ovf: INT_TIMER2_OVF,
            async_prescaler: true,
            oc_a: Pin::new(Port::B, 3),
            oc_b: Pin::new(Port::D, 3),
        })
    }

    pub fn reset(&mut self) {
        *self = Self::with_regs(self.regs);
    }

    fn prescale(&self) -> u64 {
        let cs = self.tccrb & 7;
        if self.regs.async_prescaler {
            [0, 1, 8, 32, 64, 128, 256, 1024][cs as usize]
        } else {
            // 6 and 7 select the external T0 pin, which is not clocked here
            [0, 1, 8, 64, 256, 1024, 0, 0][cs as usize]
        }
    }

    fn wgm(&self) -> u8 {
        (self.tccra & 3) | ((self.tccrb >> 1) & 4)
    }

    fn top(&self) -> u8 {
        match self.wgm() {
            2 | 5 | 7 => self.ocra,
            _ => 0xFF,
        }
    }

    /// Handle writes to timer registers. Returns true if addr was handled.
    pub fn write(&mut self, addr: u16, value: u8, tick: u64) -> bool {
        let r = self.regs;
        if ![r.tifr, r.tccra, r.tccrb, r.tcnt, r.ocra, r.ocrb, r.timsk].contains(&addr) {
            return false;
        }
        self.advance(tick);
        if addr == r.tifr {
            // Writing 1 clears the flag
            self.tifr &= !value;
        } else if addr == r.tccra {
            self.tccra = value;
        } else if addr == r.tccrb {
            self.tccrb = value & 0x0F;
        } else if addr == r.tcnt {
            self.tcnt = value;
        } else if addr == r.ocra {
            self.ocra = value;
        } else if addr == r.ocrb {
            self.ocrb = value;
        } else {
            self.timsk = value & 7;
        }
        true
    }

    /// Handle reads from timer registers. Returns Some(value) if handled.
    pub fn read(&mut self, addr: u16, tick: u64) -> Option<u8> {
        let r = self.regs;
        let v = if addr == r.tifr {
            self.advance(tick);
            self.tifr
        } else if addr == r.tcnt {
            self.advance(tick);
            self.tcnt
        } else if addr == r.tccra {
            self.tccra
        } else if addr == r.tccrb {
            self.tccrb
        } else if addr == r.ocra {
            self.ocra
        } else if addr == r.ocrb {
            self.ocrb
        } else if addr == r.timsk {
            self.timsk
        } else {
            return None;
        };
        Some(v)
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
        let wgm = self.wgm();
        let top = self.top();
        if wgm == 1 || wgm == 5 {
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
            if wgm != 2 || top == 0xFF {
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

    /// Check for pending interrupts. Priority: COMPA > COMPB > OVF.
    pub fn check_interrupt(&mut self) -> Option<u16> {
        let pending = self.tifr & self.timsk;
        let r = self.regs;
        for (flag, vector) in [(OCFA, r.vec_compa), (OCFB, r.vec_compb), (TOV, r.vec_ovf)] {
            if pending & flag != 0 {
                self.tifr &= !flag;
                return Some(vector);
            }
        }
        None
    }

    /// Pin driven by an output-compare channel.
    pub fn output_pin(&self, ch: TimerChannel) -> Pin {
        match ch {
            TimerChannel::A => self.regs.oc_a,
            TimerChannel::B => self.regs.oc_b,
        }
    }

    /// Duty cycle of hardware PWM on a channel, if the channel owns its pin.
    pub fn pwm_duty(&self, ch: TimerChannel) -> Option<f64> {
        let (com, ocr) = match ch {
            TimerChannel::A => (self.tccra >> 6, self.ocra),
            TimerChannel::B => ((self.tccra >> 4) & 3, self.ocrb),
        };
        if com < 2 || self.prescale() == 0 {
            return None;
        }
        let top = self.top() as f64;
        let duty = match self.wgm() {
            3 | 7 => (ocr as f64 + 1.0) / (top + 1.0),
            1 | 5 if top > 0.0 => ocr as f64 / top,
            _ => return None,
        };
        let duty = duty.clamp(0.0, 1.0);
        Some(if com == 3 { 1.0 - duty } else { duty })
    }
}
