//! WS2812 addressable LED chain, decoded from its self-clocked data line.
//!
//! Every bit starts with a rising edge; the length of the high time decides
//! its value. Bits are collected MSB first into bytes and bytes into pixels
//! in green, red, blue order. A long enough low period latches the frame.

use super::{PinWatch, Wiring};
use crate::gpio::{Gpio, Pin, PortChange};
use crate::us_to_cycles;

/// High time classified as a `0` bit, in cycles.
pub const ZERO_HIGH: std::ops::RangeInclusive<u64> = 2..=9;
/// High time classified as a `1` bit, in cycles.
pub const ONE_HIGH: std::ops::RangeInclusive<u64> = 10..=24;
/// Low time that latches the received frame.
pub const RESET_LOW: u64 = us_to_cycles(50);

#[derive(Debug, Clone)]
pub struct Ws2812 {
    din: PinWatch,
    last_rise: u64,
    last_fall: u64,
    byte: u8,
    nbits: u8,
    bytes: Vec<u8>,
    /// A bit arrived since the last latch
    pending: bool,
    /// Packed 0xRRGGBB per pixel
    pixels: Vec<u32>,
    frames: u64,
}

impl Ws2812 {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let count = w.attr_f64("pixels").unwrap_or(0.0).max(0.0) as usize;
        let mut strip = Ws2812::new(w.pin("DIN"));
        strip.pixels.resize(count, 0);
        strip
    }

    pub fn new(din: Option<Pin>) -> Self {
        Ws2812 {
            din: PinWatch::new(din),
            last_rise: 0,
            last_fall: 0,
            byte: 0,
            nbits: 0,
            bytes: Vec::new(),
            pending: false,
            pixels: Vec::new(),
            frames: 0,
        }
    }

    /// Colours shown since the last latched frame.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub(crate) fn attach(&mut self, gpio: &Gpio) {
        self.din.sync(gpio);
    }

    pub(crate) fn port_written(&mut self, gpio: &mut Gpio, change: &PortChange) {
        if !self.din.on_port(change) {
            return;
        }
        let now = change.cycle;
        match self.din.poll(gpio) {
            Some(true) => {
                if self.pending && now.saturating_sub(self.last_fall) >= RESET_LOW {
                    self.latch();
                }
                self.last_rise = now;
            }
            Some(false) => {
                let high = now.saturating_sub(self.last_rise);
                if ZERO_HIGH.contains(&high) {
                    self.push_bit(false);
                } else if ONE_HIGH.contains(&high) {
                    self.push_bit(true);
                } else {
                    log::trace!("WS2812: {} cycle pulse is not a bit", high);
                }
                self.last_fall = now;
            }
            None => {}
        }
    }

    pub(crate) fn update(&mut self, _gpio: &mut Gpio, now: u64) {
        if self.pending && !self.din.level && now.saturating_sub(self.last_fall) >= RESET_LOW {
            self.latch();
        }
    }

    fn push_bit(&mut self, bit: bool) {
        self.pending = true;
        self.byte = (self.byte << 1) | bit as u8;
        self.nbits += 1;
        if self.nbits == 8 {
            self.bytes.push(self.byte);
            self.byte = 0;
            self.nbits = 0;
        }
    }

    fn latch(&mut self) {
        let received = self.bytes.len() / 3;
        if self.pixels.len() < received {
            self.pixels.resize(received, 0);
        }
        for (px, grb) in self.pixels.iter_mut().zip(self.bytes.chunks_exact(3)) {
            let (g, r, b) = (grb[0] as u32, grb[1] as u32, grb[2] as u32);
            *px = (r << 16) | (g << 8) | b;
        }
        self.frames += 1;
        log::trace!("WS2812: frame {} with {} pixels", self.frames, received);
        self.bytes.clear();
        self.byte = 0;
        self.nbits = 0;
        self.pending = false;
    }
}
