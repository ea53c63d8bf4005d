//! 10-bit analog-to-digital converter.
//!
//! Setting ADSC starts a conversion of the channel selected by ADMUX. The
//! result is sampled from [`Gpio::channel_voltage`] when the conversion
//! completes, 13 ADC clocks later (25 for the first conversion after
//! enabling). ADSC reads back as 1 until then, which is what
//! `analogRead()` polls on.

use serde::{Deserialize, Serialize};

use super::INT_ADC;
use crate::gpio::Gpio;
use crate::VCC;

const ADCL: u16 = 0x78;
const ADCH: u16 = 0x79;
const ADCSRA: u16 = 0x7A;
const ADCSRB: u16 = 0x7B;
const ADMUX: u16 = 0x7C;

// ADCSRA
const ADEN: u8 = 0x80;
const ADSC: u8 = 0x40;
const ADATE: u8 = 0x20;
const ADIF: u8 = 0x10;
const ADIE: u8 = 0x08;
// ADMUX
const ADLAR: u8 = 0x20;

const BANDGAP_V: f64 = 1.1;
/// Internal temperature sensor output at 25 °C (≈314 LSB against 1.1 V).
const TEMP_SENSOR_V: f64 = 0.3375;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Adc {
    adcsra: u8,
    adcsrb: u8,
    admux: u8,
    result: u16,
    /// Completion cycle of the running conversion
    done_at: Option<u64>,
    converted_once: bool,
}

impl Adc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn prescale(&self) -> u64 {
        match self.adcsra & 7 {
            0 | 1 => 2,
            n => 1 << n,
        }
    }

    fn start(&mut self, tick: u64) {
        let clocks = if self.converted_once { 13 } else { 25 };
        self.done_at = Some(tick + clocks * self.prescale());
        self.adcsra |= ADSC;
    }

    pub fn write(&mut self, addr: u16, value: u8, tick: u64) -> bool {
        match addr {
            ADCSRA => {
                // ADIF is cleared by writing one
                let flag = if value & ADIF != 0 { 0 } else { self.adcsra & ADIF };
                let running = self.adcsra & ADSC;
                self.adcsra = (value & !(ADIF | ADSC)) | flag | running;
                if value & ADEN == 0 {
                    self.adcsra &= !ADSC;
                    self.done_at = None;
                    self.converted_once = false;
                } else if value & ADSC != 0 && running == 0 {
                    self.start(tick);
                }
            }
            ADCSRB => self.adcsrb = value,
            ADMUX => self.admux = value,
            _ => return false,
        }
        true
    }

    pub fn read(&self, addr: u16) -> Option<u8> {
        let adj = if self.admux & ADLAR != 0 { self.result << 6 } else { self.result };
        match addr {
            ADCL => Some(adj as u8),
            ADCH => Some((adj >> 8) as u8),
            ADCSRA => Some(self.adcsra),
            ADCSRB => Some(self.adcsrb),
            ADMUX => Some(self.admux),
            _ => None,
        }
    }

    fn sample(&self, gpio: &Gpio) -> u16 {
        let vin = match self.admux & 0x0F {
            ch @ 0..=7 => gpio.channel_voltage(ch),
            8 => TEMP_SENSOR_V,
            14 => BANDGAP_V,
            _ => 0.0,
        };
        let vref = match self.admux >> 6 {
            3 => BANDGAP_V,
            _ => VCC,
        };
        ((vin / vref) * 1024.0).clamp(0.0, 1023.0) as u16
    }

    pub fn update(&mut self, tick: u64, gpio: &Gpio) {
        let Some(done) = self.done_at else { return };
        if tick < done {
            return;
        }
        self.result = self.sample(gpio);
        self.converted_once = true;
        self.adcsra = (self.adcsra & !ADSC) | ADIF;
        self.done_at = None;
        // Free-running mode restarts immediately
        if self.adcsra & ADATE != 0 && self.adcsrb & 7 == 0 {
            self.start(done);
        }
    }

    pub fn check_interrupt(&mut self) -> Option<u16> {
        if self.adcsra & (ADIF | ADIE) == ADIF | ADIE {
            self.adcsra &= !ADIF;
            return Some(INT_ADC);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{Pin, Port};

    #[test]
    fn test_analog_read_sequence() {
        let mut gpio = Gpio::new();
        gpio.set_voltage(Pin::new(Port::C, 2), 2.5, 0);
        let mut adc = Adc::new();
        // analogRead(A2): AVcc reference, /128 prescaler
        adc.write(ADMUX, 0x42, 0);
        adc.write(ADCSRA, ADEN | ADSC | 7, 0);
        adc.update(24 * 128, &gpio);
        assert_eq!(adc.read(ADCSRA).map(|v| v & ADSC), Some(ADSC));
        adc.update(25 * 128, &gpio);
        assert_eq!(adc.read(ADCSRA).map(|v| v & ADSC), Some(0));
        let lo = adc.read(ADCL).unwrap() as u16;
        let hi = adc.read(ADCH).unwrap() as u16;
        assert_eq!((hi << 8) | lo, 512);
    }

    #[test]
    fn test_left_adjust_and_interrupt() {
        let mut gpio = Gpio::new();
        gpio.set_voltage(Pin::new(Port::C, 0), 5.0, 0);
        let mut adc = Adc::new();
        adc.write(ADMUX, 0x40 | ADLAR, 0);
        adc.write(ADCSRA, ADEN | ADSC | ADIE | 2, 0);
        adc.update(1000, &gpio);
        assert_eq!(adc.read(ADCH), Some(0xFF));
        assert_eq!(adc.check_interrupt(), Some(INT_ADC));
        assert_eq!(adc.check_interrupt(), None);
    }

    #[test]
    fn test_bandgap_channel() {
        let gpio = Gpio::new();
        let mut adc = Adc::new();
        adc.write(ADMUX, 0x4E, 0);
        adc.write(ADCSRA, ADEN | ADSC, 0);
        adc.update(100, &gpio);
        let v = adc.read(ADCL).unwrap() as u16 | ((adc.read(ADCH).unwrap() as u16) << 8);
        assert_eq!(v, 225);
    }
}
