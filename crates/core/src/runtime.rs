//! The microcontroller: CPU, memories, ports and on-chip peripherals.
//!
//! [`Runtime`] owns everything inside the chip. Everything outside it is
//! reached through a [`Board`], which the caller passes into
//! [`Runtime::execute`]: port writes, transmitted serial bytes and TWI bus
//! transactions are delivered to the board in the same instruction that
//! causes them, so attached devices can answer before the firmware's next
//! read.

use crate::cpu::{Cpu, FLASH_WORDS};
use crate::error::{Result, SimError};
use crate::gpio::{Gpio, Pin, PortChange, Port, PortReg};
use crate::memory::Memory;
use crate::opcodes::decode;
use crate::peripherals::{Adc, EepromCtrl, Timer16, Timer8, TimerChannel, Twi, Usart};
use crate::{CLOCK_HZ, SPH_ADDR, SPL_ADDR, SREG_ADDR, SREG_I};

/// Cycles to vector into an interrupt handler.
const INTERRUPT_CYCLES: u64 = 4;

/// The world outside the chip.
///
/// Every hook has a no-op default so a board only implements what it
/// has wired up.
pub trait Board {
    /// Firmware changed DDRx or PORTx. `gpio` is the chip's port state,
    /// which the board may drive in response.
    fn port_written(&mut self, _gpio: &mut Gpio, _change: PortChange) {}

    /// Byte shifted out of USART0.
    fn serial_tx(&mut self, _byte: u8) {}

    fn i2c_start(&mut self) {}

    /// Address phase. Returns true if a device acknowledged.
    fn i2c_connect(&mut self, _addr: u8, _write: bool) -> bool {
        false
    }

    /// Master-transmit byte. Returns the device's ACK.
    fn i2c_write(&mut self, _byte: u8) -> bool {
        false
    }

    /// Master-receive byte. `ack` is what the master will answer.
    fn i2c_read(&mut self, _ack: bool) -> u8 {
        0xFF
    }

    fn i2c_stop(&mut self) {}
}

/// A board with nothing attached.
pub struct NullBoard;

impl Board for NullBoard {}

pub struct Runtime {
    pub cpu: Cpu,
    pub mem: Memory,
    pub gpio: Gpio,
    pub timer0: Timer8,
    pub timer1: Timer16,
    pub timer2: Timer8,
    pub usart: Usart,
    pub adc: Adc,
    pub twi: Twi,
    pub eeprom: EepromCtrl,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Runtime {
            cpu: Cpu::new(),
            mem: Memory::new(),
            gpio: Gpio::new(),
            timer0: Timer8::timer0(),
            timer1: Timer16::new(),
            timer2: Timer8::timer2(),
            usart: Usart::new(),
            adc: Adc::new(),
            twi: Twi::new(),
            eeprom: EepromCtrl::new(),
        }
    }

    /// Build a runtime with `image` at the start of flash.
    pub fn with_program(image: &[u8]) -> Self {
        let mut rt = Self::new();
        rt.mem.load_program(image);
        rt
    }

    /// Power-on reset. Flash and EEPROM contents are kept.
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        self.mem.clear_data();
        self.gpio = Gpio::new();
        self.timer0.reset();
        self.timer1.reset();
        self.timer2.reset();
        self.usart.reset();
        self.adc.reset();
        self.twi.reset();
        self.eeprom.reset();
    }

    /// Run `steps` instruction steps and return the cycles they took.
    ///
    /// A sleeping core spends one cycle per step. Peripherals are brought up
    /// to date after every step, and a pending interrupt is taken when the
    /// global enable was already set before the step (so the instruction
    /// after SEI or RETI always runs first).
    pub fn execute(&mut self, steps: u32, board: &mut dyn Board) -> Result<u64> {
        let start = self.cpu.tick;
        for _ in 0..steps {
            self.step(board)?;
        }
        Ok(self.cpu.tick - start)
    }

    fn step(&mut self, board: &mut dyn Board) -> Result<()> {
        let enabled = self.cpu.flag(SREG_I);
        if self.cpu.sleeping {
            self.cpu.tick += 1;
        } else {
            let pc = self.cpu.pc;
            if pc as usize >= FLASH_WORDS {
                return Err(SimError::PcOutOfRange { pc: pc as u32 });
            }
            let word = self.mem.program_word(pc as usize);
            let next = self.mem.program_word(pc as usize + 1);
            let inst = decode(word, next).ok_or(SimError::IllegalInstruction { pc, opcode: word })?;
            let cycles = self.execute_inst(inst, board)?;
            self.cpu.tick += cycles as u64;
        }
        self.update_peripherals();
        if enabled && self.cpu.flag(SREG_I) {
            if let Some(vector) = self.pending_interrupt() {
                self.enter_interrupt(vector);
            }
        }
        Ok(())
    }

    fn update_peripherals(&mut self) {
        let tick = self.cpu.tick;
        self.timer0.update(tick);
        self.timer1.update(tick);
        self.timer2.update(tick);
        self.adc.update(tick, &self.gpio);
        self.eeprom.update(tick);
    }

    /// Highest-priority pending source; lower vector numbers win.
    fn pending_interrupt(&mut self) -> Option<u16> {
        if let Some(v) = self.gpio.irq.check_interrupt() {
            return Some(v);
        }
        if let Some(v) = self.timer2.check_interrupt() {
            return Some(v);
        }
        if let Some(v) = self.timer1.check_interrupt() {
            return Some(v);
        }
        if let Some(v) = self.timer0.check_interrupt() {
            return Some(v);
        }
        if let Some(v) = self.usart.check_interrupt() {
            return Some(v);
        }
        if let Some(v) = self.adc.check_interrupt() {
            return Some(v);
        }
        if let Some(v) = self.eeprom.check_interrupt() {
            return Some(v);
        }
        self.twi.check_interrupt()
    }

    fn enter_interrupt(&mut self, vector: u16) {
        let ret = self.cpu.pc;
        self.push_word(ret);
        self.cpu.set_flag(SREG_I, false);
        self.cpu.pc = vector;
        self.cpu.sleeping = false;
        self.cpu.tick += INTERRUPT_CYCLES;
    }

    // --- Data space ---

    /// Read a byte from data space, dispatching I/O addresses to their
    /// peripheral.
    pub fn read_data(&mut self, addr: u16) -> u8 {
        match addr {
            0x00..=0x1F => return self.mem.data[addr as usize],
            SREG_ADDR => return self.cpu.sreg,
            SPL_ADDR => return self.cpu.sp as u8,
            SPH_ADDR => return (self.cpu.sp >> 8) as u8,
            _ => {}
        }
        if let Some((port, reg)) = Port::decode_addr(addr) {
            return match reg {
                PortReg::Pin => self.gpio.read_pin_reg(port),
                PortReg::Ddr => self.gpio.ddr(port),
                PortReg::Port => self.gpio.port_latch(port),
            };
        }
        let tick = self.cpu.tick;
        if let Some(v) = self.gpio.irq.read(addr) {
            return v;
        }
        if let Some(v) = self.timer0.read(addr, tick) {
            return v;
        }
        if let Some(v) = self.timer1.read(addr, tick) {
            return v;
        }
        if let Some(v) = self.timer2.read(addr, tick) {
            return v;
        }
        if let Some(v) = self.usart.read(addr) {
            return v;
        }
        if let Some(v) = self.adc.read(addr) {
            return v;
        }
        if let Some(v) = self.twi.read(addr) {
            return v;
        }
        if let Some(v) = self.eeprom.read(addr, tick) {
            return v;
        }
        self.mem.read_raw(addr)
    }

    /// Write a byte to data space. Port and bus side effects reach `board`.
    pub fn write_data(&mut self, addr: u16, value: u8, board: &mut dyn Board) {
        match addr {
            0x00..=0x1F => {
                self.mem.data[addr as usize] = value;
                return;
            }
            SREG_ADDR => {
                self.cpu.sreg = value;
                return;
            }
            SPL_ADDR => {
                self.cpu.sp = (self.cpu.sp & 0xFF00) | value as u16;
                return;
            }
            SPH_ADDR => {
                self.cpu.sp = (self.cpu.sp & 0x00FF) | ((value as u16) << 8);
                return;
            }
            _ => {}
        }
        let tick = self.cpu.tick;
        if let Some((port, reg)) = Port::decode_addr(addr) {
            let change = match reg {
                // Writing PINx toggles the output latch
                PortReg::Pin => {
                    let latch = self.gpio.port_latch(port) ^ value;
                    self.gpio.write_port(port, latch, tick)
                }
                PortReg::Ddr => self.gpio.write_ddr(port, value, tick),
                PortReg::Port => self.gpio.write_port(port, value, tick),
            };
            if change.host_changed() != 0 {
                board.port_written(&mut self.gpio, change);
            }
            return;
        }
        if self.gpio.irq.write(addr, value) {
            return;
        }
        if self.timer0.write(addr, value, tick)
            || self.timer1.write(addr, value, tick)
            || self.timer2.write(addr, value, tick)
        {
            return;
        }
        let mut tx = None;
        if self.usart.write(addr, value, &mut tx) {
            if let Some(byte) = tx {
                board.serial_tx(byte);
            }
            return;
        }
        if self.adc.write(addr, value, tick) || self.twi.write(addr, value, board) {
            return;
        }
        if self.eeprom.write(addr, value, tick, &mut self.mem.eeprom) {
            return;
        }
        self.mem.write_raw(addr, value);
    }

    /// SBI/CBI. Only the addressed bit is written, so flag registers and
    /// PINx toggles are not disturbed by the other bits.
    pub(crate) fn write_bit(&mut self, addr: u16, bit: u8, set: bool, board: &mut dyn Board) {
        let mask = 1u8 << bit;
        let one_only = matches!(Port::decode_addr(addr), Some((_, PortReg::Pin)))
            || matches!(addr, 0x35..=0x37 | 0x3B | 0x3C);
        if one_only {
            if set {
                self.write_data(addr, mask, board);
            }
            return;
        }
        let v = self.read_data(addr);
        let v = if set { v | mask } else { v & !mask };
        self.write_data(addr, v, board);
    }

    // --- Pin queries ---

    /// Logic level currently on a pin.
    pub fn pin_level(&self, pin: Pin) -> bool {
        self.gpio.level(pin)
    }

    /// Fraction of the current frame a pin has been high.
    ///
    /// A pin owned by a timer's compare output reports the timer's
    /// configured duty instead of the sampled one.
    pub fn pin_duty_cycle(&self, pin: Pin) -> f64 {
        if self.gpio.is_output(pin) {
            if let Some(duty) = self.timer_pwm(pin) {
                return duty;
            }
        }
        self.gpio.duty_cycle(pin, self.cpu.tick)
    }

    fn timer_pwm(&self, pin: Pin) -> Option<f64> {
        for ch in [TimerChannel::A, TimerChannel::B] {
            if self.timer0.output_pin(ch) == pin {
                if let Some(d) = self.timer0.pwm_duty(ch) {
                    return Some(d);
                }
            }
            if self.timer1.output_pin(ch) == pin {
                if let Some(d) = self.timer1.pwm_duty(ch) {
                    return Some(d);
                }
            }
            if self.timer2.output_pin(ch) == pin {
                if let Some(d) = self.timer2.pwm_duty(ch) {
                    return Some(d);
                }
            }
        }
        None
    }

    /// Width of the last complete high pulse on a pin, in seconds.
    pub fn pin_pulse_width(&self, pin: Pin) -> Option<f64> {
        self.gpio
            .pulse_width(pin)
            .map(|cycles| cycles as f64 / CLOCK_HZ as f64)
    }

    /// Queue bytes on the USART receive line.
    pub fn serial_write(&mut self, bytes: &[u8]) {
        self.usart.push_rx(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    const LED: Pin = Pin::new(Port::B, 5);

    #[derive(Default)]
    struct Recorder {
        serial: Vec<u8>,
        port_writes: Vec<PortChange>,
    }

    impl Board for Recorder {
        fn port_written(&mut self, _gpio: &mut Gpio, change: PortChange) {
            self.port_writes.push(change);
        }
        fn serial_tx(&mut self, byte: u8) {
            self.serial.push(byte);
        }
    }

    #[test]
    fn test_blink_program_drives_pin13() {
        // SBI DDRB,5 / SBI PORTB,5 / RJMP .-2
        let mut rt = Runtime::with_program(&program(&[0x9A25, 0x9A2D, 0xCFFF]));
        let mut board = Recorder::default();
        let cycles = rt.execute(3, &mut board).unwrap();
        assert_eq!(cycles, 6);
        assert!(rt.pin_level(LED));
        assert_eq!(board.port_writes.len(), 2);
        assert_eq!(board.port_writes[1].host_changed(), 0x20);
        assert_eq!(rt.cpu.pc, 2);
    }

    #[test]
    fn test_erased_flash_is_illegal_instruction() {
        let mut rt = Runtime::new();
        let err = rt.execute(1, &mut NullBoard).unwrap_err();
        assert!(matches!(err, SimError::IllegalInstruction { pc: 0, opcode: 0xFFFF }));
    }

    #[test]
    fn test_serial_transmit_reaches_board() {
        let mut rt = Runtime::with_program(&program(&[
            0xE008, // LDI r16, TXEN0
            0x9300, 0x00C1, // STS UCSR0B, r16
            0xE411, // LDI r17, 'A'
            0x9310, 0x00C6, // STS UDR0, r17
            0xCFFF,
        ]));
        let mut board = Recorder::default();
        rt.execute(5, &mut board).unwrap();
        assert_eq!(board.serial, b"A");
    }

    #[test]
    fn test_timer0_overflow_interrupt() {
        let mut words = vec![0u16; 0x22];
        words[0] = 0x9478; // SEI
        words[1] = 0xCFFF; // RJMP .-2
        words[0x20] = 0x9A2D; // SBI PORTB,5
        words[0x21] = 0x9518; // RETI
        let mut rt = Runtime::with_program(&program(&words));
        rt.write_data(0x6E, 0x01, &mut NullBoard); // TOIE0
        rt.write_data(0x45, 0x01, &mut NullBoard); // clk/1
        rt.execute(200, &mut NullBoard).unwrap();
        assert_eq!(rt.gpio.port_latch(Port::B) & 0x20, 0x20);
        assert!(rt.cpu.flag(SREG_I));
    }

    #[test]
    fn test_sleeping_core_counts_one_cycle_per_step() {
        let mut rt = Runtime::with_program(&program(&[0x9588, 0xCFFF]));
        let cycles = rt.execute(10, &mut NullBoard).unwrap();
        assert!(rt.cpu.sleeping);
        assert_eq!(cycles, 10);
        assert_eq!(rt.cpu.pc, 1);
    }

    #[test]
    fn test_pin_register_write_toggles() {
        let mut rt = Runtime::new();
        rt.write_data(0x24, 0x20, &mut NullBoard);
        rt.write_data(0x23, 0x20, &mut NullBoard);
        assert!(rt.pin_level(LED));
        rt.write_bit(0x23, 5, true, &mut NullBoard);
        assert!(!rt.pin_level(LED));
    }

    #[test]
    fn test_hardware_pwm_duty_reported_for_owned_pin() {
        let mut rt = Runtime::new();
        let d6 = Pin::new(Port::D, 6);
        rt.write_data(0x2A, 0x40, &mut NullBoard); // DDRD6
        rt.write_data(0x44, 0x83, &mut NullBoard); // COM0A1, fast PWM
        rt.write_data(0x45, 0x03, &mut NullBoard);
        rt.write_data(0x47, 63, &mut NullBoard); // OCR0A
        assert!((rt.pin_duty_cycle(d6) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_stack_pointer_mapped_into_io_space() {
        let mut rt = Runtime::new();
        assert_eq!(rt.read_data(SPH_ADDR), 0x08);
        assert_eq!(rt.read_data(SPL_ADDR), 0xFF);
        rt.write_data(SPL_ADDR, 0x00, &mut NullBoard);
        assert_eq!(rt.cpu.sp, 0x0800);
    }

    #[test]
    fn test_pulse_width_in_seconds() {
        let mut rt = Runtime::new();
        rt.write_data(0x24, 0x20, &mut NullBoard);
        rt.write_data(0x25, 0x20, &mut NullBoard);
        rt.cpu.tick = 16_000;
        rt.write_data(0x25, 0x00, &mut NullBoard);
        let w = rt.pin_pulse_width(LED).unwrap();
        assert!((w - 0.001).abs() < 1e-12);
    }
}
