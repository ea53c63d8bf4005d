//! # breadboard-core
//!
//! Cycle-accurate simulation core for ATmega328P (Arduino Uno class) circuits.
//!
//! The microcontroller runs at 16 MHz with 32 KB flash, 2 KB SRAM and 1 KB
//! EEPROM. A user-authored design (components + wires) is resolved into nets,
//! and every external part attached to the MCU is emulated at the pin-timing
//! level: the firmware sees the same edges and delays it would on real
//! hardware.
//!
//! ## Architecture
//!
//! - [`netlist`] — union-find net resolution, power/ground rails, MCU pin map
//! - [`pins`] — pin-name alias resolution per device type
//! - [`runtime::Runtime`] — CPU, memory, GPIO ports and on-chip peripherals
//! - [`peripherals`] — Timer0/1/2, USART0, ADC, TWI, EEPROM, external interrupts
//! - [`i2c`] — I2C device contract and bus arbiter
//! - [`devices`] — protocol devices (DHT22, HX711, HC-SR04, HD44780, SSD1306,
//!   WS2812, NEC IR, KY-040, keypad, MPU6050, DS1307, LEDs, buttons)
//! - [`simulator::Simulator`] — scheduler plus query, command and serial APIs
//! - [`savestate`] — compressed runtime snapshots

pub mod config;
pub mod cpu;
pub mod design;
pub mod devices;
pub mod error;
pub mod gpio;
pub mod hex;
pub mod i2c;
pub mod memory;
pub mod netlist;
pub mod opcodes;
pub mod peripherals;
pub mod pins;
pub mod runtime;
pub mod savestate;
pub mod simulator;

pub use config::SimConfig;
pub use cpu::Cpu;
pub use design::{Component, Connection, Design, Firmware};
pub use error::{DesignError, HexError, Result, SimError};
pub use gpio::{Gpio, Pin, Port};
pub use memory::Memory;
pub use runtime::{Board, Runtime};
pub use simulator::{FirmwareCompiler, Simulator};

/// Flash memory size: 32 KB
pub const FLASH_SIZE: usize = 32 * 1024;
/// SRAM size: 2 KB
pub const SRAM_SIZE: usize = 2 * 1024;
/// EEPROM size: 1 KB
pub const EEPROM_SIZE: usize = 1024;
/// CPU clock frequency: 16 MHz
pub const CLOCK_HZ: u32 = 16_000_000;
/// CPU cycles per microsecond
pub const CYCLES_PER_US: u64 = (CLOCK_HZ / 1_000_000) as u64;

/// Number of general-purpose registers (R0–R31)
pub const REG_COUNT: usize = 32;
/// I/O + extended I/O register space size (0x20..0xFF)
pub const IO_SIZE: usize = 224;
/// Total data space: registers + I/O + SRAM (0x0000..0x08FF)
pub const DATA_SIZE: usize = REG_COUNT + IO_SIZE + SRAM_SIZE;

/// Logic-high rail voltage
pub const VCC: f64 = 5.0;

// SREG bit positions
pub const SREG_C: u8 = 0;
pub const SREG_Z: u8 = 1;
pub const SREG_N: u8 = 2;
pub const SREG_V: u8 = 3;
pub const SREG_S: u8 = 4;
pub const SREG_H: u8 = 5;
pub const SREG_T: u8 = 6;
pub const SREG_I: u8 = 7;

/// Status register address in data space
pub const SREG_ADDR: u16 = 0x5F;
/// Stack pointer high byte
pub const SPH_ADDR: u16 = 0x5E;
/// Stack pointer low byte
pub const SPL_ADDR: u16 = 0x5D;

/// Convert microseconds to CPU cycles.
#[inline]
pub const fn us_to_cycles(us: u64) -> u64 {
    us * CYCLES_PER_US
}
