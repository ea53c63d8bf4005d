//! ATmega328P on-chip peripherals.
//!
//! - [`Timer8`] — 8-bit Timer/Counter0 (`millis()`, PWM on D5/D6) and Timer2 (PWM on D3/D11, `tone()`)
//! - [`Timer16`] — 16-bit Timer/Counter1 (Servo library, PWM on D9/D10)
//! - [`Usart`] — USART0 byte-level serial port
//! - [`Adc`] — 10-bit successive-approximation ADC
//! - [`Twi`] — TWI (I2C) master
//! - [`EepromCtrl`] — EEPROM read/write controller
//! - [`exint::ExtInterrupts`] — INT0/INT1 and pin-change interrupts
//!
//! Every peripheral follows the same shape: `write(addr, ..) -> bool` claims a
//! register write, `read(addr, ..) -> Option<u8>` claims a read, `update`
//! advances internal time and `check_interrupt` returns a pending vector.

mod adc;
mod eeprom;
pub mod exint;
mod timer16;
mod timer8;
mod twi;
mod usart;

pub use adc::Adc;
pub use eeprom::EepromCtrl;
pub use exint::ExtInterrupts;
pub use timer16::Timer16;
pub use timer8::{Timer8, TimerChannel};
pub use twi::Twi;
pub use usart::Usart;

// ATmega328P interrupt vectors (word addresses)
pub const INT_INT0: u16 = 0x0002;
pub const INT_INT1: u16 = 0x0004;
pub const INT_PCINT0: u16 = 0x0006;
pub const INT_PCINT1: u16 = 0x0008;
pub const INT_PCINT2: u16 = 0x000A;
pub const INT_TIMER2_COMPA: u16 = 0x000E;
pub const INT_TIMER2_COMPB: u16 = 0x0010;
pub const INT_TIMER2_OVF: u16 = 0x0012;
pub const INT_TIMER1_COMPA: u16 = 0x0016;
pub const INT_TIMER1_COMPB: u16 = 0x0018;
pub const INT_TIMER1_OVF: u16 = 0x001A;
pub const INT_TIMER0_COMPA: u16 = 0x001C;
pub const INT_TIMER0_COMPB: u16 = 0x001E;
pub const INT_TIMER0_OVF: u16 = 0x0020;
pub const INT_USART_RX: u16 = 0x0024;
pub const INT_USART_UDRE: u16 = 0x0026;
pub const INT_USART_TX: u16 = 0x0028;
pub const INT_ADC: u16 = 0x002A;
pub const INT_EE_READY: u16 = 0x002C;
pub const INT_TWI: u16 = 0x0030;
