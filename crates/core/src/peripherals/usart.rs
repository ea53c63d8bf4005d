//! USART0 at byte level.
//!
//! Baud rate is stored but not timed: a byte written to UDR0 is handed to
//! the serial monitor immediately and TXC/UDRE are raised at once. Received
//! bytes wait in a queue and are moved into UDR0 one at a time, each as soon
//! as the firmware has consumed the previous one.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::{INT_USART_RX, INT_USART_TX, INT_USART_UDRE};

pub const UCSR0A: u16 = 0xC0;
pub const UCSR0B: u16 = 0xC1;
pub const UCSR0C: u16 = 0xC2;
pub const UBRR0L: u16 = 0xC4;
pub const UBRR0H: u16 = 0xC5;
pub const UDR0: u16 = 0xC6;

// UCSR0A
const RXC: u8 = 0x80;
const TXC: u8 = 0x40;
const UDRE: u8 = 0x20;
const U2X: u8 = 0x02;
// UCSR0B
const RXCIE: u8 = 0x80;
const TXCIE: u8 = 0x40;
const UDRIE: u8 = 0x20;
const RXEN: u8 = 0x10;
const TXEN: u8 = 0x08;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usart {
    ucsra: u8,
    ucsrb: u8,
    ucsrc: u8,
    ubrr: u16,
    rx_data: u8,
    rx_queue: VecDeque<u8>,
}

impl Default for Usart {
    fn default() -> Self {
        Self::new()
    }
}

impl Usart {
    pub fn new() -> Self {
        Usart {
            ucsra: UDRE,
            ucsrb: 0,
            ucsrc: 0x06,
            ubrr: 0,
            rx_data: 0,
            rx_queue: VecDeque::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Queue bytes for the firmware to receive.
    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.rx_queue.extend(bytes);
        self.fill_rx();
    }

    /// Baud rate implied by UBRR0 and U2X0.
    pub fn baud(&self, clock_hz: u32) -> u32 {
        let div = if self.ucsra & U2X != 0 { 8 } else { 16 };
        clock_hz / (div * (self.ubrr as u32 + 1))
    }

    /// Register write. A transmitted byte is returned in `tx`.
    pub fn write(&mut self, addr: u16, value: u8, tx: &mut Option<u8>) -> bool {
        match addr {
            UCSR0A => {
                // TXC is cleared by writing one; U2X and MPCM are plain bits
                if value & TXC != 0 {
                    self.ucsra &= !TXC;
                }
                self.ucsra = (self.ucsra & !0x03) | (value & 0x03);
            }
            UCSR0B => {
                self.ucsrb = value;
                self.fill_rx();
            }
            UCSR0C => self.ucsrc = value,
            UBRR0L => self.ubrr = (self.ubrr & 0x0F00) | value as u16,
            UBRR0H => self.ubrr = (self.ubrr & 0x00FF) | (((value & 0x0F) as u16) << 8),
            UDR0 => {
                if self.ucsrb & TXEN != 0 {
                    *tx = Some(value);
                    self.ucsra |= TXC | UDRE;
                }
            }
            _ => return false,
        }
        true
    }

    pub fn read(&mut self, addr: u16) -> Option<u8> {
        let v = match addr {
            UCSR0A => self.ucsra,
            UCSR0B => self.ucsrb,
            UCSR0C => self.ucsrc,
            UBRR0L => self.ubrr as u8,
            UBRR0H => (self.ubrr >> 8) as u8,
            UDR0 => {
                let v = self.rx_data;
                self.ucsra &= !RXC;
                self.fill_rx();
                v
            }
            _ => return None,
        };
        Some(v)
    }

    fn fill_rx(&mut self) {
        if self.ucsrb & RXEN == 0 || self.ucsra & RXC != 0 {
            return;
        }
        if let Some(b) = self.rx_queue.pop_front() {
            self.rx_data = b;
            self.ucsra |= RXC;
        }
    }

    pub fn check_interrupt(&mut self) -> Option<u16> {
        if self.ucsra & RXC != 0 && self.ucsrb & RXCIE != 0 {
            return Some(INT_USART_RX);
        }
        if self.ucsra & UDRE != 0 && self.ucsrb & UDRIE != 0 {
            return Some(INT_USART_UDRE);
        }
        if self.ucsra & TXC != 0 && self.ucsrb & TXCIE != 0 {
            // TXC clears when its vector runs
            self.ucsra &= !TXC;
            return Some(INT_USART_TX);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmit_requires_txen() {
        let mut u = Usart::new();
        let mut tx = None;
        u.write(UDR0, b'x', &mut tx);
        assert_eq!(tx, None);
        u.write(UCSR0B, TXEN, &mut tx);
        u.write(UDR0, b'H', &mut tx);
        assert_eq!(tx, Some(b'H'));
        assert_eq!(u.read(UCSR0A).map(|a| a & (TXC | UDRE)), Some(TXC | UDRE));
    }

    #[test]
    fn test_receive_queue_one_byte_at_a_time() {
        let mut u = Usart::new();
        let mut tx = None;
        u.push_rx(b"ok");
        assert_eq!(u.read(UCSR0A).map(|a| a & RXC), Some(0));
        u.write(UCSR0B, RXEN | RXCIE, &mut tx);
        assert_eq!(u.check_interrupt(), Some(INT_USART_RX));
        assert_eq!(u.read(UDR0), Some(b'o'));
        assert_eq!(u.read(UDR0), Some(b'k'));
        assert_eq!(u.read(UCSR0A).map(|a| a & RXC), Some(0));
        assert_eq!(u.check_interrupt(), None);
    }

    #[test]
    fn test_baud_from_ubrr() {
        let mut u = Usart::new();
        let mut tx = None;
        // Arduino Serial.begin(9600) at 16 MHz: U2X, UBRR = 207
        u.write(UCSR0A, U2X, &mut tx);
        u.write(UBRR0L, 207, &mut tx);
        assert_eq!(u.baud(16_000_000), 9615);
    }
}
