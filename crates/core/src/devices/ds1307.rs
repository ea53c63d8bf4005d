//! DS1307 real-time clock on I2C.
//!
//! Registers 0x00–0x06 hold the time in BCD, 0x07 is the control register
//! and 0x08–0x3F are battery-backed RAM. The register pointer wraps at 0x40.
//! Time registers are latched from the running clock at the start of each
//! transfer; a transfer that wrote any of them sets the clock when it ends.
//! Bit 7 of the seconds register (CH) halts the oscillator.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use super::{detail_f64, Wiring};
use crate::i2c::I2cDevice;
use crate::CLOCK_HZ;

pub const ADDRESS: u8 = 0x68;
const REG_COUNT: u8 = 0x40;
const TIME_REGS: u8 = 7;
const CH: u8 = 0x80;
const HOUR_12: u8 = 0x40;
const PM: u8 = 0x20;

fn bcd(v: u32) -> u8 {
    (((v / 10) << 4) | (v % 10)) as u8
}

fn from_bcd(v: u8) -> u32 {
    (v >> 4) as u32 * 10 + (v & 0x0F) as u32
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 } as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = yoe + era * 400 + (m <= 2) as i64;
    (y, m, d)
}

#[derive(Debug, Clone)]
pub struct Ds1307 {
    regs: [u8; REG_COUNT as usize],
    pointer: u8,
    want_pointer: bool,
    time_written: bool,
    /// Unix time at `base_cycle`
    base_seconds: i64,
    base_cycle: u64,
    halted: bool,
    now: u64,
}

impl Ds1307 {
    pub(crate) fn wire(w: &Wiring) -> Self {
        let epoch = w.attr_f64("epoch").map(|e| e as i64).unwrap_or_else(|| {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            log::debug!("{}: no epoch attribute, clock starts at host time {}", w.id(), now);
            now
        });
        Ds1307::new(epoch)
    }

    pub fn new(epoch: i64) -> Self {
        Ds1307 {
            regs: [0; REG_COUNT as usize],
            pointer: 0,
            want_pointer: false,
            time_written: false,
            base_seconds: epoch,
            base_cycle: 0,
            halted: false,
            now: 0,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Current clock reading as Unix seconds.
    pub fn unix_time(&self) -> i64 {
        if self.halted {
            return self.base_seconds;
        }
        let elapsed = self.now.saturating_sub(self.base_cycle) / CLOCK_HZ as u64;
        self.base_seconds + elapsed as i64
    }

    pub fn set_unix_time(&mut self, seconds: i64) {
        self.base_seconds = seconds;
        self.base_cycle = self.now;
    }

    pub fn ram(&self) -> &[u8] {
        &self.regs[TIME_REGS as usize + 1..]
    }

    pub(crate) fn update(&mut self, now: u64) {
        self.now = now;
    }

    fn latch_time(&mut self) {
        let secs = self.unix_time();
        let days = secs.div_euclid(86_400);
        let sod = secs.rem_euclid(86_400) as u32;
        let (y, m, d) = civil_from_days(days);
        let (hour, min, sec) = (sod / 3600, sod / 60 % 60, sod % 60);
        // Monday = 1 … Sunday = 7
        let dow = (days + 3).rem_euclid(7) as u8 + 1;

        self.regs[0] = bcd(sec) | if self.halted { CH } else { 0 };
        self.regs[1] = bcd(min);
        self.regs[2] = if self.regs[2] & HOUR_12 != 0 {
            let h12 = if hour % 12 == 0 { 12 } else { hour % 12 };
            HOUR_12 | if hour >= 12 { PM } else { 0 } | bcd(h12)
        } else {
            bcd(hour)
        };
        self.regs[3] = dow;
        self.regs[4] = bcd(d);
        self.regs[5] = bcd(m);
        self.regs[6] = bcd(y.rem_euclid(100) as u32);
    }

    fn load_time(&mut self) {
        let r = &self.regs;
        let sec = from_bcd(r[0] & 0x7F);
        let min = from_bcd(r[1] & 0x7F);
        let hour = if r[2] & HOUR_12 != 0 {
            from_bcd(r[2] & 0x1F) % 12 + if r[2] & PM != 0 { 12 } else { 0 }
        } else {
            from_bcd(r[2] & 0x3F)
        };
        let day = from_bcd(r[4] & 0x3F).max(1);
        let month = from_bcd(r[5] & 0x1F).clamp(1, 12);
        let year = 2000 + from_bcd(r[6]) as i64;
        let secs = days_from_civil(year, month, day) * 86_400 + (hour * 3600 + min * 60 + sec) as i64;
        self.halted = r[0] & CH != 0;
        self.set_unix_time(secs);
        log::debug!("DS1307: clock set to {}{}", secs, if self.halted { " (halted)" } else { "" });
    }

    pub(crate) fn handle_event(&mut self, event: &str, detail: &Value) -> bool {
        match (event, detail_f64(detail)) {
            ("epoch" | "set-time", Some(secs)) => {
                self.set_unix_time(secs as i64);
                true
            }
            _ => false,
        }
    }
}

impl I2cDevice for Ds1307 {
    fn connect(&mut self, addr: u8, write: bool) -> bool {
        if addr != ADDRESS {
            return false;
        }
        self.latch_time();
        self.want_pointer = write;
        true
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        if self.want_pointer {
            self.pointer = byte % REG_COUNT;
            self.want_pointer = false;
            return true;
        }
        self.regs[self.pointer as usize] = byte;
        if self.pointer < TIME_REGS {
            self.time_written = true;
        }
        self.pointer = (self.pointer + 1) % REG_COUNT;
        true
    }

    fn read_byte(&mut self, _ack: bool) -> u8 {
        let v = self.regs[self.pointer as usize];
        self.pointer = (self.pointer + 1) % REG_COUNT;
        v
    }

    fn stop(&mut self) {
        if self.time_written {
            self.time_written = false;
            self.load_time();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(rtc: &mut Ds1307, reg: u8, n: usize) -> Vec<u8> {
        rtc.start();
        rtc.connect(ADDRESS, true);
        rtc.write_byte(reg);
        rtc.start();
        assert!(rtc.connect(ADDRESS, false));
        let out = (0..n).map(|_| rtc.read_byte(true)).collect();
        rtc.stop();
        out
    }

    fn write(rtc: &mut Ds1307, bytes: &[u8]) {
        rtc.start();
        assert!(rtc.connect(ADDRESS, true));
        for &b in bytes {
            rtc.write_byte(b);
        }
        rtc.stop();
    }

    #[test]
    fn test_calendar_conversion() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(civil_from_days(days_from_civil(2024, 2, 29)), (2024, 2, 29));
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
    }

    #[test]
    fn test_reads_running_clock() {
        // 2024-03-15 13:45:30, a Friday
        let mut rtc = Ds1307::new(1_710_510_330);
        assert_eq!(read(&mut rtc, 0, 7), vec![0x30, 0x45, 0x13, 5, 0x15, 0x03, 0x24]);
        rtc.update(2 * CLOCK_HZ as u64);
        assert_eq!(read(&mut rtc, 0, 1), vec![0x32]);
    }

    #[test]
    fn test_set_time_and_halt() {
        let mut rtc = Ds1307::new(0);
        rtc.update(1000);
        write(&mut rtc, &[0x00, 0x00, 0x30, 0x12, 3, 0x01, 0x01, 0x25]);
        assert_eq!(rtc.unix_time(), 1_735_734_600);
        rtc.update(1000 + CLOCK_HZ as u64);
        assert_eq!(rtc.unix_time(), 1_735_734_601);
        // Setting CH stops the clock
        write(&mut rtc, &[0x00, CH | 0x10]);
        rtc.update(1000 + 5 * CLOCK_HZ as u64);
        assert!(rtc.is_halted());
        assert_eq!(read(&mut rtc, 0, 1), vec![CH | 0x10]);
    }

    #[test]
    fn test_ram_and_pointer_wrap() {
        let mut rtc = Ds1307::new(0);
        write(&mut rtc, &[0x3F, 0xAB, 0x45]);
        assert_eq!(rtc.ram()[0x3F - 8], 0xAB);
        // Wrapped onto the seconds register, so the clock was set
        assert_eq!(rtc.unix_time() % 60, 45);
        assert_eq!(read(&mut rtc, 0x3F, 1), vec![0xAB]);
    }

    #[test]
    fn test_epoch_attribute_fixes_start_time() {
        let netlist = crate::netlist::Netlist::default();
        let mut part = crate::design::Component::new("rtc", "wokwi-ds1307");
        part.attrs.insert("epoch".into(), serde_json::json!("1710510330"));
        let rtc = Ds1307::wire(&Wiring { component: &part, netlist: &netlist });
        assert_eq!(rtc.unix_time(), 1_710_510_330);
        let again = Ds1307::wire(&Wiring { component: &part, netlist: &netlist });
        assert_eq!(again.unix_time(), rtc.unix_time());
    }

    #[test]
    fn test_twelve_hour_mode() {
        let mut rtc = Ds1307::new(0);
        // 11 PM in 12-hour format
        write(&mut rtc, &[0x02, HOUR_12 | PM | 0x11]);
        assert_eq!(rtc.unix_time() % 86_400 / 3600, 23);
        assert_eq!(read(&mut rtc, 2, 1), vec![HOUR_12 | PM | 0x11]);
    }
}
