//! MPU6050 six-axis IMU on I2C.
//!
//! The first byte of a write sets the register pointer; further bytes are
//! written to consecutive registers. Reads start at the pointer and
//! auto-increment. Sensor registers are computed from the current physical
//! values and the configured full-scale ranges.

use serde_json::Value;

use super::{detail_f64, Wiring};
use crate::i2c::I2cDevice;

pub const DEFAULT_ADDRESS: u8 = 0x68;

const REG_GYRO_CONFIG: u8 = 0x1B;
const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_ACCEL_XOUT_H: u8 = 0x3B;
const REG_TEMP_OUT_H: u8 = 0x41;
const REG_GYRO_XOUT_H: u8 = 0x43;
const REG_GYRO_ZOUT_L: u8 = 0x48;
const REG_PWR_MGMT_1: u8 = 0x6B;
const REG_WHO_AM_I: u8 = 0x75;

const PWR_MGMT_1_RESET: u8 = 0x40;
const DEVICE_RESET: u8 = 0x80;

#[derive(Debug, Clone)]
pub struct Mpu6050 {
    address: u8,
    regs: [u8; 128],
    pointer: u8,
    /// Next written byte is the register pointer
    want_pointer: bool,
    /// g per axis
    accel: [f64; 3],
    /// °/s per axis
    gyro: [f64; 3],
    temperature: f64,
}

impl Default for Mpu6050 {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

impl Mpu6050 {
    pub(crate) fn wire(w: &Wiring) -> Self {
        // AD0 high selects the alternate address
        let ad0 = w.rail("AD0") == Some(true) || w.attr_f64("ad0").is_some_and(|v| v != 0.0);
        let mut imu = Mpu6050::new(if ad0 { DEFAULT_ADDRESS + 1 } else { DEFAULT_ADDRESS });
        for (axis, name) in ["accelX", "accelY", "accelZ"].iter().enumerate() {
            if let Some(v) = w.attr_f64(name) {
                imu.set_accel(axis, v);
            }
        }
        for (axis, name) in ["rotationX", "rotationY", "rotationZ"].iter().enumerate() {
            if let Some(v) = w.attr_f64(name) {
                imu.set_gyro(axis, v);
            }
        }
        if let Some(t) = w.attr_f64("temperature") {
            imu.set_temperature(t);
        }
        imu
    }

    pub fn new(address: u8) -> Self {
        let mut imu = Mpu6050 {
            address,
            regs: [0; 128],
            pointer: 0,
            want_pointer: false,
            accel: [0.0, 0.0, 1.0],
            gyro: [0.0; 3],
            temperature: 24.0,
        };
        imu.reset_registers();
        imu
    }

    fn reset_registers(&mut self) {
        self.regs = [0; 128];
        self.regs[REG_PWR_MGMT_1 as usize] = PWR_MGMT_1_RESET;
        self.regs[REG_WHO_AM_I as usize] = DEFAULT_ADDRESS;
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_sleeping(&self) -> bool {
        self.regs[REG_PWR_MGMT_1 as usize] & 0x40 != 0
    }

    /// Acceleration in g, clamped to ±16.
    pub fn set_accel(&mut self, axis: usize, g: f64) {
        if let Some(a) = self.accel.get_mut(axis) {
            *a = g.clamp(-16.0, 16.0);
        }
    }

    /// Rotation rate in °/s, clamped to ±2000.
    pub fn set_gyro(&mut self, axis: usize, dps: f64) {
        if let Some(r) = self.gyro.get_mut(axis) {
            *r = dps.clamp(-2000.0, 2000.0);
        }
    }

    pub fn set_temperature(&mut self, celsius: f64) {
        self.temperature = celsius.clamp(-40.0, 85.0);
    }

    fn accel_lsb_per_g(&self) -> f64 {
        16384.0 / (1 << ((self.regs[REG_ACCEL_CONFIG as usize] >> 3) & 3)) as f64
    }

    fn gyro_lsb_per_dps(&self) -> f64 {
        131.0 / (1 << ((self.regs[REG_GYRO_CONFIG as usize] >> 3) & 3)) as f64
    }

    fn raw(value: f64) -> i16 {
        value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }

    fn sample(&self, reg: u8) -> Option<i16> {
        match reg {
            REG_ACCEL_XOUT_H..=0x40 => {
                let axis = ((reg - REG_ACCEL_XOUT_H) / 2) as usize;
                Some(Self::raw(self.accel[axis] * self.accel_lsb_per_g()))
            }
            REG_TEMP_OUT_H | 0x42 => Some(Self::raw((self.temperature - 36.53) * 340.0)),
            REG_GYRO_XOUT_H..=REG_GYRO_ZOUT_L => {
                let axis = ((reg - REG_GYRO_XOUT_H) / 2) as usize;
                Some(Self::raw(self.gyro[axis] * self.gyro_lsb_per_dps()))
            }
            _ => None,
        }
    }

    /// Register value as the firmware would read it.
    pub fn read_register(&self, reg: u8) -> u8 {
        let reg = reg & 0x7F;
        match self.sample(reg) {
            // Big-endian: even offsets from each block start hold the high byte
            Some(v) if (reg - REG_ACCEL_XOUT_H) % 2 == 0 => (v >> 8) as u8,
            Some(v) => v as u8,
            None => self.regs[reg as usize],
        }
    }

    pub fn write_register(&mut self, reg: u8, value: u8) {
        let reg = reg & 0x7F;
        match reg {
            REG_WHO_AM_I => {}
            REG_PWR_MGMT_1 if value & DEVICE_RESET != 0 => {
                log::debug!("MPU6050: device reset");
                self.reset_registers();
            }
            _ => self.regs[reg as usize] = value,
        }
    }

    pub(crate) fn handle_event(&mut self, event: &str, detail: &Value) -> bool {
        let Some(v) = detail_f64(detail) else { return false };
        match event {
            "accelX" => self.set_accel(0, v),
            "accelY" => self.set_accel(1, v),
            "accelZ" => self.set_accel(2, v),
            "rotationX" => self.set_gyro(0, v),
            "rotationY" => self.set_gyro(1, v),
            "rotationZ" => self.set_gyro(2, v),
            "temperature" => self.set_temperature(v),
            _ => return false,
        }
        true
    }
}

impl I2cDevice for Mpu6050 {
    fn connect(&mut self, addr: u8, write: bool) -> bool {
        if addr != self.address {
            return false;
        }
        self.want_pointer = write;
        true
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        if self.want_pointer {
            self.pointer = byte & 0x7F;
            self.want_pointer = false;
        } else {
            self.write_register(self.pointer, byte);
            self.pointer = (self.pointer + 1) & 0x7F;
        }
        true
    }

    fn read_byte(&mut self, _ack: bool) -> u8 {
        let v = self.read_register(self.pointer);
        self.pointer = (self.pointer + 1) & 0x7F;
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(imu: &mut Mpu6050, bytes: &[u8]) {
        imu.start();
        assert!(imu.connect(DEFAULT_ADDRESS, true));
        for &b in bytes {
            imu.write_byte(b);
        }
        imu.stop();
    }

    fn read(imu: &mut Mpu6050, reg: u8, n: usize) -> Vec<u8> {
        write(imu, &[reg]);
        assert!(imu.connect(DEFAULT_ADDRESS, false));
        (0..n).map(|i| imu.read_byte(i + 1 < n)).collect()
    }

    #[test]
    fn test_identity_and_wake() {
        let mut imu = Mpu6050::default();
        assert_eq!(read(&mut imu, REG_WHO_AM_I, 1), vec![0x68]);
        assert!(imu.is_sleeping());
        write(&mut imu, &[REG_PWR_MGMT_1, 0x00]);
        assert!(!imu.is_sleeping());
        write(&mut imu, &[REG_PWR_MGMT_1, DEVICE_RESET]);
        assert!(imu.is_sleeping());
        assert!(!imu.connect(0x69, true));
    }

    #[test]
    fn test_burst_read_accel_temp_gyro() {
        let mut imu = Mpu6050::default();
        imu.set_accel(0, -0.5);
        imu.set_temperature(36.53);
        imu.set_gyro(2, 250.0);
        let b = read(&mut imu, REG_ACCEL_XOUT_H, 14);
        let word = |i: usize| i16::from_be_bytes([b[i], b[i + 1]]);
        assert_eq!(word(0), -8192);
        assert_eq!(word(4), 16384);
        assert_eq!(word(6), 0);
        assert_eq!(word(12), 32750);
    }

    #[test]
    fn test_full_scale_ranges() {
        let mut imu = Mpu6050::default();
        write(&mut imu, &[REG_GYRO_CONFIG, 0x18, 0x18]);
        imu.set_accel(1, 20.0);
        imu.set_gyro(0, -2000.0);
        let a = read(&mut imu, REG_ACCEL_XOUT_H + 2, 2);
        // 16 g at ±16 g full scale saturates
        assert_eq!(i16::from_be_bytes([a[0], a[1]]), i16::MAX);
        let g = read(&mut imu, REG_GYRO_XOUT_H, 2);
        assert_eq!(i16::from_be_bytes([g[0], g[1]]), -32750);
    }

    #[test]
    fn test_events() {
        let mut imu = Mpu6050::default();
        assert!(imu.handle_event("accelZ", &serde_json::json!(-1)));
        assert_eq!(imu.read_register(0x3F), 0xC0);
        assert!(!imu.handle_event("magnetX", &serde_json::json!(1)));
    }
}
