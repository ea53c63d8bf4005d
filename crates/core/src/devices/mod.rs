//! Devices wired to the microcontroller.
//!
//! Each part in a design becomes one [`Device`] variant, chosen once at load
//! time from its type tag. Devices only ever touch the chip through its port
//! pins: they watch levels the firmware drives and drive levels back, stamped
//! with the CPU cycle at which the transition happens.
//!
//! Three entry points drive every device:
//! - `port_written` runs synchronously inside the instruction that wrote
//!   DDRx/PORTx, for protocols that must react before the next read;
//! - `update` runs after every scheduler batch to play back timed responses;
//! - `handle_event` applies stimuli from outside (button presses, sensor
//!   values).

mod basic;
mod dht22;
mod ds1307;
mod hcsr04;
mod hx711;
mod ir;
mod keypad;
mod ky040;
mod lcd;
mod mpu6050;
mod schedule;
pub mod ssd1306;
mod ws2812;

pub use basic::{Led, Potentiometer, Pushbutton, SlideSwitch};
pub use dht22::{Dht22, DhtState};
pub use ds1307::Ds1307;
pub use hcsr04::HcSr04;
pub use hx711::{Gain, Hx711};
pub use ir::{IrReceiver, IrRemote, NecCode};
pub use keypad::Keypad;
pub use ky040::Ky040;
pub use lcd::Lcd;
pub use mpu6050::Mpu6050;
pub use schedule::PulseSchedule;
pub use ssd1306::Ssd1306;
pub use ws2812::Ws2812;

use serde_json::Value;

use crate::design::Component;
use crate::gpio::{Gpio, Pin, PortChange};
use crate::i2c::I2cDevice;
use crate::netlist::{NetId, NetKind, Netlist};

/// Part family, decided from the type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Mcu,
    Resistor,
    Led,
    Pushbutton,
    SlideSwitch,
    Potentiometer,
    Dht22,
    Hx711,
    HcSr04,
    Lcd { cols: u8, rows: u8 },
    Ssd1306,
    Ws2812,
    IrReceiver,
    IrRemote,
    Ky040,
    Keypad,
    Mpu6050,
    Ds1307,
    Unknown,
}

const TAGS: &[(&str, DeviceKind)] = &[
    ("arduino-uno", DeviceKind::Mcu),
    ("arduino-nano", DeviceKind::Mcu),
    ("resistor", DeviceKind::Resistor),
    ("led", DeviceKind::Led),
    ("pushbutton", DeviceKind::Pushbutton),
    ("pushbutton-6mm", DeviceKind::Pushbutton),
    ("slide-switch", DeviceKind::SlideSwitch),
    ("potentiometer", DeviceKind::Potentiometer),
    ("slide-potentiometer", DeviceKind::Potentiometer),
    ("dht22", DeviceKind::Dht22),
    ("hx711", DeviceKind::Hx711),
    ("hc-sr04", DeviceKind::HcSr04),
    ("lcd1602", DeviceKind::Lcd { cols: 16, rows: 2 }),
    ("lcd2004", DeviceKind::Lcd { cols: 20, rows: 4 }),
    ("ssd1306", DeviceKind::Ssd1306),
    ("neopixel", DeviceKind::Ws2812),
    ("led-ring", DeviceKind::Ws2812),
    ("led-strip", DeviceKind::Ws2812),
    ("ws2812", DeviceKind::Ws2812),
    ("ir-receiver", DeviceKind::IrReceiver),
    ("ir-remote", DeviceKind::IrRemote),
    ("ky-040", DeviceKind::Ky040),
    ("membrane-keypad", DeviceKind::Keypad),
    ("mpu6050", DeviceKind::Mpu6050),
    ("ds1307", DeviceKind::Ds1307),
];

impl DeviceKind {
    /// Look a type tag up, ignoring case and any `wokwi-` prefix.
    pub fn from_tag(tag: &str) -> DeviceKind {
        let tag = tag.trim().to_ascii_lowercase();
        let tag = tag.strip_prefix("wokwi-").unwrap_or(&tag);
        TAGS.iter()
            .find(|(name, _)| *name == tag)
            .map(|&(_, kind)| kind)
            .unwrap_or(DeviceKind::Unknown)
    }
}

/// Pin lookup for one component during device construction.
pub(crate) struct Wiring<'a> {
    pub component: &'a Component,
    pub netlist: &'a Netlist,
}

impl<'a> Wiring<'a> {
    pub fn id(&self) -> &str {
        &self.component.id
    }

    /// MCU pin behind a required device pin. Logs when it is not wired.
    pub fn pin(&self, name: &str) -> Option<Pin> {
        let pin = self.optional_pin(name);
        if pin.is_none() {
            log::warn!("{}: pin {} is not connected to the microcontroller", self.id(), name);
        }
        pin
    }

    /// MCU pin behind a device pin that may legitimately be left open.
    pub fn optional_pin(&self, name: &str) -> Option<Pin> {
        self.netlist.mcu_pin_for(self.id(), name)
    }

    pub fn net(&self, name: &str) -> Option<NetId> {
        self.netlist.resolve(self.id(), name)
    }

    /// Fixed level of a pin tied to a rail: high on power, low on ground.
    pub fn rail(&self, name: &str) -> Option<bool> {
        match self.netlist.net_kind(self.net(name)?) {
            NetKind::Power => Some(true),
            NetKind::Ground => Some(false),
            NetKind::Signal => None,
        }
    }

    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.component.attr_f64(name)
    }
}

/// Edge detector on one pin.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PinWatch {
    pub pin: Option<Pin>,
    pub level: bool,
}

impl PinWatch {
    pub fn new(pin: Option<Pin>) -> Self {
        PinWatch { pin, level: false }
    }

    /// Resynchronize with the current level without reporting an edge.
    pub fn sync(&mut self, gpio: &Gpio) {
        if let Some(pin) = self.pin {
            self.level = gpio.level(pin);
        }
    }

    /// New level if it changed since the last poll.
    pub fn poll(&mut self, gpio: &Gpio) -> Option<bool> {
        let level = gpio.level(self.pin?);
        if level == self.level {
            return None;
        }
        self.level = level;
        Some(level)
    }

    pub fn on_port(&self, change: &PortChange) -> bool {
        self.pin.is_some_and(|p| p.port == change.port)
    }
}

/// Numeric event payload: a number, a numeric string or `{"value": n}`.
pub(crate) fn detail_f64(detail: &Value) -> Option<f64> {
    match detail {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Object(map) => map.get("value").and_then(detail_f64),
        _ => None,
    }
}

/// Boolean event payload; numbers are true when non-zero.
pub(crate) fn detail_bool(detail: &Value) -> Option<bool> {
    match detail {
        Value::Bool(b) => Some(*b),
        Value::Object(map) => map.get("value").and_then(detail_bool),
        other => detail_f64(other).map(|v| v != 0.0),
    }
}

#[derive(Debug, Clone)]
pub enum Device {
    Led(Led),
    Pushbutton(Pushbutton),
    SlideSwitch(SlideSwitch),
    Potentiometer(Potentiometer),
    Dht22(Dht22),
    Hx711(Hx711),
    HcSr04(HcSr04),
    Lcd(Lcd),
    Ssd1306(Ssd1306),
    Ws2812(Ws2812),
    IrReceiver(IrReceiver),
    IrRemote(IrRemote),
    Ky040(Ky040),
    Keypad(Keypad),
    Mpu6050(Mpu6050),
    Ds1307(Ds1307),
    /// Takes part in nets only: MCU, resistors, unknown parts
    Passive(DeviceKind),
}

impl Device {
    /// Build the device for a component from its resolved pins.
    pub fn wire(component: &Component, netlist: &Netlist) -> Device {
        let w = Wiring { component, netlist };
        match component.device_kind() {
            DeviceKind::Led => Device::Led(Led::wire(&w)),
            DeviceKind::Pushbutton => Device::Pushbutton(Pushbutton::wire(&w)),
            DeviceKind::SlideSwitch => Device::SlideSwitch(SlideSwitch::wire(&w)),
            DeviceKind::Potentiometer => Device::Potentiometer(Potentiometer::wire(&w)),
            DeviceKind::Dht22 => Device::Dht22(Dht22::wire(&w)),
            DeviceKind::Hx711 => Device::Hx711(Hx711::wire(&w)),
            DeviceKind::HcSr04 => Device::HcSr04(HcSr04::wire(&w)),
            DeviceKind::Lcd { cols, rows } => Device::Lcd(Lcd::wire(&w, cols, rows)),
            DeviceKind::Ssd1306 => Device::Ssd1306(Ssd1306::wire(&w)),
            DeviceKind::Ws2812 => Device::Ws2812(Ws2812::wire(&w)),
            DeviceKind::IrReceiver => Device::IrReceiver(IrReceiver::wire(&w)),
            DeviceKind::IrRemote => Device::IrRemote(IrRemote::default()),
            DeviceKind::Ky040 => Device::Ky040(Ky040::wire(&w)),
            DeviceKind::Keypad => Device::Keypad(Keypad::wire(&w)),
            DeviceKind::Mpu6050 => Device::Mpu6050(Mpu6050::wire(&w)),
            DeviceKind::Ds1307 => Device::Ds1307(Ds1307::wire(&w)),
            DeviceKind::Unknown => {
                log::warn!("{}: unknown part type '{}', treated as passive", component.id, component.kind);
                Device::Passive(DeviceKind::Unknown)
            }
            kind @ (DeviceKind::Mcu | DeviceKind::Resistor) => Device::Passive(kind),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Led(_) => DeviceKind::Led,
            Device::Pushbutton(_) => DeviceKind::Pushbutton,
            Device::SlideSwitch(_) => DeviceKind::SlideSwitch,
            Device::Potentiometer(_) => DeviceKind::Potentiometer,
            Device::Dht22(_) => DeviceKind::Dht22,
            Device::Hx711(_) => DeviceKind::Hx711,
            Device::HcSr04(_) => DeviceKind::HcSr04,
            Device::Lcd(d) => DeviceKind::Lcd { cols: d.cols(), rows: d.rows() },
            Device::Ssd1306(_) => DeviceKind::Ssd1306,
            Device::Ws2812(_) => DeviceKind::Ws2812,
            Device::IrReceiver(_) => DeviceKind::IrReceiver,
            Device::IrRemote(_) => DeviceKind::IrRemote,
            Device::Ky040(_) => DeviceKind::Ky040,
            Device::Keypad(_) => DeviceKind::Keypad,
            Device::Mpu6050(_) => DeviceKind::Mpu6050,
            Device::Ds1307(_) => DeviceKind::Ds1307,
            Device::Passive(kind) => *kind,
        }
    }

    /// True for parts that sit on the TWI bus.
    pub fn is_i2c(&self) -> bool {
        matches!(self, Device::Ssd1306(_) | Device::Mpu6050(_) | Device::Ds1307(_))
    }

    /// Put the device's idle levels on its pins.
    pub fn attach(&mut self, gpio: &mut Gpio, now: u64) {
        match self {
            Device::Pushbutton(d) => d.apply(gpio, now),
            Device::SlideSwitch(d) => d.apply(gpio, now),
            Device::Potentiometer(d) => d.apply(gpio, now),
            Device::Dht22(d) => d.attach(gpio, now),
            Device::Hx711(d) => d.attach(gpio, now),
            Device::HcSr04(d) => d.attach(gpio, now),
            Device::Lcd(d) => d.attach(gpio),
            Device::Ws2812(d) => d.attach(gpio),
            Device::IrReceiver(d) => d.attach(gpio, now),
            Device::Ky040(d) => d.attach(gpio, now),
            _ => {}
        }
    }

    /// Firmware wrote DDRx/PORTx.
    pub fn port_written(&mut self, gpio: &mut Gpio, change: &PortChange) {
        match self {
            Device::Dht22(d) => d.port_written(gpio, change),
            Device::Hx711(d) => d.port_written(gpio, change),
            Device::HcSr04(d) => d.port_written(gpio, change),
            Device::Lcd(d) => d.port_written(gpio, change),
            Device::Ws2812(d) => d.port_written(gpio, change),
            Device::Keypad(d) => d.scan(gpio, change.cycle),
            _ => {}
        }
    }

    /// Advance timed behavior to `now`.
    pub fn update(&mut self, gpio: &mut Gpio, now: u64) {
        match self {
            Device::Dht22(d) => d.update(gpio, now),
            Device::Hx711(d) => d.update(gpio, now),
            Device::HcSr04(d) => d.update(gpio, now),
            Device::Ws2812(d) => d.update(gpio, now),
            Device::IrReceiver(d) => d.update(gpio, now),
            Device::Ky040(d) => d.update(gpio, now),
            Device::Ds1307(d) => d.update(now),
            _ => {}
        }
    }

    /// Apply an outside event. Returns false if the device does not know it.
    pub fn handle_event(&mut self, event: &str, detail: &Value, gpio: &mut Gpio, now: u64) -> bool {
        match self {
            Device::Pushbutton(d) => d.handle_event(event, gpio, now),
            Device::SlideSwitch(d) => d.handle_event(event, detail, gpio, now),
            Device::Potentiometer(d) => d.handle_event(event, detail, gpio, now),
            Device::Dht22(d) => d.handle_event(event, detail),
            Device::Hx711(d) => d.handle_event(event, detail),
            Device::HcSr04(d) => d.handle_event(event, detail),
            Device::IrReceiver(d) => match IrRemote::decode(event, detail) {
                Some(code) => {
                    d.transmit(code, now);
                    true
                }
                None => false,
            },
            Device::Ky040(d) => d.handle_event(event, gpio, now),
            Device::Keypad(d) => {
                let handled = d.handle_event(event, detail);
                d.scan(gpio, now);
                handled
            }
            Device::Mpu6050(d) => d.handle_event(event, detail),
            Device::Ds1307(d) => d.handle_event(event, detail),
            // Remote presses are routed to receivers by the simulator
            Device::IrRemote(_) => IrRemote::decode(event, detail).is_some(),
            _ => false,
        }
    }
}

impl I2cDevice for Device {
    fn start(&mut self) {
        match self {
            Device::Ssd1306(d) => d.start(),
            Device::Mpu6050(d) => d.start(),
            Device::Ds1307(d) => d.start(),
            _ => {}
        }
    }

    fn connect(&mut self, addr: u8, write: bool) -> bool {
        match self {
            Device::Ssd1306(d) => d.connect(addr, write),
            Device::Mpu6050(d) => d.connect(addr, write),
            Device::Ds1307(d) => d.connect(addr, write),
            _ => false,
        }
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        match self {
            Device::Ssd1306(d) => d.write_byte(byte),
            Device::Mpu6050(d) => d.write_byte(byte),
            Device::Ds1307(d) => d.write_byte(byte),
            _ => false,
        }
    }

    fn read_byte(&mut self, ack: bool) -> u8 {
        match self {
            Device::Ssd1306(d) => d.read_byte(ack),
            Device::Mpu6050(d) => d.read_byte(ack),
            Device::Ds1307(d) => d.read_byte(ack),
            _ => 0xFF,
        }
    }

    fn stop(&mut self) {
        match self {
            Device::Ssd1306(d) => d.stop(),
            Device::Mpu6050(d) => d.stop(),
            Device::Ds1307(d) => d.stop(),
            _ => {}
        }
    }
}
