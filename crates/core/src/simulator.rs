//! Scheduler, query API and command API.
//!
//! A [`Simulator`] owns the chip ([`Runtime`]) and a [`Bench`] holding every
//! device in the design. `update(dt_ms)` turns wall time into a cycle budget
//! and runs the CPU in small batches; after each batch every device is
//! brought up to the current cycle so timed responses land on the edge they
//! were scheduled for.
//!
//! A fault while executing drops the runtime. From then on `update` does
//! nothing, queries read as if the board were unpowered and snapshot calls
//! return [`SimError::Stopped`].

use serde_json::Value;

use crate::config::SimConfig;
use crate::design::{Component, Design, Firmware};
use crate::devices::{Device, DeviceKind, IrRemote};
use crate::error::{DesignError, Result, SimError};
use crate::gpio::{Gpio, Pin, PortChange};
use crate::i2c::I2cBus;
use crate::netlist::{NetId, NetKind, Netlist};
use crate::runtime::{Board, Runtime};
use crate::{hex, savestate, CLOCK_HZ, FLASH_SIZE, VCC};

const CYCLES_PER_MS: f64 = CLOCK_HZ as f64 / 1000.0;

/// Turns firmware source text into a flash image.
pub trait FirmwareCompiler {
    /// Compile `source`. The error string is reported as-is.
    fn compile(&self, source: &str) -> std::result::Result<Vec<u8>, String>;
}

/// Everything outside the chip, as seen by the runtime.
struct Bench {
    devices: Vec<Device>,
    bus: I2cBus,
    serial_out: Vec<u8>,
    on_serial: Option<Box<dyn FnMut(u8)>>,
}

impl Bench {
    fn new(devices: Vec<Device>) -> Self {
        let mut bus = I2cBus::new();
        for (i, d) in devices.iter().enumerate() {
            if d.is_i2c() {
                bus.attach(i);
            }
        }
        Bench { devices, bus, serial_out: Vec::new(), on_serial: None }
    }

    fn update(&mut self, gpio: &mut Gpio, now: u64) {
        for d in &mut self.devices {
            d.update(gpio, now);
        }
    }

    fn scan_keypads(&mut self, gpio: &mut Gpio, now: u64) {
        for d in &mut self.devices {
            if let Device::Keypad(k) = d {
                k.scan(gpio, now);
            }
        }
    }
}

impl Board for Bench {
    fn port_written(&mut self, gpio: &mut Gpio, change: PortChange) {
        for d in &mut self.devices {
            d.port_written(gpio, &change);
        }
    }

    fn serial_tx(&mut self, byte: u8) {
        self.serial_out.push(byte);
        if let Some(cb) = self.on_serial.as_mut() {
            cb(byte);
        }
    }

    fn i2c_start(&mut self) {
        self.bus.start(&mut self.devices);
    }

    fn i2c_connect(&mut self, addr: u8, write: bool) -> bool {
        self.bus.connect(&mut self.devices, addr, write)
    }

    fn i2c_write(&mut self, byte: u8) -> bool {
        self.bus.write_byte(&mut self.devices, byte)
    }

    fn i2c_read(&mut self, ack: bool) -> u8 {
        self.bus.read_byte(&mut self.devices, ack)
    }

    fn i2c_stop(&mut self) {
        self.bus.stop(&mut self.devices);
    }
}

pub struct Simulator {
    runtime: Option<Runtime>,
    bench: Bench,
    netlist: Netlist,
    /// Component id per device, same order as `bench.devices`
    ids: Vec<String>,
    config: SimConfig,
    elapsed_ms: f64,
}

fn firmware_image(mcu: &Component, compiler: Option<&dyn FirmwareCompiler>) -> Result<Vec<u8>> {
    let image = match &mcu.firmware {
        None => return Err(DesignError::MissingFirmware(mcu.id.clone()).into()),
        Some(Firmware::Hex(text)) => hex::hex_to_image(text)?,
        Some(Firmware::Binary(bytes)) => bytes.clone(),
        Some(Firmware::Source(source)) => {
            let compiler = compiler.ok_or_else(|| DesignError::NoCompiler(mcu.id.clone()))?;
            compiler.compile(source).map_err(SimError::Compile)?
        }
    };
    if image.len() > FLASH_SIZE {
        log::warn!("{}: image is {} bytes, truncated to flash size", mcu.id, image.len());
    }
    Ok(image)
}

impl Simulator {
    /// Resolve the design, load the firmware and attach every device.
    ///
    /// `config` overrides the design's own configuration block.
    pub fn load(
        design: &Design,
        config: Option<SimConfig>,
        compiler: Option<&dyn FirmwareCompiler>,
    ) -> Result<Simulator> {
        let mcu = design.mcu()?;
        let image = firmware_image(mcu, compiler)?;
        let config = config.or_else(|| design.config.clone()).unwrap_or_default();

        let netlist = Netlist::build(design);
        let devices: Vec<Device> = design.components.iter().map(|c| Device::wire(c, &netlist)).collect();
        let ids = design.components.iter().map(|c| c.id.clone()).collect();

        let mut runtime = Runtime::with_program(&image);
        let mut bench = Bench::new(devices);
        for d in &mut bench.devices {
            d.attach(&mut runtime.gpio, 0);
        }
        log::info!(
            "loaded {} components, {} nets, {} byte image",
            design.components.len(),
            netlist.net_count(),
            image.len()
        );

        Ok(Simulator { runtime: Some(runtime), bench, netlist, ids, config, elapsed_ms: 0.0 })
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Halt the simulation. Every later call is a no-op.
    pub fn stop(&mut self) {
        if self.runtime.take().is_some() {
            log::info!("simulation stopped at {:.3} ms", self.elapsed_ms);
        }
    }

    /// Simulated time actually executed, in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    pub fn cycles(&self) -> u64 {
        self.runtime.as_ref().map_or(0, |rt| rt.cpu.tick)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    pub fn runtime(&self) -> Option<&Runtime> {
        self.runtime.as_ref()
    }

    /// Advance the simulation by `dt_ms` of simulated time.
    ///
    /// The cycle budget is capped by `max_cycles_per_update`. The duty-cycle
    /// window restarts at the beginning of every call.
    pub fn update(&mut self, dt_ms: f64) -> Result<()> {
        let Some(rt) = self.runtime.as_mut() else { return Ok(()) };
        let budget = ((dt_ms.max(0.0) * CYCLES_PER_MS).round() as u64).min(self.config.max_cycles_per_update);
        let start = rt.cpu.tick;
        let result = Self::run(rt, &mut self.bench, &self.config, start + budget);
        self.elapsed_ms += (rt.cpu.tick - start) as f64 / CYCLES_PER_MS;

        if let Err(e) = result {
            log::error!("simulation halted: {}", e);
            self.runtime = None;
            return Err(e);
        }
        Ok(())
    }

    fn run(rt: &mut Runtime, bench: &mut Bench, config: &SimConfig, target: u64) -> Result<()> {
        rt.gpio.begin_frame(rt.cpu.tick);
        let batch = config.batch_instructions.max(1);
        while rt.cpu.tick < target {
            rt.execute(batch, bench)?;
            bench.update(&mut rt.gpio, rt.cpu.tick);
        }
        if config.keypad_scan_per_update {
            bench.scan_keypads(&mut rt.gpio, rt.cpu.tick);
        }
        Ok(())
    }

    // --- Queries ---

    fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.index_of(id).map(|i| &self.bench.devices[i])
    }

    /// Every device with its component id, in design order.
    pub fn devices(&self) -> impl Iterator<Item = (&str, &Device)> {
        self.ids.iter().map(String::as_str).zip(self.bench.devices.iter())
    }

    fn net_level(&self, net: NetId) -> bool {
        match self.netlist.net_kind(net) {
            NetKind::Power => true,
            NetKind::Ground => false,
            NetKind::Signal => match (self.netlist.mcu_pin(net), self.runtime.as_ref()) {
                (Some(pin), Some(rt)) => rt.pin_level(pin),
                _ => false,
            },
        }
    }

    /// 0 or 5 V. Unresolved pins and nets with nothing driving them read 0.
    pub fn pin_voltage(&self, id: &str, pin: &str) -> f64 {
        match self.netlist.resolve(id, pin) {
            Some(net) if self.net_level(net) => VCC,
            _ => 0.0,
        }
    }

    /// Fraction of the last `update` window the pin spent high.
    pub fn pin_duty_cycle(&self, id: &str, pin: &str) -> f64 {
        let Some(net) = self.netlist.resolve(id, pin) else { return 0.0 };
        match (self.netlist.mcu_pin(net), self.runtime.as_ref()) {
            (Some(p), Some(rt)) => rt.pin_duty_cycle(p),
            _ if self.net_level(net) => 1.0,
            _ => 0.0,
        }
    }

    /// Width of the last complete high pulse, in seconds.
    pub fn pin_pulse_width(&self, id: &str, pin: &str) -> Option<f64> {
        let net = self.netlist.resolve(id, pin)?;
        let pin = self.netlist.mcu_pin(net)?;
        self.runtime.as_ref()?.pin_pulse_width(pin)
    }

    /// True when the LED's anode is high and its cathode low.
    pub fn led_lit(&self, id: &str) -> bool {
        match self.device(id) {
            Some(Device::Led(led)) => match (led.anode, led.cathode) {
                (Some(a), Some(c)) => self.net_level(a) && !self.net_level(c),
                _ => false,
            },
            _ => false,
        }
    }

    /// Anode duty cycle of a lit LED, 0 when it is off.
    pub fn led_brightness(&self, id: &str) -> f64 {
        match self.device(id) {
            Some(Device::Led(led)) if led.cathode.is_some_and(|c| !self.net_level(c)) => {
                led.anode.map_or(0.0, |a| match (self.netlist.mcu_pin(a), self.runtime.as_ref()) {
                    (Some(p), Some(rt)) => rt.pin_duty_cycle(p),
                    _ if self.net_level(a) => 1.0,
                    _ => 0.0,
                })
            }
            _ => 0.0,
        }
    }

    // --- Commands ---

    fn mcu_pin(&self, id: &str, pin: &str) -> Option<Pin> {
        let found = self.netlist.mcu_pin_for(id, pin);
        if found.is_none() {
            log::debug!("{}:{} does not reach the microcontroller", id, pin);
        }
        found
    }

    /// Apply a digital stimulus. Buttons and switches take it as their
    /// pressed state or position; any other pin is driven directly.
    pub fn set_input(&mut self, id: &str, pin: &str, high: bool) {
        let index = self.index_of(id);
        let target = self.mcu_pin(id, pin);
        let Some(rt) = self.runtime.as_mut() else { return };
        let now = rt.cpu.tick;
        let device = match index {
            Some(i) => self.bench.devices.get_mut(i),
            None => None,
        };
        match device {
            Some(Device::Pushbutton(b)) => b.set_pressed(high, &mut rt.gpio, now),
            Some(Device::SlideSwitch(s)) => s.set_position(high, &mut rt.gpio, now),
            _ => {
                if let Some(p) = target {
                    rt.gpio.drive(p, high, now);
                }
            }
        }
    }

    /// Apply a voltage. A potentiometer moves its wiper to match; any
    /// other pin receives the voltage directly.
    pub fn set_analog_input(&mut self, id: &str, pin: &str, volts: f64) {
        let index = self.index_of(id);
        let target = self.mcu_pin(id, pin);
        let Some(rt) = self.runtime.as_mut() else { return };
        let now = rt.cpu.tick;
        let device = match index {
            Some(i) => self.bench.devices.get_mut(i),
            None => None,
        };
        match device {
            Some(Device::Potentiometer(p)) => p.set_value(volts / VCC * 1023.0, &mut rt.gpio, now),
            _ => {
                if let Some(p) = target {
                    rt.gpio.set_voltage(p, volts, now);
                }
            }
        }
    }

    /// Route a named event to a component. Returns true if it was handled.
    ///
    /// A remote control press is sent to every IR receiver in the design.
    pub fn handle_component_event(&mut self, id: &str, event: &str, detail: &Value) -> bool {
        let Some(index) = self.index_of(id) else {
            log::warn!("event '{}' for unknown component {}", event, id);
            return false;
        };
        let Some(rt) = self.runtime.as_mut() else { return false };
        let now = rt.cpu.tick;

        let handled = if matches!(self.bench.devices[index], Device::IrRemote(_)) {
            match IrRemote::decode(event, detail) {
                Some(code) => {
                    let mut receivers = 0;
                    for d in &mut self.bench.devices {
                        if let Device::IrReceiver(rx) = d {
                            rx.transmit(code, now);
                            receivers += 1;
                        }
                    }
                    log::debug!("{}: NEC {:02x}/{:02x} to {} receivers", id, code.address, code.command, receivers);
                    true
                }
                None => false,
            }
        } else {
            self.bench.devices[index].handle_event(event, detail, &mut rt.gpio, now)
        };
        if !handled {
            log::warn!("{}: unhandled event '{}' ({})", id, event, detail);
        }
        handled
    }

    // --- Serial ---

    /// Queue bytes for the firmware to receive.
    pub fn serial_write(&mut self, bytes: &[u8]) {
        if let Some(rt) = self.runtime.as_mut() {
            rt.serial_write(bytes);
        }
    }

    /// Take and clear the bytes the firmware has transmitted.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bench.serial_out)
    }

    /// Call `cb` with every transmitted byte as it leaves the USART.
    pub fn on_serial(&mut self, cb: Box<dyn FnMut(u8)>) {
        self.bench.on_serial = Some(cb);
    }

    // --- Snapshots ---

    pub fn save_state(&self) -> Result<Vec<u8>> {
        savestate::save(self.runtime.as_ref().ok_or(SimError::Stopped)?)
    }

    pub fn load_state(&mut self, blob: &[u8]) -> Result<()> {
        let rt = self.runtime.as_mut().ok_or(SimError::Stopped)?;
        savestate::load(rt, blob)?;
        self.elapsed_ms = rt.cpu.tick as f64 / CYCLES_PER_MS;
        Ok(())
    }

    /// Kind of each component, for drivers that render by family.
    pub fn kind_of(&self, id: &str) -> DeviceKind {
        self.netlist.kind_of(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn words(w: &[u16]) -> Vec<u8> {
        w.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn uno(firmware: &[u16]) -> Value {
        json!({ "id": "uno", "type": "wokwi-arduino-uno",
                "firmware": { "format": "binary", "data": words(firmware) } })
    }

    fn design(parts: Value, connections: Value) -> Design {
        serde_json::from_value(json!({ "parts": parts, "connections": connections })).unwrap()
    }

    // SBI DDRB,5 / SBI PORTB,5 / RJMP .-1
    const BLINK_ON: [u16; 3] = [0x9A25, 0x9A2D, 0xCFFF];
    const IDLE: [u16; 1] = [0xCFFF];

    #[test]
    fn test_pin13_lights_led_through_resistor() {
        let d = design(
            json!([uno(&BLINK_ON),
                   { "id": "r1", "type": "wokwi-resistor", "attrs": { "value": "220" } },
                   { "id": "led1", "type": "wokwi-led" }]),
            json!([["uno:13", "r1:1", "green", []],
                   ["r1:2", "led1:A", "green", []],
                   ["led1:C", "uno:GND.1", "black", []]]),
        );
        let mut sim = Simulator::load(&d, None, None).unwrap();
        assert!(!sim.led_lit("led1"));
        sim.update(1.0).unwrap();
        assert!(sim.cycles() >= 16_000);
        assert_eq!(sim.pin_voltage("led1", "A"), VCC);
        assert_eq!(sim.pin_voltage("led1", "C"), 0.0);
        assert!(sim.led_lit("led1"));
        sim.update(1.0).unwrap();
        assert!((sim.pin_duty_cycle("led1", "anode") - 1.0).abs() < 1e-9);
        assert!(sim.led_brightness("led1") > 0.99);
        assert_eq!(sim.pin_voltage("led1", "nonexistent"), 0.0);
    }

    #[test]
    fn test_fault_halts_and_later_calls_are_noops() {
        let d = design(json!([uno(&[])]), json!([]));
        let mut sim = Simulator::load(&d, None, None).unwrap();
        let err = sim.update(1.0).unwrap_err();
        assert!(matches!(err, SimError::IllegalInstruction { pc: 0, .. }));
        assert!(!sim.is_running());
        assert!(sim.update(1.0).is_ok());
        assert_eq!(sim.cycles(), 0);
        assert!(matches!(sim.save_state(), Err(SimError::Stopped)));
    }

    struct Failing;

    impl FirmwareCompiler for Failing {
        fn compile(&self, _source: &str) -> std::result::Result<Vec<u8>, String> {
            Err("sketch.ino:3: expected ';'".into())
        }
    }

    #[test]
    fn test_firmware_errors() {
        let mut d = design(json!([{ "id": "uno", "type": "arduino-uno" }]), json!([]));
        assert!(matches!(
            Simulator::load(&d, None, None),
            Err(SimError::Design(DesignError::MissingFirmware(_)))
        ));
        d.components[0].firmware = Some(Firmware::Source("void setup() {}".into()));
        assert!(matches!(
            Simulator::load(&d, None, None),
            Err(SimError::Design(DesignError::NoCompiler(_)))
        ));
        match Simulator::load(&d, None, Some(&Failing)) {
            Err(SimError::Compile(msg)) => assert!(msg.contains("expected")),
            _ => panic!("expected a compile error"),
        }
        d.components[0].firmware = Some(Firmware::Hex(":0100000055AB\n".into()));
        assert!(matches!(Simulator::load(&d, None, None), Err(SimError::Hex(_))));
    }

    #[test]
    fn test_update_budget_is_capped() {
        let d = design(json!([uno(&IDLE)]), json!([]));
        let cfg = SimConfig { max_cycles_per_update: 1000, ..Default::default() };
        let mut sim = Simulator::load(&d, Some(cfg), None).unwrap();
        sim.update(1000.0).unwrap();
        assert!(sim.cycles() >= 1000 && sim.cycles() < 1100);
        assert!(sim.elapsed_ms() < 0.07);
    }

    #[test]
    fn test_serial_output_and_callback() {
        let d = design(
            json!([uno(&[0xE008, 0x9300, 0x00C1, 0xE411, 0x9310, 0x00C6, 0xCFFF])]),
            json!([]),
        );
        let mut sim = Simulator::load(&d, None, None).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        sim.on_serial(Box::new(move |b| sink.borrow_mut().push(b)));
        sim.update(0.1).unwrap();
        assert_eq!(sim.take_serial_output(), b"A");
        assert!(sim.take_serial_output().is_empty());
        assert_eq!(*seen.borrow(), b"A");
    }

    #[test]
    fn test_button_pulls_pin_low() {
        // SBI PORTD,7 (pull-up) / RJMP .-1
        let d = design(
            json!([uno(&[0x9A5F, 0xCFFF]), { "id": "btn1", "type": "wokwi-pushbutton" }]),
            json!([["btn1:1.l", "uno:7", "green", []], ["btn1:2.l", "uno:GND.2", "black", []]]),
        );
        let mut sim = Simulator::load(&d, None, None).unwrap();
        sim.update(0.01).unwrap();
        assert_eq!(sim.pin_voltage("uno", "7"), VCC);
        assert!(sim.handle_component_event("btn1", "press", &Value::Null));
        assert_eq!(sim.pin_voltage("uno", "7"), 0.0);
        sim.set_input("btn1", "1.l", false);
        assert_eq!(sim.pin_voltage("btn1", "1.r"), VCC);
        assert!(!sim.handle_component_event("btn1", "wiggle", &Value::Null));
        assert!(!sim.handle_component_event("ghost", "press", &Value::Null));
    }

    #[test]
    fn test_remote_press_reaches_receiver() {
        let d = design(
            json!([uno(&IDLE),
                   { "id": "remote", "type": "wokwi-ir-remote" },
                   { "id": "ir1", "type": "wokwi-ir-receiver" }]),
            json!([["ir1:DAT", "uno:2", "green", []]]),
        );
        let mut sim = Simulator::load(&d, None, None).unwrap();
        assert_eq!(sim.pin_voltage("ir1", "DAT"), VCC);
        assert!(sim.handle_component_event("remote", "press", &json!("power")));
        sim.update(1.0).unwrap();
        // Inside the 9 ms leader mark
        assert_eq!(sim.pin_voltage("ir1", "DAT"), 0.0);
        match sim.device("ir1") {
            Some(Device::IrReceiver(rx)) => assert_eq!(rx.last_code().map(|c| c.command), Some(0xA2)),
            _ => panic!("receiver missing"),
        }
    }

    #[test]
    fn test_analog_input_and_snapshot() {
        let d = design(
            json!([uno(&IDLE), { "id": "pot1", "type": "wokwi-potentiometer" }]),
            json!([["pot1:SIG", "uno:A0", "green", []], ["pot1:GND", "uno:GND.1", "black", []],
                   ["pot1:VCC", "uno:5V", "red", []]]),
        );
        let mut sim = Simulator::load(&d, None, None).unwrap();
        assert_eq!(sim.pin_voltage("pot1", "VCC"), VCC);
        assert_eq!(sim.pin_voltage("uno", "GND.1"), 0.0);
        sim.set_analog_input("pot1", "SIG", VCC);
        match sim.device("pot1") {
            Some(Device::Potentiometer(p)) => assert_eq!(p.value(), 1023),
            _ => panic!("potentiometer missing"),
        }
        sim.update(0.5).unwrap();
        let blob = sim.save_state().unwrap();
        let at = sim.cycles();
        sim.update(0.5).unwrap();
        sim.load_state(&blob).unwrap();
        assert_eq!(sim.cycles(), at);
        assert!(sim.load_state(b"nope").is_err());
    }
}
