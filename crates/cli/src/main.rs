//! breadboard: headless driver for breadboard-core designs.
//!
//! Loads a design JSON file, runs it for a fixed amount of simulated time
//! and prints what the circuit did: serial output as it arrives, then the
//! final state of displays, LEDs and any watched pins.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use breadboard_core::devices::{Device, Ssd1306};
use breadboard_core::{Design, Firmware, SimConfig, Simulator};
use clap::Parser;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "breadboard")]
#[command(about = "Cycle-accurate ATmega328P circuit simulator")]
struct Args {
    /// Design JSON (parts + connections)
    design: PathBuf,

    /// Intel HEX file replacing the microcontroller's firmware
    #[arg(long)]
    hex: Option<PathBuf>,

    /// Scheduler configuration JSON, overrides the design's
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulated time to run, in milliseconds
    #[arg(long, default_value = "1000")]
    ms: f64,

    /// Simulated time per update call, in milliseconds
    #[arg(long, default_value = "10")]
    tick_ms: f64,

    /// Scripted event `AT_MS:COMPONENT:EVENT[:DETAIL]`; DETAIL is JSON or
    /// a bare string. May be repeated.
    #[arg(long = "event", value_name = "EVENT")]
    events: Vec<String>,

    /// Pin to report at the end, as `COMPONENT:PIN`. May be repeated.
    #[arg(long = "watch", value_name = "PIN")]
    watch: Vec<String>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug)]
struct ScriptedEvent {
    at_ms: f64,
    component: String,
    event: String,
    detail: Value,
}

fn parse_event(text: &str) -> Result<ScriptedEvent> {
    let mut parts = text.splitn(4, ':');
    let (Some(at), Some(component), Some(event)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("event '{}' is not AT_MS:COMPONENT:EVENT[:DETAIL]", text);
    };
    let at_ms = at.trim().parse().with_context(|| format!("bad time in event '{}'", text))?;
    let detail = match parts.next() {
        None => Value::Null,
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    };
    Ok(ScriptedEvent { at_ms, component: component.to_string(), event: event.to_string(), detail })
}

fn load_design(args: &Args) -> Result<Design> {
    let text = std::fs::read_to_string(&args.design)
        .with_context(|| format!("reading {}", args.design.display()))?;
    let mut design = Design::from_json(&text).with_context(|| format!("parsing {}", args.design.display()))?;
    if let Some(path) = &args.hex {
        let hex = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mcu_id = design.mcu()?.id.clone();
        if let Some(mcu) = design.components.iter_mut().find(|c| c.id == mcu_id) {
            mcu.firmware = Some(Firmware::Hex(hex));
        }
    }
    Ok(design)
}

fn load_config(args: &Args) -> Result<Option<SimConfig>> {
    let Some(path) = &args.config else { return Ok(None) };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(config))
}

/// Two pixel rows per text line using half blocks.
fn print_oled(oled: &Ssd1306) {
    use breadboard_core::devices::ssd1306::{HEIGHT, WIDTH};
    println!("  +{}+", "-".repeat(WIDTH));
    for y in (0..HEIGHT).step_by(2) {
        let line: String = (0..WIDTH)
            .map(|x| match (oled.pixel(x, y), oled.pixel(x, y + 1)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                _ => ' ',
            })
            .collect();
        println!("  |{}|", line);
    }
    println!("  +{}+", "-".repeat(WIDTH));
}

fn report(sim: &Simulator, watch: &[String]) {
    println!("--- {:.3} ms, {} cycles ---", sim.elapsed_ms(), sim.cycles());
    for (id, device) in sim.devices() {
        match device {
            Device::Led(_) => {
                let state = if sim.led_lit(id) { "on" } else { "off" };
                println!("{}: {} ({:.0}%)", id, state, sim.led_brightness(id) * 100.0);
            }
            Device::Lcd(lcd) => {
                println!("{}:", id);
                for row in lcd.text() {
                    println!("  [{}]", row);
                }
            }
            Device::Ssd1306(oled) => {
                println!("{}: {} frames", id, oled.frame_count());
                print_oled(oled);
            }
            Device::Ws2812(strip) => {
                let colors: Vec<String> = strip.pixels().iter().map(|p| format!("#{:06x}", p)).collect();
                println!("{}: {}", id, colors.join(" "));
            }
            Device::Keypad(kp) => {
                let keys: String = kp.pressed_keys().into_iter().collect();
                println!("{}: pressed [{}]", id, keys);
            }
            Device::Ky040(enc) => println!("{}: position {}", id, enc.position()),
            _ => {}
        }
    }
    for entry in watch {
        let Some((id, pin)) = entry.split_once(':') else {
            log::warn!("watch '{}' is not COMPONENT:PIN", entry);
            continue;
        };
        let width = sim
            .pin_pulse_width(id, pin)
            .map_or_else(|| "-".to_string(), |s| format!("{:.1} us", s * 1e6));
        println!(
            "{}: {:.1} V, duty {:.1}%, pulse {}",
            entry,
            sim.pin_voltage(id, pin),
            sim.pin_duty_cycle(id, pin) * 100.0,
            width
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if args.tick_ms <= 0.0 {
        bail!("--tick-ms must be positive");
    }
    let design = load_design(&args)?;
    let config = load_config(&args)?;
    let mut events = args.events.iter().map(|s| parse_event(s)).collect::<Result<Vec<_>>>()?;
    events.sort_by(|a, b| a.at_ms.total_cmp(&b.at_ms));

    let mut sim = Simulator::load(&design, config, None).context("loading design")?;
    let mut pending = events.into_iter().peekable();
    let stdout = std::io::stdout();

    let mut t = 0.0;
    while sim.is_running() && t < args.ms {
        while let Some(ev) = pending.next_if(|ev| ev.at_ms <= t) {
            log::info!("{:.3} ms: {} {} {}", t, ev.component, ev.event, ev.detail);
            sim.handle_component_event(&ev.component, &ev.event, &ev.detail);
        }
        let dt = args.tick_ms.min(args.ms - t);
        if let Err(e) = sim.update(dt) {
            eprintln!("simulation halted: {}", e);
        }
        t += dt;
        let out = sim.take_serial_output();
        if !out.is_empty() {
            let mut lock = stdout.lock();
            lock.write_all(&out).context("writing serial output")?;
            lock.flush().context("writing serial output")?;
        }
    }
    println!();
    report(&sim, &args.watch);
    Ok(())
}
