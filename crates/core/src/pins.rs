//! Pin-name aliases.
//!
//! Designs name the same terminal in many ways: an LED's anode may be
//! `A`, `anode`, `+` or `1`, a ground pin `GND`, `GND.2` or `VSS`. All
//! synonym handling lives here so devices only ever ask for their own
//! canonical names.

use crate::devices::DeviceKind;

type Group = &'static [&'static str];

const MCU: &[Group] = &[&["A4", "SDA"], &["A5", "SCL"]];
const LED: &[Group] = &[&["A", "anode", "1", "+"], &["C", "cathode", "K", "2", "-"]];
const DHT: &[Group] = &[&["SDA", "DATA", "DAT", "OUT", "SIG"]];
const HX711: &[Group] = &[&["DT", "DOUT", "DAT"], &["SCK", "CLK", "PD_SCK"]];
const HCSR04: &[Group] = &[&["TRIG", "TRIGGER"], &["ECHO"]];
const IR: &[Group] = &[&["DAT", "OUT", "DATA", "SIG"]];
const NEOPIXEL: &[Group] = &[&["DIN", "DI", "IN", "DATA"]];
const KY040: &[Group] = &[&["CLK", "A"], &["DT", "B"], &["SW", "BTN"]];
const POT: &[Group] = &[&["SIG", "WIPER", "OUT"]];
const SWITCH: &[Group] = &[&["2", "COM", "COMMON"]];
const LCD: &[Group] = &[&["E", "EN", "ENABLE"], &["RS"], &["RW", "R/W"]];

/// Groups every device understands.
const GENERIC: &[Group] = &[
    &["VCC", "5V", "VIN", "VDD", "V+"],
    &["GND", "GND.1", "GND.2", "GND.3", "VSS", "GND1", "GND2", "V-"],
    &["SDA", "A4"],
    &["SCL", "A5"],
];

fn groups(kind: DeviceKind) -> &'static [Group] {
    match kind {
        DeviceKind::Mcu => MCU,
        DeviceKind::Led => LED,
        DeviceKind::Dht22 => DHT,
        DeviceKind::Hx711 => HX711,
        DeviceKind::HcSr04 => HCSR04,
        DeviceKind::IrReceiver => IR,
        DeviceKind::Ws2812 => NEOPIXEL,
        DeviceKind::Ky040 => KY040,
        DeviceKind::Potentiometer => POT,
        DeviceKind::SlideSwitch => SWITCH,
        DeviceKind::Lcd { .. } => LCD,
        _ => &[],
    }
}

/// Names to try, in order, when a device of `kind` asks for `requested`.
///
/// The matching spelling comes first; the other members of the first group
/// containing it follow in table order, device-specific groups before the
/// generic ones. Empty when the name has no known synonyms.
pub fn aliases(kind: DeviceKind, requested: &str) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    let group = groups(kind)
        .iter()
        .chain(GENERIC.iter())
        .find(|g| g.iter().any(|n| n.eq_ignore_ascii_case(requested)));
    if let Some(g) = group {
        // Put the matching spelling first, then the rest of the group
        if let Some(own) = g.iter().find(|n| n.eq_ignore_ascii_case(requested)) {
            out.push(*own);
        }
        out.extend(g.iter().copied().filter(|n| !n.eq_ignore_ascii_case(requested)));
    }
    out
}

/// Pick the name under which `kind` exposes `requested` among `available`.
///
/// Tries the exact name, then each alias exactly, then a case-insensitive
/// match of the requested name and its aliases.
pub fn resolve<'a, I>(kind: DeviceKind, requested: &str, available: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    if let Some(hit) = available.clone().into_iter().find(|p| *p == requested) {
        return Some(hit);
    }
    let names = aliases(kind, requested);
    for name in &names {
        if let Some(hit) = available.clone().into_iter().find(|p| p == name) {
            return Some(hit);
        }
    }
    std::iter::once(requested)
        .chain(names.iter().copied())
        .find_map(|name| available.clone().into_iter().find(|p| p.eq_ignore_ascii_case(name)))
}

/// True for pin names that are a power rail on the microcontroller.
pub fn is_power_pin(name: &str) -> bool {
    ["5V", "3.3V", "VIN", "IOREF", "VCC"].iter().any(|p| p.eq_ignore_ascii_case(name))
}

/// True for pin names that are a ground on the microcontroller.
pub fn is_ground_pin(name: &str) -> bool {
    name.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("GND"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_led_terminal_synonyms() {
        let pins = ["anode", "cathode"];
        assert_eq!(resolve(DeviceKind::Led, "A", pins.iter().copied()), Some("anode"));
        assert_eq!(resolve(DeviceKind::Led, "C", pins.iter().copied()), Some("cathode"));
        let pins = ["A", "C"];
        assert_eq!(resolve(DeviceKind::Led, "anode", pins.iter().copied()), Some("A"));
    }

    #[test]
    fn test_exact_name_beats_alias() {
        let pins = ["GND.2", "GND"];
        assert_eq!(resolve(DeviceKind::Dht22, "GND", pins.iter().copied()), Some("GND"));
    }

    #[test]
    fn test_case_insensitive_fallback() {
        let pins = ["trig", "echo"];
        assert_eq!(resolve(DeviceKind::HcSr04, "ECHO", pins.iter().copied()), Some("echo"));
        assert_eq!(resolve(DeviceKind::Unknown, "Foo", ["FOO"].iter().copied()), Some("FOO"));
    }

    #[test]
    fn test_unresolved_is_none() {
        let pins = ["VCC", "GND"];
        assert_eq!(resolve(DeviceKind::Dht22, "SDA", pins.iter().copied()), None);
    }

    #[test]
    fn test_device_groups_precede_generic() {
        // On a DHT "SDA" is the data line, not the I2C A4 alias
        assert_eq!(aliases(DeviceKind::Dht22, "SDA")[..2], ["SDA", "DATA"]);
        assert_eq!(aliases(DeviceKind::Ssd1306, "SDA"), vec!["SDA", "A4"]);
        assert_eq!(aliases(DeviceKind::Mcu, "SDA"), vec!["SDA", "A4"]);
        assert!(aliases(DeviceKind::Led, "nothing").is_empty());
    }

    #[test]
    fn test_rail_names() {
        assert!(is_power_pin("5V"));
        assert!(is_power_pin("3.3V"));
        assert!(is_ground_pin("GND.1"));
        assert!(is_ground_pin("gnd"));
        assert!(!is_ground_pin("G"));
        assert!(!is_power_pin("13"));
    }
}
