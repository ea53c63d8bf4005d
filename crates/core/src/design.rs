//! Design input: components, wires and firmware.
//!
//! The JSON shape follows the common diagram format: a `parts` (or
//! `components`) list of `{id, type, attrs}` objects and a `connections`
//! list whose entries are either `{from, to, color}` objects or
//! `["uno:13", "r1:1", "green", ...]` arrays.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::SimConfig;
use crate::devices::DeviceKind;
use crate::error::DesignError;

/// Program image for the microcontroller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "data", rename_all = "lowercase")]
pub enum Firmware {
    /// Intel HEX text
    Hex(String),
    /// Raw flash image
    Binary(Vec<u8>),
    /// Source text for an external compiler
    Source(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<Firmware>,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl Component {
    pub fn new(id: &str, kind: &str) -> Self {
        Component {
            id: id.to_string(),
            kind: kind.to_string(),
            firmware: None,
            attrs: Map::new(),
        }
    }

    pub fn device_kind(&self) -> DeviceKind {
        DeviceKind::from_tag(&self.kind)
    }

    /// Numeric attribute; strings holding numbers are accepted too.
    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        match self.attrs.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name)?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawConnection")]
pub struct Connection {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConnection {
    Object {
        from: String,
        to: String,
        #[serde(default)]
        color: String,
    },
    Array(Vec<Value>),
}

impl From<RawConnection> for Connection {
    fn from(raw: RawConnection) -> Self {
        match raw {
            RawConnection::Object { from, to, color } => Connection { from, to, color },
            RawConnection::Array(items) => {
                let text = |i: usize| items.get(i).and_then(Value::as_str).unwrap_or_default().to_string();
                Connection { from: text(0), to: text(1), color: text(2) }
            }
        }
    }
}

impl Connection {
    pub fn new(from: &str, to: &str) -> Self {
        Connection { from: from.to_string(), to: to.to_string(), color: String::new() }
    }

    /// Both endpoints as `(component, pin)`. None if either lacks a colon.
    pub fn endpoints(&self) -> Option<((&str, &str), (&str, &str))> {
        Some((self.from.split_once(':')?, self.to.split_once(':')?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Design {
    #[serde(alias = "parts")]
    pub components: Vec<Component>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SimConfig>,
}

impl Design {
    pub fn from_json(text: &str) -> Result<Design, DesignError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    /// The microcontroller component.
    pub fn mcu(&self) -> Result<&Component, DesignError> {
        self.components
            .iter()
            .find(|c| c.device_kind() == DeviceKind::Mcu)
            .ok_or(DesignError::NoMicrocontroller)
    }
}
