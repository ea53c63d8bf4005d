//! Net resolution.
//!
//! Every `component:pin` endpoint named by a wire becomes a node of a
//! union-find forest. Wires join their two endpoints, resistors join all of
//! their terminals (a short, whatever the resistance), and parts with
//! internally bridged terminals such as pushbuttons join those. Each
//! resulting set is a net.
//!
//! A net touching one of the microcontroller's power pins is a power rail,
//! one touching a ground pin is ground, and a net touching one of its I/O
//! pins maps to that port bit.

use std::collections::HashMap;

use crate::design::Design;
use crate::devices::DeviceKind;
use crate::gpio::Pin;
use crate::pins;

pub type NetId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetKind {
    Power,
    Ground,
    Signal,
}

/// Union-find with path halving and union by rank.
#[derive(Debug, Clone, Default)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn add(&mut self) -> usize {
        let i = self.parent.len();
        self.parent.push(i);
        self.rank.push(0);
        i
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    component: String,
    pin: String,
}

#[derive(Debug, Clone, Default)]
pub struct Netlist {
    nodes: Vec<Node>,
    index: HashMap<(String, String), usize>,
    /// Node indices per component, in first-seen order
    by_component: HashMap<String, Vec<usize>>,
    kinds: HashMap<String, DeviceKind>,
    net_of: Vec<NetId>,
    members: Vec<Vec<usize>>,
    net_kind: Vec<NetKind>,
    mcu_pin: Vec<Option<Pin>>,
}

/// Terminal pairs bridged inside a part.
fn internal_bridges(kind: DeviceKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        DeviceKind::Pushbutton => &[("1.l", "1.r"), ("2.l", "2.r")],
        _ => &[],
    }
}

impl Netlist {
    pub fn build(design: &Design) -> Netlist {
        let mut nl = Netlist::default();
        let mut sets = DisjointSet::default();
        let mut mcu_id = None;
        for c in &design.components {
            let kind = c.device_kind();
            if kind == DeviceKind::Mcu && mcu_id.is_none() {
                mcu_id = Some(c.id.clone());
            }
            nl.kinds.insert(c.id.clone(), kind);
        }

        for conn in &design.connections {
            let Some(((ca, pa), (cb, pb))) = conn.endpoints() else {
                log::warn!("connection {} -> {} is not of the form id:pin", conn.from, conn.to);
                continue;
            };
            let a = nl.node(&mut sets, ca, pa);
            let b = nl.node(&mut sets, cb, pb);
            sets.union(a, b);
        }

        for c in &design.components {
            let kind = nl.kind_of(&c.id);
            if kind == DeviceKind::Resistor {
                // Both terminals exist even when only one is wired
                let a = nl.node(&mut sets, &c.id, "1");
                let b = nl.node(&mut sets, &c.id, "2");
                sets.union(a, b);
                let wired = nl.by_component.get(&c.id).cloned().unwrap_or_default();
                for n in wired {
                    sets.union(a, n);
                }
            }
            for (p, q) in internal_bridges(kind) {
                let a = nl.node(&mut sets, &c.id, p);
                let b = nl.node(&mut sets, &c.id, q);
                sets.union(a, b);
            }
        }

        // Dense net ids in node order
        let mut root_to_net = HashMap::new();
        for i in 0..nl.nodes.len() {
            let root = sets.find(i);
            let next = nl.members.len();
            let net = *root_to_net.entry(root).or_insert(next);
            if net == next {
                nl.members.push(Vec::new());
            }
            nl.members[net].push(i);
            nl.net_of.push(net);
        }

        nl.net_kind = vec![NetKind::Signal; nl.members.len()];
        nl.mcu_pin = vec![None; nl.members.len()];
        if let Some(mcu) = mcu_id {
            nl.classify(&mcu);
        } else {
            log::warn!("design has no microcontroller; all nets are floating");
        }
        log::debug!("netlist: {} pins in {} nets", nl.nodes.len(), nl.members.len());
        nl
    }

    fn node(&mut self, sets: &mut DisjointSet, component: &str, pin: &str) -> usize {
        let key = (component.to_string(), pin.to_string());
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = sets.add();
        self.nodes.push(Node { component: key.0.clone(), pin: key.1.clone() });
        self.by_component.entry(key.0.clone()).or_default().push(i);
        self.index.insert(key, i);
        i
    }

    fn classify(&mut self, mcu: &str) {
        for (net, members) in self.members.iter().enumerate() {
            for &i in members {
                let node = &self.nodes[i];
                if node.component != mcu {
                    continue;
                }
                if pins::is_ground_pin(&node.pin) {
                    self.net_kind[net] = NetKind::Ground;
                } else if pins::is_power_pin(&node.pin) && self.net_kind[net] != NetKind::Ground {
                    self.net_kind[net] = NetKind::Power;
                }
                if self.mcu_pin[net].is_none() {
                    self.mcu_pin[net] = pins::aliases(DeviceKind::Mcu, &node.pin)
                        .into_iter()
                        .chain(std::iter::once(node.pin.as_str()))
                        .find_map(Pin::from_arduino);
                }
            }
        }
    }

    pub fn kind_of(&self, component: &str) -> DeviceKind {
        self.kinds.get(component).copied().unwrap_or(DeviceKind::Unknown)
    }

    /// Net of an exact `component:pin` endpoint.
    pub fn net_of(&self, component: &str, pin: &str) -> Option<NetId> {
        let key = (component.to_string(), pin.to_string());
        self.index.get(&key).map(|&i| self.net_of[i])
    }

    /// Net of a pin asked for by name, honoring the device's aliases.
    ///
    /// An unresolved name is unconnected and reads as a floating line.
    pub fn resolve(&self, component: &str, requested: &str) -> Option<NetId> {
        let kind = self.kind_of(component);
        let nodes = self.by_component.get(component)?;
        let names = nodes.iter().map(|&i| self.nodes[i].pin.as_str());
        let Some(name) = pins::resolve(kind, requested, names) else {
            log::debug!("{}: pin '{}' is not connected", component, requested);
            return None;
        };
        self.net_of(component, name)
    }

    pub fn net_kind(&self, net: NetId) -> NetKind {
        self.net_kind.get(net).copied().unwrap_or(NetKind::Signal)
    }

    /// Port bit driving a net, if the microcontroller is on it.
    pub fn mcu_pin(&self, net: NetId) -> Option<Pin> {
        self.mcu_pin.get(net).copied().flatten()
    }

    /// Shorthand for `resolve` followed by `mcu_pin`.
    pub fn mcu_pin_for(&self, component: &str, requested: &str) -> Option<Pin> {
        self.resolve(component, requested).and_then(|n| self.mcu_pin(n))
    }

    /// `(component, pin)` members of a net.
    pub fn members(&self, net: NetId) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.members
            .get(net)
            .into_iter()
            .flatten()
            .map(|&i| (self.nodes[i].component.as_str(), self.nodes[i].pin.as_str()))
    }

    pub fn net_count(&self) -> usize {
        self.members.len()
    }
}
