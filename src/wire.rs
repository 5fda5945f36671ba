//! Wires and the buses that own them.

use std::fmt;
use std::sync::Weak;

use crate::node::{Node, NodeInner};

/// A directed edge between two ports: `(component, from) -> to`.
///
/// Which end `component` refers to depends on the owning bus (see
/// [`WireScope`]). For a component's inbound bus it is the source; for a
/// circuit's input boundary it is the child receiving the signal.
///
/// Wires never keep a component alive. If the linked component has been
/// dropped, [`component`](Self::component) returns `None` and the wire is
/// skipped when ticking.
#[derive(Clone)]
pub struct Wire {
    pub(crate) component: Weak<NodeInner>,
    pub(crate) from: usize,
    pub(crate) to: usize,
}

impl Wire {
    /// The linked component, if it still exists.
    pub fn component(&self) -> Option<Node> {
        self.component.upgrade().map(Node::from_inner)
    }

    /// Output (or circuit input) index the signal is read from.
    pub fn from_index(&self) -> usize {
        self.from
    }

    /// Input (or circuit output) index the signal is written to.
    pub fn to_index(&self) -> usize {
        self.to
    }

    /// Whether this wire links `node`.
    pub fn links(&self, node: &Node) -> bool {
        self.component.as_ptr() == node.as_ptr()
    }

    fn matches(&self, node: &Node, from: usize, to: usize) -> bool {
        self.links(node) && self.from == from && self.to == to
    }
}

impl fmt::Debug for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.component().map(|n| n.name());
        f.debug_struct("Wire")
            .field("component", &name)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Which end of a wire the linked component sits on.
///
/// This decides how "one wire per destination" is scoped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireScope {
    /// The linked component is the source; the bus owner receives.
    /// Destination indices are unique across the whole bus.
    Source,
    /// The linked component receives. Destination indices are unique per
    /// linked component (circuit input -> child input).
    Destination,
}

/// A collection of [`Wire`]s enforcing at most one wire per destination.
#[derive(Clone, Debug)]
pub struct WireBus {
    wires: Vec<Wire>,
    scope: WireScope,
}

impl WireBus {
    pub fn new(scope: WireScope) -> Self {
        Self { wires: Vec::new(), scope }
    }

    /// Add a wire from `component`'s `from` to `to`.
    ///
    /// Returns `false` if the identical wire already exists. Otherwise any
    /// wire already targeting the same destination is replaced, so an input
    /// only ever has a single writer.
    pub fn add_wire(&mut self, component: &Node, from: usize, to: usize) -> bool {
        if self.wires.iter().any(|w| w.matches(component, from, to)) {
            return false;
        }

        let scope = self.scope;
        let occupied = self.wires.iter().position(|w| match scope {
            WireScope::Source => w.to == to,
            WireScope::Destination => w.to == to && w.links(component),
        });
        if let Some(index) = occupied {
            tracing::debug!(to, "replacing existing wire");
            self.wires.remove(index);
        }

        self.wires.push(Wire {
            component: component.downgrade(),
            from,
            to,
        });
        true
    }

    /// Remove the wire at `index`. Returns `false` if out of range.
    pub fn remove_wire(&mut self, index: usize) -> bool {
        if index >= self.wires.len() {
            return false;
        }
        self.wires.remove(index);
        true
    }

    /// Remove the wire exactly matching `(component, from, to)`.
    pub fn remove_matching(&mut self, component: &Node, from: usize, to: usize) -> bool {
        match self.wires.iter().position(|w| w.matches(component, from, to)) {
            Some(index) => self.remove_wire(index),
            None => false,
        }
    }

    /// Remove every wire whose destination is `to`.
    pub fn remove_to(&mut self, to: usize) -> usize {
        let before = self.wires.len();
        self.wires.retain(|w| w.to != to);
        before - self.wires.len()
    }

    /// Remove every wire linking `component`, returning how many were removed.
    pub fn remove_linking(&mut self, component: &Node) -> usize {
        let before = self.wires.len();
        self.wires.retain(|w| !w.links(component));
        before - self.wires.len()
    }

    /// Drop wires whose linked component no longer exists.
    pub fn remove_expired(&mut self) -> usize {
        let before = self.wires.len();
        self.wires.retain(|w| w.component.strong_count() > 0);
        before - self.wires.len()
    }

    pub fn remove_all_wires(&mut self) {
        self.wires.clear();
    }

    pub fn wire(&self, index: usize) -> Option<&Wire> {
        self.wires.get(index)
    }

    pub fn wire_count(&self) -> usize {
        self.wires.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Wire> {
        self.wires.iter()
    }
}
