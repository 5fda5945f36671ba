//! Nodes - the engine-side handle to a component and its tick protocol.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::circuit::{Circuit, CircuitBody};
use crate::component::{Component, Ports};
use crate::error::{Error, Result};
use crate::gate::ReleaseChain;
use crate::registry::Registry;
use crate::signal::{Port, Signal, SignalBus};
use crate::wire::{Wire, WireBus, WireScope};

/// Which side of a component a port sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// One input/output bus pair plus its "has ticked" flag.
#[derive(Debug)]
pub(crate) struct SlotState {
    pub(crate) inputs: SignalBus,
    pub(crate) outputs: SignalBus,
    ticked: bool,
}

impl SlotState {
    fn new(inputs: SignalBus, outputs: SignalBus) -> Self {
        Self {
            inputs,
            outputs,
            ticked: false,
        }
    }

    // Same port shape as `template`, every signal unavailable
    fn from_template(template: &SlotState) -> Self {
        let mut state = Self::new(template.inputs.clone(), template.outputs.clone());
        state.inputs.clear_all_values();
        state.outputs.clear_all_values();
        state
    }

    fn bus_mut(&mut self, direction: Direction) -> &mut SignalBus {
        match direction {
            Direction::Input => &mut self.inputs,
            Direction::Output => &mut self.outputs,
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    states: Vec<Mutex<SlotState>>,
    chain: ReleaseChain,
}

/// What a node does when it processes.
pub(crate) enum Body {
    Leaf(Mutex<Box<dyn Component>>),
    Circuit(CircuitBody),
}

impl Body {
    fn process(&self, inputs: &SignalBus, outputs: &mut SignalBus, slot: Option<usize>) {
        match self {
            Body::Leaf(component) => component.lock().process(inputs, outputs),
            Body::Circuit(circuit) => circuit.process(inputs, outputs, slot),
        }
    }
}

pub(crate) struct NodeInner {
    name: Mutex<String>,
    // Canonical buses: used by the unbuffered `tick` and cloned into new slots
    canonical: Mutex<SlotState>,
    slots: RwLock<Slots>,
    wires: RwLock<WireBus>,
    parent: Mutex<Weak<NodeInner>>,
    body: Body,
}

/// A component placed in the engine.
///
/// `Node` is a cheap, clonable handle; clones refer to the same component.
/// It owns the component's input and output buses (one pair per
/// concurrency slot), its inbound wires and its tick state.
///
/// # Ticking
///
/// [`tick`](Self::tick) pulls every inbound wire (ticking the source first),
/// clears the outputs and calls [`Component::process`] once. A second `tick`
/// before [`reset`](Self::reset) does nothing, which both shares work in
/// diamond-shaped graphs and breaks feedback loops: a wire leading back
/// into an already-ticking node reads that node's previous output.
///
/// ```
/// use flowpatch::{Component, Node, Ports, SignalBus};
///
/// struct Double;
///
/// impl Component for Double {
///     fn declare(&self, ports: &mut Ports) {
///         ports.input("in").output("out");
///     }
///
///     fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
///         if let Some(v) = inputs.value::<f32>("in") {
///             outputs.set_value("out", v * 2.0);
///         }
///     }
/// }
///
/// let node = Node::new(Double);
/// node.set_input_value("in", 1.5f32);
/// node.tick();
/// assert_eq!(node.get_output_value::<f32>("out"), Some(3.0));
/// node.reset();
/// ```
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    /// Place a component in the engine, declaring its ports.
    pub fn new<C: Component>(component: C) -> Self {
        let mut ports = Ports::new();
        component.declare(&mut ports);
        Self::build(Body::Leaf(Mutex::new(Box::new(component))), ports)
    }

    pub(crate) fn build(body: Body, ports: Ports) -> Self {
        let inner = NodeInner {
            name: Mutex::new(String::new()),
            canonical: Mutex::new(SlotState::new(ports.inputs, ports.outputs)),
            slots: RwLock::new(Slots::default()),
            wires: RwLock::new(WireBus::new(WireScope::Source)),
            parent: Mutex::new(Weak::new()),
            body,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<NodeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn as_ptr(&self) -> *const NodeInner {
        Arc::as_ptr(&self.inner)
    }

    /// Whether both handles refer to the same component.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Identity ---

    pub fn name(&self) -> String {
        self.inner.name.lock().clone()
    }

    /// Rename the component.
    ///
    /// Fails if a sibling in the same circuit already uses `name`.
    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if let Some(parent) = self.parent() {
            if let Some(existing) = parent.component(&name) {
                if !existing.ptr_eq(self) {
                    return Err(Error::DuplicateName(name));
                }
            }
        }
        *self.inner.name.lock() = name;
        Ok(())
    }

    pub(crate) fn set_name_unchecked(&self, name: String) {
        *self.inner.name.lock() = name;
    }

    /// The circuit this component belongs to, if any.
    pub fn parent(&self) -> Option<Circuit> {
        let parent = self.inner.parent.lock().upgrade()?;
        Circuit::from_node(Node::from_inner(parent))
    }

    pub(crate) fn set_parent(&self, parent: Option<&Node>) {
        *self.inner.parent.lock() = parent.map_or_else(Weak::new, Node::downgrade);
    }

    /// Whether this node is a [`Circuit`].
    pub fn is_circuit(&self) -> bool {
        matches!(self.inner.body, Body::Circuit(_))
    }

    /// This node as a [`Circuit`] handle, if it is one.
    pub fn as_circuit(&self) -> Option<Circuit> {
        Circuit::from_node(self.clone())
    }

    pub(crate) fn circuit_body(&self) -> Option<&CircuitBody> {
        match &self.inner.body {
            Body::Circuit(body) => Some(body),
            Body::Leaf(_) => None,
        }
    }

    // --- Ports ---

    pub fn input_count(&self) -> usize {
        self.inner.canonical.lock().inputs.signal_count()
    }

    pub fn output_count(&self) -> usize {
        self.inner.canonical.lock().outputs.signal_count()
    }

    pub fn find_input<'a>(&self, port: impl Into<Port<'a>>) -> Option<usize> {
        self.inner.canonical.lock().inputs.resolve(port)
    }

    pub fn find_output<'a>(&self, port: impl Into<Port<'a>>) -> Option<usize> {
        self.inner.canonical.lock().outputs.resolve(port)
    }

    pub(crate) fn resolve_port(&self, direction: Direction, port: Port<'_>) -> Result<usize> {
        let found = match direction {
            Direction::Input => self.find_input(port),
            Direction::Output => self.find_output(port),
        };
        found.ok_or_else(|| Error::PortNotFound {
            component: self.name(),
            direction: direction.as_str(),
            port: port.to_string(),
        })
    }

    /// Append a port to the canonical bus and every slot bus.
    pub(crate) fn add_port(&self, direction: Direction, name: String) -> Result<usize> {
        let index = self.inner.canonical.lock().bus_mut(direction).add_signal(name.clone())?;
        let slots = self.inner.slots.read();
        for state in &slots.states {
            // canonical accepted the name, so every slot bus (same shape) does too
            let _ = state.lock().bus_mut(direction).add_signal(name.clone());
        }
        Ok(index)
    }

    pub(crate) fn remove_all_ports(&self, direction: Direction) {
        self.inner.canonical.lock().bus_mut(direction).remove_all_signals();
        let slots = self.inner.slots.read();
        for state in &slots.states {
            state.lock().bus_mut(direction).remove_all_signals();
        }
    }

    // --- Canonical bus I/O (unbuffered ticking) ---

    /// Store a value on an input. Returns `false` if the input does not exist.
    pub fn set_input_value<'a, T>(&self, port: impl Into<Port<'a>>, value: T) -> bool
    where
        T: std::any::Any + Send + Sync,
    {
        self.inner.canonical.lock().inputs.set_value(port, value)
    }

    /// Copy a signal onto an input. Returns `false` if the signal is
    /// unavailable or the input does not exist.
    pub fn set_input_signal<'a>(&self, port: impl Into<Port<'a>>, signal: &Signal) -> bool {
        self.inner.canonical.lock().inputs.set_signal(port, signal)
    }

    /// Clone an output's value if it is available and of type `T`.
    pub fn get_output_value<'a, T>(&self, port: impl Into<Port<'a>>) -> Option<T>
    where
        T: std::any::Any + Clone,
    {
        self.inner.canonical.lock().outputs.get_value(port)
    }

    /// Run `f` against an output's value without cloning it.
    pub fn output_value<'a, T, R>(&self, port: impl Into<Port<'a>>, f: impl FnOnce(Option<&T>) -> R) -> R
    where
        T: std::any::Any,
    {
        let state = self.inner.canonical.lock();
        f(state.outputs.value::<T>(port))
    }

    /// A copy of an output signal.
    pub fn output_signal<'a>(&self, port: impl Into<Port<'a>>) -> Option<Signal> {
        self.inner.canonical.lock().outputs.signal(port).cloned()
    }

    /// Output signal copy from the canonical bus (`None`) or a slot bus.
    pub fn slot_output_signal<'a>(&self, slot: Option<usize>, port: impl Into<Port<'a>>) -> Option<Signal> {
        let port = port.into();
        self.with_state(slot, |state| state.outputs.signal(port).cloned())
            .flatten()
    }

    /// Run `f` on the canonical state (`None`) or a slot's state.
    pub(crate) fn with_state<R>(&self, slot: Option<usize>, f: impl FnOnce(&mut SlotState) -> R) -> Option<R> {
        match slot {
            None => Some(f(&mut self.inner.canonical.lock())),
            Some(slot) => {
                let slots = self.inner.slots.read_recursive();
                let state = slots.states.get(slot)?;
                let result = f(&mut state.lock());
                Some(result)
            }
        }
    }

    pub(crate) fn set_input_signal_at(&self, slot: Option<usize>, to: usize, signal: &Signal) -> bool {
        self.with_state(slot, |state| state.inputs.set_signal(to, signal))
            .unwrap_or(false)
    }

    // --- Wiring ---

    /// Wire `source`'s output `from` into this component's input `to`.
    ///
    /// Any wire already feeding `to` is replaced. Connecting the identical
    /// wire twice is a no-op.
    pub fn connect_input<'a, 'b>(
        &self,
        source: &Node,
        from: impl Into<Port<'a>>,
        to: impl Into<Port<'b>>,
    ) -> Result<()> {
        let from = source.resolve_port(Direction::Output, from.into())?;
        let to = self.resolve_port(Direction::Input, to.into())?;

        let _paused = self.pause();
        if self.edit_wires(|wires| wires.add_wire(source, from, to)) {
            tracing::debug!(
                source = %source.name(),
                dest = %self.name(),
                from,
                to,
                "connected wire"
            );
        }
        Ok(())
    }

    /// Remove the wire `source.from -> self.to`. Returns whether it existed.
    pub fn disconnect_input<'a, 'b>(
        &self,
        source: &Node,
        from: impl Into<Port<'a>>,
        to: impl Into<Port<'b>>,
    ) -> Result<bool> {
        let from = source.resolve_port(Direction::Output, from.into())?;
        let to = self.resolve_port(Direction::Input, to.into())?;

        let _paused = self.pause();
        Ok(self.edit_wires(|wires| wires.remove_matching(source, from, to)))
    }

    /// Remove whatever wire feeds input `to`. Returns whether one existed.
    pub fn disconnect_input_port<'a>(&self, to: impl Into<Port<'a>>) -> Result<bool> {
        let to = self.resolve_port(Direction::Input, to.into())?;

        let _paused = self.pause();
        Ok(self.edit_wires(|wires| wires.remove_to(to)) > 0)
    }

    /// Remove every wire coming from `source`, returning how many were removed.
    pub fn disconnect_inputs_from(&self, source: &Node) -> usize {
        let _paused = self.pause();
        self.edit_wires(|wires| wires.remove_linking(source))
    }

    /// Remove every inbound wire.
    pub fn disconnect_inputs(&self) {
        let _paused = self.pause();
        self.inner.wires.write().remove_all_wires();
    }

    // Callers hold a pause. Wires to dropped sources are pruned first.
    fn edit_wires<R>(&self, f: impl FnOnce(&mut WireBus) -> R) -> R {
        let mut wires = self.inner.wires.write();
        let expired = wires.remove_expired();
        if expired > 0 {
            tracing::trace!(node = %self.name(), expired, "pruned expired wires");
        }
        f(&mut wires)
    }

    pub fn wire_count(&self) -> usize {
        self.inner.wires.read().wire_count()
    }

    /// Snapshot of the inbound wires.
    pub fn wires(&self) -> Vec<Wire> {
        self.inner.wires.read().iter().cloned().collect()
    }

    // --- Tick protocol ---

    /// Tick this component on the canonical buses.
    ///
    /// 1. Mark the component ticked (a second call returns immediately)
    /// 2. Tick every source and copy its output along each inbound wire
    /// 3. Clear all outputs
    /// 4. Call `process` once
    pub fn tick(&self) {
        {
            let mut state = self.inner.canonical.lock();
            if state.ticked {
                return;
            }
            state.ticked = true;
        }

        self.pull_inputs(None);

        let mut state = self.inner.canonical.lock();
        let state = &mut *state;
        state.outputs.clear_all_values();
        self.inner.body.process(&state.inputs, &mut state.outputs, None);
    }

    /// Clear every input and the ticked flag, ready for the next pass.
    pub fn reset(&self) {
        let mut state = self.inner.canonical.lock();
        state.inputs.clear_all_values();
        state.ticked = false;
    }

    /// Tick this component in concurrency slot `slot`.
    ///
    /// Like [`tick`](Self::tick), on the slot's private buses. Right before
    /// `process`, waits until slot `slot - 1` has finished processing this
    /// same component; right after, lets slot `slot + 1` proceed.
    pub fn thread_tick(&self, slot: usize) {
        let slots = self.inner.slots.read_recursive();
        let Some(state) = slots.states.get(slot) else {
            tracing::trace!(slot, name = %self.name(), "no such slot");
            return;
        };

        {
            let mut state = state.lock();
            if state.ticked {
                return;
            }
            state.ticked = true;
        }

        self.pull_inputs(Some(slot));

        let mut state = state.lock();
        let state = &mut *state;
        state.outputs.clear_all_values();

        slots.chain.wait(slot);
        self.inner.body.process(&state.inputs, &mut state.outputs, Some(slot));
        slots.chain.release_next(slot);
    }

    /// Slot-parameterised [`reset`](Self::reset).
    pub fn thread_reset(&self, slot: usize) {
        let slots = self.inner.slots.read_recursive();
        if let Some(state) = slots.states.get(slot) {
            let mut state = state.lock();
            state.inputs.clear_all_values();
            state.ticked = false;
        }
    }

    // Tick each source, then copy its output into our input
    fn pull_inputs(&self, slot: Option<usize>) {
        let wires = self.inner.wires.read_recursive();
        for wire in wires.iter() {
            let Some(source) = wire.component() else {
                tracing::trace!(name = %self.name(), "skipping wire from dropped component");
                continue;
            };

            match slot {
                None => source.tick(),
                Some(slot) => {
                    // the source has fewer slots than we do; it can't feed this one
                    if source.buffer_count() <= slot {
                        continue;
                    }
                    source.thread_tick(slot);
                }
            }

            if source.ptr_eq(self) {
                self.with_state(slot, |state| {
                    if let Some(signal) = state.outputs.signal(wire.from).cloned() {
                        state.inputs.set_signal(wire.to, &signal);
                    }
                });
            } else {
                source.with_state(slot, |src| {
                    if let Some(signal) = src.outputs.signal(wire.from) {
                        self.set_input_signal_at(slot, wire.to, signal);
                    }
                });
            }
        }
    }

    // --- Buffering ---

    /// Number of concurrency slots this component keeps.
    pub fn buffer_count(&self) -> usize {
        self.inner.slots.read_recursive().states.len()
    }

    /// Resize the per-slot state to `count` slots.
    ///
    /// New slots clone the canonical port shape. The release chain restarts
    /// with `next_slot` as the next slot allowed to process. Must only be
    /// called while every worker that could tick this node is synced.
    pub(crate) fn set_buffer_count(&self, count: usize, next_slot: usize) {
        {
            let mut slots = self.inner.slots.write();
            if slots.states.len() != count {
                let template = self.inner.canonical.lock();
                slots.states.truncate(count);
                while slots.states.len() < count {
                    slots.states.push(Mutex::new(SlotState::from_template(&template)));
                }
                slots.chain = ReleaseChain::new(count);
            }
            slots.chain.rewind_to(next_slot);
            for state in &slots.states {
                state.lock().ticked = false;
            }
        }

        if let Some(circuit) = self.circuit_body() {
            circuit.propagate_buffer_count(count, next_slot);
        }
    }

    // --- Auto-tick ---

    /// Start ticking this component in the background.
    ///
    /// A component with no parent is adopted by `registry`, whose driver
    /// thread then ticks it (and everything it pulls from) continuously.
    /// Components inside a circuit are ticked by that circuit instead.
    pub fn start_auto_tick(&self, registry: &Registry) -> Result<()> {
        registry.start_auto_tick(self)
    }

    /// Stop background ticking. If this was the registry's last component,
    /// the registry's driver thread stops too.
    pub fn stop_auto_tick(&self) {
        let Some(parent) = self.parent() else {
            return;
        };
        if parent.is_registry() {
            Registry::release(&parent, self);
        }
    }

    /// Suspend the auto-tick driver that (transitively) ticks this component.
    ///
    /// Walks parent links up to the root circuit. On the way back down,
    /// every circuit with a worker pool waits for its workers to finish
    /// their in-flight round, so nothing is mid-tick when this returns.
    /// Calls nest; the driver resumes when the outermost pause is undone.
    pub fn pause_auto_tick(&self) {
        match self.parent() {
            Some(parent) => parent.pause_auto_tick(),
            None => {
                if let Some(circuit) = self.circuit_body() {
                    circuit.pause_driver();
                }
            }
        }
        if let Some(circuit) = self.circuit_body() {
            circuit.sync_workers();
        }
    }

    /// Undo one [`pause_auto_tick`](Self::pause_auto_tick).
    pub fn resume_auto_tick(&self) {
        match self.parent() {
            Some(parent) => parent.resume_auto_tick(),
            None => {
                if let Some(circuit) = self.circuit_body() {
                    circuit.resume_driver();
                }
            }
        }
    }

    /// Pause auto-ticking until the returned guard is dropped.
    pub fn pause(&self) -> PauseGuard<'_> {
        self.pause_auto_tick();
        PauseGuard { node: self }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("circuit", &self.is_circuit())
            .field("inputs", &self.input_count())
            .field("outputs", &self.output_count())
            .field("buffers", &self.buffer_count())
            .finish()
    }
}

/// Keeps auto-ticking paused while alive. Returned by [`Node::pause`].
#[must_use = "auto-tick resumes as soon as the guard is dropped"]
pub struct PauseGuard<'a> {
    node: &'a Node,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.node.resume_auto_tick();
    }
}
