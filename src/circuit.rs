//! Circuits - components made of other components.
//!
//! A [`Circuit`] owns a set of child components, exposes its own input and
//! output ports, and maps them onto its children with boundary wires. When
//! ticked it pushes its inputs into the children, ticks them all, and pulls
//! the children's results back out to its outputs.
//!
//! A top-level circuit may run its children on a pool of worker threads; see
//! [`Circuit::set_thread_count`].

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::component::{Component, Ports};
use crate::error::{Error, Result};
use crate::node::{Body, Direction, Node};
use crate::signal::{Port, SignalBus};
use crate::thread::{CircuitThread, ComponentThread};
use crate::wire::{WireBus, WireScope};

/// How a circuit operation refers to one of its children.
#[derive(Clone, Copy, Debug)]
pub enum Member<'a> {
    Name(&'a str),
    Node(&'a Node),
}

impl<'a> From<&'a str> for Member<'a> {
    fn from(name: &'a str) -> Self {
        Member::Name(name)
    }
}

impl<'a> From<&'a String> for Member<'a> {
    fn from(name: &'a String) -> Self {
        Member::Name(name)
    }
}

impl<'a> From<&'a Node> for Member<'a> {
    fn from(node: &'a Node) -> Self {
        Member::Node(node)
    }
}

impl<'a> From<&'a Circuit> for Member<'a> {
    fn from(circuit: &'a Circuit) -> Self {
        Member::Node(&circuit.node)
    }
}

#[derive(Default)]
struct Pool {
    threads: Vec<CircuitThread>,
    // next slot to resume
    cursor: usize,
    // ticks left before the slot being pulled holds a real result
    warmup: usize,
}

pub(crate) struct CircuitBody {
    components: Arc<RwLock<Vec<Node>>>,
    // linked component = receiving child; from = circuit input, to = child input
    inputs_to_children: RwLock<WireBus>,
    // linked component = source child; from = child output, to = circuit output
    children_to_outputs: RwLock<WireBus>,
    pool: Mutex<Pool>,
    // results still owed from a pool that was resized, oldest first
    pending: Mutex<VecDeque<SignalBus>>,
    driver: Mutex<Option<ComponentThread>>,
    registry: bool,
}

impl CircuitBody {
    fn new(registry: bool) -> Self {
        Self {
            components: Arc::new(RwLock::new(Vec::new())),
            inputs_to_children: RwLock::new(WireBus::new(WireScope::Destination)),
            children_to_outputs: RwLock::new(WireBus::new(WireScope::Source)),
            pool: Mutex::new(Pool::default()),
            pending: Mutex::new(VecDeque::new()),
            driver: Mutex::new(None),
            registry,
        }
    }

    pub(crate) fn process(&self, inputs: &SignalBus, outputs: &mut SignalBus, slot: Option<usize>) {
        if let Some(slot) = slot {
            self.push_inputs(inputs, Some(slot));
            self.tick_children(Some(slot));
            self.pull_outputs(outputs, Some(slot));
            return;
        }

        let mut pool = self.pool.lock();
        if pool.threads.is_empty() {
            drop(pool);
            self.push_inputs(inputs, None);
            self.tick_children(None);
            self.pull_outputs(outputs, None);
            self.release_pending(outputs, true);
            return;
        }

        // Hand this tick to the worker at the cursor, then collect the
        // oldest result still in flight: the next worker in line.
        let slot = pool.cursor;
        pool.threads[slot].sync();
        self.push_inputs(inputs, Some(slot));
        pool.threads[slot].resume();

        pool.cursor = (slot + 1) % pool.threads.len();
        let next = pool.cursor;
        pool.threads[next].sync();
        self.pull_outputs(outputs, Some(next));

        let real = pool.warmup == 0;
        pool.warmup = pool.warmup.saturating_sub(1);
        drop(pool);
        self.release_pending(outputs, real);
    }

    // Deliver owed results ahead of this tick's. `real` is false while a
    // fresh pool is still pulling slots that have never run.
    fn release_pending(&self, outputs: &mut SignalBus, real: bool) {
        if !real {
            // a kept worker's slot may still hold a result already delivered
            outputs.clear_all_values();
        }
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return;
        }
        if real {
            pending.push_back(outputs.clone());
        }
        if let Some(oldest) = pending.pop_front() {
            *outputs = oldest;
        }
    }

    // Queue every result the pool has computed but not yet delivered.
    fn drain_in_flight(&self, pool: &Pool, template: &SignalBus) {
        let count = pool.threads.len();
        let mut pending = self.pending.lock();
        for age in pool.warmup + 1..count {
            let slot = (pool.cursor + age) % count;
            pool.threads[slot].sync();
            let mut bus = template.clone();
            self.pull_outputs(&mut bus, Some(slot));
            pending.push_back(bus);
        }
    }

    fn prune_boundaries(&self) {
        self.inputs_to_children.write().remove_expired();
        self.children_to_outputs.write().remove_expired();
    }

    fn tick_children(&self, slot: Option<usize>) {
        let components = self.components.read_recursive();
        match slot {
            None => {
                components.iter().for_each(Node::tick);
                components.iter().for_each(Node::reset);
            }
            Some(slot) => {
                components.iter().for_each(|c| c.thread_tick(slot));
                components.iter().for_each(|c| c.thread_reset(slot));
            }
        }
    }

    fn push_inputs(&self, inputs: &SignalBus, slot: Option<usize>) {
        let wires = self.inputs_to_children.read_recursive();
        for wire in wires.iter() {
            let Some(child) = wire.component() else {
                continue;
            };
            if let Some(signal) = inputs.signal(wire.from_index()) {
                child.set_input_signal_at(slot, wire.to_index(), signal);
            }
        }
    }

    fn pull_outputs(&self, outputs: &mut SignalBus, slot: Option<usize>) {
        let wires = self.children_to_outputs.read_recursive();
        for wire in wires.iter() {
            let Some(child) = wire.component() else {
                continue;
            };
            child.with_state(slot, |state| {
                if let Some(signal) = state.outputs.signal(wire.from_index()) {
                    outputs.set_signal(wire.to_index(), signal);
                }
            });
        }
    }

    fn thread_count(&self) -> usize {
        self.pool.lock().threads.len()
    }

    fn cursor(&self) -> Option<usize> {
        let pool = self.pool.lock();
        (!pool.threads.is_empty()).then_some(pool.cursor)
    }

    /// Size the children's slots after this circuit's own count changed.
    pub(crate) fn propagate_buffer_count(&self, own: usize, next_slot: usize) {
        let (count, next) = if own > 0 {
            (own, next_slot)
        } else {
            (self.thread_count(), self.cursor().unwrap_or(0))
        };
        for child in self.components.read_recursive().iter() {
            child.set_buffer_count(count, next);
        }
    }

    pub(crate) fn sync_workers(&self) {
        for thread in &self.pool.lock().threads {
            thread.sync();
        }
    }

    pub(crate) fn pause_driver(&self) {
        if let Some(driver) = self.driver.lock().as_ref() {
            driver.pause();
        }
    }

    pub(crate) fn resume_driver(&self) {
        if let Some(driver) = self.driver.lock().as_ref() {
            driver.resume();
        }
    }

    pub(crate) fn is_registry(&self) -> bool {
        self.registry
    }

    pub(crate) fn has_driver(&self) -> bool {
        self.driver.lock().is_some()
    }
}

impl Drop for CircuitBody {
    fn drop(&mut self) {
        if let Some(mut driver) = self.driver.get_mut().take() {
            driver.stop();
        }
        for mut thread in self.pool.get_mut().threads.drain(..) {
            thread.stop();
        }
    }
}

/// A component whose behaviour is a graph of child components.
///
/// A circuit is itself a [`Node`] (it derefs to one), so it can be wired to
/// other components, ticked directly, or placed inside another circuit.
///
/// ```
/// use flowpatch::{Circuit, Component, Ports, SignalBus};
///
/// struct Negate;
///
/// impl Component for Negate {
///     fn declare(&self, ports: &mut Ports) {
///         ports.input("in").output("out");
///     }
///
///     fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
///         if let Some(v) = inputs.value::<i64>(0) {
///             outputs.set_value(0, -v);
///         }
///     }
/// }
///
/// let circuit = Circuit::new();
/// circuit.add_input("x").unwrap();
/// circuit.add_output("y").unwrap();
/// circuit.add(Negate, "neg").unwrap();
/// circuit.connect_in_to_in("x", "neg", "in").unwrap();
/// circuit.connect_out_to_out("neg", "out", "y").unwrap();
///
/// circuit.set_input_value("x", 5i64);
/// circuit.tick();
/// assert_eq!(circuit.get_output_value::<i64>("y"), Some(-5));
/// circuit.reset();
/// ```
#[derive(Clone)]
pub struct Circuit {
    node: Node,
}

impl Circuit {
    pub fn new() -> Self {
        Self {
            node: Node::build(Body::Circuit(CircuitBody::new(false)), Ports::new()),
        }
    }

    /// A circuit that runs its children on `threads` worker threads.
    pub fn with_thread_count(threads: usize) -> Result<Self> {
        let circuit = Self::new();
        circuit.set_thread_count(threads)?;
        Ok(circuit)
    }

    pub(crate) fn registry() -> Self {
        let node = Node::build(Body::Circuit(CircuitBody::new(true)), Ports::new());
        node.set_name_unchecked("registry".to_owned());
        Self { node }
    }

    pub(crate) fn from_node(node: Node) -> Option<Self> {
        node.is_circuit().then_some(Self { node })
    }

    fn body(&self) -> &CircuitBody {
        match self.node.circuit_body() {
            Some(body) => body,
            None => unreachable!("Circuit always wraps a circuit node"),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn into_node(self) -> Node {
        self.node
    }

    /// Whether this is the hidden root circuit of a [`Registry`](crate::Registry).
    pub fn is_registry(&self) -> bool {
        self.body().is_registry()
    }

    /// Whether this circuit sits inside another (non-registry) circuit.
    pub fn is_nested(&self) -> bool {
        self.node.parent().is_some_and(|p| !p.is_registry())
    }

    // --- Membership ---

    /// Build a component and add it under `name`. Returns its node.
    pub fn add<C: Component>(&self, component: C, name: &str) -> Result<Node> {
        let node = Node::new(component);
        self.add_component(&node, Some(name))?;
        Ok(node)
    }

    /// Add an existing component to this circuit.
    ///
    /// `name` overrides the component's current name. Non-empty names must be
    /// unique among the children. A component auto-ticking on the registry is
    /// taken off it first; a component owned by any other circuit is rejected.
    /// A circuit added here gives up its worker threads and runs on this
    /// circuit's instead.
    pub fn add_component(&self, node: &Node, name: Option<&str>) -> Result<()> {
        if self.contains_ancestor(node) {
            return Err(Error::SelfParent);
        }

        let name = name.map_or_else(|| node.name(), str::to_owned);
        let current_parent = node.parent();
        if let Some(parent) = &current_parent {
            if parent.node.ptr_eq(&self.node) || !parent.is_registry() || self.is_registry() {
                return Err(Error::AlreadyOwned(node.name()));
            }
        }
        // registry children are unrelated top-level components; their names may repeat
        if !self.is_registry() && !name.is_empty() && self.component(&name).is_some() {
            return Err(Error::DuplicateName(name));
        }

        if let Some(registry) = current_parent {
            node.stop_auto_tick();
            tracing::debug!(name = %node.name(), from = %registry.name(), "detached from registry");
        }

        let _paused = self.pause();
        if let Some(child) = node.as_circuit() {
            if !self.is_registry() {
                child.set_thread_count(0)?;
            }
        }

        node.set_name_unchecked(name);
        node.set_buffer_count(self.child_buffer_count(), self.pipeline_cursor());
        node.set_parent(Some(&self.node));
        self.body().components.write().push(node.clone());

        tracing::debug!(circuit = %self.name(), child = %node.name(), "added component");
        Ok(())
    }

    /// Remove a child, disconnecting every wire that involves it.
    ///
    /// Returns the removed component, now parentless.
    pub fn remove_component<'a>(&self, member: impl Into<Member<'a>>) -> Result<Node> {
        let node = self.member(member.into())?;

        let _paused = self.pause();
        if !self.is_registry() {
            self.disconnect_node(&node);
        }
        self.body().components.write().retain(|c| !c.ptr_eq(&node));
        node.set_parent(None);
        node.set_buffer_count(0, 0);

        tracing::debug!(circuit = %self.name(), child = %node.name(), "removed component");
        Ok(node)
    }

    /// Remove every child.
    pub fn remove_all_components(&self) {
        let _paused = self.pause();
        let removed = std::mem::take(&mut *self.body().components.write());
        self.body().inputs_to_children.write().remove_all_wires();
        self.body().children_to_outputs.write().remove_all_wires();
        for node in &removed {
            if !self.is_registry() {
                node.disconnect_inputs();
            }
            node.set_parent(None);
            node.set_buffer_count(0, 0);
        }
        tracing::debug!(circuit = %self.name(), count = removed.len(), "removed all components");
    }

    /// The child called `name`, if any. The empty name never matches.
    pub fn component(&self, name: &str) -> Option<Node> {
        if name.is_empty() {
            return None;
        }
        self.body()
            .components
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    pub fn components(&self) -> Vec<Node> {
        self.body().components.read().clone()
    }

    pub fn component_count(&self) -> usize {
        self.body().components.read().len()
    }

    fn member(&self, member: Member<'_>) -> Result<Node> {
        match member {
            Member::Name(name) => self
                .component(name)
                .ok_or_else(|| Error::ComponentNotFound(name.to_owned())),
            Member::Node(node) => self
                .body()
                .components
                .read()
                .iter()
                .find(|c| c.ptr_eq(node))
                .cloned()
                .ok_or(Error::NotAMember),
        }
    }

    // Is `node` this circuit or one of its ancestors?
    fn contains_ancestor(&self, node: &Node) -> bool {
        let mut current = Some(self.clone());
        while let Some(circuit) = current {
            if circuit.node.ptr_eq(node) {
                return true;
            }
            current = circuit.node.parent();
        }
        false
    }

    fn child_buffer_count(&self) -> usize {
        match self.node.buffer_count() {
            0 => self.body().thread_count(),
            own => own,
        }
    }

    // Next slot the worker pool driving this circuit will run
    fn pipeline_cursor(&self) -> usize {
        match self.body().cursor() {
            Some(cursor) => cursor,
            None => self.node.parent().map_or(0, |p| p.pipeline_cursor()),
        }
    }

    // --- Wiring ---

    /// Wire child `from`'s output into child `to`'s input.
    pub fn connect_out_to_in<'a, 'b, 'c, 'd>(
        &self,
        from: impl Into<Member<'a>>,
        from_output: impl Into<Port<'b>>,
        to: impl Into<Member<'c>>,
        to_input: impl Into<Port<'d>>,
    ) -> Result<()> {
        let from = self.member(from.into())?;
        let to = self.member(to.into())?;
        to.connect_input(&from, from_output, to_input)
    }

    /// Forward one of this circuit's inputs to a child's input.
    pub fn connect_in_to_in<'a, 'b, 'c>(
        &self,
        circuit_input: impl Into<Port<'a>>,
        to: impl Into<Member<'b>>,
        to_input: impl Into<Port<'c>>,
    ) -> Result<()> {
        let from = self.resolve_port(Direction::Input, circuit_input.into())?;
        let to = self.member(to.into())?;
        let to_input = to.resolve_port(Direction::Input, to_input.into())?;

        let _paused = self.pause();
        self.body().prune_boundaries();
        self.body().inputs_to_children.write().add_wire(&to, from, to_input);
        tracing::debug!(circuit = %self.name(), child = %to.name(), from, to = to_input, "connected input boundary");
        Ok(())
    }

    /// Expose a child's output as one of this circuit's outputs.
    pub fn connect_out_to_out<'a, 'b, 'c>(
        &self,
        from: impl Into<Member<'a>>,
        from_output: impl Into<Port<'b>>,
        circuit_output: impl Into<Port<'c>>,
    ) -> Result<()> {
        let from = self.member(from.into())?;
        let from_output = from.resolve_port(Direction::Output, from_output.into())?;
        let to = self.resolve_port(Direction::Output, circuit_output.into())?;

        let _paused = self.pause();
        self.body().prune_boundaries();
        self.body().children_to_outputs.write().add_wire(&from, from_output, to);
        tracing::debug!(circuit = %self.name(), child = %from.name(), from = from_output, to, "connected output boundary");
        Ok(())
    }

    pub fn disconnect_out_to_in<'a, 'b, 'c, 'd>(
        &self,
        from: impl Into<Member<'a>>,
        from_output: impl Into<Port<'b>>,
        to: impl Into<Member<'c>>,
        to_input: impl Into<Port<'d>>,
    ) -> Result<bool> {
        let from = self.member(from.into())?;
        let to = self.member(to.into())?;
        to.disconnect_input(&from, from_output, to_input)
    }

    pub fn disconnect_in_to_in<'a, 'b, 'c>(
        &self,
        circuit_input: impl Into<Port<'a>>,
        to: impl Into<Member<'b>>,
        to_input: impl Into<Port<'c>>,
    ) -> Result<bool> {
        let from = self.resolve_port(Direction::Input, circuit_input.into())?;
        let to = self.member(to.into())?;
        let to_input = to.resolve_port(Direction::Input, to_input.into())?;

        let _paused = self.pause();
        self.body().prune_boundaries();
        Ok(self
            .body()
            .inputs_to_children
            .write()
            .remove_matching(&to, from, to_input))
    }

    pub fn disconnect_out_to_out<'a, 'b, 'c>(
        &self,
        from: impl Into<Member<'a>>,
        from_output: impl Into<Port<'b>>,
        circuit_output: impl Into<Port<'c>>,
    ) -> Result<bool> {
        let from = self.member(from.into())?;
        let from_output = from.resolve_port(Direction::Output, from_output.into())?;
        let to = self.resolve_port(Direction::Output, circuit_output.into())?;

        let _paused = self.pause();
        self.body().prune_boundaries();
        Ok(self
            .body()
            .children_to_outputs
            .write()
            .remove_matching(&from, from_output, to))
    }

    /// Remove every wire into or out of a child, including boundary wires.
    pub fn disconnect_component<'a>(&self, member: impl Into<Member<'a>>) -> Result<()> {
        let node = self.member(member.into())?;
        let _paused = self.pause();
        self.disconnect_node(&node);
        Ok(())
    }

    fn disconnect_node(&self, node: &Node) {
        self.body().prune_boundaries();
        node.disconnect_inputs();
        self.body().inputs_to_children.write().remove_linking(node);
        self.body().children_to_outputs.write().remove_linking(node);
        for sibling in self.body().components.read().iter() {
            sibling.disconnect_inputs_from(node);
        }
        tracing::debug!(circuit = %self.name(), child = %node.name(), "disconnected component");
    }

    // --- Ports ---

    /// Add an input port to the circuit, returning its index.
    pub fn add_input(&self, name: impl Into<String>) -> Result<usize> {
        let _paused = self.pause();
        self.node.add_port(Direction::Input, name.into())
    }

    /// Add an output port to the circuit, returning its index.
    pub fn add_output(&self, name: impl Into<String>) -> Result<usize> {
        let _paused = self.pause();
        let name = name.into();
        let index = self.node.add_port(Direction::Output, name.clone())?;
        for bus in self.body().pending.lock().iter_mut() {
            let _ = bus.add_signal(name.clone());
        }
        Ok(index)
    }

    /// Remove every circuit input along with the wires reading from them.
    pub fn clear_inputs(&self) {
        let _paused = self.pause();
        self.node.remove_all_ports(Direction::Input);
        self.body().inputs_to_children.write().remove_all_wires();
    }

    /// Remove every circuit output along with the wires feeding them.
    pub fn clear_outputs(&self) {
        let _paused = self.pause();
        self.node.remove_all_ports(Direction::Output);
        self.body().children_to_outputs.write().remove_all_wires();
        for bus in self.body().pending.lock().iter_mut() {
            bus.remove_all_signals();
        }
    }

    // --- Threads ---

    /// Number of worker threads this circuit runs its children on.
    pub fn thread_count(&self) -> usize {
        self.body().thread_count()
    }

    /// Run the children on `count` worker threads (0 = tick on the caller).
    ///
    /// With `count` workers, consecutive ticks of the circuit go to
    /// consecutive workers and overlap: the outputs read after a tick are the
    /// circuit's result from `count - 1` ticks earlier. Each component still
    /// processes one tick at a time, in tick order.
    ///
    /// Each worker has its own copy of every bus, so a feedback wire inside a
    /// threaded circuit reads the value its source produced `count` ticks
    /// earlier, not on the previous tick.
    ///
    /// Changing the count never drops a result: whatever the old pool still
    /// had in flight is delivered first, and the delay only ever grows.
    ///
    /// A nested circuit always runs on its parent's threads, so asking one
    /// for workers fails with [`Error::NestedCircuit`].
    pub fn set_thread_count(&self, count: usize) -> Result<()> {
        if count > 0 && self.is_nested() {
            return Err(Error::NestedCircuit);
        }
        if count == self.thread_count() {
            return Ok(());
        }

        let _paused = self.pause();
        let template = self
            .node
            .with_state(None, |state| {
                let mut bus = state.outputs.clone();
                bus.clear_all_values();
                bus
            })
            .unwrap_or_default();
        {
            let mut pool = self.body().pool.lock();
            let start = pool.threads.len().min(count);
            let mut spawned = Vec::with_capacity(count.saturating_sub(start));
            for slot in start..count {
                spawned.push(CircuitThread::spawn(slot, self.body().components.clone())?);
            }
            if !self.is_registry() {
                self.body().drain_in_flight(&pool, &template);
            }
            let keep = count.min(pool.threads.len());
            for mut thread in pool.threads.drain(keep..) {
                thread.stop();
            }
            pool.threads.extend(spawned);
            pool.cursor = 0;
            pool.warmup = count.saturating_sub(1);
        }

        if self.node.buffer_count() == 0 {
            self.body().propagate_buffer_count(0, 0);
        }
        tracing::debug!(circuit = %self.name(), threads = count, "set thread count");
        Ok(())
    }

    // --- Registry driver ---

    pub(crate) fn start_driver(&self) -> Result<()> {
        let mut driver = self.body().driver.lock();
        if driver.is_none() {
            *driver = Some(ComponentThread::spawn(self.node.downgrade())?);
        }
        Ok(())
    }

    pub(crate) fn stop_driver(&self) {
        let driver = self.body().driver.lock().take();
        if let Some(mut driver) = driver {
            driver.stop();
        }
    }

    pub(crate) fn has_driver(&self) -> bool {
        self.body().has_driver()
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Circuit {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl From<Circuit> for Node {
    fn from(circuit: Circuit) -> Self {
        circuit.node
    }
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("name", &self.name())
            .field("components", &self.component_count())
            .field("threads", &self.thread_count())
            .finish()
    }
}
