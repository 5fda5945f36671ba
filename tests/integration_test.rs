use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::yield_now;
use std::time::{Duration, Instant};

use flowpatch::{Circuit, Component, Error, Node, Ports, Registry, Signal, SignalBus};
use parking_lot::Mutex;

struct Constant(i32);

impl Component for Constant {
    fn declare(&self, ports: &mut Ports) {
        ports.output("out");
    }

    fn process(&mut self, _inputs: &SignalBus, outputs: &mut SignalBus) {
        outputs.set_value(0, self.0);
    }
}

struct Adder;

impl Component for Adder {
    fn declare(&self, ports: &mut Ports) {
        ports.input("a").input("b").output("sum");
    }

    fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
        if let (Some(a), Some(b)) = (inputs.value::<i32>(0), inputs.value::<i32>(1)) {
            outputs.set_value(0, a + b);
        }
    }
}

struct Pass;

impl Component for Pass {
    fn declare(&self, ports: &mut Ports) {
        ports.input("in").output("out");
    }

    fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
        if let Some(signal) = inputs.signal(0) {
            outputs.set_signal(0, signal);
        }
    }
}

/// Records what arrives on its input each tick.
struct Recorder(Arc<Mutex<Vec<Option<i32>>>>);

impl Component for Recorder {
    fn declare(&self, ports: &mut Ports) {
        ports.input("in");
    }

    fn process(&mut self, inputs: &SignalBus, _outputs: &mut SignalBus) {
        self.0.lock().push(inputs.get_value::<i32>(0));
    }
}

/// Emits one more than its input (0 when there is none) and logs what it saw.
struct Increment(Arc<Mutex<Vec<Option<i32>>>>);

impl Component for Increment {
    fn declare(&self, ports: &mut Ports) {
        ports.input("in").output("out");
    }

    fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
        let seen = inputs.get_value::<i32>(0);
        self.0.lock().push(seen);
        outputs.set_value(0, seen.unwrap_or(0) + 1);
    }
}

/// Order-sensitive running hash of everything it has seen.
#[derive(Default)]
struct HashChain {
    state: u64,
}

impl Component for HashChain {
    fn declare(&self, ports: &mut Ports) {
        ports.input("in").output("hash");
    }

    fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
        if let Some(v) = inputs.value::<u64>(0) {
            self.state = self.state.wrapping_mul(31).wrapping_add(*v);
        }
        outputs.set_value(0, self.state);
    }
}

struct Calls(Arc<AtomicUsize>);

impl Component for Calls {
    fn declare(&self, ports: &mut Ports) {
        ports.output("n");
    }

    fn process(&mut self, _inputs: &SignalBus, outputs: &mut SignalBus) {
        outputs.set_value(0, self.0.fetch_add(1, Ordering::SeqCst));
    }
}

/// Emits 0, 1, 2, ... one value per tick.
#[derive(Default)]
struct Counter(u64);

impl Component for Counter {
    fn declare(&self, ports: &mut Ports) {
        ports.output("n");
    }

    fn process(&mut self, _inputs: &SignalBus, outputs: &mut SignalBus) {
        outputs.set_value(0, self.0);
        self.0 += 1;
    }
}

fn tick(node: &Node) {
    node.tick();
    node.reset();
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < timeout, "timed out");
        yield_now();
    }
}

#[test]
fn fan_out_delivers_the_same_value() {
    let source = Node::new(Constant(42));
    let consumers: Vec<Node> = (0..3).map(|_| Node::new(Pass)).collect();
    for consumer in &consumers {
        consumer.connect_input(&source, "out", "in").unwrap();
    }

    for consumer in &consumers {
        consumer.tick();
    }
    for consumer in &consumers {
        assert_eq!(consumer.get_output_value::<i32>("out"), Some(42));
        consumer.reset();
    }
}

#[test]
fn second_wire_replaces_the_first() {
    let first = Node::new(Constant(1));
    let second = Node::new(Constant(2));
    let sink = Node::new(Pass);

    sink.connect_input(&first, 0, 0).unwrap();
    sink.connect_input(&second, 0, 0).unwrap();
    assert_eq!(sink.wire_count(), 1);
    let wires = sink.wires();
    let wire = &wires[0];
    assert!(wire.links(&second));
    assert!(!wire.links(&first));

    sink.tick();
    assert_eq!(sink.get_output_value::<i32>(0), Some(2));
}

#[test]
fn values_survive_until_reset() {
    let mut bus = SignalBus::new();
    bus.add_signal("x").unwrap();
    assert!(bus.set_value("x", 3.5f64));
    assert_eq!(bus.get_value::<f64>("x"), Some(3.5));
    // no implicit widening or narrowing
    assert_eq!(bus.get_value::<f32>("x"), None);

    let node = Node::new(Pass);
    node.set_input_value("in", 9);
    node.tick();
    assert_eq!(node.get_output_value::<i32>("out"), Some(9));
    node.reset();

    node.tick();
    assert_eq!(node.get_output_value::<i32>("out"), None);
}

#[test]
fn tick_processes_once_until_reset() {
    let calls = Arc::new(AtomicUsize::new(0));
    let node = Node::new(Calls(calls.clone()));
    node.tick();
    node.tick();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    node.reset();
    node.tick();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn diamond_shares_one_source_tick() {
    let calls = Arc::new(AtomicUsize::new(0));
    let circuit = Circuit::new();
    circuit.add(Calls(calls.clone()), "src").unwrap();
    circuit.add(Pass, "left").unwrap();
    circuit.add(Pass, "right").unwrap();
    circuit.add(Adder, "add").unwrap();
    circuit.connect_out_to_in("src", 0, "left", 0).unwrap();
    circuit.connect_out_to_in("src", 0, "right", 0).unwrap();

    for _ in 0..5 {
        tick(&circuit);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn direct_feedback_is_one_tick_late() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let node = Node::new(Increment(seen.clone()));
    node.connect_input(&node, "out", "in").unwrap();

    for _ in 0..4 {
        tick(&node);
    }
    assert_eq!(*seen.lock(), vec![None, Some(1), Some(2), Some(3)]);
}

#[test]
fn feedback_through_another_component() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let circuit = Circuit::new();
    circuit.add(Increment(seen.clone()), "a").unwrap();
    circuit.add(Pass, "b").unwrap();
    circuit.connect_out_to_in("a", "out", "b", "in").unwrap();
    circuit.connect_out_to_in("b", "out", "a", "in").unwrap();

    for _ in 0..4 {
        tick(&circuit);
    }
    assert_eq!(*seen.lock(), vec![None, Some(1), Some(2), Some(3)]);
}

fn hash_circuit(threads: usize) -> Circuit {
    let circuit = Circuit::with_thread_count(threads).unwrap();
    circuit.add_input("in").unwrap();
    circuit.add_output("out").unwrap();
    circuit.add(Pass, "pre").unwrap();
    circuit.add(HashChain::default(), "hash").unwrap();
    circuit.add(Pass, "post").unwrap();
    circuit.connect_in_to_in("in", "pre", "in").unwrap();
    circuit.connect_out_to_in("pre", "out", "hash", "in").unwrap();
    circuit.connect_out_to_in("hash", "hash", "post", "in").unwrap();
    circuit.connect_out_to_out("post", "out", "out").unwrap();
    circuit
}

// Feed `inputs`, then `extra` empty ticks, collecting every output.
fn run_hash_circuit(circuit: &Circuit, inputs: &[u64], extra: usize) -> Vec<Option<u64>> {
    let mut outputs = Vec::new();
    for i in 0..inputs.len() + extra {
        if let Some(v) = inputs.get(i) {
            circuit.set_input_value("in", *v);
        }
        circuit.tick();
        outputs.push(circuit.get_output_value::<u64>("out"));
        circuit.reset();
    }
    outputs
}

#[test]
fn threaded_circuit_matches_single_threaded() {
    let inputs: Vec<u64> = (1..=64).map(|i| i * 7919).collect();

    let serial = run_hash_circuit(&hash_circuit(0), &inputs, 3);
    let threaded = run_hash_circuit(&hash_circuit(4), &inputs, 3);

    // four workers in flight: results surface three ticks later
    assert_eq!(&threaded[..3], &[None, None, None]);
    assert_eq!(&threaded[3..], &serial[..serial.len() - 3]);
}

#[test]
fn single_worker_behaves_synchronously() {
    let inputs: Vec<u64> = (0..16).collect();
    let serial = run_hash_circuit(&hash_circuit(0), &inputs, 0);
    let threaded = run_hash_circuit(&hash_circuit(1), &inputs, 0);
    assert_eq!(serial, threaded);
}

#[test]
fn nested_circuit_runs_on_outer_workers() {
    let inner = Circuit::new();
    inner.add_input("in").unwrap();
    inner.add_output("out").unwrap();
    inner.add(HashChain::default(), "hash").unwrap();
    inner.connect_in_to_in("in", "hash", "in").unwrap();
    inner.connect_out_to_out("hash", "hash", "out").unwrap();

    let outer = Circuit::with_thread_count(3).unwrap();
    outer.add_input("in").unwrap();
    outer.add_output("out").unwrap();
    outer.add_component(&inner, Some("inner")).unwrap();
    outer.connect_in_to_in("in", "inner", "in").unwrap();
    outer.connect_out_to_out("inner", "out", "out").unwrap();

    let inputs: Vec<u64> = (1..=30).collect();
    let threaded = run_hash_circuit(&outer, &inputs, 2);
    let serial = run_hash_circuit(&hash_circuit(0), &inputs, 0);
    assert_eq!(&threaded[2..], &serial[..]);
}

#[test]
fn adder_scenario() {
    let circuit = Circuit::new();
    circuit.add(Constant(3), "three").unwrap();
    circuit.add(Constant(4), "four").unwrap();
    let adder = circuit.add(Adder, "adder").unwrap();
    circuit.connect_out_to_in("three", 0, "adder", "a").unwrap();
    circuit.connect_out_to_in("four", 0, "adder", "b").unwrap();

    tick(&circuit);
    assert_eq!(adder.get_output_value::<i32>("sum"), Some(7));

    assert!(circuit.disconnect_out_to_in("four", 0, "adder", "b").unwrap());
    tick(&circuit);
    assert_eq!(adder.get_output_value::<i32>("sum"), None);
}

#[test]
fn boundary_wires_carry_signals_through() {
    let circuit = Circuit::new();
    circuit.add_input("in").unwrap();
    circuit.add_output("out").unwrap();
    circuit.add(Pass, "x").unwrap();
    circuit.connect_in_to_in("in", "x", 0).unwrap();
    circuit.connect_out_to_out("x", 0, "out").unwrap();

    let mut signal = Signal::new("five");
    signal.set_value(5i32);
    assert!(circuit.set_input_signal("in", &signal));
    circuit.tick();
    assert_eq!(circuit.get_output_value::<i32>("out"), Some(5));
}

#[test]
fn circuits_nest_as_components() {
    let inner = Circuit::new();
    inner.add_output("sum").unwrap();
    inner.add(Constant(10), "ten").unwrap();
    inner.add(Constant(5), "five").unwrap();
    inner.add(Adder, "add").unwrap();
    inner.connect_out_to_in("ten", 0, "add", 0).unwrap();
    inner.connect_out_to_in("five", 0, "add", 1).unwrap();
    inner.connect_out_to_out("add", 0, "sum").unwrap();

    let outer = Circuit::new();
    outer.add_component(&inner, Some("inner")).unwrap();
    let pass = outer.add(Pass, "pass").unwrap();
    outer.connect_out_to_in("inner", "sum", "pass", 0).unwrap();

    tick(&outer);
    assert_eq!(pass.get_output_value::<i32>(0), Some(15));
}

#[test]
fn rejected_requests_leave_the_graph_alone() {
    let circuit = Circuit::new();
    let a = circuit.add(Pass, "a").unwrap();
    circuit.add(Pass, "b").unwrap();
    circuit.connect_out_to_in("a", 0, "b", 0).unwrap();

    assert!(matches!(
        circuit.connect_out_to_in("a", "nope", "b", 0),
        Err(Error::PortNotFound { .. })
    ));
    assert_eq!(circuit.component("b").unwrap().wire_count(), 1);
    assert_eq!(circuit.add_component(&a, Some("again")), Err(Error::AlreadyOwned("a".into())));
    assert_eq!(circuit.component_count(), 2);
}

#[test]
fn thread_count_changes_while_auto_ticking() {
    let registry = Registry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let circuit = Circuit::with_thread_count(4).unwrap();
    circuit.add(Constant(3), "three").unwrap();
    circuit.add(Constant(4), "four").unwrap();
    circuit.add(Adder, "adder").unwrap();
    circuit.add(Recorder(log.clone()), "rec").unwrap();
    circuit.connect_out_to_in("three", 0, "adder", "a").unwrap();
    circuit.connect_out_to_in("four", 0, "adder", "b").unwrap();
    circuit.connect_out_to_in("adder", "sum", "rec", "in").unwrap();

    circuit.start_auto_tick(&registry).unwrap();
    let timeout = Duration::from_secs(10);
    wait_until(timeout, || log.lock().len() >= 50);

    circuit.set_thread_count(0).unwrap();
    let at_switch = log.lock().len();
    wait_until(timeout, || log.lock().len() >= at_switch + 50);

    circuit.set_thread_count(4).unwrap();
    let at_switch = log.lock().len();
    wait_until(timeout, || log.lock().len() >= at_switch + 50);

    circuit.stop_auto_tick();
    assert!(!registry.is_running());
    assert!(log.lock().iter().all(|v| *v == Some(7)));
}

#[test]
fn registry_pool_ticks_adopted_components() {
    let registry = Registry::with_thread_count(2).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let node = Node::new(Calls(calls.clone()));
    node.start_auto_tick(&registry).unwrap();
    assert_eq!(node.buffer_count(), 2);

    wait_until(Duration::from_secs(10), || calls.load(Ordering::SeqCst) >= 20);
    registry.set_thread_count(0).unwrap();
    let before = calls.load(Ordering::SeqCst);
    wait_until(Duration::from_secs(10), || calls.load(Ordering::SeqCst) >= before + 20);

    registry.finalize();
    assert!(node.parent().is_none());
}

#[test]
fn topology_edits_while_auto_ticking() {
    let registry = Registry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let circuit = Circuit::new();
    circuit.add(Constant(1), "one").unwrap();
    circuit.add(Recorder(log.clone()), "rec").unwrap();
    circuit.connect_out_to_in("one", 0, "rec", 0).unwrap();
    circuit.start_auto_tick(&registry).unwrap();
    wait_until(Duration::from_secs(10), || log.lock().len() >= 10);

    // swap the source for another one mid-flight
    circuit.add(Constant(2), "two").unwrap();
    circuit.connect_out_to_in("two", 0, "rec", 0).unwrap();
    circuit.remove_component("one").unwrap();
    let at_swap = log.lock().len();
    wait_until(Duration::from_secs(10), || log.lock().len() >= at_swap + 10);

    circuit.stop_auto_tick();
    let log = log.lock();
    let first_two = log.iter().position(|v| *v == Some(2)).unwrap();
    assert!(log[..first_two].iter().all(|v| *v == Some(1)));
    assert!(log[first_two..].iter().all(|v| *v == Some(2)));
}

#[test]
fn feedback_in_a_threaded_circuit_stays_in_its_slot() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let circuit = Circuit::with_thread_count(2).unwrap();
    circuit.add(Increment(seen.clone()), "inc").unwrap();
    circuit.connect_out_to_in("inc", "out", "inc", "in").unwrap();

    for _ in 0..6 {
        tick(&circuit);
    }
    let _synced = circuit.pause();
    // each slot feeds back its own previous round, two ticks back
    assert_eq!(*seen.lock(), vec![None, None, Some(1), Some(1), Some(2), Some(2)]);
}

fn collect_counts(circuit: &Circuit, ticks: usize, seen: &mut Vec<Option<u64>>) {
    for _ in 0..ticks {
        circuit.tick();
        seen.push(circuit.get_output_value::<u64>("out"));
        circuit.reset();
    }
}

#[test]
fn no_result_is_lost_across_thread_count_changes() {
    let circuit = Circuit::with_thread_count(4).unwrap();
    circuit.add_output("out").unwrap();
    circuit.add(Counter::default(), "count").unwrap();
    circuit.connect_out_to_out("count", "n", "out").unwrap();

    let mut seen = Vec::new();
    collect_counts(&circuit, 8, &mut seen);
    circuit.set_thread_count(0).unwrap();
    collect_counts(&circuit, 3, &mut seen);
    circuit.set_thread_count(4).unwrap();
    collect_counts(&circuit, 6, &mut seen);

    let mut expected = vec![None; 3];
    expected.extend((0..14).map(Some));
    assert_eq!(seen, expected);
}

#[test]
fn dropped_sources_are_pruned_on_the_next_edit() {
    let sink = Node::new(Adder);
    {
        let gone = Node::new(Constant(1));
        sink.connect_input(&gone, 0, "a").unwrap();
    }
    assert_eq!(sink.wire_count(), 1);

    let kept = Node::new(Constant(2));
    sink.connect_input(&kept, 0, "b").unwrap();
    assert_eq!(sink.wire_count(), 1);
    assert!(sink.wires()[0].links(&kept));
}

#[test]
fn disconnect_input_port_removes_its_writer() {
    let source = Node::new(Constant(1));
    let sink = Node::new(Adder);
    sink.connect_input(&source, 0, "a").unwrap();
    sink.connect_input(&source, 0, "b").unwrap();

    assert!(sink.disconnect_input_port("a").unwrap());
    assert!(!sink.disconnect_input_port("a").unwrap());
    assert_eq!(sink.wire_count(), 1);
    assert!(matches!(
        sink.disconnect_input_port("c"),
        Err(Error::PortNotFound { .. })
    ));
}

#[test]
fn clearing_boundary_ports_drops_their_wires() {
    let circuit = Circuit::new();
    circuit.add_input("in").unwrap();
    circuit.add_output("out").unwrap();
    circuit.add(Pass, "x").unwrap();
    circuit.connect_in_to_in("in", "x", 0).unwrap();
    circuit.connect_out_to_out("x", 0, "out").unwrap();

    circuit.clear_inputs();
    circuit.clear_outputs();
    assert_eq!(circuit.input_count(), 0);
    assert_eq!(circuit.output_count(), 0);

    // same names again, but the old wires are gone
    circuit.add_input("in").unwrap();
    circuit.add_output("out").unwrap();
    assert!(circuit.set_input_value("in", 5i32));
    circuit.tick();
    assert_eq!(circuit.get_output_value::<i32>("out"), None);
    circuit.reset();

    circuit.connect_in_to_in("in", "x", 0).unwrap();
    circuit.connect_out_to_out("x", 0, "out").unwrap();
    assert!(circuit.set_input_value("in", 5i32));
    circuit.tick();
    assert_eq!(circuit.get_output_value::<i32>("out"), Some(5));
}

#[test]
fn remove_all_components_releases_every_child() {
    let first = Circuit::new();
    let a = first.add(Constant(1), "a").unwrap();
    let b = first.add(Pass, "b").unwrap();
    first.connect_out_to_in("a", 0, "b", 0).unwrap();

    first.remove_all_components();
    assert_eq!(first.component_count(), 0);
    assert!(a.parent().is_none());
    assert!(b.parent().is_none());
    assert_eq!(b.wire_count(), 0);

    let second = Circuit::new();
    second.add_component(&a, Some("a")).unwrap();
    second.add_component(&b, Some("b")).unwrap();
    assert_eq!(second.component_count(), 2);
}

#[test]
fn disconnect_component_keeps_the_member() {
    let circuit = Circuit::new();
    circuit.add_input("in").unwrap();
    circuit.add_output("out").unwrap();
    let a = circuit.add(Pass, "a").unwrap();
    let b = circuit.add(Pass, "b").unwrap();
    circuit.connect_in_to_in("in", "a", 0).unwrap();
    circuit.connect_out_to_in("a", 0, "b", 0).unwrap();
    circuit.connect_out_to_out("a", 0, "out").unwrap();

    circuit.disconnect_component("a").unwrap();
    assert_eq!(circuit.component_count(), 2);
    assert_eq!(b.wire_count(), 0);

    // a still ticks, but nothing reaches it and nothing leaves it
    assert!(circuit.set_input_value("in", 5i32));
    circuit.tick();
    assert_eq!(a.get_output_value::<i32>(0), None);
    assert_eq!(circuit.get_output_value::<i32>("out"), None);
    assert_eq!(circuit.disconnect_component("nope"), Err(Error::ComponentNotFound("nope".into())));
}
