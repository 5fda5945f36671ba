//! Two counters feed an adder inside a threaded circuit that ticks itself
//! in the background. Run with `RUST_LOG=flowpatch=debug` to watch the
//! engine's lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use flowpatch::{Circuit, Component, Ports, Registry, SignalBus};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

struct Count {
    step: i64,
    value: i64,
}

impl Component for Count {
    fn declare(&self, ports: &mut Ports) {
        ports.output("value");
    }

    fn process(&mut self, _inputs: &SignalBus, outputs: &mut SignalBus) {
        self.value += self.step;
        outputs.set_value(0, self.value);
    }
}

struct Add;

impl Component for Add {
    fn declare(&self, ports: &mut Ports) {
        ports.input("a").input("b").output("sum");
    }

    fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
        if let (Some(a), Some(b)) = (inputs.value::<i64>("a"), inputs.value::<i64>("b")) {
            outputs.set_value("sum", a + b);
        }
    }
}

/// Keeps the most recent value it received.
struct Latest(Arc<Mutex<Option<i64>>>);

impl Component for Latest {
    fn declare(&self, ports: &mut Ports) {
        ports.input("in");
    }

    fn process(&mut self, inputs: &SignalBus, _outputs: &mut SignalBus) {
        if let Some(v) = inputs.get_value::<i64>(0) {
            *self.0.lock() = Some(v);
        }
    }
}

fn main() -> flowpatch::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let latest = Arc::new(Mutex::new(None));

    let circuit = Circuit::with_thread_count(4)?;
    circuit.add(Count { step: 1, value: 0 }, "ones")?;
    circuit.add(Count { step: 10, value: 0 }, "tens")?;
    circuit.add(Add, "add")?;
    circuit.add(Latest(latest.clone()), "latest")?;
    circuit.connect_out_to_in("ones", "value", "add", "a")?;
    circuit.connect_out_to_in("tens", "value", "add", "b")?;
    circuit.connect_out_to_in("add", "sum", "latest", "in")?;

    let registry = Registry::new();
    circuit.start_auto_tick(&registry)?;

    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(100));
        let _paused = circuit.pause();
        // every sum is 11x the tick number
        println!("latest sum: {:?}", *latest.lock());
    }

    circuit.set_thread_count(0)?;
    std::thread::sleep(Duration::from_millis(100));
    println!("after switching to 0 threads: {:?}", *latest.lock());

    circuit.stop_auto_tick();
    registry.finalize();
    Ok(())
}
