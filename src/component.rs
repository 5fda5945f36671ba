//! The leaf component contract and its port declaration builder.

use crate::signal::SignalBus;

/// Port shape declared by a [`Component`] when its [`Node`](crate::Node) is built.
///
/// Each call appends one port. An empty name declares an anonymous port that
/// can only be addressed by index.
#[derive(Debug, Default)]
pub struct Ports {
    pub(crate) inputs: SignalBus,
    pub(crate) outputs: SignalBus,
}

impl Ports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input port.
    pub fn input(&mut self, name: impl Into<String>) -> &mut Self {
        if let Err(err) = self.inputs.add_signal(name) {
            tracing::warn!(%err, "skipping input port");
        }
        self
    }

    /// Declare an output port.
    pub fn output(&mut self, name: impl Into<String>) -> &mut Self {
        if let Err(err) = self.outputs.add_signal(name) {
            tracing::warn!(%err, "skipping output port");
        }
        self
    }

    /// Declare `count` anonymous input ports.
    pub fn inputs(&mut self, count: usize) -> &mut Self {
        (0..count).for_each(|_| {
            self.input("");
        });
        self
    }

    /// Declare `count` anonymous output ports.
    pub fn outputs(&mut self, count: usize) -> &mut Self {
        (0..count).for_each(|_| {
            self.output("");
        });
        self
    }

    pub fn input_count(&self) -> usize {
        self.inputs.signal_count()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.signal_count()
    }
}

/// The core trait for processing components.
///
/// Implement this trait to create your own components. A component declares
/// a fixed set of input and output ports once, and is then asked to
/// [`process`](Self::process) at most once per tick pass per slot.
///
/// # Example
///
/// ```
/// use flowpatch::{Component, Ports, SignalBus};
///
/// /// Adds its two integer inputs.
/// struct Adder;
///
/// impl Component for Adder {
///     fn declare(&self, ports: &mut Ports) {
///         ports.input("a").input("b").output("sum");
///     }
///
///     fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
///         // only produce a sum when both inputs arrived this tick
///         if let (Some(a), Some(b)) = (inputs.value::<i32>(0), inputs.value::<i32>(1)) {
///             outputs.set_value(0, a + b);
///         }
///     }
/// }
/// ```
///
/// # Inputs and Outputs
///
/// Inputs that were not delivered this tick (no wire, or the producer left
/// its output empty) are unavailable; reading them returns `None`. Outputs
/// start each tick unavailable, so an output that is not set during
/// `process` propagates as absence to every consumer.
///
/// # State
///
/// `process` takes `&mut self`. Under a threaded circuit the engine
/// guarantees that successive calls on one component never overlap and
/// happen in slot order, so internal state needs no extra locking.
pub trait Component: Send + 'static {
    /// Declare input and output ports. Called once when the node is built.
    fn declare(&self, ports: &mut Ports) {
        let _ = ports;
    }

    /// Process one tick.
    ///
    /// # Arguments
    ///
    /// - `inputs` - Signals delivered along this component's wires
    /// - `outputs` - Signals to fill; all start unavailable
    fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus);
}
