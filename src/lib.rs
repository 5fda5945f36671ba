//! flowpatch - a flow-based programming engine
//!
//! Build a program as a graph of components wired port to port:
//! - Components declare typed-at-runtime input/output signals and process once per tick
//! - Each input has at most one wire; outputs fan out freely
//! - Ticking is pull-based, shares work across diamonds and tolerates feedback loops
//! - Circuits are components made of components, with optional worker-thread pipelining
//! - A registry ticks free-standing components on a background thread
//!
//! ```
//! use flowpatch::{Circuit, Component, Ports, SignalBus};
//!
//! struct Number(i32);
//!
//! impl Component for Number {
//!     fn declare(&self, ports: &mut Ports) {
//!         ports.output("value");
//!     }
//!
//!     fn process(&mut self, _inputs: &SignalBus, outputs: &mut SignalBus) {
//!         outputs.set_value(0, self.0);
//!     }
//! }
//!
//! struct Add;
//!
//! impl Component for Add {
//!     fn declare(&self, ports: &mut Ports) {
//!         ports.input("a").input("b").output("sum");
//!     }
//!
//!     fn process(&mut self, inputs: &SignalBus, outputs: &mut SignalBus) {
//!         if let (Some(a), Some(b)) = (inputs.value::<i32>(0), inputs.value::<i32>(1)) {
//!             outputs.set_value(0, a + b);
//!         }
//!     }
//! }
//!
//! let circuit = Circuit::new();
//! circuit.add(Number(3), "three")?;
//! circuit.add(Number(4), "four")?;
//! let add = circuit.add(Add, "add")?;
//! circuit.connect_out_to_in("three", 0, "add", "a")?;
//! circuit.connect_out_to_in("four", 0, "add", "b")?;
//!
//! circuit.tick();
//! assert_eq!(add.get_output_value::<i32>("sum"), Some(7));
//! circuit.reset();
//! # Ok::<(), flowpatch::Error>(())
//! ```

mod circuit;
mod component;
mod error;
mod gate;
mod node;
mod registry;
mod signal;
mod thread;
mod wire;

pub use circuit::{Circuit, Member};
pub use component::{Component, Ports};
pub use error::{Error, Result};
pub use node::{Node, PauseGuard};
pub use registry::Registry;
pub use signal::{Port, Signal, SignalBus};
pub use wire::{Wire, WireBus, WireScope};
