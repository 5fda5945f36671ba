//! The auto-tick registry.
//!
//! Components that should tick on their own, without being placed in a
//! circuit, are adopted by a [`Registry`]. The registry keeps them in a
//! hidden root circuit and runs one driver thread that ticks that circuit
//! over and over, which in turn ticks every adopted component and
//! everything wired into them.

use crate::circuit::Circuit;
use crate::error::{Error, Result};
use crate::node::Node;

/// Owner of the background auto-tick driver.
///
/// The driver thread starts when the first component starts auto-ticking
/// and stops when the last one stops (or the registry is dropped).
///
/// Pausing, resuming and topology changes must not be requested from inside
/// a component's `process` while the driver is ticking it.
pub struct Registry {
    root: Circuit,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            root: Circuit::registry(),
        }
    }

    /// A registry whose root circuit runs on `threads` workers.
    pub fn with_thread_count(threads: usize) -> Result<Self> {
        let registry = Self::new();
        registry.set_thread_count(threads)?;
        Ok(registry)
    }

    /// Worker threads used to tick the adopted components.
    pub fn set_thread_count(&self, threads: usize) -> Result<()> {
        self.root.set_thread_count(threads)
    }

    pub fn thread_count(&self) -> usize {
        self.root.thread_count()
    }

    /// Number of components currently auto-ticking.
    pub fn component_count(&self) -> usize {
        self.root.component_count()
    }

    /// Whether the driver thread is running.
    pub fn is_running(&self) -> bool {
        self.root.has_driver()
    }

    /// Adopt `node` (if parentless) and make sure the driver is running.
    ///
    /// Fails if `node` is inside a circuit; that circuit ticks it.
    pub fn start_auto_tick(&self, node: &Node) -> Result<()> {
        match node.parent() {
            None => self.root.add_component(node, None)?,
            Some(parent) if parent.node().ptr_eq(&self.root) => {}
            Some(_) => return Err(Error::AutoTickInCircuit(node.name())),
        }
        self.root.start_driver()?;
        tracing::debug!(name = %node.name(), "auto-tick started");
        Ok(())
    }

    /// Stop auto-ticking `node`. Components not adopted by this registry are left alone.
    pub fn stop_auto_tick(&self, node: &Node) {
        if node.parent().is_some_and(|p| p.node().ptr_eq(&self.root)) {
            Self::release(&self.root, node);
        }
    }

    // Drop `node` from a registry root, stopping the driver once it is empty
    pub(crate) fn release(root: &Circuit, node: &Node) {
        if root.remove_component(node).is_err() {
            return;
        }
        tracing::debug!(name = %node.name(), "auto-tick stopped");
        if root.component_count() == 0 {
            root.stop_driver();
        }
    }

    /// Stop the driver and release every adopted component.
    pub fn finalize(self) {
        drop(self);
    }

    fn shutdown(&self) {
        self.root.stop_driver();
        self.root.remove_all_components();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
        tracing::debug!("registry finalized");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.component_count())
            .field("threads", &self.thread_count())
            .field("running", &self.is_running())
            .finish()
    }
}
