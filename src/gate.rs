//! Release gates - the per-component, per-slot handshake that orders `process` calls.
//!
//! Every slot of a component has one gate. Before processing in slot `k` a
//! worker waits on gate `k`; afterwards it opens gate `k + 1` (mod N). With
//! only gate 0 open initially, a component's `process` calls run strictly in
//! slot order and never overlap, even though the slots run on different
//! threads.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub(crate) struct ReleaseGate {
    released: Mutex<bool>,
    condvar: Condvar,
}

impl ReleaseGate {
    pub(crate) fn new(released: bool) -> Self {
        Self {
            released: Mutex::new(released),
            condvar: Condvar::new(),
        }
    }

    /// Block until the gate is open, then close it behind us.
    pub(crate) fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.condvar.wait(&mut released);
        }
        *released = false;
    }

    /// Open the gate, waking the worker waiting on it.
    pub(crate) fn release(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.condvar.notify_all();
    }

    /// Force the gate state. Only used while every worker is synced.
    pub(crate) fn reset(&self, released: bool) {
        *self.released.lock() = released;
    }

    #[cfg(test)]
    pub(crate) fn is_released(&self) -> bool {
        *self.released.lock()
    }
}

/// The gates of one component, indexed by slot.
#[derive(Debug, Default)]
pub(crate) struct ReleaseChain {
    gates: Vec<ReleaseGate>,
}

impl ReleaseChain {
    /// A chain of `count` gates with only slot 0 open.
    pub(crate) fn new(count: usize) -> Self {
        Self {
            gates: (0..count).map(|slot| ReleaseGate::new(slot == 0)).collect(),
        }
    }

    pub(crate) fn wait(&self, slot: usize) {
        if let Some(gate) = self.gates.get(slot) {
            gate.wait();
        }
    }

    /// Open the gate of the slot after `slot`.
    pub(crate) fn release_next(&self, slot: usize) {
        if self.gates.is_empty() {
            return;
        }
        let next = (slot + 1) % self.gates.len();
        self.gates[next].release();
    }

    /// Open only the gate of `next`, so that slot processes first.
    pub(crate) fn rewind_to(&self, next: usize) {
        let next = if self.gates.is_empty() { 0 } else { next % self.gates.len() };
        for (slot, gate) in self.gates.iter().enumerate() {
            gate.reset(slot == next);
        }
    }
}
