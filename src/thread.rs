//! Worker threads: circuit pool workers and the auto-tick driver.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::node::{Node, NodeInner};

#[derive(Debug)]
struct WorkerState {
    // a round has been requested and not yet picked up
    resume: bool,
    // no round in flight
    synced: bool,
    stop: bool,
}

#[derive(Debug)]
struct WorkerShared {
    state: Mutex<WorkerState>,
    resumed: Condvar,
    synced: Condvar,
}

/// One worker of a circuit's pool, permanently bound to one slot.
///
/// Each round it ticks every child of the circuit in its slot, then resets
/// them. The owner hands it rounds with [`resume`](Self::resume) and waits
/// for the round to finish with [`sync`](Self::sync).
///
/// These are plain named OS threads with no priority hint. Thread count 0
/// takes the place of a no-op thread: nothing is spawned and the circuit
/// ticks its children on the caller.
pub(crate) struct CircuitThread {
    slot: usize,
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl CircuitThread {
    pub(crate) fn spawn(slot: usize, components: Arc<RwLock<Vec<Node>>>) -> Result<Self> {
        let shared = Arc::new(WorkerShared {
            state: Mutex::new(WorkerState {
                resume: false,
                synced: true,
                stop: false,
            }),
            resumed: Condvar::new(),
            synced: Condvar::new(),
        });

        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("flowpatch-circuit-{slot}"))
            .spawn(move || run_worker(slot, &worker, &components))
            .map_err(|err| Error::Spawn(err.to_string()))?;

        tracing::debug!(slot, "circuit worker started");
        Ok(Self {
            slot,
            shared,
            handle: Some(handle),
        })
    }

    /// Block until this worker has no round in flight.
    pub(crate) fn sync(&self) {
        let mut state = self.shared.state.lock();
        while !state.synced && !state.stop {
            self.shared.synced.wait(&mut state);
        }
    }

    /// Start the next round, first waiting for the current one to finish.
    pub(crate) fn resume(&self) {
        let mut state = self.shared.state.lock();
        while !state.synced && !state.stop {
            self.shared.synced.wait(&mut state);
        }
        if state.stop {
            return;
        }
        state.synced = false;
        state.resume = true;
        self.shared.resumed.notify_one();
    }

    /// Let any in-flight round finish, then end and join the thread.
    pub(crate) fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.resumed.notify_all();
            self.shared.synced.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(slot = self.slot, "circuit worker panicked");
            }
            tracing::debug!(slot = self.slot, "circuit worker stopped");
        }
    }
}

impl Drop for CircuitThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(slot: usize, shared: &WorkerShared, components: &RwLock<Vec<Node>>) {
    loop {
        {
            let mut state = shared.state.lock();
            while !state.resume && !state.stop {
                shared.resumed.wait(&mut state);
            }
            if state.stop {
                break;
            }
            state.resume = false;
        }

        {
            let components = components.read_recursive();
            for component in components.iter() {
                component.thread_tick(slot);
            }
            for component in components.iter() {
                component.thread_reset(slot);
            }
        }

        let mut state = shared.state.lock();
        state.synced = true;
        shared.synced.notify_all();
    }

    let mut state = shared.state.lock();
    state.synced = true;
    shared.synced.notify_all();
}

#[derive(Debug)]
struct DriverState {
    pause_depth: usize,
    // the driver loop is parked on a pause
    paused: bool,
    stop: bool,
    exited: bool,
}

#[derive(Debug)]
struct DriverShared {
    state: Mutex<DriverState>,
    condvar: Condvar,
}

/// Background thread that ticks and resets one node forever.
///
/// Only holds a weak reference to the node; if the node is dropped the
/// thread exits on its own.
///
/// Like [`CircuitThread`] it is a plain named OS thread with no priority
/// hint. A node that never calls `start_auto_tick` gets no driver at all
/// and is ticked by hand.
pub(crate) struct ComponentThread {
    shared: Arc<DriverShared>,
    handle: Option<JoinHandle<()>>,
}

impl ComponentThread {
    pub(crate) fn spawn(node: Weak<NodeInner>) -> Result<Self> {
        let shared = Arc::new(DriverShared {
            state: Mutex::new(DriverState {
                pause_depth: 0,
                paused: false,
                stop: false,
                exited: false,
            }),
            condvar: Condvar::new(),
        });

        let driver = shared.clone();
        let handle = thread::Builder::new()
            .name("flowpatch-autotick".to_owned())
            .spawn(move || run_driver(&driver, &node))
            .map_err(|err| Error::Spawn(err.to_string()))?;

        tracing::debug!("auto-tick driver started");
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Park the driver between passes. Returns once it is parked. Nests.
    pub(crate) fn pause(&self) {
        let mut state = self.shared.state.lock();
        state.pause_depth += 1;
        while !state.paused && !state.exited {
            self.shared.condvar.wait(&mut state);
        }
    }

    /// Undo one `pause`.
    pub(crate) fn resume(&self) {
        let mut state = self.shared.state.lock();
        state.pause_depth = state.pause_depth.saturating_sub(1);
        if state.pause_depth == 0 {
            self.shared.condvar.notify_all();
        }
    }

    pub(crate) fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("auto-tick driver panicked");
            }
            tracing::debug!("auto-tick driver stopped");
        }
    }
}

impl Drop for ComponentThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_driver(shared: &DriverShared, node: &Weak<NodeInner>) {
    loop {
        {
            let mut state = shared.state.lock();
            while state.pause_depth > 0 && !state.stop {
                state.paused = true;
                shared.condvar.notify_all();
                shared.condvar.wait(&mut state);
            }
            state.paused = false;
            if state.stop {
                break;
            }
        }

        let Some(node) = node.upgrade().map(Node::from_inner) else {
            tracing::debug!("auto-tick target dropped");
            break;
        };
        node.tick();
        node.reset();
    }

    let mut state = shared.state.lock();
    state.exited = true;
    shared.condvar.notify_all();
}
