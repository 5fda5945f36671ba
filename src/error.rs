//! Error type for every fallible graph operation.

/// Result alias used throughout flowpatch.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Why a topology or lifecycle request was rejected.
///
/// A rejected request never leaves the graph half-modified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A bus already has a signal with this name.
    #[error("signal name already in use: {0}")]
    DuplicateSignal(String),

    /// The named or indexed port does not exist on the component.
    #[error("no {direction} port {port} on component \"{component}\"")]
    PortNotFound {
        component: String,
        direction: &'static str,
        port: String,
    },

    /// No child of the circuit has this name.
    #[error("no component named \"{0}\" in circuit")]
    ComponentNotFound(String),

    /// The referenced component is not a child of this circuit.
    #[error("component is not a member of this circuit")]
    NotAMember,

    /// Another child of the circuit already uses this name.
    #[error("component name already in use: {0}")]
    DuplicateName(String),

    /// The component already belongs to a circuit.
    #[error("component \"{0}\" already belongs to a circuit")]
    AlreadyOwned(String),

    /// A circuit cannot contain itself, directly or through a descendant.
    #[error("a circuit cannot be added to itself or one of its descendants")]
    SelfParent,

    /// A circuit inside another circuit always runs on its parent's threads.
    #[error("circuit is nested inside another circuit and cannot own worker threads")]
    NestedCircuit,

    /// Auto-tick is driven by the registry; a component inside a circuit is ticked by it.
    #[error("component \"{0}\" is inside a circuit and cannot auto-tick on its own")]
    AutoTickInCircuit(String),

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}
