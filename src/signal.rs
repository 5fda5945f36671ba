//! Type-erased signal cells and the buses that hold them.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Addresses a signal in a [`SignalBus`], either by position or by name.
///
/// Both forms convert with `into()`, so bus and node methods accept
/// `0usize` and `"gain"` alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Port<'a> {
    /// Position in the bus (primary addressing)
    Index(usize),
    /// Signal name (linear scan, an empty name never matches)
    Name(&'a str),
}

impl From<usize> for Port<'_> {
    fn from(index: usize) -> Self {
        Port::Index(index)
    }
}

impl<'a> From<&'a str> for Port<'a> {
    fn from(name: &'a str) -> Self {
        Port::Name(name)
    }
}

impl<'a> From<&'a String> for Port<'a> {
    fn from(name: &'a String) -> Self {
        Port::Name(name.as_str())
    }
}

impl fmt::Display for Port<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Index(i) => write!(f, "#{i}"),
            Port::Name(n) => write!(f, "\"{n}\""),
        }
    }
}

// The stored value plus the name of its type, kept for diagnostics.
#[derive(Clone)]
struct Value {
    data: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// A single named, type-erased, optionally-available value cell.
///
/// Reads only succeed when the signal is available *and* the requested type
/// matches the stored type exactly. There is no coercion: a signal holding an
/// `i32` will not be read as an `i64`.
///
/// Values live behind an [`Arc`], so copying a signal along a wire shares the
/// value instead of cloning it.
#[derive(Clone, Default)]
pub struct Signal {
    name: String,
    value: Option<Value>,
    available: bool,
}

impl Signal {
    /// Create an empty, unavailable signal.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            available: false,
        }
    }

    /// The signal's name (empty for anonymous ports)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a value is currently available.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Store `value` and mark the signal available.
    pub fn set_value<T: Any + Send + Sync>(&mut self, value: T) {
        self.value = Some(Value {
            data: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        });
        self.available = true;
    }

    /// Borrow the value if it is available and of type `T`.
    pub fn value<T: Any>(&self) -> Option<&T> {
        if !self.available {
            return None;
        }
        self.value.as_ref()?.data.downcast_ref::<T>()
    }

    /// Clone the value out if it is available and of type `T`.
    pub fn get_value<T: Any + Clone>(&self) -> Option<T> {
        self.value::<T>().cloned()
    }

    /// Copy value and type from `source`, but only if `source` is available.
    ///
    /// Returns `false` (leaving this signal untouched) when the source has no
    /// value; this is how absence travels along a wire.
    pub fn set_signal(&mut self, source: &Signal) -> bool {
        if !source.available {
            return false;
        }
        self.value.clone_from(&source.value);
        self.available = true;
        true
    }

    /// Mark the signal unavailable, keeping the stored type.
    pub fn clear_value(&mut self) {
        self.available = false;
    }

    /// Type of the last value stored, available or not.
    pub fn type_id(&self) -> Option<TypeId> {
        self.value.as_ref().map(|v| Any::type_id(&*v.data))
    }

    /// Name of the type of the last value stored, available or not.
    pub fn type_name(&self) -> Option<&'static str> {
        self.value.as_ref().map(|v| v.type_name)
    }

    /// Whether the last stored value is of type `T`, available or not.
    pub fn holds<T: Any>(&self) -> bool {
        self.type_id() == Some(TypeId::of::<T>())
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("type", &self.type_name())
            .field("available", &self.available)
            .finish()
    }
}

/// An ordered, indexable, name-searchable collection of [`Signal`]s.
///
/// A component has one input bus and one output bus per concurrency slot;
/// all of them share the same port shape.
#[derive(Clone, Debug, Default)]
pub struct SignalBus {
    signals: Vec<Signal>,
}

impl SignalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new empty signal, returning its index.
    ///
    /// Fails if `name` is non-empty and already present on this bus.
    pub fn add_signal(&mut self, name: impl Into<String>) -> Result<usize> {
        let name = name.into();
        if !name.is_empty() && self.find_signal(&name).is_some() {
            return Err(Error::DuplicateSignal(name));
        }
        self.signals.push(Signal::new(name));
        Ok(self.signals.len() - 1)
    }

    /// Index of the signal called `name`. Empty names never match.
    pub fn find_signal(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.signals.iter().position(|s| s.name == name)
    }

    /// Resolve a [`Port`] to an index on this bus.
    pub fn resolve<'a>(&self, port: impl Into<Port<'a>>) -> Option<usize> {
        match port.into() {
            Port::Index(i) if i < self.signals.len() => Some(i),
            Port::Index(_) => None,
            Port::Name(name) => self.find_signal(name),
        }
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn signal<'a>(&self, port: impl Into<Port<'a>>) -> Option<&Signal> {
        let index = self.resolve(port)?;
        self.signals.get(index)
    }

    pub fn signal_mut<'a>(&mut self, port: impl Into<Port<'a>>) -> Option<&mut Signal> {
        let index = self.resolve(port)?;
        self.signals.get_mut(index)
    }

    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }

    /// Store `value` on a port. Returns `false` only if the port does not exist.
    pub fn set_value<'a, T: Any + Send + Sync>(&mut self, port: impl Into<Port<'a>>, value: T) -> bool {
        match self.signal_mut(port) {
            Some(signal) => {
                signal.set_value(value);
                true
            }
            None => false,
        }
    }

    /// Borrow a port's value if it is available and of type `T`.
    pub fn value<'a, T: Any>(&self, port: impl Into<Port<'a>>) -> Option<&T> {
        self.signal(port)?.value::<T>()
    }

    /// Clone a port's value out if it is available and of type `T`.
    pub fn get_value<'a, T: Any + Clone>(&self, port: impl Into<Port<'a>>) -> Option<T> {
        self.signal(port)?.get_value::<T>()
    }

    /// Copy `source` into a port. See [`Signal::set_signal`].
    pub fn set_signal<'a>(&mut self, port: impl Into<Port<'a>>, source: &Signal) -> bool {
        match self.signal_mut(port) {
            Some(signal) => signal.set_signal(source),
            None => false,
        }
    }

    pub fn clear_value<'a>(&mut self, port: impl Into<Port<'a>>) {
        if let Some(signal) = self.signal_mut(port) {
            signal.clear_value();
        }
    }

    /// Mark every signal unavailable.
    pub fn clear_all_values(&mut self) {
        self.signals.iter_mut().for_each(Signal::clear_value);
    }

    pub fn remove_all_signals(&mut self) {
        self.signals.clear();
    }
}
