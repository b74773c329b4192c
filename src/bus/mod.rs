//! Register bus abstraction
//!
//! Hardware is driven through an addressable register space. Reads and writes
//! are queued and only reach the device when [`RegisterBus::dispatch`] is
//! called; a read hands back a [`PendingValue`] that is filled by that
//! dispatch. Everything queued before one dispatch is applied as a unit.
//!
//! Transports live outside this crate. [`MemoryBus`] is an in-memory register
//! space used for dry runs and tests.

mod memory;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::core::{Error, Result};

pub use self::memory::{Access, AccessKind, MemoryBus, RegisterFile};

/// Addressable register space with batched access
pub trait RegisterBus: Send {
    /// Queues a read of the register at `path`
    fn read(&mut self, path: &str) -> PendingValue;

    /// Queues a write of `value` to the register at `path`
    fn write(&mut self, path: &str, value: u32);

    /// Flushes every queued access to the device and fills pending reads
    fn dispatch(&mut self) -> Result<()>;
}

/// Result of a queued read, available once the bus has dispatched
#[derive(Debug, Clone)]
pub struct PendingValue {
    path: Arc<str>,
    slot: Arc<OnceLock<u32>>,
}

impl PendingValue {
    /// Creates an unfilled value for a read of `path`.
    ///
    /// Bus implementations hand this out from `read` and call
    /// [`PendingValue::fill`] during dispatch.
    pub fn new(path: &str) -> Self {
        PendingValue {
            path: Arc::from(path),
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// Register path this value was read from
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_ready(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Stores the dispatched value. Later calls are ignored.
    pub fn fill(&self, value: u32) {
        let _ = self.slot.set(value);
    }

    /// Returns the dispatched value
    pub fn value(&self) -> Result<u32> {
        self.slot.get().copied().ok_or_else(|| Error::NotDispatched {
            path: self.path.to_string(),
        })
    }
}

/// Named sub-tree of the register space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    base: String,
}

impl RegisterBlock {
    pub fn new(base: impl Into<String>) -> Self {
        RegisterBlock { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Full path of a register inside this block
    pub fn path(&self, leaf: &str) -> String {
        if self.base.is_empty() {
            leaf.to_string()
        } else {
            format!("{}.{}", self.base, leaf)
        }
    }

    pub fn read(&self, bus: &mut dyn RegisterBus, leaf: &str) -> PendingValue {
        bus.read(&self.path(leaf))
    }

    pub fn write(&self, bus: &mut dyn RegisterBus, leaf: &str, value: u32) {
        bus.write(&self.path(leaf), value)
    }
}

/// Register values captured in one dispatch, keyed by leaf name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot(BTreeMap<String, u32>);

impl Snapshot {
    pub fn get(&self, leaf: &str) -> Result<u32> {
        self.0
            .get(leaf)
            .copied()
            .ok_or_else(|| Error::protocol(format!("register {} not in snapshot", leaf)))
    }
}

/// Reads `leaves` of `block` with a single dispatch
pub fn snapshot(bus: &mut dyn RegisterBus, block: &RegisterBlock, leaves: &[&str]) -> Result<Snapshot> {
    let pending: Vec<_> = leaves
        .iter()
        .map(|leaf| (leaf.to_string(), block.read(bus, leaf)))
        .collect();
    bus.dispatch()?;

    let mut values = BTreeMap::new();
    for (leaf, value) in pending {
        values.insert(leaf, value.value()?);
    }
    Ok(Snapshot(values))
}

/// Writes `value` to every leaf of `block` and dispatches
pub fn reset_registers(
    bus: &mut dyn RegisterBus,
    block: &RegisterBlock,
    leaves: &[&str],
    value: u32,
) -> Result<()> {
    for leaf in leaves {
        block.write(bus, leaf, value);
    }
    bus.dispatch()
}
