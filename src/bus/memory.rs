use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::core::{Error, Result};
use super::{PendingValue, RegisterBus};

/// Register contents of a [`MemoryBus`], keyed by full path
pub type RegisterFile = HashMap<String, u32>;

type WriteHook = Box<dyn FnMut(u32, &mut RegisterFile) + Send>;

/// Direction of a committed register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One register access committed by a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    /// Index of the dispatch that committed the access, starting at 1
    pub dispatch: usize,
    pub kind: AccessKind,
    pub path: String,
    pub value: u32,
}

enum Queued {
    Read(PendingValue),
    Write(String, u32),
}

/// In-memory register space
///
/// Unknown registers read as zero. Every committed access is journaled so a
/// caller can check exactly what reached the "device". Hardware reactions are
/// modelled with write hooks, and per-register read scripts stand in for
/// status bits that change over time.
#[derive(Default)]
pub struct MemoryBus {
    registers: RegisterFile,
    scripts: HashMap<String, VecDeque<u32>>,
    hooks: HashMap<String, Vec<WriteHook>>,
    queue: Vec<Queued>,
    journal: Vec<Access>,
    dispatches: usize,
    fault: Option<(usize, String)>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a register directly, bypassing queue and journal
    pub fn set(&mut self, path: &str, value: u32) {
        self.registers.insert(path.to_string(), value);
    }

    /// Current register content, if it was ever written
    pub fn value(&self, path: &str) -> Option<u32> {
        self.registers.get(path).copied()
    }

    /// Makes the next reads of `path` return `values` in order.
    ///
    /// Once the script runs out, reads fall back to the register content.
    pub fn script_reads(&mut self, path: &str, values: impl IntoIterator<Item = u32>) {
        self.scripts
            .entry(path.to_string())
            .or_default()
            .extend(values);
    }

    /// Runs `hook` whenever a write to `path` is dispatched
    pub fn on_write<F>(&mut self, path: &str, hook: F)
    where
        F: FnMut(u32, &mut RegisterFile) + Send + 'static,
    {
        self.hooks
            .entry(path.to_string())
            .or_default()
            .push(Box::new(hook));
    }

    /// Lets `successful` more dispatches through, then fails the next one
    pub fn fail_dispatch_after(&mut self, successful: usize, message: impl Into<String>) {
        self.fault = Some((successful, message.into()));
    }

    /// Every access committed so far
    pub fn journal(&self) -> &[Access] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Values written to `path`, in commit order
    pub fn writes_to(&self, path: &str) -> Vec<u32> {
        self.journal
            .iter()
            .filter(|a| a.kind == AccessKind::Write && a.path == path)
            .map(|a| a.value)
            .collect()
    }

    /// Number of committed reads of `path`
    pub fn reads_of(&self, path: &str) -> usize {
        self.journal
            .iter()
            .filter(|a| a.kind == AccessKind::Read && a.path == path)
            .count()
    }

    /// Committed writes as `(path, value)` pairs
    pub fn write_log(&self) -> Vec<(String, u32)> {
        self.journal
            .iter()
            .filter(|a| a.kind == AccessKind::Write)
            .map(|a| (a.path.clone(), a.value))
            .collect()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches
    }

    /// Accesses queued but not yet dispatched
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn next_read(&mut self, path: &str) -> u32 {
        if let Some(script) = self.scripts.get_mut(path) {
            if let Some(value) = script.pop_front() {
                return value;
            }
        }
        self.registers.get(path).copied().unwrap_or(0)
    }
}

impl RegisterBus for MemoryBus {
    fn read(&mut self, path: &str) -> PendingValue {
        let value = PendingValue::new(path);
        self.queue.push(Queued::Read(value.clone()));
        value
    }

    fn write(&mut self, path: &str, value: u32) {
        self.queue.push(Queued::Write(path.to_string(), value));
    }

    fn dispatch(&mut self) -> Result<()> {
        if let Some((remaining, message)) = self.fault.take() {
            if remaining == 0 {
                self.queue.clear();
                return Err(Error::bus(message));
            }
            self.fault = Some((remaining - 1, message));
        }

        self.dispatches += 1;
        for queued in std::mem::take(&mut self.queue) {
            match queued {
                Queued::Write(path, value) => {
                    self.registers.insert(path.clone(), value);
                    if let Some(hooks) = self.hooks.get_mut(&path) {
                        for hook in hooks.iter_mut() {
                            hook(value, &mut self.registers);
                        }
                    }
                    self.journal.push(Access {
                        dispatch: self.dispatches,
                        kind: AccessKind::Write,
                        path,
                        value,
                    });
                }
                Queued::Read(pending) => {
                    let value = self.next_read(pending.path());
                    pending.fill(value);
                    self.journal.push(Access {
                        dispatch: self.dispatches,
                        kind: AccessKind::Read,
                        path: pending.path().to_string(),
                        value,
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBus")
            .field("registers", &self.registers.len())
            .field("queued", &self.queue.len())
            .field("dispatches", &self.dispatches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_land_on_dispatch() {
        let mut bus = MemoryBus::new();
        bus.write("r", 3);
        assert_eq!(bus.value("r"), None);
        assert_eq!(bus.pending(), 1);

        bus.dispatch().unwrap();
        assert_eq!(bus.value("r"), Some(3));
        assert_eq!(bus.writes_to("r"), vec![3]);
        assert_eq!(bus.journal()[0].dispatch, 1);
    }

    #[test]
    fn test_read_sees_earlier_write_in_same_dispatch() {
        let mut bus = MemoryBus::new();
        bus.write("r", 9);
        let value = bus.read("r");
        bus.dispatch().unwrap();
        assert_eq!(value.value().unwrap(), 9);
    }

    #[test]
    fn test_scripted_reads_then_fallback() {
        let mut bus = MemoryBus::new();
        bus.set("done", 5);
        bus.script_reads("done", [0, 1]);

        let values: Vec<u32> = (0..3)
            .map(|_| {
                let v = bus.read("done");
                bus.dispatch().unwrap();
                v.value().unwrap()
            })
            .collect();
        assert_eq!(values, vec![0, 1, 5]);
        assert_eq!(bus.reads_of("done"), 3);
    }

    #[test]
    fn test_write_hook_models_hardware() {
        let mut bus = MemoryBus::new();
        bus.on_write("mux", |channel, regs| {
            regs.insert("lock".to_string(), if channel == 2 { 1 } else { 0 });
        });

        bus.write("mux", 2);
        let lock = bus.read("lock");
        bus.dispatch().unwrap();
        assert_eq!(lock.value().unwrap(), 1);
    }

    #[test]
    fn test_injected_fault() {
        let mut bus = MemoryBus::new();
        bus.fail_dispatch_after(1, "link down");

        bus.write("a", 1);
        assert!(bus.dispatch().is_ok());

        bus.write("a", 2);
        let pending = bus.read("a");
        assert!(matches!(bus.dispatch(), Err(Error::Bus(ref m)) if m == "link down"));
        assert!(!pending.is_ready());
        assert_eq!(bus.pending(), 0);
        assert_eq!(bus.value("a"), Some(1));

        // fault is one-shot
        bus.write("a", 3);
        assert!(bus.dispatch().is_ok());
    }
}
