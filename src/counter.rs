//! Per-address call counts.

use std::collections::HashMap;
use std::io::{self, Write};

/// Sink for function entries observed by the tracer.
pub trait CallCounter {
    /// Count one entry of the function at `address`.
    fn record_entry(&mut self, address: u64);

    /// Write every tracked address with its final count.
    fn report(&self, out: &mut dyn Write) -> io::Result<()>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub address: u64,
    pub name: Option<String>,
    pub count: u64,
}

/// Call counts in insertion order.
#[derive(Clone, Debug, Default)]
pub struct CallTable {
    entries: Vec<Entry>,
    index: HashMap<u64, usize>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tracked function with a count of zero.
    ///
    /// Returns `false` if `address` was already registered, in which case the first name wins.
    pub fn insert(&mut self, address: u64, name: impl Into<String>) -> bool {
        if self.index.contains_key(&address) {
            return false;
        }

        self.push(address, Some(name.into()));
        true
    }

    pub fn count(&self, address: u64) -> Option<u64> {
        self.index.get(&address).map(|&i| self.entries[i].count)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, address: u64, name: Option<String>) -> usize {
        let i = self.entries.len();
        self.entries.push(Entry { address, name, count: 0 });
        self.index.insert(address, i);
        i
    }
}

impl CallCounter for CallTable {
    fn record_entry(&mut self, address: u64) {
        let i = match self.index.get(&address) {
            Some(&i) => i,
            None => self.push(address, None),
        };

        self.entries[i].count += 1;
    }

    fn report(&self, out: &mut dyn Write) -> io::Result<()> {
        for entry in &self.entries {
            let name = entry.name.as_deref().unwrap_or("<unknown>");
            writeln!(out, "0x{:x} {}: {}", entry.address, name, entry.count)?;
        }

        Ok(())
    }
}
