//! Software breakpoints at tracked function entry addresses.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::error::Result;
use crate::x86;

/// Register and memory surface of a stopped tracee.
///
/// Implementations may only be used while the tracee is in a ptrace-stop.
pub trait Inferior {
    /// Read the machine word starting at `addr`.
    fn read_word(&mut self, addr: u64) -> Result<u64>;

    /// Overwrite the machine word starting at `addr`.
    fn write_word(&mut self, addr: u64, word: u64) -> Result<()>;

    /// Current instruction pointer.
    fn pc(&self) -> Result<u64>;

    fn set_pc(&mut self, pc: u64) -> Result<()>;
}

/// A function entry address, and the word found there before it was patched.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrackedAddress {
    pub address: u64,

    /// Set by the most recent [`BreakpointTable::install()`].
    pub original_word: Option<u64>,
}

impl TrackedAddress {
    pub fn new(address: u64) -> Self {
        Self { address, original_word: None }
    }
}

/// Ordered set of tracked addresses.
///
/// Installs and restores must strictly alternate per address. Installing over an already
/// patched address would capture the trap opcode as the original instruction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BreakpointTable {
    tracked: Vec<TrackedAddress>,
}

impl BreakpointTable {
    /// Build a table from addresses, keeping the first occurrence of any duplicate.
    pub fn new(addresses: impl IntoIterator<Item = u64>) -> Self {
        let mut seen = HashSet::new();

        let tracked = addresses
            .into_iter()
            .filter(|addr| seen.insert(*addr))
            .map(TrackedAddress::new)
            .collect();

        Self { tracked }
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrackedAddress> {
        self.tracked.get(index)
    }

    /// Index of the breakpoint whose trap leaves the tracee at `pc`.
    pub fn hit_by(&self, pc: u64) -> Option<usize> {
        let addr = pc.checked_sub(x86::TRAP_LEN)?;
        self.tracked.iter().position(|t| t.address == addr)
    }

    /// Shift every address by `bias`. Only valid before any breakpoint is installed.
    pub fn rebase(&mut self, bias: u64) {
        debug!(bias = format_args!("0x{:x}", bias), "rebasing tracked addresses");

        for t in &mut self.tracked {
            t.address = t.address.wrapping_add(bias);
        }
    }

    /// Save the word at the `index`-th address and patch its first byte with a trap.
    pub fn install(&mut self, inferior: &mut impl Inferior, index: usize) -> Result<()> {
        let tracked = &mut self.tracked[index];

        let word = inferior.read_word(tracked.address)?;
        tracked.original_word = Some(word);

        let patched = x86::splice_first_byte(word, x86::TRAP_OPCODE);
        inferior.write_word(tracked.address, patched)?;

        trace!(addr = format_args!("0x{:x}", tracked.address), "installed breakpoint");

        Ok(())
    }

    /// Put back the original first byte at the `index`-th address.
    ///
    /// The rest of the word is re-read rather than taken from the saved word, so a trap
    /// installed at a neighbouring address within the same word survives.
    pub fn restore(&mut self, inferior: &mut impl Inferior, index: usize) -> Result<()> {
        let tracked = &self.tracked[index];

        let original = match tracked.original_word {
            Some(word) => word,
            None => internal_error!(format!("restore of uninstalled breakpoint at 0x{:x}", tracked.address)),
        };

        let current = inferior.read_word(tracked.address)?;
        let restored = x86::splice_first_byte(current, x86::first_byte(original));
        inferior.write_word(tracked.address, restored)?;

        trace!(addr = format_args!("0x{:x}", tracked.address), "restored instruction");

        Ok(())
    }

    /// Install a breakpoint at every tracked address.
    pub fn install_all(&mut self, inferior: &mut impl Inferior) -> Result<()> {
        for index in 0..self.tracked.len() {
            self.install(inferior, index)?;
        }

        Ok(())
    }

    /// Restore every installed address, except `skip`, which is already restored.
    pub fn restore_all(&mut self, inferior: &mut impl Inferior, skip: Option<usize>) -> Result<()> {
        for index in 0..self.tracked.len() {
            if Some(index) == skip || self.tracked[index].original_word.is_none() {
                continue;
            }

            self.restore(inferior, index)?;
        }

        Ok(())
    }
}
