#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};

use callcount::{
    Action, CallCounter, Event, Inferior, Outcome, Restart, Result, Session, Signal,
};

/// Guard against a state machine that never finishes.
const MAX_STOPS: usize = 100_000;

/// Something the simulated program does when it runs freely.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op {
    /// Enter the function at the address, executing its first instruction.
    Call(u64),

    /// Receive a signal.
    Signal(Signal),

    /// Execute an `int3` that the tracer did not install, leaving pc at the address.
    StrayTrap(u64),

    /// Die from a signal.
    Kill(Signal),
}

/// A tracee whose memory and control flow are simulated.
///
/// Memory is byte-addressed. Bytes which were never written hold a fixed pristine pattern
/// that never contains the trap opcode. Every instruction is `insn_len` bytes long.
pub struct Simulated {
    memory: BTreeMap<u64, u8>,
    pc: u64,
    ops: VecDeque<Op>,
    exit_code: i32,
    insn_len: u64,

    /// Entry addresses whose first instruction executed unmodified.
    pub executed: Vec<u64>,

    /// Addresses at which an instruction executed with corrupted bytes.
    pub corrupt: Vec<u64>,

    /// Signals the tracer delivered on restart.
    pub delivered: Vec<Signal>,

    /// Number of words written by the tracer.
    pub writes: usize,
}

pub fn pristine(addr: u64) -> u8 {
    let byte = (addr as u8).wrapping_mul(31) ^ 0x5a;

    if byte == callcount::x86::TRAP_OPCODE { 0x90 } else { byte }
}

impl Simulated {
    pub fn new(ops: impl IntoIterator<Item = Op>, exit_code: i32) -> Self {
        Self {
            memory: BTreeMap::new(),
            pc: 0x400000,
            ops: ops.into_iter().collect(),
            exit_code,
            insn_len: 4,
            executed: vec![],
            corrupt: vec![],
            delivered: vec![],
            writes: 0,
        }
    }

    /// Call each address `n` times, in round-robin order.
    pub fn calling(calls: &[(u64, usize)], exit_code: i32) -> Self {
        let mut ops = vec![];
        let max = calls.iter().map(|&(_, n)| n).max().unwrap_or(0);

        for round in 0..max {
            for &(addr, n) in calls {
                if round < n {
                    ops.push(Op::Call(addr));
                }
            }
        }

        Self::new(ops, exit_code)
    }

    pub fn with_insn_len(mut self, insn_len: u64) -> Self {
        self.insn_len = insn_len;
        self
    }

    pub fn byte(&self, addr: u64) -> u8 {
        self.memory.get(&addr).copied().unwrap_or_else(|| pristine(addr))
    }

    /// Addresses in `[start, end)` whose byte differs from the pristine pattern.
    pub fn modified(&self, start: u64, end: u64) -> Vec<u64> {
        (start..end).filter(|&a| self.byte(a) != pristine(a)).collect()
    }

    /// The exec trap.
    pub fn start(&mut self) -> Event {
        Event::Stopped(Signal::SIGTRAP)
    }

    pub fn resume(&mut self, restart: Restart, signal: Option<Signal>) -> Event {
        if let Some(signal) = signal {
            self.delivered.push(signal);
        }

        match restart {
            Restart::Step => {
                self.execute(self.pc);
                Event::Stopped(Signal::SIGTRAP)
            },
            Restart::Continue => self.run(),
        }
    }

    fn run(&mut self) -> Event {
        while let Some(op) = self.ops.pop_front() {
            match op {
                Op::Call(addr) => {
                    self.pc = addr;

                    if self.byte(addr) == callcount::x86::TRAP_OPCODE {
                        self.pc = addr + 1;
                        return Event::Stopped(Signal::SIGTRAP);
                    }

                    self.execute(addr);
                },
                Op::Signal(signal) => return Event::Stopped(signal),
                Op::StrayTrap(addr) => {
                    self.pc = addr;
                    return Event::Stopped(Signal::SIGTRAP);
                },
                Op::Kill(signal) => return Event::Signaled(signal, false),
            }
        }

        Event::Exited(self.exit_code)
    }

    fn execute(&mut self, addr: u64) {
        if self.modified(addr, addr + self.insn_len).is_empty() {
            self.executed.push(addr);
        } else {
            self.corrupt.push(addr);
        }

        self.pc = addr + self.insn_len;
    }
}

impl Inferior for Simulated {
    fn read_word(&mut self, addr: u64) -> Result<u64> {
        let mut bytes = [0; 8];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.byte(addr + i as u64);
        }

        Ok(u64::from_le_bytes(bytes))
    }

    fn write_word(&mut self, addr: u64, word: u64) -> Result<()> {
        for (i, b) in word.to_le_bytes().iter().enumerate() {
            self.memory.insert(addr + i as u64, *b);
        }

        self.writes += 1;

        Ok(())
    }

    fn pc(&self) -> Result<u64> {
        Ok(self.pc)
    }

    fn set_pc(&mut self, pc: u64) -> Result<()> {
        self.pc = pc;
        Ok(())
    }
}

/// Run the simulated tracee under `session` until tracing finishes.
pub fn drive(
    session: &mut Session,
    sim: &mut Simulated,
    counter: &mut impl CallCounter,
) -> Result<Outcome> {
    let mut event = sim.start();

    for _ in 0..MAX_STOPS {
        match session.dispatch(event, sim, counter)? {
            Action::Resume { restart, signal } => {
                event = sim.resume(restart, signal);
            },
            Action::Interrupt(signal) => return Ok(Outcome::Interrupted(signal)),
            Action::Finish(outcome) => return Ok(outcome),
        }
    }

    panic!("session did not finish after {} stops", MAX_STOPS);
}
