//! Types for spawning a tracee, waiting on it, and interpreting its stops.

use std::marker::PhantomData;

use nix::{
    errno::Errno,
    sys::{
        ptrace,
        wait::{self, WaitStatus},
    },
};
use tracing::{debug, trace};

use crate::breakpoint::Inferior;
use crate::cmd::Command;
use crate::error::{Error, Result, ResultExt};
use crate::x86;

pub use nix::unistd::Pid;

/// POSIX signal.
pub use nix::sys::signal::Signal;

/// Register state of a tracee.
pub type Registers = libc::user_regs_struct;

/// A `wait(2)` status change of the tracee, reduced to what the trap state machine needs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// The tracee is in a signal-delivery-stop for `signal`.
    Stopped(Signal),

    /// The tracee exited normally with an exit code.
    Exited(i32),

    /// The tracee was terminated by a signal.
    Signaled(Signal, bool),
}

impl Event {
    fn from_status(status: WaitStatus) -> Result<Self> {
        let event = match status {
            WaitStatus::Stopped(_pid, signal) =>
                Event::Stopped(signal),
            WaitStatus::Exited(_pid, exit_code) =>
                Event::Exited(exit_code),
            WaitStatus::Signaled(_pid, signal, core_dumped) =>
                Event::Signaled(signal, core_dumped),
            // No ptrace options are set, so event-stops and syscall-stops are never reported.
            WaitStatus::PtraceEvent(..) |
            WaitStatus::PtraceSyscall(..) =>
                internal_error!("unexpected ptrace-stop without tracing options"),
            // Assume `!WNOHANG`, `!WCONTINUED`.
            WaitStatus::Continued(_) |
            WaitStatus::StillAlive =>
                internal_error!("unreachable `wait()` status"),
        };

        Ok(event)
    }
}

/// Restart requests, which resume stopped tracees.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Restart {
    /// Execute exactly one instruction, then stop with `SIGTRAP`.
    Step,

    /// Run until the next signal or exit.
    Continue,
}

/// Spawns tracees.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ptracer {
    _private: (),
}

impl Ptracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `cmd` for tracing.
    ///
    /// The child requests `PTRACE_TRACEME` after `fork()` and pre-`exec()`, so its first stop
    /// is the `SIGTRAP` raised by a successful exec.
    pub fn spawn(&mut self, cmd: Command) -> Result<Tracee> {
        let program = cmd.program().to_string_lossy().into_owned();
        let pid = cmd.fork_exec()?;

        debug!(pid = pid.as_raw(), %program, "spawned tracee");

        Ok(Tracee::new(pid))
    }
}

/// A traced child process.
///
/// Every request other than [`Tracee::wait()`] requires the tracee to be in a ptrace-stop.
///
/// **Warning:** the underlying tracee is not guaranteed to exist, and operations on it may
/// fail between calls to [`Tracee::wait()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tracee {
    pid: Pid,

    // ptrace requests are only honoured from the thread that is the tracer.
    #[doc(hidden)]
    _not_send: PhantomData<*const ()>,
}

impl Tracee {
    pub fn new(pid: Pid) -> Self {
        let _not_send = PhantomData;

        Self { pid, _not_send }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the tracee stops or terminates.
    ///
    /// There is no timeout: a tracee that never stops or exits blocks the caller forever.
    pub fn wait(&self) -> Result<Event> {
        let status = loop {
            match wait::waitpid(self.pid, None) {
                Err(Errno::EINTR) => continue,
                res => break res?,
            }
        };

        trace!(?status, "tracee changed state");

        Event::from_status(status)
    }

    /// Resume the stopped tracee, delivering `signal` if set.
    pub fn restart(&mut self, mode: Restart, signal: Option<Signal>) -> Result<()> {
        let pid = self.pid;

        let res = match mode {
            Restart::Step =>
                ptrace::step(pid, signal),
            Restart::Continue =>
                ptrace::cont(pid, signal),
        };

        res.map_err(|source| Error::Restart { pid, mode, source })
    }

    /// Stop tracing, resuming the tracee and delivering `signal` if set.
    pub fn detach(self, signal: Option<Signal>) -> Result<()> {
        Ok(ptrace::detach(self.pid, signal).died_if_esrch(self.pid)?)
    }

    pub fn registers(&self) -> Result<Registers> {
        Ok(ptrace::getregs(self.pid).died_if_esrch(self.pid)?)
    }

    pub fn set_registers(&mut self, regs: Registers) -> Result<()> {
        Ok(ptrace::setregs(self.pid, regs).died_if_esrch(self.pid)?)
    }
}

impl Inferior for Tracee {
    fn read_word(&mut self, addr: u64) -> Result<u64> {
        let pid = self.pid;

        // `PTRACE_PEEKTEXT`, disambiguating a `-1` word from an error via `errno`.
        let word = ptrace::read(pid, addr as ptrace::AddressType)
            .map_err(|source| peek_error(pid, addr, source))?;

        Ok(word as u64)
    }

    fn write_word(&mut self, addr: u64, word: u64) -> Result<()> {
        let pid = self.pid;

        // SAFETY: `PTRACE_POKETEXT` copies `word` by value into the tracee; neither `addr`
        // nor `word` is dereferenced in our address space.
        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_POKETEXT,
                pid.as_raw(),
                addr as *mut libc::c_void,
                word as *mut libc::c_void,
            )
        };

        Errno::result(res).map_err(|source| poke_error(pid, addr, source))?;

        Ok(())
    }

    fn pc(&self) -> Result<u64> {
        Ok(x86::pc(&self.registers()?))
    }

    fn set_pc(&mut self, pc: u64) -> Result<()> {
        let mut regs = self.registers()?;
        x86::set_pc(&mut regs, pc);
        self.set_registers(regs)
    }
}

fn peek_error(pid: Pid, addr: u64, source: nix::Error) -> Error {
    if source == Errno::ESRCH {
        Error::TraceeDied { pid, source }
    } else {
        Error::Peek { pid, addr, source }
    }
}

fn poke_error(pid: Pid, addr: u64, source: nix::Error) -> Error {
    if source == Errno::ESRCH {
        Error::TraceeDied { pid, source }
    } else {
        Error::Poke { pid, addr, source }
    }
}
