//! The trap state machine.
//!
//! A [`Session`] interprets each stop of the tracee and decides how to resume it. After the
//! tracee's exec trap, every tracked address carries an `int3`. When one is hit, the entry is
//! counted, the original instruction is put back, the pc is rewound onto it, and the tracee is
//! single-stepped over it. The step's trap re-arms the breakpoint and the tracee runs freely
//! until the next hit.

use tracing::{debug, trace, warn};

use crate::breakpoint::{BreakpointTable, Inferior};
use crate::counter::CallCounter;
use crate::error::Result;
use crate::ptracer::{Event, Restart, Signal};

/// Where the session is in the install/restore/step cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Waiting for the trap raised by the tracee's exec. No breakpoints are installed.
    Exec,

    /// All breakpoints are installed, and the tracee runs freely.
    WaitBreakpoint,

    /// The tracee is stepping over the restored instruction at the active address.
    SingleStepReplace,
}

impl Phase {
    /// Restart mode that keeps the protocol of this phase.
    pub fn restart(self) -> Restart {
        match self {
            Phase::SingleStepReplace => Restart::Step,
            Phase::Exec | Phase::WaitBreakpoint => Restart::Continue,
        }
    }
}

/// How tracing ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The tracee exited with a status code.
    Exited(i32),

    /// The tracee was killed by a signal.
    Signaled(Signal),

    /// The tracee received a terminal signal, which was forwarded to it on detach.
    Interrupted(Signal),
}

/// What the coordinator must do with the stopped tracee.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Resume { restart: Restart, signal: Option<Signal> },

    /// All breakpoints are removed. Detach, delivering the signal, and stop tracing.
    Interrupt(Signal),

    /// The tracee is gone.
    Finish(Outcome),
}

impl Action {
    fn resume(restart: Restart) -> Self {
        Action::Resume { restart, signal: None }
    }
}

/// Signals which end tracing when they stop the tracee.
pub fn is_terminal_signal(signal: Signal) -> bool {
    matches!(signal, Signal::SIGHUP | Signal::SIGINT)
}

#[derive(Clone, Debug)]
pub struct Session {
    table: BreakpointTable,
    phase: Phase,

    /// Index into `table` of the address being stepped over.
    active_index: Option<usize>,

    /// Added to symbol addresses to get tracee addresses.
    load_bias: u64,

    /// Signal that stopped the tracee mid-step, delivered once the breakpoint is re-armed.
    pending_signal: Option<Signal>,
}

impl Session {
    pub fn new(table: BreakpointTable) -> Self {
        Self {
            table,
            phase: Phase::Exec,
            active_index: None,
            load_bias: 0,
            pending_signal: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn table(&self) -> &BreakpointTable {
        &self.table
    }

    pub fn pending_signal(&self) -> Option<Signal> {
        self.pending_signal
    }

    /// Relocate the tracked addresses by `bias`, before the exec trap installs them.
    pub fn set_load_bias(&mut self, bias: u64) -> Result<()> {
        if self.phase != Phase::Exec {
            internal_error!("load bias set after breakpoints were installed");
        }

        self.table.rebase(bias.wrapping_sub(self.load_bias));
        self.load_bias = bias;

        Ok(())
    }

    /// Interpret one tracee event and return the action that continues the protocol.
    pub fn dispatch(
        &mut self,
        event: Event,
        inferior: &mut impl Inferior,
        counter: &mut impl CallCounter,
    ) -> Result<Action> {
        let action = match event {
            Event::Exited(exit_code) =>
                Action::Finish(Outcome::Exited(exit_code)),
            Event::Signaled(signal, _core_dumped) =>
                Action::Finish(Outcome::Signaled(signal)),
            Event::Stopped(Signal::SIGTRAP) =>
                self.on_trap(inferior, counter)?,
            Event::Stopped(signal) if is_terminal_signal(signal) => {
                debug!(?signal, phase = ?self.phase, "terminal signal, removing breakpoints");
                self.disarm(inferior)?;
                Action::Interrupt(signal)
            },
            // Delivering a signal with the step would run its handler first, and the step trap
            // would then be reported at the handler's first instruction instead.
            Event::Stopped(signal) if self.phase == Phase::SingleStepReplace => {
                if let Some(pending) = self.pending_signal {
                    warn!(?signal, ?pending, "signal already pending mid-step, dropping");
                } else {
                    debug!(?signal, "deferring signal until the step completes");
                    self.pending_signal = Some(signal);
                }

                Action::resume(Restart::Step)
            },
            Event::Stopped(signal) => {
                trace!(?signal, phase = ?self.phase, "passing signal through");
                Action::Resume { restart: self.phase.restart(), signal: Some(signal) }
            },
        };

        Ok(action)
    }

    fn on_trap(
        &mut self,
        inferior: &mut impl Inferior,
        counter: &mut impl CallCounter,
    ) -> Result<Action> {
        let action = match self.phase {
            Phase::Exec => {
                debug!(breakpoints = self.table.len(), "exec trap, installing breakpoints");

                self.table.install_all(inferior)?;
                self.phase = Phase::WaitBreakpoint;

                Action::resume(Restart::Continue)
            },
            Phase::WaitBreakpoint => {
                let pc = inferior.pc()?;

                match self.table.hit_by(pc) {
                    Some(index) => {
                        let address = pc - crate::x86::TRAP_LEN;
                        trace!(addr = format_args!("0x{:x}", address), "breakpoint hit");

                        counter.record_entry(address.wrapping_sub(self.load_bias));

                        self.table.restore(inferior, index)?;
                        inferior.set_pc(address)?;

                        self.active_index = Some(index);
                        self.phase = Phase::SingleStepReplace;

                        Action::resume(Restart::Step)
                    },
                    None => {
                        warn!(pc = format_args!("0x{:x}", pc), "trap does not match a tracked address");

                        Action::resume(Restart::Continue)
                    },
                }
            },
            Phase::SingleStepReplace => {
                let index = match self.active_index.take() {
                    Some(index) => index,
                    None => internal_error!("single-step completed without an active breakpoint"),
                };

                self.table.install(inferior, index)?;
                self.phase = Phase::WaitBreakpoint;

                Action::Resume { restart: Restart::Continue, signal: self.pending_signal.take() }
            },
        };

        Ok(action)
    }

    // Remove every installed trap, so the tracee can run untraced.
    fn disarm(&mut self, inferior: &mut impl Inferior) -> Result<()> {
        match self.phase {
            Phase::Exec => {},
            Phase::WaitBreakpoint =>
                self.table.restore_all(inferior, None)?,
            Phase::SingleStepReplace =>
                self.table.restore_all(inferior, self.active_index)?,
        }

        Ok(())
    }
}
