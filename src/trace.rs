//! Launch a tracee and drive its session to completion.

use std::ffi::OsStr;

use tracing::{debug, info};

use crate::breakpoint::{BreakpointTable, Inferior};
use crate::cmd::Command;
use crate::counter::CallCounter;
use crate::error::Result;
use crate::procfs;
use crate::ptracer::{Event, Ptracer, Signal};
use crate::session::{Action, Outcome, Phase, Session};

/// Tracing configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Options {
    /// Print one line per tracee event to standard output.
    pub verbose: bool,

    /// Tracked addresses are offsets from the executable's load base.
    pub relative: bool,
}

/// Run `argv` under tracing, counting each entry of the tracked `addresses` into `counter`.
///
/// Blocks until the tracee exits, is killed, or is interrupted by a terminal signal.
pub fn run(
    argv: Vec<impl AsRef<OsStr>>,
    addresses: impl IntoIterator<Item = u64>,
    counter: &mut impl CallCounter,
    options: &Options,
) -> Result<Outcome> {
    let cmd = Command::new(argv)?;
    let mut session = Session::new(BreakpointTable::new(addresses));

    let mut ptracer = Ptracer::new();
    let mut tracee = ptracer.spawn(cmd)?;

    info!(pid = tracee.pid().as_raw(), breakpoints = session.table().len(), "tracing");

    let outcome = loop {
        let event = tracee.wait()?;

        if options.verbose {
            print_event(&tracee, event);

            if let Some(note) = stray_trap_note(&session, event, &tracee) {
                println!("{}", note);
            }
        }

        if options.relative && session.phase() == Phase::Exec && event == Event::Stopped(Signal::SIGTRAP) {
            session.set_load_bias(procfs::load_base(tracee.pid())?)?;
        }

        match session.dispatch(event, &mut tracee, counter)? {
            Action::Resume { restart, signal } => {
                tracee.restart(restart, signal)?;
            },
            Action::Interrupt(signal) => {
                tracee.detach(Some(signal))?;
                break Outcome::Interrupted(signal);
            },
            Action::Finish(outcome) => {
                break outcome;
            },
        }
    };

    debug!(?outcome, "tracing finished");

    Ok(outcome)
}

fn print_event(tracee: &impl Inferior, event: Event) {
    match event {
        Event::Stopped(signal) => {
            match tracee.pc() {
                Ok(pc) => println!("Info: stopped by {} at pc = 0x{:x}", signal, pc),
                Err(_) => println!("Info: stopped by {}", signal),
            }
        },
        Event::Exited(exit_code) => println!("Info: exited with status {}", exit_code),
        Event::Signaled(signal, _) => println!("Info: killed by {}", signal),
    }
}

// Note for a trap, while breakpoints are armed, that no tracked address accounts for.
fn stray_trap_note(session: &Session, event: Event, tracee: &impl Inferior) -> Option<String> {
    if session.phase() != Phase::WaitBreakpoint || event != Event::Stopped(Signal::SIGTRAP) {
        return None;
    }

    let pc = tracee.pc().ok()?;

    if session.table().hit_by(pc).is_some() {
        return None;
    }

    Some(format!("Info: trap at pc = 0x{:x} does not match a tracked address", pc))
}

/// Summary line for how tracing ended.
pub fn summary(outcome: Outcome) -> String {
    match outcome {
        Outcome::Exited(exit_code) =>
            format!("The tracee program has exited with exit status {}", exit_code),
        Outcome::Signaled(signal) =>
            format!("The tracee program was killed by signal {}", signal),
        Outcome::Interrupted(signal) =>
            format!("Child got {}. We are done", signal),
    }
}
