//! Count how often each function of an unmodified executable is entered, by tracing it
//! with `ptrace(2)` and patching an `int3` over every tracked entry address.

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("callcount only supports x86_64 Linux");

#[macro_use]
pub mod error;

pub mod breakpoint;
pub mod cmd;
pub mod counter;
pub mod procfs;
pub mod ptracer;
pub mod session;
pub mod symbols;
pub mod trace;
pub mod x86;

pub use breakpoint::{BreakpointTable, Inferior, TrackedAddress};
pub use counter::{CallCounter, CallTable};
pub use error::{Error, Result};
pub use ptracer::{Event, Pid, Ptracer, Registers, Restart, Signal, Tracee};
pub use session::{Action, Outcome, Phase, Session};
pub use symbols::Symbol;
