use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;

use nix::{
    sys::{ptrace, signal::{self, SigHandler, Signal}},
    unistd::{fork, ForkResult, Pid},
};

use crate::error::{Error, Result};


/// Exit status of a forked child that could not exec its target.
pub const EXEC_FAILED: i32 = 127;

const EXEC_FAILED_MSG: &[u8] = b"callcount: unable to exec tracee\n";

/// Command to spawn as a child process to be traced.
#[derive(Clone, Debug)]
pub struct Command {
    /// Argument vector to pass to `execv()`. The first element is the executable path.
    argv: Vec<CString>,
}

impl Command {
    /// Arguments are passed to the tracee byte for byte, and need not be UTF-8.
    pub fn new(argv: Vec<impl AsRef<OsStr>>) -> Result<Self> {
        if argv.is_empty() {
            internal_error!("command executable required");
        }

        // Ensure we own NUL-terminated strings for the foreign exec call.
        //
        // We're heap-allocating, so always do this before forking.
        let argv = argv
            .into_iter()
            .map(|arg| {
                let arg = arg.as_ref().as_bytes();
                let path = String::from_utf8_lossy(arg).into_owned();
                CString::new(arg).map_err(|source| Error::Launch { path, source })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { argv })
    }

    /// Path of the executable to run.
    pub fn program(&self) -> &CString {
        &self.argv[0]
    }

    /// Fork and exec a child process determined by `self.argv`.
    ///
    /// The child sets itself as a tracee of the parent before exec, so the first stop the
    /// parent observes is the `SIGTRAP` delivered on a successful `execv()`. If the exec
    /// fails, the child exits with [`EXEC_FAILED`], which the parent sees as an ordinary exit.
    pub fn fork_exec(self) -> Result<Pid> {
        // Heap-allocates, must occur pre-fork.
        let argv = self.argv();

        match unsafe { fork()? } {
            ForkResult::Child => {
                // Only async-signal-safe calls from here on: no `?`, no allocation.
                unsafe { child_exec(&argv) }
            },
            ForkResult::Parent { child } => {
                Ok(child)
            },
        }
    }

    // Construct NUL-terminated arguments for `execv`. We heap-allocate to return a `Vec`,
    // and so must do this before calling `fork()`.
    fn argv(&self) -> Vec<*const libc::c_char> {
        let mut argv: Vec<_> = self.argv
            .iter()
            .map(|s| s.as_ptr())
            .collect();
        argv.push(std::ptr::null());
        argv
    }
}

// The controller ignores terminal signals so it can outlive an interrupt and report. Ignored
// dispositions survive `execve()`, so the child restores the defaults first.
unsafe fn child_exec(argv: &[*const libc::c_char]) -> ! {
    for sig in [Signal::SIGINT, Signal::SIGHUP] {
        let _ = signal::signal(sig, SigHandler::SigDfl);
    }

    if ptrace::traceme().is_ok() {
        libc::execv(argv[0], argv.as_ptr());
    }

    libc::write(
        libc::STDERR_FILENO,
        EXEC_FAILED_MSG.as_ptr() as *const libc::c_void,
        EXEC_FAILED_MSG.len(),
    );
    libc::_exit(EXEC_FAILED)
}
