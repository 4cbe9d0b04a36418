use std::io;
use std::path::PathBuf;

use crate::ptracer::{Pid, Restart};


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Tracee died while a ptrace request was in flight, pid = {pid}")]
    TraceeDied {
        pid: Pid,
        source: nix::Error,
    },

    #[error("Could not restart tracee = {pid} with mode = {mode:?}")]
    Restart { pid: Pid, mode: Restart, source: nix::Error },

    #[error("Could not read word at 0x{addr:x} in tracee = {pid}")]
    Peek { pid: Pid, addr: u64, source: nix::Error },

    #[error("Could not write word at 0x{addr:x} in tracee = {pid}")]
    Poke { pid: Pid, addr: u64, source: nix::Error },

    #[error("Could not launch `{path}`")]
    Launch { path: String, source: std::ffi::NulError },

    #[error("File {} cannot be opened for reading", .path.display())]
    SymbolFile { path: PathBuf, source: io::Error },

    #[error("Could not find the executable mapping of tracee = {pid}")]
    LoadBase { pid: Pid },

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` if the error was caused by the tracee no longer existing.
    pub fn tracee_died(&self) -> bool {
        match self {
            Error::TraceeDied { .. } => true,
            Error::Restart { source, .. } |
            Error::Peek { source, .. } |
            Error::Poke { source, .. } => *source == nix::Error::ESRCH,
            _ => false,
        }
    }
}

pub(crate) trait ResultExt<T> {
    fn died_if_esrch(self, pid: Pid) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, nix::Error> {
    fn died_if_esrch(self, pid: Pid) -> Result<T> {
        self.map_err(|source| {
            if source == nix::Error::ESRCH {
                Error::TraceeDied { pid, source }
            } else {
                Error::OS(source)
            }
        })
    }
}

macro_rules! internal_error {
    ($msg: expr) => {{
        let msg: String = $msg.into();
        tracing::error!(%msg, "internal error");
        return Err(crate::error::Error::Internal(msg));
    }};
}
