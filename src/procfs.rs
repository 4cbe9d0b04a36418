//! Tracee address-space queries via `/proc`.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::ptracer::Pid;

/// One line of `/proc/<pid>/maps`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub path: Option<String>,
}

impl Mapping {
    /// Parse `start-end perms offset dev inode [path]`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();

        let range = fields.next()?;
        let _perms = fields.next()?;
        let offset = fields.next()?;
        let _dev = fields.next()?;
        let _inode = fields.next()?;

        // Paths may contain spaces, and deleted files carry a ` (deleted)` suffix.
        let path = fields.collect::<Vec<_>>().join(" ");
        let path = if path.is_empty() { None } else { Some(path) };

        let (start, end) = range.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        let offset = u64::from_str_radix(offset, 16).ok()?;

        Some(Self { start, end, offset, path })
    }
}

pub fn mappings(pid: Pid) -> Result<Vec<Mapping>> {
    let maps = fs::read_to_string(format!("/proc/{}/maps", pid.as_raw()))?;
    Ok(maps.lines().filter_map(Mapping::parse).collect())
}

/// Address at which the tracee's main executable is mapped.
///
/// This is the lowest mapping of `/proc/<pid>/exe` at file offset 0.
pub fn load_base(pid: Pid) -> Result<u64> {
    let exe = fs::read_link(format!("/proc/{}/exe", pid.as_raw()))?;
    let base = find_load_base(&mappings(pid)?, &exe).ok_or(Error::LoadBase { pid })?;

    debug!(pid = pid.as_raw(), exe = %exe.display(), base = format_args!("0x{:x}", base), "found load base");

    Ok(base)
}

fn find_load_base(mappings: &[Mapping], exe: &Path) -> Option<u64> {
    let exe = exe.to_str()?;

    mappings
        .iter()
        .filter(|m| m.offset == 0 && m.path.as_deref() == Some(exe))
        .map(|m| m.start)
        .min()
}
