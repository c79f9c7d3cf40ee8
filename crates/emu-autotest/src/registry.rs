//! Process table access.
//!
//! The table is OS-wide state shared with everything else on the machine.
//! Matching is by predicate so the reaper's escalation logic does not care
//! whether processes are picked by command-line fragment or by PID.
//!
//! Other tools running the same emulator binaries concurrently will match
//! too; the harness assumes it has the machine to itself.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    pub pid: u32,
    /// Arguments joined with single spaces.
    pub cmdline: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Decides which processes belong to the emulator under test.
pub trait ProcessMatcher {
    fn matches(&self, process: &ProcessDescriptor) -> bool;
}

impl<F: Fn(&ProcessDescriptor) -> bool> ProcessMatcher for F {
    fn matches(&self, process: &ProcessDescriptor) -> bool {
        self(process)
    }
}

/// Substring match against the command line.
#[derive(Debug, Clone)]
pub struct CmdlineMatcher {
    fragments: Vec<String>,
}

impl CmdlineMatcher {
    pub fn new<S: AsRef<str>>(fragments: &[S]) -> Self {
        Self {
            fragments: fragments
                .iter()
                .map(|f| f.as_ref().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }
}

impl ProcessMatcher for CmdlineMatcher {
    fn matches(&self, process: &ProcessDescriptor) -> bool {
        self.fragments.iter().any(|f| process.cmdline.contains(f.as_str()))
    }
}

/// Exact PID set.
#[derive(Debug, Clone, Default)]
pub struct PidMatcher {
    pids: Vec<u32>,
}

impl PidMatcher {
    pub fn new(pids: Vec<u32>) -> Self {
        Self { pids }
    }
}

impl ProcessMatcher for PidMatcher {
    fn matches(&self, process: &ProcessDescriptor) -> bool {
        self.pids.contains(&process.pid)
    }
}

pub trait ProcessTable {
    /// Snapshot of running processes, excluding the harness itself.
    fn processes(&self) -> Vec<ProcessDescriptor>;

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;

    fn matching(&self, matcher: &dyn ProcessMatcher) -> Vec<ProcessDescriptor> {
        self.processes()
            .into_iter()
            .filter(|p| matcher.matches(p))
            .collect()
    }

    fn any_alive(&self, matcher: &dyn ProcessMatcher) -> bool {
        self.processes().iter().any(|p| matcher.matches(p))
    }
}

/// The live table under `/proc`.
///
/// The harness and its ancestors are never listed, so a wrapper whose
/// command line happens to contain a fragment is not swept.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    excluded: Vec<u32>,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::with_root(PathBuf::from("/proc"), std::process::id())
    }
}

impl ProcFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_root(root: PathBuf, own_pid: u32) -> Self {
        let mut excluded = vec![own_pid];
        let mut pid = own_pid;
        while let Some(parent) = parent_pid(&root, pid) {
            if parent == 0 || excluded.contains(&parent) {
                break;
            }
            excluded.push(parent);
            pid = parent;
        }
        Self { root, excluded }
    }

    fn cmdline(&self, pid: u32) -> Option<String> {
        // Processes vanish between readdir and open; that is not an error.
        let raw = fs::read(self.root.join(pid.to_string()).join("cmdline")).ok()?;
        let joined = raw
            .split(|&b| b == 0)
            .filter(|part| !part.is_empty())
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(" ");
        Some(joined)
    }
}

impl ProcessTable for ProcFs {
    fn processes(&self) -> Vec<ProcessDescriptor> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            log::warn!("Cannot read {}", self.root.display());
            return Vec::new();
        };

        let mut out: Vec<ProcessDescriptor> = entries
            .filter_map(|e| e.ok()?.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| !self.excluded.contains(pid))
            .filter_map(|pid| {
                self.cmdline(pid)
                    .map(|cmdline| ProcessDescriptor { pid, cmdline })
            })
            .collect();
        out.sort_by_key(|p| p.pid);
        out
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        send_signal(pid, signal)
    }
}

/// `PPid` field of `<root>/<pid>/status`.
fn parent_pid(root: &Path, pid: u32) -> Option<u32> {
    let status = fs::read_to_string(root.join(pid.to_string()).join("status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("PPid:"))
        .and_then(|v| v.trim().parse().ok())
}

/// `kill(2)` wrapper.
#[allow(unsafe_code)]
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal.as_raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Permission denied and already-gone are expected during cleanup.
pub fn is_tolerable(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied || err.raw_os_error() == Some(libc::ESRCH)
}
