//! Process reaper: nothing emulator-shaped survives a title.
//!
//! Escalation for the supervisor's own child is interrupt, grace period,
//! kill. Independently the whole table is swept for matching stragglers,
//! which catches processes a wrapper script forked on its own.

use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::registry::{ProcessMatcher, ProcessTable, Signal, is_tolerable, send_signal};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the reaper had to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub interrupted: bool,
    /// The child ignored the interrupt and was killed.
    pub escalated: bool,
    /// Stragglers killed in the table-wide sweep.
    pub swept: Vec<u32>,
}

pub struct Reaper<'a> {
    table: &'a dyn ProcessTable,
    matcher: &'a dyn ProcessMatcher,
    grace: Duration,
    settle: Duration,
    poll: Duration,
}

impl<'a> Reaper<'a> {
    pub fn new(
        table: &'a dyn ProcessTable,
        matcher: &'a dyn ProcessMatcher,
        grace: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            table,
            matcher,
            grace,
            settle,
            poll: POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Stop `child` if it is still running, then clear the table.
    pub fn reap(&self, child: Option<&mut Child>) -> ReapReport {
        let mut report = ReapReport::default();
        if let Some(child) = child {
            self.stop_child(child, &mut report);
        }
        self.wait_until_idle();
        report.swept = self.sweep();
        if !report.swept.is_empty() {
            thread::sleep(self.poll);
        }
        report
    }

    fn stop_child(&self, child: &mut Child, report: &mut ReapReport) {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => log::warn!("try_wait on pid {} failed: {e}", child.id()),
        }

        report.interrupted = true;
        if let Err(e) = send_signal(child.id(), Signal::Interrupt) {
            if !is_tolerable(&e) {
                log::warn!("Interrupting pid {} failed: {e}", child.id());
            }
        }

        if let Ok(Some(_)) = child.wait_timeout(self.grace) {
            return;
        }
        log::debug!("pid {} ignored interrupt for {:?}, killing", child.id(), self.grace);
        report.escalated = true;
        let _ = child.kill();
        let _ = child.wait();
    }

    /// Poll the table until nothing matches or `settle` runs out.
    fn wait_until_idle(&self) {
        let start = Instant::now();
        while self.table.any_alive(self.matcher) {
            let remaining = self.settle.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(self.poll.min(remaining));
        }
    }

    fn sweep(&self) -> Vec<u32> {
        let mut killed = Vec::new();
        for process in self.table.matching(self.matcher) {
            match self.table.signal(process.pid, Signal::Kill) {
                Ok(()) => {
                    log::info!("Killed straggler {} ({})", process.pid, process.cmdline);
                    killed.push(process.pid);
                }
                Err(e) if is_tolerable(&e) => {
                    log::debug!("Could not kill {}: {e}", process.pid);
                }
                Err(e) => log::warn!("Could not kill {}: {e}", process.pid),
            }
        }
        killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CmdlineMatcher, ProcessDescriptor};
    use std::cell::RefCell;
    use std::io;
    use std::process::Command;

    /// In-memory table; killed processes disappear, PID 1 refuses signals.
    struct FakeTable {
        procs: RefCell<Vec<ProcessDescriptor>>,
        signals: RefCell<Vec<(u32, Signal)>>,
    }

    impl FakeTable {
        fn new(rows: &[(u32, &str)]) -> Self {
            Self {
                procs: RefCell::new(
                    rows.iter()
                        .map(|&(pid, cmd)| ProcessDescriptor {
                            pid,
                            cmdline: cmd.to_string(),
                        })
                        .collect(),
                ),
                signals: RefCell::new(Vec::new()),
            }
        }
    }

    impl ProcessTable for FakeTable {
        fn processes(&self) -> Vec<ProcessDescriptor> {
            self.procs.borrow().clone()
        }

        fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
            self.signals.borrow_mut().push((pid, signal));
            if pid == 1 {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.procs.borrow_mut().retain(|p| p.pid != pid);
            Ok(())
        }
    }

    fn quick<'a>(table: &'a FakeTable, matcher: &'a CmdlineMatcher) -> Reaper<'a> {
        Reaper::new(table, matcher, Duration::from_millis(200), Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn sweeps_every_matching_process() {
        let table = FakeTable::new(&[
            (10, "/usr/bin/retroarch -L vice_x64_libretro.so"),
            (11, "/bin/bash /usr/bin/emuelecRunEmu.sh game.d64"),
            (12, "x64sc vice_x64"),
        ]);
        let matcher = CmdlineMatcher::new(&["retroarch", "vice_x64"]);
        let report = quick(&table, &matcher).reap(None);

        assert_eq!(report.swept, vec![10, 12]);
        assert!(!report.interrupted);
        assert!(table.signals.borrow().iter().all(|&(_, s)| s == Signal::Kill));
        assert_eq!(table.processes().len(), 1);
    }

    #[test]
    fn permission_denied_is_swallowed() {
        let table = FakeTable::new(&[(1, "retroarch"), (20, "retroarch")]);
        let matcher = CmdlineMatcher::new(&["retroarch"]);
        let report = quick(&table, &matcher).reap(None);
        assert_eq!(report.swept, vec![20]);
        assert_eq!(table.signals.borrow().len(), 2);
    }

    #[test]
    fn idle_table_is_left_alone() {
        let table = FakeTable::new(&[(30, "/usr/bin/python3 report.py")]);
        let matcher = CmdlineMatcher::new(&["retroarch"]);
        let report = quick(&table, &matcher).reap(None);
        assert_eq!(report, ReapReport::default());
        assert!(table.signals.borrow().is_empty());
    }

    #[test]
    fn exited_child_is_not_signalled() {
        let mut child = Command::new("true").spawn().expect("spawn");
        child.wait().expect("wait");
        let table = FakeTable::new(&[]);
        let matcher = CmdlineMatcher::new(&["retroarch"]);
        let report = quick(&table, &matcher).reap(Some(&mut child));
        assert!(!report.interrupted);
    }

    #[test]
    fn interrupt_stops_a_cooperative_child() {
        let mut child = Command::new("sleep").arg("30").spawn().expect("spawn");
        let table = FakeTable::new(&[]);
        let matcher = CmdlineMatcher::new(&["retroarch"]);
        let report = quick(&table, &matcher).reap(Some(&mut child));
        assert!(report.interrupted);
        assert!(child.try_wait().expect("try_wait").is_some());
    }

    #[test]
    fn stubborn_child_is_killed_after_grace() {
        // The shell ignores SIGINT, so only the kill gets through.
        let mut child = Command::new("sh")
            .args(["-c", "trap '' INT; while :; do sleep 0.05; done"])
            .spawn()
            .expect("spawn");
        // Give the shell a moment to install the trap.
        thread::sleep(Duration::from_millis(100));
        let table = FakeTable::new(&[]);
        let matcher = CmdlineMatcher::new(&["retroarch"]);
        let report = quick(&table, &matcher).reap(Some(&mut child));
        assert!(report.interrupted);
        assert!(report.escalated);
        assert!(child.try_wait().expect("try_wait").is_some());
    }
}
