//! Process tree inspection and termination.
//!
//! [`ProcessTree`] is the only platform-specific seam of the supervisor.
//! [`SystemProcessTree`] reads `/proc` on Linux, `ps` on other Unix systems,
//! and shells out to `taskkill` elsewhere.
//!
//! On Unix the worker is started as the leader of its own process group, so
//! background jobs it leaves behind stay reachable through the group even
//! after they are reparented away from it.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use super::errors::{ProcessError, ProcessResult};

/// How often teardown re-checks liveness during the grace period.
const REAP_POLL: Duration = Duration::from_millis(50);

/// List, inspect and signal processes and process groups.
pub trait ProcessTree: Send + Sync {
    /// All descendants of `pid`, parents before children.
    fn descendants(&self, pid: u32) -> io::Result<Vec<u32>>;

    /// Ask `pid` to exit, or kill it outright when `force` is set.
    /// A process that is already gone is not an error.
    fn terminate(&self, pid: u32, force: bool) -> io::Result<()>;

    /// Whether `pid` is still running. Zombies count as gone.
    fn is_alive(&self, pid: u32) -> bool;

    /// Signal every process in group `pgid`. An empty group is not an error.
    fn terminate_group(&self, pgid: u32, force: bool) -> io::Result<()>;

    /// Running members of process group `pgid`. Zombies are left out.
    fn group_members(&self, pgid: u32) -> io::Result<Vec<u32>>;
}

/// Outcome of tearing down a worker and its descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Teardown {
    /// Descendants found before signalling.
    pub descendants: Vec<u32>,
    /// Members of the worker's group that were no longer below it, such as
    /// background jobs left running after the worker exited.
    pub group: Vec<u32>,
    /// Pids that needed a forced kill after the grace period.
    pub forced: Vec<u32>,
}

/// Running members of the group led by `pid`, other than `pid` itself.
pub fn live_group_members(tree: &dyn ProcessTree, pid: u32) -> Vec<u32> {
    match tree.group_members(pid) {
        Ok(members) => members.into_iter().filter(|&m| m != pid).collect(),
        Err(e) => {
            tracing::debug!("Could not list process group {}: {}", pid, e);
            Vec::new()
        }
    }
}

/// Terminate `child` and everything below it.
///
/// Descendants and the rest of the child's process group are listed first.
/// The group, each listed process and finally the child get a graceful
/// request. Whatever is still alive after `grace` is killed. The child is
/// always reaped before returning, and may already have exited.
pub fn terminate_tree(
    tree: &dyn ProcessTree,
    child: &mut Child,
    grace: Duration,
) -> ProcessResult<Teardown> {
    let pid = child.id();

    let descendants = tree.descendants(pid).unwrap_or_else(|e| {
        tracing::warn!("Could not list descendants of pid {}: {}", pid, e);
        Vec::new()
    });
    let group: Vec<u32> = live_group_members(tree, pid)
        .into_iter()
        .filter(|m| !descendants.contains(m))
        .collect();
    tracing::debug!(
        "Terminating pid {} with {} descendant(s) {:?} and {} other group member(s) {:?}",
        pid,
        descendants.len(),
        descendants,
        group.len(),
        group
    );

    if let Err(e) = tree.terminate_group(pid, false) {
        tracing::warn!("Graceful termination of group {} failed: {}", pid, e);
    }
    for &target in descendants.iter().chain(&group) {
        if let Err(e) = tree.terminate(target, false) {
            tracing::warn!("Graceful termination of pid {} failed: {}", target, e);
        }
    }

    let child_exited = matches!(child.try_wait(), Ok(Some(_)));
    if !child_exited {
        if let Err(e) = tree.terminate(pid, false) {
            tracing::warn!("Graceful termination of worker pid {} failed: {}", pid, e);
        }
    }

    let deadline = Instant::now() + grace;
    loop {
        let child_done = matches!(child.try_wait(), Ok(Some(_)));
        let any_alive = descendants.iter().chain(&group).any(|&p| tree.is_alive(p))
            || !live_group_members(tree, pid).is_empty();
        if child_done && !any_alive {
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(REAP_POLL);
    }

    let mut forced = live_group_members(tree, pid);
    if !forced.is_empty() {
        tracing::warn!(
            "Group {} still has {} process(es) after the grace period, killing",
            pid,
            forced.len()
        );
        if let Err(e) = tree.terminate_group(pid, true) {
            tracing::warn!("Kill of group {} failed: {}", pid, e);
        }
    }
    for &target in descendants.iter().chain(&group) {
        if !forced.contains(&target) && tree.is_alive(target) {
            tracing::warn!("pid {} ignored termination request, killing", target);
            if let Err(e) = tree.terminate(target, true) {
                tracing::warn!("Kill of pid {} failed: {}", target, e);
            }
            forced.push(target);
        }
    }

    if !matches!(child.try_wait(), Ok(Some(_))) {
        tracing::warn!("Worker pid {} ignored termination request, killing", pid);
        // Already exited between the check and the kill is fine.
        let _ = child.kill();
        forced.push(pid);
    }

    child
        .wait()
        .map_err(|source| ProcessError::Wait { pid, source })?;

    Ok(Teardown {
        descendants,
        group,
        forced,
    })
}

/// Breadth-first walk of a pid -> parent table.
fn walk_descendants(root: u32, parents: &[(u32, u32)]) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, ppid) in parents {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if kid != root && !found.contains(&kid) {
                    found.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }
    found
}

/// Process tree backed by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTree;

#[cfg(unix)]
mod unix {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    /// The fields of one process table row the supervisor needs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) struct ProcEntry {
        pub pid: u32,
        pub ppid: u32,
        pub pgrp: u32,
        pub state: char,
    }

    impl ProcEntry {
        fn is_running(&self) -> bool {
            self.state != 'Z' && self.state != 'X'
        }
    }

    impl ProcessTree for SystemProcessTree {
        fn descendants(&self, pid: u32) -> io::Result<Vec<u32>> {
            let parents: Vec<(u32, u32)> = process_table()?
                .iter()
                .map(|entry| (entry.pid, entry.ppid))
                .collect();
            Ok(walk_descendants(pid, &parents))
        }

        fn terminate(&self, pid: u32, force: bool) -> io::Result<()> {
            ignore_missing(kill(to_pid(pid)?, signal_for(force)))
        }

        fn is_alive(&self, pid: u32) -> bool {
            process_state(pid).is_some_and(|state| state != 'Z' && state != 'X')
        }

        fn terminate_group(&self, pgid: u32, force: bool) -> io::Result<()> {
            ignore_missing(killpg(to_pid(pgid)?, signal_for(force)))
        }

        fn group_members(&self, pgid: u32) -> io::Result<Vec<u32>> {
            Ok(process_table()?
                .into_iter()
                .filter(|entry| entry.pgrp == pgid && entry.is_running())
                .map(|entry| entry.pid)
                .collect())
        }
    }

    fn signal_for(force: bool) -> Signal {
        if force {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        }
    }

    fn to_pid(pid: u32) -> io::Result<Pid> {
        i32::try_from(pid)
            .map(Pid::from_raw)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))
    }

    fn ignore_missing(result: nix::Result<()>) -> io::Result<()> {
        match result {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    /// Every visible process.
    #[cfg(target_os = "linux")]
    fn process_table() -> io::Result<Vec<ProcEntry>> {
        let mut table = Vec::new();
        for entry in std::fs::read_dir("/proc")? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Processes may exit while we scan.
            if let Some(stat) = read_stat(pid) {
                table.push(stat);
            }
        }
        Ok(table)
    }

    #[cfg(target_os = "linux")]
    fn process_state(pid: u32) -> Option<char> {
        read_stat(pid).map(|entry| entry.state)
    }

    #[cfg(target_os = "linux")]
    fn read_stat(pid: u32) -> Option<ProcEntry> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        parse_stat(&stat)
    }

    #[cfg(not(target_os = "linux"))]
    fn process_table() -> io::Result<Vec<ProcEntry>> {
        let output = std::process::Command::new("ps")
            .args(["-A", "-o", "pid=", "-o", "ppid=", "-o", "pgid=", "-o", "stat="])
            .output()?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                Some(ProcEntry {
                    pid: fields.next()?.parse().ok()?,
                    ppid: fields.next()?.parse().ok()?,
                    pgrp: fields.next()?.parse().ok()?,
                    state: fields.next()?.chars().next()?,
                })
            })
            .collect())
    }

    #[cfg(not(target_os = "linux"))]
    fn process_state(pid: u32) -> Option<char> {
        let output = std::process::Command::new("ps")
            .args(["-o", "stat=", "-p", &pid.to_string()])
            .output()
            .ok()?;
        String::from_utf8_lossy(&output.stdout).trim().chars().next()
    }

    /// Parse one `/proc/<pid>/stat` line.
    pub(super) fn parse_stat(stat: &str) -> Option<ProcEntry> {
        let pid = stat.split_whitespace().next()?.parse().ok()?;
        // The command name is parenthesized and may itself contain spaces
        // or parentheses, so split after the last ')'.
        let rest = &stat[stat.rfind(')')? + 1..];
        let mut fields = rest.split_whitespace();
        let state = fields.next()?.chars().next()?;
        let ppid = fields.next()?.parse().ok()?;
        let pgrp = fields.next()?.parse().ok()?;
        Some(ProcEntry {
            pid,
            ppid,
            pgrp,
            state,
        })
    }
}

#[cfg(not(unix))]
impl ProcessTree for SystemProcessTree {
    fn descendants(&self, _pid: u32) -> io::Result<Vec<u32>> {
        // `taskkill /T` walks the tree itself.
        Ok(Vec::new())
    }

    fn terminate(&self, pid: u32, force: bool) -> io::Result<()> {
        let pid_arg = pid.to_string();
        let mut cmd = std::process::Command::new("taskkill");
        cmd.args(["/PID", pid_arg.as_str(), "/T"]);
        if force {
            cmd.arg("/F");
        }
        cmd.output()?;
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        let filter = format!("PID eq {}", pid);
        std::process::Command::new("tasklist")
            .args(["/FI", filter.as_str(), "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn terminate_group(&self, pgid: u32, force: bool) -> io::Result<()> {
        self.terminate(pgid, force)
    }

    fn group_members(&self, _pgid: u32) -> io::Result<Vec<u32>> {
        // No process groups here; `taskkill /T` covers what is still attached.
        Ok(Vec::new())
    }
}
