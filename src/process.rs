//! Process enumeration, classification and cleanup

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};

use crate::clock::Clock;

/// Snapshot of an OS process, re-read on every enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub executable_name: String,
    pub command_line: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub memory_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_pid: Option<u32>,
}

impl ProcessHandle {
    /// Handle for a child we just spawned, before the OS table has been read
    pub fn spawned(pid: u32, executable_name: &str, command_line: String) -> Self {
        Self {
            pid,
            executable_name: executable_name.to_string(),
            command_line,
            created_at: Utc::now(),
            status: "running".to_string(),
            memory_bytes: 0,
            parent_pid: Some(std::process::id()),
        }
    }

    /// This process followed by its parent, if known
    pub fn lineage(&self) -> Vec<u32> {
        let mut pids = vec![self.pid];
        if let Some(parent) = self.parent_pid {
            if parent != self.pid {
                pids.push(parent);
            }
        }
        pids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessClass {
    /// The automated command-line tool itself
    Target,
    /// A terminal emulator that may be hosting it
    Terminal,
    Other,
}

const TERMINAL_NAMES: &[&str] = &[
    "gnome-terminal",
    "gnome-terminal-server",
    "konsole",
    "xfce4-terminal",
    "x-terminal-emulator",
    "kitty",
    "alacritty",
    "xterm",
    "terminal",
    "iterm2",
    "cmd",
    "conhost",
    "windowsterminal",
    "openconsole",
];

const SHELL_NAMES: &[&str] = &["sh", "bash", "zsh", "fish", "dash", "cmd", "powershell", "pwsh"];

/// Classifies processes by executable name and command line
#[derive(Debug, Clone)]
pub struct ProcessMatcher {
    signature: String,
    terminal_names: Vec<String>,
}

impl ProcessMatcher {
    pub fn new(signature: &str) -> Self {
        Self {
            signature: signature.to_lowercase(),
            terminal_names: TERMINAL_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn classify(&self, process: &ProcessHandle) -> ProcessClass {
        let name = base_name(&process.executable_name);

        if self.terminal_names.iter().any(|t| *t == name) {
            return ProcessClass::Terminal;
        }
        if name.contains(&self.signature) {
            return ProcessClass::Target;
        }
        // shells that merely launch the tool are not the tool
        if !SHELL_NAMES.contains(&name.as_str())
            && process.command_line.to_lowercase().contains(&self.signature)
        {
            return ProcessClass::Target;
        }
        ProcessClass::Other
    }

    pub fn is_target(&self, process: &ProcessHandle) -> bool {
        self.classify(process) == ProcessClass::Target
    }

    pub fn is_terminal(&self, process: &ProcessHandle) -> bool {
        self.classify(process) == ProcessClass::Terminal
    }
}

/// Lowercased executable name without extension
fn base_name(executable: &str) -> String {
    let lower = executable.to_lowercase();
    let name = lower.rsplit(['/', '\\']).next().unwrap_or(&lower);
    let name = name
        .strip_suffix(".exe")
        .or_else(|| name.strip_suffix(".app"))
        .unwrap_or(name);
    name.to_string()
}

/// Access to the OS process table
pub trait ProcessTable: Send + Sync {
    fn snapshot(&self) -> Result<Vec<ProcessHandle>>;

    /// Graceful (SIGTERM-style) when `force` is false, kill otherwise
    fn terminate(&self, pid: u32, force: bool) -> Result<()>;

    fn is_alive(&self, pid: u32) -> bool;
}

/// Process table backed by `sysinfo`
pub struct SysinfoTable {
    system: Mutex<System>,
}

impl SysinfoTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, System>> {
        self.system
            .lock()
            .map_err(|_| anyhow!("process table lock poisoned"))
    }
}

impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoTable {
    fn snapshot(&self) -> Result<Vec<ProcessHandle>> {
        let mut system = self.lock()?;
        system.refresh_processes(ProcessesToUpdate::All, true);

        Ok(system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessHandle {
                pid: pid.as_u32(),
                executable_name: process.name().to_string_lossy().to_string(),
                command_line: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
                created_at: DateTime::from_timestamp(process.start_time() as i64, 0)
                    .unwrap_or_default(),
                status: process.status().to_string(),
                memory_bytes: process.memory(),
                parent_pid: process.parent().map(|p| p.as_u32()),
            })
            .collect())
    }

    fn terminate(&self, pid: u32, force: bool) -> Result<()> {
        let mut system = self.lock()?;
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

        let process = system
            .process(sys_pid)
            .ok_or_else(|| anyhow!("process {} already exited", pid))?;

        if force {
            if process.kill() {
                Ok(())
            } else {
                Err(anyhow!("kill signal for {} was not delivered", pid))
            }
        } else {
            match process.kill_with(Signal::Term) {
                Some(true) => Ok(()),
                Some(false) => Err(anyhow!("terminate signal for {} was not delivered", pid)),
                None => Err(anyhow!("graceful termination is not supported on this platform")),
            }
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(mut system) = self.lock() else {
            return false;
        };
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        system
            .process(sys_pid)
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }
}

/// Result of a cleanup batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub terminated: Vec<ProcessHandle>,
    pub retained: Vec<ProcessHandle>,
    /// Victims still running after every stop attempt
    #[serde(default)]
    pub failed: Vec<ProcessHandle>,
    pub errors: Vec<String>,
}

/// Newest first; equal creation times order by higher PID first
pub fn sort_newest_first(processes: &mut [ProcessHandle]) {
    processes.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.pid.cmp(&a.pid))
    });
}

pub struct ProcessRegistry {
    table: Box<dyn ProcessTable>,
    matcher: ProcessMatcher,
    clock: Arc<dyn Clock>,
    graceful_timeout: Duration,
    poll_interval: Duration,
    own_pid: u32,
}

impl ProcessRegistry {
    pub fn new(table: Box<dyn ProcessTable>, matcher: ProcessMatcher, clock: Arc<dyn Clock>) -> Self {
        Self {
            table,
            matcher,
            clock,
            graceful_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
            own_pid: std::process::id(),
        }
    }

    pub fn with_timeouts(mut self, graceful_timeout: Duration, poll_interval: Duration) -> Self {
        self.graceful_timeout = graceful_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }

    pub fn matcher(&self) -> &ProcessMatcher {
        &self.matcher
    }

    /// Processes matching `predicate`, newest first, never including this process
    pub fn find_processes(&self, predicate: impl Fn(&ProcessHandle) -> bool) -> Vec<ProcessHandle> {
        let mut found: Vec<ProcessHandle> = match self.table.snapshot() {
            Ok(all) => all
                .into_iter()
                .filter(|p| p.pid != self.own_pid && predicate(p))
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate processes: {}", e);
                Vec::new()
            }
        };
        sort_newest_first(&mut found);
        found
    }

    pub fn find_targets(&self) -> Vec<ProcessHandle> {
        self.find_processes(|p| self.matcher.is_target(p))
    }

    pub fn find_terminals(&self) -> Vec<ProcessHandle> {
        self.find_processes(|p| self.matcher.is_terminal(p))
    }

    pub fn find(&self, pid: u32) -> Option<ProcessHandle> {
        self.find_processes(|p| p.pid == pid).into_iter().next()
    }

    /// Poll until a target process not in `known` appears, or `timeout` passes
    pub fn wait_for_new_target(&self, known: &HashSet<u32>, timeout: Duration) -> Option<ProcessHandle> {
        let start = self.clock.now();
        loop {
            if let Some(found) = self
                .find_targets()
                .into_iter()
                .find(|p| !known.contains(&p.pid))
            {
                tracing::info!(pid = found.pid, "target tool process detected");
                return Some(found);
            }
            if self.clock.elapsed_since(start) >= timeout {
                tracing::warn!(?timeout, "no new target tool process appeared");
                return None;
            }
            self.clock.sleep(self.poll_interval);
        }
    }

    /// Terminate all but the `keep_newest` most recently created of `handles`
    pub fn terminate(&self, handles: &[ProcessHandle], keep_newest: usize, graceful: bool) -> CleanupReport {
        let mut report = CleanupReport::default();

        let mut candidates: Vec<ProcessHandle> = Vec::with_capacity(handles.len());
        for handle in handles {
            if handle.pid == self.own_pid {
                report
                    .errors
                    .push(format!("pid {}: refusing to terminate own process", handle.pid));
            } else {
                candidates.push(handle.clone());
            }
        }
        sort_newest_first(&mut candidates);

        let victims = candidates.split_off(keep_newest.min(candidates.len()));
        report.retained = candidates;

        for handle in victims {
            match self.stop_one(&handle, graceful) {
                Ok(()) => {
                    tracing::info!(pid = handle.pid, name = %handle.executable_name, "process terminated");
                    report.terminated.push(handle);
                }
                Err(e) => {
                    tracing::warn!(pid = handle.pid, "failed to terminate process: {}", e);
                    report.errors.push(format!("pid {}: {}", handle.pid, e));
                    if self.table.is_alive(handle.pid) {
                        report.failed.push(handle);
                    }
                }
            }
        }

        report
    }

    fn stop_one(&self, handle: &ProcessHandle, graceful: bool) -> Result<()> {
        if !self.table.is_alive(handle.pid) {
            return Err(anyhow!("already exited"));
        }

        if graceful {
            match self.table.terminate(handle.pid, false) {
                Ok(()) if self.wait_for_exit(handle.pid) => return Ok(()),
                Ok(()) => tracing::debug!(pid = handle.pid, "still running after graceful stop, forcing"),
                Err(e) => tracing::debug!(pid = handle.pid, "graceful stop failed: {}", e),
            }
        }

        self.table.terminate(handle.pid, true)
    }

    fn wait_for_exit(&self, pid: u32) -> bool {
        let start = self.clock.now();
        loop {
            if !self.table.is_alive(pid) {
                return true;
            }
            if self.clock.elapsed_since(start) >= self.graceful_timeout {
                return false;
            }
            self.clock.sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn handle(pid: u32, name: &str, cmd: &str, created_secs: i64) -> ProcessHandle {
        ProcessHandle {
            pid,
            executable_name: name.to_string(),
            command_line: cmd.to_string(),
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
            status: "Run".to_string(),
            memory_bytes: 0,
            parent_pid: None,
        }
    }

    struct StaticTable {
        processes: Mutex<Vec<ProcessHandle>>,
        ignores_term: bool,
    }

    impl ProcessTable for StaticTable {
        fn snapshot(&self) -> Result<Vec<ProcessHandle>> {
            Ok(self.processes.lock().unwrap().clone())
        }

        fn terminate(&self, pid: u32, force: bool) -> Result<()> {
            if !force && self.ignores_term {
                return Ok(());
            }
            self.processes.lock().unwrap().retain(|p| p.pid != pid);
            Ok(())
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.processes.lock().unwrap().iter().any(|p| p.pid == pid)
        }
    }

    #[test]
    fn test_classification() {
        let matcher = ProcessMatcher::new("claude");
        assert_eq!(matcher.classify(&handle(1, "claude", "claude", 0)), ProcessClass::Target);
        assert_eq!(
            matcher.classify(&handle(2, "node", "node /usr/lib/claude-code/cli.js", 0)),
            ProcessClass::Target
        );
        assert_eq!(
            matcher.classify(&handle(3, "bash", "bash -c echo ready && claude", 0)),
            ProcessClass::Other
        );
        assert_eq!(
            matcher.classify(&handle(4, "gnome-terminal-server", "", 0)),
            ProcessClass::Terminal
        );
        assert_eq!(matcher.classify(&handle(5, "cmd.exe", "cmd /k claude", 0)), ProcessClass::Terminal);
        assert_eq!(matcher.classify(&handle(6, "vim", "vim notes.txt", 0)), ProcessClass::Other);
    }

    #[test]
    fn test_sort_breaks_ties_by_pid() {
        let mut list = vec![handle(10, "a", "", 5), handle(30, "a", "", 5), handle(20, "a", "", 9)];
        sort_newest_first(&mut list);
        let pids: Vec<u32> = list.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![20, 30, 10]);
    }

    #[test]
    fn test_graceful_timeout_falls_back_to_force() {
        let clock = Arc::new(ManualClock::new());
        let table = StaticTable {
            processes: Mutex::new(vec![handle(1, "claude", "", 1), handle(2, "claude", "", 2)]),
            ignores_term: true,
        };
        let registry = ProcessRegistry::new(Box::new(table), ProcessMatcher::new("claude"), clock.clone())
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(250))
            .with_own_pid(0);

        let targets = registry.find_targets();
        let report = registry.terminate(&targets, 1, true);

        assert_eq!(report.retained[0].pid, 2);
        assert_eq!(report.terminated.len(), 1);
        assert!(report.errors.is_empty());
        assert!(clock.total_slept() >= Duration::from_secs(1));
    }

    #[test]
    fn test_already_exited_is_reported_not_fatal() {
        let table = StaticTable {
            processes: Mutex::new(vec![handle(1, "claude", "", 1)]),
            ignores_term: false,
        };
        let registry = ProcessRegistry::new(
            Box::new(table),
            ProcessMatcher::new("claude"),
            Arc::new(ManualClock::new()),
        )
        .with_own_pid(0);

        let ghost = handle(99, "claude", "", 0);
        let report = registry.terminate(&[ghost, handle(1, "claude", "", 1)], 0, false);

        assert_eq!(report.terminated.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("already exited"));
    }

    #[test]
    fn test_unkillable_process_is_reported_as_failed() {
        struct Unkillable(Vec<ProcessHandle>);

        impl ProcessTable for Unkillable {
            fn snapshot(&self) -> Result<Vec<ProcessHandle>> {
                Ok(self.0.clone())
            }

            fn terminate(&self, _pid: u32, _force: bool) -> Result<()> {
                Err(anyhow!("operation not permitted"))
            }

            fn is_alive(&self, pid: u32) -> bool {
                self.0.iter().any(|p| p.pid == pid)
            }
        }

        let processes = vec![handle(1, "claude", "", 1), handle(2, "claude", "", 2), handle(3, "claude", "", 3)];
        let registry = ProcessRegistry::new(
            Box::new(Unkillable(processes)),
            ProcessMatcher::new("claude"),
            Arc::new(ManualClock::new()),
        )
        .with_own_pid(0);

        let report = registry.terminate(&registry.find_targets(), 1, true);

        assert_eq!(report.retained.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![3]);
        assert!(report.terminated.is_empty());
        assert_eq!(report.failed.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(report.errors.len(), 2);
        // every process is accounted for
        assert_eq!(report.retained.len() + report.terminated.len() + report.failed.len(), 3);
    }

    #[test]
    fn test_never_terminates_own_pid() {
        let table = StaticTable {
            processes: Mutex::new(vec![handle(42, "claude", "", 1)]),
            ignores_term: false,
        };
        let registry = ProcessRegistry::new(
            Box::new(table),
            ProcessMatcher::new("claude"),
            Arc::new(ManualClock::new()),
        )
        .with_own_pid(42);

        assert!(registry.find_targets().is_empty());
        let report = registry.terminate(&[handle(42, "claude", "", 1)], 0, false);
        assert!(report.terminated.is_empty());
        assert_eq!(report.errors.len(), 1);
    }
}
