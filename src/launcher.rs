//! Host-terminal launch commands and spawning

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::thread;

use crate::clipboard::CommandSpec;
use crate::platform::{escape_double_quoted, Platform};
use crate::process::ProcessHandle;

const READY_BANNER: &str = "CLI session ready for automation...";

/// One way of opening a terminal that runs the tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Terminal emulator or mechanism, for logs
    pub label: String,
    pub spec: CommandSpec,
}

impl LaunchCommand {
    fn new(label: &str, program: &str, args: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            spec: CommandSpec::new(program, args),
        }
    }
}

/// Launch candidates in the order they should be tried
pub fn launch_candidates(platform: Platform, tool_command: &str) -> Vec<LaunchCommand> {
    match platform {
        Platform::Windows => {
            let inner = format!("echo {} && {}", READY_BANNER, tool_command);
            vec![LaunchCommand::new(
                "cmd",
                "cmd",
                &["/c", "start", "CLI Autopilot", "cmd", "/k", &inner],
            )]
        }
        Platform::MacOs => {
            let script = format!(
                "tell application \"Terminal\" to do script \"echo '{}' && {}\"",
                READY_BANNER,
                escape_double_quoted(tool_command)
            );
            vec![LaunchCommand::new(
                "Terminal.app",
                "osascript",
                &["-e", &script, "-e", "tell application \"Terminal\" to activate"],
            )]
        }
        Platform::Linux => {
            // keep the shell open after the tool exits
            let inner = format!("echo '{}'; {}; exec bash", READY_BANNER, tool_command);
            vec![
                LaunchCommand::new("gnome-terminal", "gnome-terminal", &["--", "bash", "-c", &inner]),
                LaunchCommand::new("konsole", "konsole", &["-e", "bash", "-c", &inner]),
                LaunchCommand::new("xfce4-terminal", "xfce4-terminal", &["-x", "bash", "-c", &inner]),
                LaunchCommand::new("x-terminal-emulator", "x-terminal-emulator", &["-e", "bash", "-c", &inner]),
                LaunchCommand::new("kitty", "kitty", &["bash", "-c", &inner]),
                LaunchCommand::new("alacritty", "alacritty", &["-e", "bash", "-c", &inner]),
                LaunchCommand::new("xterm", "xterm", &["-e", "bash", "-c", &inner]),
            ]
        }
    }
}

/// Non-interactive run with the task file on the tool's stdin
pub fn piped_command(platform: Platform, task_file: &Path, tool_command: &str) -> CommandSpec {
    let path = task_file.to_string_lossy();
    match platform {
        Platform::Windows => {
            let line = format!("type \"{}\" | {}", path, tool_command);
            CommandSpec::new("cmd", &["/c", &line])
        }
        Platform::MacOs | Platform::Linux => {
            let line = format!("cat {} | {}", shell_quote(&path), tool_command);
            CommandSpec::new("sh", &["-c", &line])
        }
    }
}

/// Single-quote for POSIX shells
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Output discarded; the terminal owns the session
    Detached,
    /// Output goes to our stdout/stderr
    Inherit,
}

/// Spawns OS processes; returns the child PID
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, spec: &CommandSpec, mode: SpawnMode) -> Result<u32>;
}

pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, spec: &CommandSpec, mode: SpawnMode) -> Result<u32> {
        let mut command = spec.command();
        command.stdin(Stdio::null());
        if mode == SpawnMode::Detached {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", spec.program))?;
        let pid = child.id();

        // reap the launcher so it does not linger as a zombie
        thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(pid)
    }
}

pub struct ProcessLauncher {
    platform: Platform,
    tool_command: String,
    candidates: Vec<LaunchCommand>,
    spawner: Box<dyn ProcessSpawner>,
}

impl ProcessLauncher {
    pub fn new(platform: Platform, tool_command: &str, spawner: Box<dyn ProcessSpawner>) -> Self {
        Self {
            platform,
            tool_command: tool_command.to_string(),
            candidates: launch_candidates(platform, tool_command),
            spawner,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<LaunchCommand>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn candidates(&self) -> &[LaunchCommand] {
        &self.candidates
    }

    /// Open a new host terminal running the tool; `None` when every candidate failed
    pub fn launch_target_tool(&self) -> Option<ProcessHandle> {
        for candidate in &self.candidates {
            match self.spawner.spawn(&candidate.spec, SpawnMode::Detached) {
                Ok(pid) => {
                    tracing::info!(pid, terminal = %candidate.label, platform = %self.platform, "host terminal launched");
                    return Some(ProcessHandle::spawned(
                        pid,
                        &candidate.spec.program,
                        candidate.spec.args.join(" "),
                    ));
                }
                Err(e) => {
                    tracing::debug!(terminal = %candidate.label, "launch candidate failed: {}", e);
                }
            }
        }

        tracing::error!(tried = self.candidates.len(), "no terminal could be launched");
        None
    }

    /// Run the tool with `task_file` piped to its stdin
    pub fn launch_piped(&self, task_file: &Path) -> Option<ProcessHandle> {
        let spec = piped_command(self.platform, task_file, &self.tool_command);
        match self.spawner.spawn(&spec, SpawnMode::Inherit) {
            Ok(pid) => {
                tracing::info!(pid, file = %task_file.display(), "tool started with piped task");
                Some(ProcessHandle::spawned(pid, &spec.program, spec.args.join(" ")))
            }
            Err(e) => {
                tracing::error!("Failed to start piped tool: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    struct ScriptedSpawner {
        working: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl ProcessSpawner for ScriptedSpawner {
        fn spawn(&self, spec: &CommandSpec, _mode: SpawnMode) -> Result<u32> {
            self.calls.lock().unwrap().push(spec.program.clone());
            if self.working.contains(&spec.program.as_str()) {
                Ok(4321)
            } else {
                Err(anyhow!("{} not installed", spec.program))
            }
        }
    }

    #[test]
    fn test_linux_tries_terminals_in_order() {
        let spawner = ScriptedSpawner {
            working: vec!["kitty", "xterm"],
            calls: Mutex::new(Vec::new()),
        };
        let launcher = ProcessLauncher::new(Platform::Linux, "claude", Box::new(spawner));

        let handle = launcher.launch_target_tool().unwrap();
        assert_eq!(handle.pid, 4321);
        assert_eq!(handle.executable_name, "kitty");
    }

    #[test]
    fn test_total_failure_returns_none() {
        let spawner = ScriptedSpawner {
            working: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let launcher = ProcessLauncher::new(Platform::Linux, "claude", Box::new(spawner));
        assert!(launcher.launch_target_tool().is_none());
    }

    #[test]
    fn test_candidates_embed_tool_command() {
        let windows = launch_candidates(Platform::Windows, "claude");
        assert_eq!(windows.len(), 1);
        assert!(windows[0].spec.args.last().unwrap().ends_with("&& claude"));

        let mac = launch_candidates(Platform::MacOs, "claude");
        assert_eq!(mac[0].spec.program, "osascript");
        assert!(mac[0].spec.args[1].contains("do script"));

        let linux = launch_candidates(Platform::Linux, "claude --verbose");
        assert_eq!(linux[0].label, "gnome-terminal");
        assert!(linux.iter().all(|c| c.spec.args.last().unwrap().contains("claude --verbose")));
    }

    #[test]
    fn test_piped_command_quotes_path() {
        let spec = piped_command(Platform::Linux, Path::new("/tmp/it's here.txt"), "claude");
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args[1], r"cat '/tmp/it'\''s here.txt' | claude");

        let spec = piped_command(Platform::Windows, Path::new(r"C:\tmp\task.txt"), "claude");
        assert_eq!(spec.args[1], r#"type "C:\tmp\task.txt" | claude"#);
    }
}
