//! Bringing the target tool's window to the foreground

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use crate::clipboard::CommandSpec;
use crate::clock::Clock;
use crate::process::ProcessHandle;
use crate::strategy::{run_chain, Attempt, RetryPolicy};

/// A visible window, valid only for the call that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowRef {
    pub id: String,
    pub title: String,
    pub pid: u32,
}

pub trait WindowStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Raise a window belonging to `target` and return it
    fn activate(&self, target: &ProcessHandle) -> Result<WindowRef>;
}

/// Lists visible top-level windows
pub trait WindowLister: Send + Sync {
    fn windows(&self) -> Result<Vec<WindowRef>>;
}

/// Window listing via `xcap`
pub struct XcapWindowLister;

impl WindowLister for XcapWindowLister {
    fn windows(&self) -> Result<Vec<WindowRef>> {
        let windows = xcap::Window::all().map_err(|e| anyhow!("Failed to get windows: {}", e))?;

        Ok(windows
            .into_iter()
            .filter(|w| !w.title().is_empty() && !w.is_minimized())
            .map(|w| WindowRef {
                id: w.id().to_string(),
                title: w.title().to_string(),
                pid: w.pid(),
            })
            .collect())
    }
}

fn run_script(spec: &CommandSpec) -> Result<String> {
    let output = spec
        .command()
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to run {}", spec.program))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{} exited with {}: {}",
            spec.program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub type PidScript = fn(u32) -> Option<CommandSpec>;
pub type TitleScript = fn(&WindowRef) -> Option<CommandSpec>;

/// Raises a window by owning PID through a scripting bridge
/// (System Events, xdotool, WScript.Shell)
pub struct PidScriptStrategy {
    name: String,
    script: PidScript,
}

impl PidScriptStrategy {
    pub fn new(name: &str, script: PidScript) -> Self {
        Self {
            name: name.to_string(),
            script,
        }
    }
}

impl WindowStrategy for PidScriptStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn activate(&self, target: &ProcessHandle) -> Result<WindowRef> {
        let mut last_error = anyhow!("{} has no script for pid {}", self.name, target.pid);
        // the spawned launcher often exits; its parent may own the window
        for pid in target.lineage() {
            let Some(spec) = (self.script)(pid) else {
                continue;
            };
            match run_script(&spec) {
                Ok(out) => {
                    return Ok(WindowRef {
                        id: out.lines().next().unwrap_or_default().to_string(),
                        title: String::new(),
                        pid,
                    })
                }
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

/// Picks, among all visible windows, the one showing the tool and raises it by title
pub struct TitleMatchStrategy {
    signature: String,
    host_hints: Vec<String>,
    lister: Box<dyn WindowLister>,
    raise: TitleScript,
}

impl TitleMatchStrategy {
    pub fn new(signature: &str, lister: Box<dyn WindowLister>, raise: TitleScript) -> Self {
        Self {
            signature: signature.to_lowercase(),
            host_hints: ["terminal", "cmd", "console", "konsole", "xterm", "kitty", "alacritty"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            lister,
            raise,
        }
    }
}

impl WindowStrategy for TitleMatchStrategy {
    fn name(&self) -> &str {
        "title_match"
    }

    fn activate(&self, target: &ProcessHandle) -> Result<WindowRef> {
        let windows = self.lister.windows()?;
        let window = select_window(&windows, target, &self.signature, &self.host_hints)
            .ok_or_else(|| anyhow!("no window matches '{}'", self.signature))?;
        let spec = (self.raise)(&window)
            .ok_or_else(|| anyhow!("cannot raise window '{}'", window.title))?;
        run_script(&spec)?;
        Ok(window)
    }
}

/// Best candidate window for `target`:
/// title shows the signature and the PID matches, then title alone, then a
/// terminal window owned by the target's lineage
pub fn select_window(
    windows: &[WindowRef],
    target: &ProcessHandle,
    signature: &str,
    host_hints: &[String],
) -> Option<WindowRef> {
    let lineage = target.lineage();
    let shows_tool = |w: &&WindowRef| w.title.to_lowercase().contains(signature);
    let owned = |w: &&WindowRef| lineage.contains(&w.pid);
    let is_host = |w: &&WindowRef| {
        let title = w.title.to_lowercase();
        host_hints.iter().any(|h| title.contains(h.as_str()))
    };

    windows
        .iter()
        .find(|w| shows_tool(w) && owned(w))
        .or_else(|| windows.iter().find(shows_tool))
        .or_else(|| windows.iter().find(|w| owned(w) && is_host(w)))
        .cloned()
}

/// Result of [`WindowActivator::activate`]
#[derive(Debug, Clone, Serialize)]
pub struct ActivationOutcome {
    pub success: bool,
    pub method: Option<String>,
    pub window: Option<WindowRef>,
    pub attempts: Vec<Attempt>,
}

pub struct WindowActivator {
    strategies: Vec<Box<dyn WindowStrategy>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    settle: Duration,
}

impl WindowActivator {
    pub fn new(strategies: Vec<Box<dyn WindowStrategy>>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            strategies,
            policy,
            clock,
            settle: Duration::from_millis(300),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    /// Never fails hard; a false outcome means manual activation may be needed
    pub fn activate(&self, target: &ProcessHandle) -> ActivationOutcome {
        let outcome = run_chain(
            "window.activate",
            &self.strategies,
            self.policy,
            self.clock.as_ref(),
            |s| s.name().to_string(),
            |strategy| strategy.activate(target),
        );

        match &outcome.used {
            Some(method) => {
                tracing::info!(pid = target.pid, %method, "window activated");
                self.clock.sleep(self.settle);
            }
            None => tracing::warn!(pid = target.pid, "could not activate window, manual focus may be required"),
        }

        ActivationOutcome {
            success: outcome.succeeded(),
            method: outcome.used,
            window: outcome.value,
            attempts: outcome.attempts,
        }
    }

    /// Try each candidate in order until one activates
    pub fn activate_any(&self, targets: &[ProcessHandle]) -> Option<(ProcessHandle, ActivationOutcome)> {
        targets.iter().find_map(|target| {
            let outcome = self.activate(target);
            outcome.success.then(|| (target.clone(), outcome))
        })
    }
}
