//! Clipboard delivery with read-back verification
//!
//! Backends are tried in order (generic cross-platform API first, then the
//! platform's scripting bridge and command-line utilities). Every write is
//! immediately read back, so a backend that reports success without actually
//! changing the system clipboard is caught and the next one is tried.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::strategy::{run_chain, Attempt, RetryPolicy};

/// Number of normalized characters compared by [`prefix_matches`]
pub const VERIFY_PREFIX_CHARS: usize = 150;

pub trait ClipboardBackend: Send + Sync {
    fn name(&self) -> &str;

    fn write(&self, text: &str) -> Result<()>;

    fn read(&self) -> Result<String>;

    fn clear(&self) -> Result<()> {
        self.write("")
    }
}

/// Generic cross-platform clipboard via `arboard`
///
/// The handle is kept alive for the lifetime of the backend: on X11 the
/// clipboard content is served by the owning process and disappears when the
/// handle is dropped.
pub struct ArboardBackend {
    inner: Mutex<Option<arboard::Clipboard>>,
}

impl ArboardBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    fn with_clipboard<T>(
        &self,
        f: impl FnOnce(&mut arboard::Clipboard) -> std::result::Result<T, arboard::Error>,
    ) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("clipboard handle poisoned"))?;
        if guard.is_none() {
            *guard = Some(
                arboard::Clipboard::new()
                    .map_err(|e| anyhow!("Failed to open clipboard: {}", e))?,
            );
        }
        let clipboard = guard
            .as_mut()
            .ok_or_else(|| anyhow!("clipboard handle unavailable"))?;
        f(clipboard).map_err(|e| anyhow!("Clipboard operation failed: {}", e))
    }
}

impl Default for ArboardBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardBackend for ArboardBackend {
    fn name(&self) -> &str {
        "arboard"
    }

    fn write(&self, text: &str) -> Result<()> {
        self.with_clipboard(|c| c.set_text(text.to_string()))
    }

    fn read(&self) -> Result<String> {
        self.with_clipboard(|c| c.get_text())
    }

    fn clear(&self) -> Result<()> {
        self.with_clipboard(|c| c.clear())
    }
}

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Clipboard through external programs (`pbcopy`, `xclip`, `powershell`, ...)
///
/// Text is written on the writer's stdin and read from the reader's stdout.
pub struct CommandClipboard {
    name: String,
    writer: CommandSpec,
    reader: CommandSpec,
}

impl CommandClipboard {
    pub fn new(name: &str, writer: CommandSpec, reader: CommandSpec) -> Self {
        Self {
            name: name.to_string(),
            writer,
            reader,
        }
    }
}

impl ClipboardBackend for CommandClipboard {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, text: &str) -> Result<()> {
        let mut child = self
            .writer
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.writer.program))?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| anyhow!("{} has no stdin", self.writer.program))?;
            stdin.write_all(text.as_bytes())?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(anyhow!("{} exited with {}", self.writer.program, status));
        }
        Ok(())
    }

    fn read(&self) -> Result<String> {
        let output = self
            .reader
            .command()
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run {}", self.reader.program))?;
        if !output.status.success() {
            return Err(anyhow!("{} exited with {}", self.reader.program, output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Outcome of [`ClipboardService::write`]
#[derive(Debug, Clone, Serialize)]
pub struct ClipboardWrite {
    /// Backend whose write passed verification
    pub backend: Option<String>,
    pub verified: bool,
    pub attempts: Vec<Attempt>,
}

impl ClipboardWrite {
    pub fn success(&self) -> bool {
        self.verified
    }
}

pub struct ClipboardService {
    backends: Vec<Box<dyn ClipboardBackend>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    /// Pause between a write and its read-back
    verify_settle: Duration,
}

impl ClipboardService {
    pub fn new(
        backends: Vec<Box<dyn ClipboardBackend>>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backends,
            policy,
            clock,
            verify_settle: Duration::from_millis(50),
        }
    }

    pub fn with_verify_settle(mut self, settle: Duration) -> Self {
        self.verify_settle = settle;
        self
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Write `text`, verifying each backend's write with a read-back
    pub fn write(&self, text: &str) -> ClipboardWrite {
        let outcome = run_chain(
            "clipboard.write",
            &self.backends,
            self.policy,
            self.clock.as_ref(),
            |b| b.name().to_string(),
            |backend| {
                backend.write(text)?;
                self.clock.sleep(self.verify_settle);
                if self.verify(text) {
                    Ok(())
                } else {
                    Err(anyhow!("write reported success but read-back did not match"))
                }
            },
        );

        match &outcome.used {
            Some(name) => tracing::info!(backend = %name, chars = text.chars().count(), "payload copied to clipboard"),
            None => tracing::warn!("all clipboard backends failed: {:?}", outcome.errors()),
        }

        ClipboardWrite {
            verified: outcome.succeeded(),
            backend: outcome.used,
            attempts: outcome.attempts,
        }
    }

    /// Read the clipboard through the first backend that can
    pub fn read(&self) -> Option<String> {
        run_chain(
            "clipboard.read",
            &self.backends,
            RetryPolicy::once(),
            self.clock.as_ref(),
            |b| b.name().to_string(),
            |backend| backend.read(),
        )
        .value
    }

    /// Prefix comparison of the current clipboard against `expected`
    pub fn verify(&self, expected: &str) -> bool {
        match self.read() {
            Some(actual) => prefix_matches(expected, &actual),
            None => false,
        }
    }

    /// Best effort; returns whether any backend cleared the clipboard
    pub fn clear(&self) -> bool {
        self.backends.iter().any(|b| match b.clear() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(backend = b.name(), "clipboard clear failed: {}", e);
                false
            }
        })
    }

    /// Current clipboard text, for restoring after the workflow
    pub fn snapshot(&self) -> Option<String> {
        self.read()
    }

    pub fn restore(&self, original: Option<String>) -> bool {
        match original {
            Some(text) => self.write(&text).success(),
            None => self.clear(),
        }
    }
}

/// Lowercased text with all whitespace removed
pub fn normalize_for_match(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Case- and whitespace-tolerant comparison of the first
/// [`VERIFY_PREFIX_CHARS`] characters of `expected` against `actual`
pub fn prefix_matches(expected: &str, actual: &str) -> bool {
    let expected: String = normalize_for_match(expected)
        .chars()
        .take(VERIFY_PREFIX_CHARS)
        .collect();
    let actual = normalize_for_match(actual);
    actual.starts_with(&expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    struct SharedBuffer {
        name: String,
        buffer: Arc<Mutex<String>>,
        /// Pretend the write worked without changing the buffer
        silently_drop: bool,
    }

    impl ClipboardBackend for SharedBuffer {
        fn name(&self) -> &str {
            &self.name
        }

        fn write(&self, text: &str) -> Result<()> {
            if !self.silently_drop {
                *self.buffer.lock().unwrap() = text.to_string();
            }
            Ok(())
        }

        fn read(&self) -> Result<String> {
            Ok(self.buffer.lock().unwrap().clone())
        }
    }

    fn service(backends: Vec<Box<dyn ClipboardBackend>>) -> ClipboardService {
        ClipboardService::new(backends, RetryPolicy::once(), Arc::new(ManualClock::new()))
    }

    #[test]
    fn test_prefix_match_tolerates_case_and_whitespace() {
        assert!(prefix_matches("Hello  World\r\n", "hello world\n"));
        assert!(prefix_matches("## Role\nYou are", "## role you are and more"));
        assert!(!prefix_matches("Hello", "Goodbye"));
    }

    #[test]
    fn test_prefix_match_only_compares_prefix() {
        let expected = "x".repeat(400);
        let actual = format!("{}{}", "x".repeat(VERIFY_PREFIX_CHARS), "truncated");
        assert!(prefix_matches(&expected, &actual));
    }

    #[test]
    fn test_silent_failure_falls_through_to_next_backend() {
        let buffer = Arc::new(Mutex::new(String::from("old")));
        let svc = service(vec![
            Box::new(SharedBuffer {
                name: "liar".into(),
                buffer: Arc::clone(&buffer),
                silently_drop: true,
            }),
            Box::new(SharedBuffer {
                name: "honest".into(),
                buffer: Arc::clone(&buffer),
                silently_drop: false,
            }),
        ]);

        let write = svc.write("payload text");
        assert!(write.success());
        assert_eq!(write.backend.as_deref(), Some("honest"));
        assert_eq!(write.attempts.len(), 2);
        assert!(!write.attempts[0].success);
    }

    #[test]
    fn test_restore_writes_original_back() {
        let buffer = Arc::new(Mutex::new(String::from("user data")));
        let svc = service(vec![Box::new(SharedBuffer {
            name: "buf".into(),
            buffer: Arc::clone(&buffer),
            silently_drop: false,
        })]);

        let original = svc.snapshot();
        assert!(svc.write("payload").success());
        assert!(svc.restore(original));
        assert_eq!(*buffer.lock().unwrap(), "user data");
    }
}
