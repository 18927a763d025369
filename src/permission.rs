//! OS permission-dialog detection and dismissal
//!
//! Consent prompts for input injection or screen recording silently swallow
//! keystrokes until someone clicks them away. A handler probes for such a
//! dialog and tries its dismissers in order; a dismissal only counts once a
//! re-scan no longer finds the dialog.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clipboard::CommandSpec;
use crate::clock::Clock;
use crate::input::Pointer;
use crate::screen::capture::{to_logical, ScreenSource};
use crate::screen::ocr::TextRecognizer;

/// Screen rectangle in points
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogInfo {
    /// Process that owns the dialog
    pub owner: String,
    pub title: String,
    pub bounds: Option<Rect>,
    pub buttons: Vec<String>,
}

/// Labels that grant or acknowledge, most specific first
pub const ALLOW_LABELS: &[&str] = &["Allow", "Open System Settings", "Continue", "OK", "Yes"];

impl DialogInfo {
    /// The button a dismisser should press
    pub fn allow_button(&self) -> Option<&str> {
        ALLOW_LABELS.iter().find_map(|label| {
            self.buttons
                .iter()
                .find(|b| b.eq_ignore_ascii_case(label))
                .map(String::as_str)
        })
    }
}

pub trait DialogProbe: Send + Sync {
    fn scan(&self) -> Result<Option<DialogInfo>>;
}

pub trait DialogDismisser: Send + Sync {
    fn name(&self) -> &str;

    fn dismiss(&self, dialog: &DialogInfo) -> Result<()>;
}

pub trait PermissionDialogHandler: Send + Sync {
    /// True when a dialog was found and is gone afterwards
    fn scan_and_dismiss(&self) -> bool;
}

/// Platforms without blocking consent dialogs
pub struct NoDialogHandler;

impl PermissionDialogHandler for NoDialogHandler {
    fn scan_and_dismiss(&self) -> bool {
        false
    }
}

pub struct ProbingDialogHandler {
    probe: Box<dyn DialogProbe>,
    dismissers: Vec<Box<dyn DialogDismisser>>,
    clock: Arc<dyn Clock>,
    settle: Duration,
}

impl ProbingDialogHandler {
    pub fn new(
        probe: Box<dyn DialogProbe>,
        dismissers: Vec<Box<dyn DialogDismisser>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            probe,
            dismissers,
            clock,
            settle: Duration::from_millis(500),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn dialog_gone(&self) -> bool {
        matches!(self.probe.scan(), Ok(None))
    }
}

impl PermissionDialogHandler for ProbingDialogHandler {
    fn scan_and_dismiss(&self) -> bool {
        let dialog = match self.probe.scan() {
            Ok(Some(dialog)) => dialog,
            Ok(None) => return false,
            Err(e) => {
                tracing::debug!("dialog probe failed: {}", e);
                return false;
            }
        };

        tracing::info!(owner = %dialog.owner, title = %dialog.title, "permission dialog detected");

        for dismisser in &self.dismissers {
            match dismisser.dismiss(&dialog) {
                Ok(()) => {
                    self.clock.sleep(self.settle);
                    if self.dialog_gone() {
                        tracing::info!(method = dismisser.name(), "permission dialog dismissed");
                        return true;
                    }
                    tracing::debug!(method = dismisser.name(), "dialog still present after dismissal");
                }
                Err(e) => tracing::debug!(method = dismisser.name(), "dismissal failed: {}", e),
            }
        }

        tracing::warn!(title = %dialog.title, "could not dismiss permission dialog");
        false
    }
}

/// Probe that runs a script and parses its stdout
pub struct CommandProbe {
    spec: CommandSpec,
    parse: fn(&str) -> Option<DialogInfo>,
}

impl CommandProbe {
    pub fn new(spec: CommandSpec, parse: fn(&str) -> Option<DialogInfo>) -> Self {
        Self { spec, parse }
    }
}

impl DialogProbe for CommandProbe {
    fn scan(&self) -> Result<Option<DialogInfo>> {
        let output = self
            .spec
            .command()
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run {}", self.spec.program))?;
        if !output.status.success() {
            return Err(anyhow!("{} exited with {}", self.spec.program, output.status));
        }
        Ok((self.parse)(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Clicks the allow button through a scripting bridge
pub struct ScriptButtonDismisser {
    script: fn(&DialogInfo, &str) -> Option<CommandSpec>,
}

impl ScriptButtonDismisser {
    pub fn new(script: fn(&DialogInfo, &str) -> Option<CommandSpec>) -> Self {
        Self { script }
    }
}

impl DialogDismisser for ScriptButtonDismisser {
    fn name(&self) -> &str {
        "script_button"
    }

    fn dismiss(&self, dialog: &DialogInfo) -> Result<()> {
        let button = dialog
            .allow_button()
            .ok_or_else(|| anyhow!("no known allow button in {:?}", dialog.buttons))?;
        let spec = (self.script)(dialog, button)
            .ok_or_else(|| anyhow!("no script for button {}", button))?;
        let status = spec
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("Failed to run {}", spec.program))?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!("{} exited with {}", spec.program, status))
        }
    }
}

/// Estimated position of the default button inside the dialog's bounds
pub fn estimate_allow_position(bounds: &Rect) -> (i32, i32) {
    // default button sits bottom right, about 30pt above the lower edge
    let x = bounds.x + bounds.width * 0.78;
    let y = bounds.y + bounds.height - 30.0_f64.min(bounds.height / 2.0);
    (x.round() as i32, y.round() as i32)
}

/// Clicks where the default button usually is.
///
/// Dialog bounds come from System Events in points, the pointer's own unit.
pub struct CoordinateClickDismisser {
    pointer: Arc<dyn Pointer>,
}

impl CoordinateClickDismisser {
    pub fn new(pointer: Arc<dyn Pointer>) -> Self {
        Self { pointer }
    }
}

impl DialogDismisser for CoordinateClickDismisser {
    fn name(&self) -> &str {
        "coordinate_click"
    }

    fn dismiss(&self, dialog: &DialogInfo) -> Result<()> {
        let bounds = dialog
            .bounds
            .ok_or_else(|| anyhow!("dialog bounds unknown"))?;
        let (x, y) = estimate_allow_position(&bounds);
        self.pointer.click_at(x, y)
    }
}

/// Finds the allow button on screen with OCR and clicks its center
pub struct OcrButtonDismisser {
    screen: Box<dyn ScreenSource>,
    recognizer: Box<dyn TextRecognizer>,
    pointer: Arc<dyn Pointer>,
}

impl OcrButtonDismisser {
    pub fn new(screen: Box<dyn ScreenSource>, recognizer: Box<dyn TextRecognizer>, pointer: Arc<dyn Pointer>) -> Self {
        Self {
            screen,
            recognizer,
            pointer,
        }
    }
}

impl DialogDismisser for OcrButtonDismisser {
    fn name(&self) -> &str {
        "ocr_click"
    }

    fn dismiss(&self, dialog: &DialogInfo) -> Result<()> {
        if !self.recognizer.is_available() {
            return Err(anyhow!("OCR unavailable"));
        }
        let frame = self.screen.capture()?;
        let words = self.recognizer.locate_words(&frame)?;

        let wanted = dialog.allow_button().unwrap_or("Allow");
        let word = words
            .iter()
            .find(|w| w.text.eq_ignore_ascii_case(wanted))
            .or_else(|| {
                words
                    .iter()
                    .find(|w| ALLOW_LABELS.iter().any(|l| w.text.eq_ignore_ascii_case(l)))
            })
            .ok_or_else(|| anyhow!("no allow button found on screen"))?;

        let (px, py) = word.center();
        let (x, y) = to_logical(px, py, self.screen.scale_factor());
        tracing::debug!(word = %word.text, x, y, "clicking allow button found by OCR");
        self.pointer.click_at(x, y)
    }
}

/// What the background watcher did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherReport {
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub scans: u32,
    pub dismissed: u32,
}

/// Runs `scan_and_dismiss` on its own thread until stopped or `max_duration` passes
pub struct PermissionWatcher {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<WatcherReport>,
}

impl PermissionWatcher {
    pub fn spawn(
        handler: Arc<dyn PermissionDialogHandler>,
        interval: Duration,
        max_duration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let started_at = Utc::now();
            let start = clock.now();
            let mut scans = 0;
            let mut dismissed = 0;

            while !flag.load(Ordering::SeqCst) && clock.elapsed_since(start) < max_duration {
                scans += 1;
                let hit = handler.scan_and_dismiss();
                tracing::debug!(scan = scans, dismissed = hit, "permission scan");
                if hit {
                    dismissed += 1;
                }
                sleep_unless_stopped(clock.as_ref(), &flag, interval);
            }

            WatcherReport {
                started_at,
                stopped_at: Utc::now(),
                scans,
                dismissed,
            }
        });

        Self { stop, handle }
    }

    /// Signal the thread and collect its report
    pub fn stop(self) -> WatcherReport {
        self.stop.store(true, Ordering::SeqCst);
        self.wait()
    }

    /// Collect the report once the thread reaches its deadline
    pub fn wait(self) -> WatcherReport {
        let now = Utc::now();
        self.handle.join().unwrap_or_else(|_| {
            tracing::error!("permission watcher thread panicked");
            WatcherReport {
                started_at: now,
                stopped_at: now,
                scans: 0,
                dismissed: 0,
            }
        })
    }
}

fn sleep_unless_stopped(clock: &dyn Clock, stop: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        clock.sleep(step);
        remaining -= step;
    }
}
