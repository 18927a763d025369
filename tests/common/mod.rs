//! Scripted stand-ins for the desktop, shared by the integration tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use image::{Rgba, RgbaImage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cli_autopilot::clipboard::{ClipboardBackend, ClipboardService, CommandSpec};
use cli_autopilot::clock::{Clock, ManualClock};
use cli_autopilot::input::{InputInjector, KeyChord, KeystrokeBackend};
use cli_autopilot::launcher::{LaunchCommand, ProcessLauncher, ProcessSpawner, SpawnMode};
use cli_autopilot::permission::{NoDialogHandler, PermissionDialogHandler};
use cli_autopilot::process::{ProcessHandle, ProcessMatcher, ProcessRegistry, ProcessTable};
use cli_autopilot::screen::capture::ScreenSource;
use cli_autopilot::screen::detectors::Detector;
use cli_autopilot::screen::ocr::UnavailableRecognizer;
use cli_autopilot::screen::{DetectionMethod, DetectionResult, ScreenMonitor, SuggestedAction};
use cli_autopilot::strategy::RetryPolicy;
use cli_autopilot::window::{WindowActivator, WindowRef, WindowStrategy};
use cli_autopilot::{AutomationConfig, AutomationOrchestrator, Components, Platform};

pub fn process(pid: u32, name: &str, created_secs: i64) -> ProcessHandle {
    ProcessHandle {
        pid,
        executable_name: name.to_string(),
        command_line: name.to_string(),
        created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
        status: "Run".to_string(),
        memory_bytes: 0,
        parent_pid: None,
    }
}

/// Process table that the fake spawner can add to
#[derive(Default)]
pub struct FakeTable {
    pub processes: Mutex<Vec<ProcessHandle>>,
    pub kills: Mutex<Vec<(u32, bool)>>,
}

impl FakeTable {
    pub fn with(processes: Vec<ProcessHandle>) -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(processes),
            kills: Mutex::new(Vec::new()),
        })
    }

    pub fn alive(&self) -> Vec<u32> {
        self.processes.lock().unwrap().iter().map(|p| p.pid).collect()
    }
}

pub struct SharedTable(pub Arc<FakeTable>);

impl ProcessTable for SharedTable {
    fn snapshot(&self) -> Result<Vec<ProcessHandle>> {
        Ok(self.0.processes.lock().unwrap().clone())
    }

    fn terminate(&self, pid: u32, force: bool) -> Result<()> {
        self.0.kills.lock().unwrap().push((pid, force));
        self.0.processes.lock().unwrap().retain(|p| p.pid != pid);
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.0.processes.lock().unwrap().iter().any(|p| p.pid == pid)
    }
}

/// Spawning a terminal makes the tool appear in the table as `tool_pid`
pub struct FakeSpawner {
    pub table: Arc<FakeTable>,
    pub tool_pid: Option<u32>,
    pub fail: bool,
    /// Spawning blocks until this is set, like a consent dialog would
    pub gate: Option<Arc<AtomicBool>>,
    pub spawned: Arc<Mutex<Vec<CommandSpec>>>,
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, spec: &CommandSpec, _mode: SpawnMode) -> Result<u32> {
        if self.fail {
            return Err(anyhow!("{} not installed", spec.program));
        }
        if let Some(gate) = &self.gate {
            let mut waited = 0;
            while !gate.load(Ordering::SeqCst) {
                if waited >= 200 {
                    return Err(anyhow!("{} blocked by a consent dialog", spec.program));
                }
                std::thread::sleep(Duration::from_millis(10));
                waited += 1;
            }
        }
        self.spawned.lock().unwrap().push(spec.clone());
        if let Some(pid) = self.tool_pid {
            self.table
                .processes
                .lock()
                .unwrap()
                .push(process(pid, "claude", 2_000_000_000));
        }
        Ok(900)
    }
}

/// In-memory clipboard; `fail_writes` makes every write error out
pub struct MemoryClipboard {
    pub name: String,
    pub buffer: Arc<Mutex<String>>,
    pub fail_writes: bool,
    pub writes: Arc<AtomicUsize>,
}

impl MemoryClipboard {
    pub fn new(name: &str, buffer: Arc<Mutex<String>>) -> Self {
        Self {
            name: name.to_string(),
            buffer,
            fail_writes: false,
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn broken(name: &str) -> Self {
        Self {
            fail_writes: true,
            ..Self::new(name, Arc::new(Mutex::new(String::new())))
        }
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, text: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(anyhow!("{} is locked by another application", self.name));
        }
        *self.buffer.lock().unwrap() = text.to_string();
        Ok(())
    }

    fn read(&self) -> Result<String> {
        if self.fail_writes {
            return Err(anyhow!("{} unavailable", self.name));
        }
        Ok(self.buffer.lock().unwrap().clone())
    }
}

/// Records every chord it is asked to send, in a log shared across backends
pub struct RecordingKeys {
    pub name: String,
    pub works: bool,
    pub log: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingKeys {
    pub fn new(name: &str, works: bool, log: &Arc<Mutex<Vec<(String, String)>>>) -> Self {
        Self {
            name: name.to_string(),
            works,
            log: Arc::clone(log),
        }
    }
}

impl KeystrokeBackend for RecordingKeys {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_chord(&self, chord: &KeyChord) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push((self.name.clone(), chord.to_string()));
        if self.works {
            Ok(())
        } else {
            Err(anyhow!("{} rejected {}", self.name, chord))
        }
    }
}

/// Keys that were actually delivered (by a working backend)
pub fn delivered(log: &Arc<Mutex<Vec<(String, String)>>>, working: &str) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(backend, _)| backend == working)
        .map(|(_, chord)| chord.clone())
        .collect()
}

pub struct AlwaysFocus;

impl WindowStrategy for AlwaysFocus {
    fn name(&self) -> &str {
        "always_focus"
    }

    fn activate(&self, target: &ProcessHandle) -> Result<WindowRef> {
        Ok(WindowRef {
            id: "1".into(),
            title: "claude".into(),
            pid: target.pid,
        })
    }
}

pub struct NeverFocus;

impl WindowStrategy for NeverFocus {
    fn name(&self) -> &str {
        "never_focus"
    }

    fn activate(&self, target: &ProcessHandle) -> Result<WindowRef> {
        Err(anyhow!("no window owned by {}", target.pid))
    }
}

/// One consent dialog is up until the first scan clicks it away
pub struct ScriptedDialogs {
    pub scans: AtomicUsize,
    pub showing: AtomicBool,
    pub cleared: Arc<AtomicBool>,
}

impl ScriptedDialogs {
    pub fn showing() -> Arc<Self> {
        Arc::new(Self {
            scans: AtomicUsize::new(0),
            showing: AtomicBool::new(true),
            cleared: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl PermissionDialogHandler for ScriptedDialogs {
    fn scan_and_dismiss(&self) -> bool {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.showing.swap(false, Ordering::SeqCst) {
            self.cleared.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }
}

/// Replays frames in order, repeating the last one
pub struct Frames(pub Mutex<Vec<RgbaImage>>);

impl Frames {
    pub fn new(frames: Vec<RgbaImage>) -> Self {
        Self(Mutex::new(frames))
    }
}

impl ScreenSource for Frames {
    fn capture(&self) -> Result<RgbaImage> {
        let mut frames = self.0.lock().unwrap();
        if frames.len() > 1 {
            Ok(frames.remove(0))
        } else {
            frames
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("no frames"))
        }
    }
}

/// Sees a numbered confirmation prompt on every frame
pub struct PromptOnScreen(pub SuggestedAction);

impl Detector for PromptOnScreen {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Vision
    }

    fn detect(&self, _region: &RgbaImage) -> Result<DetectionResult> {
        Ok(DetectionResult::found(
            DetectionMethod::Vision,
            vec!["Yes".into(), "No, and tell Claude what to do differently".into()],
            self.0,
        ))
    }
}

pub fn solid(value: u8) -> RgbaImage {
    RgbaImage::from_pixel(40, 30, Rgba([value, value, value, 255]))
}

pub fn test_config() -> AutomationConfig {
    AutomationConfig {
        permission_watch: false,
        restore_clipboard: true,
        attach_screenshots: false,
        scratch_dir: PathBuf::from("unused"),
        ..AutomationConfig::default()
    }
}

/// What a scenario wants to vary
pub struct Scenario {
    pub table: Arc<FakeTable>,
    pub tool_pid: Option<u32>,
    pub spawn_fails: bool,
    pub clipboard: Vec<Box<dyn ClipboardBackend>>,
    pub keys: Vec<Box<dyn KeystrokeBackend>>,
    pub screen: Option<Vec<RgbaImage>>,
    pub detectors: Vec<Box<dyn Detector>>,
    pub windows: Vec<Box<dyn WindowStrategy>>,
    pub permission: Arc<dyn PermissionDialogHandler>,
    pub spawn_gate: Option<Arc<AtomicBool>>,
    pub config: AutomationConfig,
}

impl Scenario {
    pub fn new(keys: Vec<Box<dyn KeystrokeBackend>>, clipboard: Vec<Box<dyn ClipboardBackend>>) -> Self {
        Self {
            table: FakeTable::with(Vec::new()),
            tool_pid: Some(1234),
            spawn_fails: false,
            clipboard,
            keys,
            // before the paste the input line is empty, afterwards it shows text
            screen: Some(vec![solid(10), solid(220)]),
            detectors: Vec::new(),
            windows: vec![Box::new(AlwaysFocus)],
            permission: Arc::new(NoDialogHandler),
            spawn_gate: None,
            config: test_config(),
        }
    }

    pub fn build(self, clock: &Arc<ManualClock>) -> AutomationOrchestrator {
        let clock: Arc<dyn Clock> = Arc::clone(clock) as Arc<dyn Clock>;
        let policy = RetryPolicy::new(self.config.max_attempts, Duration::from_millis(10));

        let spawner = FakeSpawner {
            table: Arc::clone(&self.table),
            tool_pid: self.tool_pid,
            fail: self.spawn_fails,
            gate: self.spawn_gate,
            spawned: Arc::new(Mutex::new(Vec::new())),
        };
        let launcher = ProcessLauncher::new(Platform::Linux, "claude", Box::new(spawner))
            .with_candidates(vec![LaunchCommand {
                label: "test-terminal".into(),
                spec: CommandSpec::new("test-terminal", &["-e", "claude"]),
            }]);

        let registry = ProcessRegistry::new(
            Box::new(SharedTable(Arc::clone(&self.table))),
            ProcessMatcher::new("claude"),
            Arc::clone(&clock),
        )
        .with_own_pid(1);

        let screen = match self.screen {
            Some(frames) => ScreenMonitor::new(
                Some(Box::new(Frames::new(frames))),
                self.detectors,
                None,
                Arc::clone(&clock),
            ),
            None => ScreenMonitor::disabled(Arc::clone(&clock)),
        };

        let components = Components {
            platform: Platform::Linux,
            launcher,
            registry,
            activator: WindowActivator::new(self.windows, policy, Arc::clone(&clock)),
            clipboard: ClipboardService::new(self.clipboard, policy, Arc::clone(&clock)),
            input: InputInjector::new(self.keys, Platform::Linux, Duration::from_millis(10), Arc::clone(&clock)),
            screen,
            recognizer: Box::new(UnavailableRecognizer),
            permission: self.permission,
        };

        AutomationOrchestrator::new(components, self.config, clock)
    }
}
