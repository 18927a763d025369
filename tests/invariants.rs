//! Properties every component has to keep regardless of the desktop it runs on

mod common;

use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cli_autopilot::clipboard::{ClipboardBackend, ClipboardService};
use cli_autopilot::clock::{Clock, ManualClock};
use cli_autopilot::input::{InputInjector, KeystrokeBackend};
use cli_autopilot::process::{ProcessMatcher, ProcessRegistry};
use cli_autopilot::screen::detectors::Detector;
use cli_autopilot::screen::{
    DetectionMethod, DetectionResult, MonitorStatus, ScreenMonitor, SuggestedAction,
};
use cli_autopilot::strategy::RetryPolicy;
use cli_autopilot::Platform;

use common::{process, FakeTable, Frames, MemoryClipboard, RecordingKeys, SharedTable};

fn registry(table: &Arc<FakeTable>, clock: &Arc<ManualClock>, own_pid: u32) -> ProcessRegistry {
    ProcessRegistry::new(
        Box::new(SharedTable(Arc::clone(table))),
        ProcessMatcher::new("claude"),
        Arc::clone(clock) as Arc<dyn Clock>,
    )
    .with_own_pid(own_pid)
}

#[test]
fn test_cleanup_keeps_only_the_newest() {
    let table = FakeTable::with(vec![
        process(11, "claude", 100),
        process(12, "claude", 500),
        process(13, "claude", 300),
        process(14, "claude", 200),
        process(15, "claude", 400),
    ]);
    let clock = Arc::new(ManualClock::new());
    let registry = registry(&table, &clock, 1);

    let report = registry.terminate(&registry.find_targets(), 1, true);

    assert_eq!(report.retained.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![12]);
    assert_eq!(report.terminated.len(), 4);
    assert!(report.errors.is_empty());
    assert_eq!(table.alive(), vec![12]);
    // graceful stop worked, so nothing was force-killed
    assert!(table.kills.lock().unwrap().iter().all(|(_, force)| !force));
}

#[test]
fn test_cleanup_never_terminates_own_process() {
    let table = FakeTable::with(vec![process(42, "claude", 100), process(43, "claude", 50)]);
    let clock = Arc::new(ManualClock::new());
    let registry = registry(&table, &clock, 42);

    // handed our own pid explicitly, with nothing to keep
    let handles = vec![process(42, "claude", 100), process(43, "claude", 50)];
    let report = registry.terminate(&handles, 0, false);

    assert_eq!(report.terminated.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![43]);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("42"));
    assert!(table.alive().contains(&42));

    // and enumeration never lists it in the first place
    assert!(registry.find_targets().iter().all(|p| p.pid != 42));
}

#[test]
fn test_cleanup_with_keep_larger_than_set_terminates_nothing() {
    let table = FakeTable::with(vec![process(11, "claude", 100), process(12, "claude", 200)]);
    let clock = Arc::new(ManualClock::new());
    let registry = registry(&table, &clock, 1);

    let report = registry.terminate(&registry.find_targets(), 5, true);
    assert!(report.terminated.is_empty());
    assert_eq!(report.retained.len(), 2);
}

#[test]
fn test_every_backend_tried_once_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let backends: Vec<Box<dyn KeystrokeBackend>> = vec![
        Box::new(RecordingKeys::new("enigo", false, &log)),
        Box::new(RecordingKeys::new("enigo_raw", false, &log)),
        Box::new(RecordingKeys::new("xdotool", false, &log)),
    ];
    let clock = Arc::new(ManualClock::new());
    let injector = InputInjector::new(backends, Platform::Linux, Duration::from_millis(20), clock);

    let outcome = injector.send_paste(1);

    assert!(!outcome.success);
    assert!(outcome.method.is_none());
    let tried: Vec<String> = log.lock().unwrap().iter().map(|(b, _)| b.clone()).collect();
    assert_eq!(tried, vec!["enigo", "enigo_raw", "xdotool"]);
    assert_eq!(outcome.attempts.len(), 3);
    assert!(outcome.attempts.iter().all(|a| !a.success && a.error.is_some()));
}

#[test]
fn test_each_backend_retried_before_moving_on() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let backends: Vec<Box<dyn KeystrokeBackend>> = vec![
        Box::new(RecordingKeys::new("first", false, &log)),
        Box::new(RecordingKeys::new("second", true, &log)),
    ];
    let clock = Arc::new(ManualClock::new());
    let injector = InputInjector::new(backends, Platform::MacOs, Duration::from_millis(20), Arc::clone(&clock) as Arc<dyn Clock>);

    let outcome = injector.send_enter(3);

    assert!(outcome.success);
    assert_eq!(outcome.method.as_deref(), Some("second"));
    let tried: Vec<String> = log.lock().unwrap().iter().map(|(b, _)| b.clone()).collect();
    assert_eq!(tried, vec!["first", "first", "first", "second"]);
}

/// Fires on its `fire_on`-th call (1-based)
struct FiresOnCall {
    calls: Arc<AtomicUsize>,
    fire_on: usize,
}

impl Detector for FiresOnCall {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Vision
    }

    fn detect(&self, _region: &RgbaImage) -> Result<DetectionResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fire_on {
            Ok(DetectionResult::found(
                DetectionMethod::Vision,
                vec!["Yes".into(), "No".into()],
                SuggestedAction::PressEnter,
            ))
        } else {
            Ok(DetectionResult::none())
        }
    }
}

#[test]
fn test_monitor_stops_at_first_detection() {
    let clock = Arc::new(ManualClock::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let monitor = ScreenMonitor::new(
        Some(Box::new(Frames::new(vec![common::solid(0)]))),
        vec![Box::new(FiresOnCall {
            calls: Arc::clone(&calls),
            fire_on: 3,
        })],
        None,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    let outcome = monitor.monitor(Duration::from_secs(10), Duration::from_secs(2));

    assert_eq!(outcome.status, MonitorStatus::Found);
    assert_eq!(outcome.polls, 3);
    assert!(outcome.elapsed >= Duration::from_secs(4) && outcome.elapsed <= Duration::from_secs(6));
    assert_eq!(outcome.result.unwrap().suggested_action, SuggestedAction::PressEnter);
}

#[test]
fn test_monitor_is_bounded_without_detection() {
    let clock = Arc::new(ManualClock::new());
    let monitor = ScreenMonitor::new(
        Some(Box::new(Frames::new(vec![common::solid(0)]))),
        vec![Box::new(FiresOnCall {
            calls: Arc::new(AtomicUsize::new(0)),
            fire_on: usize::MAX,
        })],
        None,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    let duration = Duration::from_secs(10);
    let poll = Duration::from_secs(3);
    let outcome = monitor.monitor(duration, poll);

    assert_eq!(outcome.status, MonitorStatus::Timeout);
    assert!(outcome.result.is_none());
    assert!(outcome.elapsed >= duration);
    assert!(clock.total_slept() <= duration + poll);
}

/// Clipboard that only accepts writes after failing a few times
struct Flaky {
    failures_left: AtomicUsize,
    buffer: Mutex<String>,
}

impl ClipboardBackend for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn write(&self, text: &str) -> Result<()> {
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("clipboard busy"));
        }
        *self.buffer.lock().unwrap() = text.to_string();
        Ok(())
    }

    fn read(&self) -> Result<String> {
        Ok(self.buffer.lock().unwrap().clone())
    }
}

#[test]
fn test_repeated_writes_leave_the_same_clipboard() {
    let buffer = Arc::new(Mutex::new(String::new()));
    let clock = Arc::new(ManualClock::new());
    let service = ClipboardService::new(
        vec![Box::new(MemoryClipboard::new("memory", Arc::clone(&buffer)))],
        RetryPolicy::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    let text = "Build a landing page\nwith a hero section";
    assert!(service.write(text).success());
    let once = buffer.lock().unwrap().clone();
    assert!(service.write(text).success());
    assert_eq!(*buffer.lock().unwrap(), once);
    assert!(service.verify(text));
}

#[test]
fn test_clipboard_retries_within_a_backend() {
    let clock = Arc::new(ManualClock::new());
    let service = ClipboardService::new(
        vec![Box::new(Flaky {
            failures_left: AtomicUsize::new(2),
            buffer: Mutex::new(String::new()),
        })],
        RetryPolicy::new(3, Duration::from_millis(100)),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    let write = service.write("payload");
    assert!(write.success());
    assert_eq!(write.attempts.len(), 3);
    assert_eq!(write.backend.as_deref(), Some("flaky"));
}
