//! Builds the concrete leaf components for one platform, once

use std::sync::Arc;
use std::time::Duration;

use crate::clipboard::{ArboardBackend, ClipboardBackend, ClipboardService};
use crate::clock::Clock;
use crate::config::AutomationConfig;
use crate::input::{
    CommandKeystrokeBackend, CornerFailSafe, EnigoBackend, EnigoRawBackend, InputInjector,
    KeystrokeBackend, Pointer,
};
use crate::launcher::{ProcessLauncher, SystemSpawner};
use crate::orchestrator::Components;
use crate::permission::{
    CommandProbe, CoordinateClickDismisser, NoDialogHandler, OcrButtonDismisser,
    PermissionDialogHandler, ProbingDialogHandler, ScriptButtonDismisser,
};
use crate::process::{ProcessMatcher, ProcessRegistry, SysinfoTable};
use crate::screen::capture::XcapScreen;
use crate::screen::detectors::{Detector, PixelDiffDetector, TemplateDetector, VisionDetector};
use crate::screen::ocr::{TesseractRecognizer, TextRecognizer, UnavailableRecognizer};
use crate::screen::ScreenMonitor;
use crate::window::{
    PidScript, PidScriptStrategy, TitleMatchStrategy, TitleScript, WindowActivator, WindowStrategy,
    XcapWindowLister,
};

use super::{linux, macos, windows, Platform};

/// Modifier hold between key events
const KEY_HOLD: Duration = Duration::from_millis(50);

/// Changed-pixel fraction that counts as new output
pub const PIXEL_DIFF_THRESHOLD: f32 = 0.02;

/// Normalized SSE at or below which a prompt template matches
pub const TEMPLATE_THRESHOLD: f32 = 0.1;

pub fn build_components(
    platform: Platform,
    config: &AutomationConfig,
    clock: Arc<dyn Clock>,
) -> Components {
    let policy = config.retry_policy();
    let recognizer = config
        .ocr_command
        .as_deref()
        .and_then(TesseractRecognizer::detect);
    let pointer: Arc<dyn Pointer> = Arc::new(EnigoBackend::new(KEY_HOLD, Arc::clone(&clock)));

    let launcher = ProcessLauncher::new(platform, &config.tool_command, Box::new(SystemSpawner));

    let registry = ProcessRegistry::new(
        Box::new(SysinfoTable::new()),
        ProcessMatcher::new(&config.tool_signature),
        Arc::clone(&clock),
    )
    .with_timeouts(config.graceful_kill_timeout, config.process_poll_interval)
    .with_own_pid(std::process::id());

    let activator = WindowActivator::new(
        window_strategies(platform, &config.tool_signature),
        policy,
        Arc::clone(&clock),
    )
    .with_settle(config.activation_settle);

    let clipboard = ClipboardService::new(clipboard_backends(platform), policy, Arc::clone(&clock));

    let input = InputInjector::new(
        keystroke_backends(platform, &clock),
        platform,
        config.retry_backoff,
        Arc::clone(&clock),
    )
    .with_fail_safe(Box::new(CornerFailSafe::new()));

    let screen = ScreenMonitor::new(
        Some(Box::new(XcapScreen)),
        detectors(config, recognizer.as_ref()),
        Some(PixelDiffDetector::new(PIXEL_DIFF_THRESHOLD)),
        Arc::clone(&clock),
    );

    let permission = dialog_handler(platform, recognizer.as_ref(), pointer, &clock);

    tracing::info!(
        %platform,
        clipboard = ?clipboard.backend_names(),
        keystrokes = ?input.backend_names(),
        windows = ?activator.strategy_names(),
        ocr = recognizer.is_some(),
        "automation components ready"
    );

    Components {
        platform,
        launcher,
        registry,
        activator,
        clipboard,
        input,
        screen,
        recognizer: boxed_recognizer(recognizer.as_ref()),
        permission,
    }
}

fn boxed_recognizer(recognizer: Option<&TesseractRecognizer>) -> Box<dyn TextRecognizer> {
    match recognizer {
        Some(r) => Box::new(r.clone()),
        None => Box::new(UnavailableRecognizer),
    }
}

/// Generic API first, then the platform's own utilities
pub fn clipboard_backends(platform: Platform) -> Vec<Box<dyn ClipboardBackend>> {
    let mut backends: Vec<Box<dyn ClipboardBackend>> = vec![Box::new(ArboardBackend::new())];
    backends.extend(match platform {
        Platform::Linux => linux::clipboard_backends(),
        Platform::MacOs => macos::clipboard_backends(),
        Platform::Windows => windows::clipboard_backends(),
    });
    backends
}

pub fn keystroke_backends(platform: Platform, clock: &Arc<dyn Clock>) -> Vec<Box<dyn KeystrokeBackend>> {
    let script: Box<dyn KeystrokeBackend> = match platform {
        Platform::Linux => Box::new(CommandKeystrokeBackend::new(
            "xdotool",
            linux::key_script,
            linux::type_script,
        )),
        Platform::MacOs => Box::new(CommandKeystrokeBackend::new(
            "system_events",
            macos::key_script,
            macos::type_script,
        )),
        Platform::Windows => Box::new(CommandKeystrokeBackend::new(
            "send_keys",
            windows::key_script,
            windows::type_script,
        )),
    };

    vec![
        Box::new(EnigoBackend::new(KEY_HOLD, Arc::clone(clock))),
        Box::new(EnigoRawBackend::new(platform, KEY_HOLD, Arc::clone(clock))),
        script,
    ]
}

pub fn window_strategies(platform: Platform, signature: &str) -> Vec<Box<dyn WindowStrategy>> {
    let mut strategies: Vec<Box<dyn WindowStrategy>> = Vec::new();

    #[cfg(target_os = "windows")]
    if platform == Platform::Windows {
        strategies.push(Box::new(windows::ForegroundWindowStrategy));
    }

    let (name, by_pid, raise): (&str, PidScript, TitleScript) = match platform {
        Platform::Linux => ("xdotool_pid", linux::activate_pid_script, linux::raise_window_script),
        Platform::MacOs => ("system_events_pid", macos::activate_pid_script, macos::raise_window_script),
        Platform::Windows => ("app_activate_pid", windows::activate_pid_script, windows::raise_window_script),
    };
    strategies.push(Box::new(PidScriptStrategy::new(name, by_pid)));
    strategies.push(Box::new(TitleMatchStrategy::new(signature, Box::new(XcapWindowLister), raise)));
    strategies
}

fn detectors(config: &AutomationConfig, recognizer: Option<&TesseractRecognizer>) -> Vec<Box<dyn Detector>> {
    let mut detectors: Vec<Box<dyn Detector>> = Vec::new();

    if let Some(r) = recognizer {
        detectors.push(Box::new(VisionDetector::new(Box::new(r.clone()))));
    }

    if let Some(dir) = &config.template_dir {
        match TemplateDetector::from_dir(dir, TEMPLATE_THRESHOLD) {
            Ok(templates) => detectors.push(Box::new(templates)),
            Err(e) => tracing::warn!(dir = %dir.display(), "template detector disabled: {}", e),
        }
    }

    detectors
}

/// Consent dialogs only block automation on macOS
fn dialog_handler(
    platform: Platform,
    recognizer: Option<&TesseractRecognizer>,
    pointer: Arc<dyn Pointer>,
    clock: &Arc<dyn Clock>,
) -> Arc<dyn PermissionDialogHandler> {
    if platform != Platform::MacOs {
        return Arc::new(NoDialogHandler);
    }

    let probe = CommandProbe::new(macos::dialog_probe(), macos::parse_dialog);
    let handler = ProbingDialogHandler::new(
        Box::new(probe),
        vec![
            Box::new(ScriptButtonDismisser::new(macos::click_button_script)),
            Box::new(CoordinateClickDismisser::new(Arc::clone(&pointer))),
            Box::new(OcrButtonDismisser::new(
                Box::new(XcapScreen),
                boxed_recognizer(recognizer),
                pointer,
            )),
        ],
        Arc::clone(clock),
    );
    Arc::new(handler)
}
