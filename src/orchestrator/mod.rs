//! End-to-end delivery of a task file into the target tool
//!
//! The workflow is a straight sequence of blocking steps. A failed step never
//! aborts the run; it marks the steps that depend on it as skipped and adds
//! manual instructions to the report. Submit in particular only runs after
//! the paste was verified on screen.

pub mod report;
pub mod verify;

use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::clipboard::ClipboardService;
use crate::clock::{Clock, SystemClock};
use crate::config::{AutomationConfig, DeliveryOptions};
use crate::error::{AutomationError, FailureKind, Result};
use crate::input::{InputInjector, KeyChord};
use crate::launcher::ProcessLauncher;
use crate::permission::{PermissionDialogHandler, PermissionWatcher};
use crate::platform::{self, Platform};
use crate::process::{CleanupReport, ProcessHandle, ProcessRegistry};
use crate::screen::capture::image_to_base64;
use crate::screen::ocr::TextRecognizer;
use crate::screen::{DetectionResult, MonitorOutcome, MonitorStatus, ScreenMonitor, SuggestedAction};
use crate::task::DeliveryTask;
use crate::window::WindowActivator;

pub use report::{
    DeliveryReport, DeliveryStatus, StepOutcome, StepState, WorkflowState, WorkflowStep,
};
pub use verify::PasteVerification;

/// The leaf components, chosen once per platform
pub struct Components {
    pub platform: Platform,
    pub launcher: ProcessLauncher,
    pub registry: ProcessRegistry,
    pub activator: WindowActivator,
    pub clipboard: ClipboardService,
    pub input: InputInjector,
    pub screen: ScreenMonitor,
    /// Used to confirm pastes on screen
    pub recognizer: Box<dyn TextRecognizer>,
    pub permission: Arc<dyn PermissionDialogHandler>,
}

pub struct AutomationOrchestrator {
    components: Components,
    config: AutomationConfig,
    clock: Arc<dyn Clock>,
}

/// Report under construction
struct Run {
    steps: Vec<StepOutcome>,
    failures: Vec<FailureKind>,
    remediation: Vec<String>,
    states: Vec<WorkflowState>,
    monitor: Option<MonitorOutcome>,
}

impl Run {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            failures: Vec::new(),
            remediation: Vec::new(),
            states: vec![WorkflowState::Idle],
            monitor: None,
        }
    }

    fn enter(&mut self, state: WorkflowState) {
        tracing::debug!(?state, "workflow transition");
        self.states.push(state);
    }

    fn record(&mut self, outcome: StepOutcome) {
        match outcome.state {
            StepState::Succeeded => tracing::info!(step = ?outcome.step, methods = ?outcome.methods, "step succeeded"),
            StepState::Failed => tracing::warn!(step = ?outcome.step, detail = ?outcome.detail, "step failed"),
            StepState::Skipped => tracing::info!(step = ?outcome.step, detail = ?outcome.detail, "step skipped"),
        }
        self.steps.push(outcome);
    }

    fn fail(&mut self, kind: FailureKind, instructions: &[String]) {
        if !self.failures.contains(&kind) {
            self.failures.push(kind);
        }
        for line in instructions {
            if !self.remediation.contains(line) {
                self.remediation.push(line.clone());
            }
        }
    }

    fn skip(&mut self, steps: &[WorkflowStep], reason: &str) {
        for step in steps {
            self.record(StepOutcome::skipped(*step, reason));
        }
    }
}

impl AutomationOrchestrator {
    pub fn new(components: Components, config: AutomationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            components,
            config,
            clock,
        }
    }

    /// Validate `config` and wire up this platform's components
    pub fn for_current_platform(config: AutomationConfig) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let components = platform::build_components(Platform::current(), &config, Arc::clone(&clock));
        Ok(Self::new(components, config, clock))
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    fn ensure_launchable(&self) -> Result<()> {
        if self.components.launcher.candidates().is_empty() {
            return Err(AutomationError::NoLaunchCommand(
                self.components.platform.to_string(),
            ));
        }
        Ok(())
    }

    /// Open a new host terminal running the tool
    pub fn open_target_tool(&self) -> Result<ProcessHandle> {
        self.ensure_launchable()?;
        self.components.launcher.launch_target_tool().ok_or_else(|| {
            AutomationError::LaunchFailure(format!(
                "none of {} terminal candidates could be started",
                self.components.launcher.candidates().len()
            ))
        })
    }

    /// Run the tool non-interactively with the task file on its stdin
    pub fn deliver_piped(&self, path: &Path) -> Result<ProcessHandle> {
        DeliveryTask::from_file(path)?;
        self.components
            .launcher
            .launch_piped(path)
            .ok_or_else(|| AutomationError::LaunchFailure("piped tool could not be started".to_string()))
    }

    pub fn detect_prompt(&self) -> DetectionResult {
        self.components.screen.detect(None)
    }

    pub fn monitor_prompts(&self, duration: Duration, poll_interval: Duration) -> MonitorOutcome {
        self.components.screen.monitor(duration, poll_interval)
    }

    /// Keep the `keep_newest` newest tool processes, terminate the rest
    pub fn cleanup_target_processes(&self, keep_newest: usize) -> CleanupReport {
        let registry = &self.components.registry;
        registry.terminate(&registry.find_targets(), keep_newest, true)
    }

    /// Same policy for host terminal processes
    pub fn cleanup_terminal_processes(&self, keep_newest: usize) -> CleanupReport {
        let registry = &self.components.registry;
        registry.terminate(&registry.find_terminals(), keep_newest, true)
    }

    /// Deliver the task file at `path` into the tool and submit it.
    ///
    /// Only setup problems (missing task file, no way to start a terminal)
    /// are returned as errors; everything else ends up in the report.
    pub fn deliver(&self, path: &Path, options: &DeliveryOptions) -> Result<DeliveryReport> {
        let task = DeliveryTask::from_file(path)?;
        let started_at = Utc::now();
        let mut run = Run::new();
        let c = &self.components;

        // consent dialogs can block the launch itself
        let watcher = self.spawn_watcher(options);

        run.enter(WorkflowState::Launching);
        let (process, launched_new, candidates) = match self.acquire_process(options, &mut run) {
            Ok(acquired) => acquired,
            Err(e) => {
                if let Some(watcher) = watcher {
                    let report = watcher.stop();
                    tracing::debug!(scans = report.scans, "permission watcher stopped after setup error");
                }
                return Err(e);
            }
        };

        run.enter(WorkflowState::Activating);
        match c.activator.activate_any(&candidates) {
            Some((handle, outcome)) => {
                run.record(StepOutcome::succeeded(WorkflowStep::Activation, outcome.method, outcome.attempts));
                tracing::debug!(pid = handle.pid, "activated window");
            }
            None => {
                run.record(StepOutcome::failed(
                    WorkflowStep::Activation,
                    Vec::new(),
                    "no window of the tool could be focused",
                ));
                run.fail(
                    FailureKind::ActivationFailure,
                    &["Click the terminal window running the tool to focus it".to_string()],
                );
            }
        }

        self.copy_paste_submit(&task, options, &mut run);

        run.enter(WorkflowState::Done);

        let permission_watch = watcher.map(PermissionWatcher::stop);
        let screenshot_base64 = if self.config.attach_screenshots && c.screen.can_capture() {
            c.screen
                .capture()
                .and_then(|frame| image_to_base64(&frame))
                .map_err(|e| tracing::debug!("final screenshot failed: {}", e))
                .ok()
        } else {
            None
        };

        let status = DeliveryStatus::from_failures(&run.failures);
        tracing::info!(status = status.as_str(), failures = ?run.failures, "delivery finished");

        Ok(DeliveryReport {
            id: Uuid::new_v4(),
            task_file: task.source_file_path.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            process: Some(process),
            launched_new,
            steps: run.steps,
            failures: run.failures,
            remediation: run.remediation,
            states: run.states,
            monitor: run.monitor,
            permission_watch,
            screenshot_base64,
        })
    }

    fn spawn_watcher(&self, options: &DeliveryOptions) -> Option<PermissionWatcher> {
        if !self.config.permission_watch {
            return None;
        }
        let bound = self.config.process_start_timeout
            + self.config.ready_settle
            + options.monitor_duration
            + Duration::from_secs(60);
        Some(PermissionWatcher::spawn(
            Arc::clone(&self.components.permission),
            self.config.permission_scan_interval,
            bound,
            Arc::clone(&self.clock),
        ))
    }

    /// Reuse the newest running session or launch a new one.
    ///
    /// Returns the process to deliver to, whether it was launched, and every
    /// handle worth trying to activate (best first).
    fn acquire_process(
        &self,
        options: &DeliveryOptions,
        run: &mut Run,
    ) -> Result<(ProcessHandle, bool, Vec<ProcessHandle>)> {
        let c = &self.components;
        let running = c.registry.find_targets();

        if !options.launch_new {
            if let Some(existing) = running.first() {
                tracing::info!(pid = existing.pid, "reusing running session");
                run.record(StepOutcome::succeeded(
                    WorkflowStep::Launch,
                    Some("existing_session".to_string()),
                    Vec::new(),
                ));
                return Ok((existing.clone(), false, running));
            }
        }

        let launched = self.open_target_tool()?;
        run.record(StepOutcome::succeeded(
            WorkflowStep::Launch,
            Some(launched.executable_name.clone()),
            Vec::new(),
        ));

        run.enter(WorkflowState::WaitingReady);
        let known: HashSet<u32> = running.iter().map(|p| p.pid).collect();
        let detected = c
            .registry
            .wait_for_new_target(&known, self.config.process_start_timeout);
        self.clock.sleep(self.config.ready_settle);

        Ok(match detected {
            Some(target) => (target.clone(), true, vec![target, launched]),
            None => (launched.clone(), true, vec![launched]),
        })
    }

    fn copy_paste_submit(&self, task: &DeliveryTask, options: &DeliveryOptions, run: &mut Run) {
        let c = &self.components;
        let payload = task.payload_text.as_str();
        let paste_chord = KeyChord::paste(c.platform);
        let file = task.source_file_path.display().to_string();

        let paste_manually = format!("Click the terminal window and paste manually ({})", paste_chord);
        let press_enter = "Then press Enter manually to submit the task".to_string();

        run.enter(WorkflowState::CopyingToClipboard);
        let original = if self.config.restore_clipboard {
            c.clipboard.snapshot()
        } else {
            None
        };
        let write = c.clipboard.write(payload);

        run.enter(WorkflowState::VerifyingCopy);
        let copied = write.success() && c.clipboard.verify(payload);
        if !copied {
            run.record(StepOutcome::failed(
                WorkflowStep::Copy,
                write.attempts,
                "payload could not be placed on the clipboard",
            ));
            run.fail(
                FailureKind::ClipboardFailure,
                &[
                    format!("Open {} and copy its contents", file),
                    paste_manually,
                    press_enter,
                ],
            );
            run.skip(
                &[WorkflowStep::Paste, WorkflowStep::Verify, WorkflowStep::Submit],
                "clipboard copy failed",
            );
            return;
        }
        run.record(StepOutcome::succeeded(WorkflowStep::Copy, write.backend, write.attempts));

        run.enter(WorkflowState::Pasting);
        let before = verify::capture_before(&c.screen);
        let paste = c.input.send_paste(self.config.max_attempts);
        if !paste.success {
            run.record(StepOutcome::failed(WorkflowStep::Paste, paste.attempts, "paste keystroke not delivered"));
            run.fail(FailureKind::PasteFailure, &[paste_manually, press_enter]);
            run.skip(&[WorkflowStep::Verify, WorkflowStep::Submit], "paste failed");
            return;
        }
        run.record(StepOutcome::succeeded(WorkflowStep::Paste, paste.method, paste.attempts));
        self.clock.sleep(self.config.paste_settle);

        run.enter(WorkflowState::VerifyingPaste);
        let verification = verify::verify_paste(
            &c.screen,
            c.recognizer.as_ref(),
            &c.input,
            before.as_ref(),
            payload,
        );
        if !verification.verified {
            run.record(StepOutcome::failed(WorkflowStep::Verify, Vec::new(), verification.detail));
            run.fail(
                FailureKind::PasteUnverified,
                &[
                    "Check that the task text appears in the tool's input".to_string(),
                    press_enter,
                ],
            );
            run.skip(&[WorkflowStep::Submit], "paste could not be verified");
            return;
        }
        let mut verified = StepOutcome::succeeded(WorkflowStep::Verify, verification.method, Vec::new());
        verified.detail = Some(verification.detail);
        run.record(verified);

        run.enter(WorkflowState::Submitting);
        self.clock.sleep(self.config.submit_delay);
        let submit = c.input.send_enter(self.config.max_attempts);
        if !submit.success {
            run.record(StepOutcome::failed(WorkflowStep::Submit, submit.attempts, "Enter keystroke not delivered"));
            run.fail(FailureKind::SubmitFailure, &[press_enter]);
            return;
        }
        run.record(StepOutcome::succeeded(WorkflowStep::Submit, submit.method, submit.attempts));

        if self.config.restore_clipboard && c.clipboard.restore(original) {
            tracing::debug!("original clipboard restored");
        }

        if options.monitor_prompts && c.screen.can_capture() {
            self.watch_for_prompt(options, run);
        }
    }

    fn watch_for_prompt(&self, options: &DeliveryOptions, run: &mut Run) {
        let c = &self.components;

        run.enter(WorkflowState::MonitoringResponse);
        let outcome = c.screen.monitor(options.monitor_duration, options.poll_interval);
        let mut step = StepOutcome::succeeded(WorkflowStep::Monitor, None, Vec::new());
        step.detail = Some(format!("{} polls over {:?}", outcome.polls, outcome.elapsed));
        run.record(step);
        run.monitor = Some(outcome.clone());

        if outcome.status == MonitorStatus::Timeout {
            tracing::info!(elapsed = ?outcome.elapsed, "no confirmation prompt appeared");
            return;
        }

        run.enter(WorkflowState::HandlingPrompt);
        let Some(result) = outcome.result else {
            return;
        };

        if self.config.auto_confirm && result.suggested_action == SuggestedAction::PressEnter {
            let confirm = c.input.send_enter(self.config.max_attempts);
            if confirm.success {
                run.record(StepOutcome::succeeded(WorkflowStep::Prompt, confirm.method, confirm.attempts));
                return;
            }
            run.record(StepOutcome::failed(WorkflowStep::Prompt, confirm.attempts, "confirmation keystroke not delivered"));
        } else {
            run.record(StepOutcome::skipped(WorkflowStep::Prompt, "prompt left for manual confirmation"));
        }

        let options_text = if result.matched_options.is_empty() {
            String::from("see the terminal")
        } else {
            result.matched_options.join(" / ")
        };
        run.fail(
            FailureKind::PromptUnanswered,
            &[format!("Answer the confirmation prompt in the terminal ({})", options_text)],
        );
    }
}
