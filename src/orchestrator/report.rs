use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::FailureKind;
use crate::permission::WatcherReport;
use crate::process::ProcessHandle;
use crate::screen::MonitorOutcome;
use crate::strategy::Attempt;

/// States of the delivery workflow, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Launching,
    WaitingReady,
    Activating,
    CopyingToClipboard,
    VerifyingCopy,
    Pasting,
    VerifyingPaste,
    Submitting,
    MonitoringResponse,
    HandlingPrompt,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Launch,
    Activation,
    Copy,
    Paste,
    Verify,
    Submit,
    Monitor,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of one workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: WorkflowStep,
    pub state: StepState,
    /// Strategies that succeeded for this step
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<Attempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(step: WorkflowStep, method: Option<String>, attempts: Vec<Attempt>) -> Self {
        Self {
            step,
            state: StepState::Succeeded,
            methods: method.into_iter().collect(),
            attempts,
            detail: None,
        }
    }

    pub fn failed(step: WorkflowStep, attempts: Vec<Attempt>, detail: impl Into<String>) -> Self {
        Self {
            step,
            state: StepState::Failed,
            methods: Vec::new(),
            attempts,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(step: WorkflowStep, reason: impl Into<String>) -> Self {
        Self {
            step,
            state: StepState::Skipped,
            methods: Vec::new(),
            attempts: Vec::new(),
            detail: Some(reason.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.state == StepState::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl DeliveryStatus {
    /// `failed` when the payload never reached the clipboard,
    /// `success` when nothing went wrong, `partial_success` otherwise
    pub fn from_failures(failures: &[FailureKind]) -> Self {
        if failures.contains(&FailureKind::ClipboardFailure) {
            DeliveryStatus::Failed
        } else if failures.is_empty() {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::PartialSuccess
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::PartialSuccess => "partial_success",
            DeliveryStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub id: Uuid,
    pub task_file: PathBuf,
    pub status: DeliveryStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub process: Option<ProcessHandle>,
    /// False when an already running session was reused
    pub launched_new: bool,
    pub steps: Vec<StepOutcome>,
    pub failures: Vec<FailureKind>,
    /// What a person has to do by hand to finish the delivery
    pub remediation: Vec<String>,
    pub states: Vec<WorkflowState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_watch: Option<WatcherReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
}

impl DeliveryReport {
    pub fn step(&self, step: WorkflowStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step)
    }

    /// Methods that succeeded for `step`; empty when it failed, was skipped or never ran
    pub fn methods_used(&self, step: WorkflowStep) -> Vec<String> {
        self.step(step).map(|s| s.methods.clone()).unwrap_or_default()
    }

    pub fn step_succeeded(&self, step: WorkflowStep) -> bool {
        self.step(step).is_some_and(StepOutcome::success)
    }

    pub fn reached(&self, state: WorkflowState) -> bool {
        self.states.contains(&state)
    }
}
