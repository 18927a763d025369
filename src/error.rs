use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort an automation call before any OS interaction happens
/// (or when the host process itself cannot be started).
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Task file not found: {0}")]
    TaskFileMissing(PathBuf),

    #[error("Task file {path} could not be read: {source}")]
    TaskFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No launch command available for platform {0}")]
    NoLaunchCommand(String),

    #[error("Failed to launch target tool: {0}")]
    LaunchFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Scratch directory error: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AutomationError {
    /// Short machine-readable code, used by the CLI when printing failures as JSON
    pub fn code(&self) -> &'static str {
        match self {
            AutomationError::TaskFileMissing(_) => "task_file_missing",
            AutomationError::TaskFileUnreadable { .. } => "task_file_unreadable",
            AutomationError::NoLaunchCommand(_) => "no_launch_command",
            AutomationError::LaunchFailure(_) => "launch_failure",
            AutomationError::InvalidConfig(_) => "invalid_config",
            AutomationError::Scratch(_) => "scratch",
            AutomationError::Internal(_) => "internal",
        }
    }
}

/// Soft failures absorbed by the workflow and reported back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No window of the target tool could be brought to the foreground
    ActivationFailure,
    /// Every clipboard backend failed to write or verify the payload
    ClipboardFailure,
    /// No keystroke backend managed to send the paste chord
    PasteFailure,
    /// The paste chord was sent but nothing confirmed the text landed
    PasteUnverified,
    /// No keystroke backend managed to send Enter
    SubmitFailure,
    /// A confirmation prompt was detected but not answered automatically
    PromptUnanswered,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ActivationFailure => "activation_failure",
            FailureKind::ClipboardFailure => "clipboard_failure",
            FailureKind::PasteFailure => "paste_failure",
            FailureKind::PasteUnverified => "paste_unverified",
            FailureKind::SubmitFailure => "submit_failure",
            FailureKind::PromptUnanswered => "prompt_unanswered",
        }
    }
}

pub type Result<T> = std::result::Result<T, AutomationError>;
