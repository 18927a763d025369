//! Drives an interactive terminal CLI that has no API: launch it in a host
//! terminal, focus its window, paste a task through the clipboard, submit it
//! once the paste is visible, and watch the screen for confirmation prompts.

pub mod clipboard;
pub mod clock;
pub mod config;
pub mod error;
pub mod input;
pub mod launcher;
pub mod orchestrator;
pub mod permission;
pub mod platform;
pub mod process;
pub mod scratch;
pub mod screen;
pub mod strategy;
pub mod task;
pub mod window;

pub use config::{AutomationConfig, DeliveryOptions};
pub use error::{AutomationError, FailureKind, Result};
pub use orchestrator::{AutomationOrchestrator, Components, DeliveryReport, DeliveryStatus};
pub use platform::Platform;
