use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AutomationError, Result};
use crate::platform::Platform;
use crate::strategy::RetryPolicy;

/// Engine configuration, read once at startup
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Command run inside the host terminal
    pub tool_command: String,
    /// Text used to classify target-tool processes and windows
    pub tool_signature: String,
    pub scratch_dir: PathBuf,
    pub process_start_timeout: Duration,
    pub process_poll_interval: Duration,
    pub ready_settle: Duration,
    pub activation_settle: Duration,
    pub paste_settle: Duration,
    pub submit_delay: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub monitor_duration: Duration,
    pub monitor_poll_interval: Duration,
    pub permission_watch: bool,
    pub permission_scan_interval: Duration,
    pub graceful_kill_timeout: Duration,
    /// OCR executable; `None` disables the vision detector
    pub ocr_command: Option<String>,
    pub template_dir: Option<PathBuf>,
    pub auto_confirm: bool,
    pub restore_clipboard: bool,
    pub attach_screenshots: bool,
}

impl AutomationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tool_command = env::var("AUTOPILOT_TOOL_COMMAND")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.tool_command);
        let tool_signature = env::var("AUTOPILOT_TOOL_SIGNATURE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| signature_from_command(&tool_command));

        Self {
            tool_command,
            tool_signature,
            scratch_dir: env::var("AUTOPILOT_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            process_start_timeout: env_millis(
                "AUTOPILOT_PROCESS_START_TIMEOUT_MS",
                defaults.process_start_timeout,
            ),
            process_poll_interval: env_millis(
                "AUTOPILOT_PROCESS_POLL_MS",
                defaults.process_poll_interval,
            ),
            ready_settle: env_millis("AUTOPILOT_READY_SETTLE_MS", defaults.ready_settle),
            activation_settle: env_millis(
                "AUTOPILOT_ACTIVATION_SETTLE_MS",
                defaults.activation_settle,
            ),
            paste_settle: env_millis("AUTOPILOT_PASTE_SETTLE_MS", defaults.paste_settle),
            submit_delay: env_millis("AUTOPILOT_SUBMIT_DELAY_MS", defaults.submit_delay),
            max_attempts: env_parse("AUTOPILOT_MAX_ATTEMPTS", defaults.max_attempts),
            retry_backoff: env_millis("AUTOPILOT_RETRY_BACKOFF_MS", defaults.retry_backoff),
            monitor_duration: env::var("AUTOPILOT_MONITOR_SECS")
                .ok()
                .and_then(|v| parse_or_warn::<u64>("AUTOPILOT_MONITOR_SECS", &v))
                .map(Duration::from_secs)
                .unwrap_or(defaults.monitor_duration),
            monitor_poll_interval: env_millis(
                "AUTOPILOT_MONITOR_POLL_MS",
                defaults.monitor_poll_interval,
            ),
            permission_watch: env_bool("AUTOPILOT_PERMISSION_WATCH", defaults.permission_watch),
            permission_scan_interval: env_millis(
                "AUTOPILOT_PERMISSION_SCAN_MS",
                defaults.permission_scan_interval,
            ),
            graceful_kill_timeout: env_millis(
                "AUTOPILOT_GRACEFUL_KILL_MS",
                defaults.graceful_kill_timeout,
            ),
            ocr_command: match env::var("AUTOPILOT_OCR_COMMAND") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => defaults.ocr_command,
            },
            template_dir: env::var("AUTOPILOT_TEMPLATE_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            auto_confirm: env_bool("AUTOPILOT_AUTO_CONFIRM", defaults.auto_confirm),
            restore_clipboard: env_bool("AUTOPILOT_RESTORE_CLIPBOARD", defaults.restore_clipboard),
            attach_screenshots: env_bool(
                "AUTOPILOT_ATTACH_SCREENSHOTS",
                defaults.attach_screenshots,
            ),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool_command.trim().is_empty() {
            return Err(AutomationError::InvalidConfig(
                "tool command must not be empty".to_string(),
            ));
        }
        if self.tool_signature.trim().is_empty() {
            return Err(AutomationError::InvalidConfig(
                "tool signature must not be empty".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(AutomationError::InvalidConfig(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if self.monitor_poll_interval.is_zero()
            || self.process_poll_interval.is_zero()
            || self.permission_scan_interval.is_zero()
        {
            return Err(AutomationError::InvalidConfig(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_backoff)
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            tool_command: "claude".to_string(),
            tool_signature: "claude".to_string(),
            scratch_dir: default_scratch_dir(),
            process_start_timeout: Duration::from_secs(10),
            process_poll_interval: Duration::from_millis(250),
            ready_settle: Duration::from_millis(2000),
            activation_settle: Duration::from_millis(300),
            paste_settle: Duration::from_millis(600),
            submit_delay: Duration::from_millis(1500),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(150),
            monitor_duration: Duration::from_secs(30),
            monitor_poll_interval: Duration::from_millis(2000),
            permission_watch: Platform::current() == Platform::MacOs,
            permission_scan_interval: Duration::from_millis(1500),
            graceful_kill_timeout: Duration::from_secs(3),
            ocr_command: Some("tesseract".to_string()),
            template_dir: None,
            auto_confirm: false,
            restore_clipboard: true,
            attach_screenshots: false,
        }
    }
}

/// Per-call options for a delivery
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Always open a new host terminal instead of reusing a running tool
    pub launch_new: bool,
    /// Watch the screen for confirmation prompts after submitting
    pub monitor_prompts: bool,
    pub monitor_duration: Duration,
    pub poll_interval: Duration,
}

impl DeliveryOptions {
    pub fn from_config(config: &AutomationConfig) -> Self {
        Self {
            launch_new: true,
            monitor_prompts: true,
            monitor_duration: config.monitor_duration,
            poll_interval: config.monitor_poll_interval,
        }
    }
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self::from_config(&AutomationConfig::default())
    }
}

fn default_scratch_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("cli-autopilot")
}

/// `/usr/local/bin/claude --resume` -> `claude`
fn signature_from_command(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .map(|program| {
            let name = program.rsplit(['/', '\\']).next().unwrap_or(program);
            name.trim_end_matches(".exe").trim_end_matches(".cmd").to_string()
        })
        .unwrap_or_default()
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, value);
            None
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| parse_or_warn(key, &v))
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| parse_or_warn::<u64>(key, &v))
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                tracing::warn!("Ignoring invalid value for {}: {:?}", key, v);
                default
            }
        },
        Err(_) => default,
    }
}
