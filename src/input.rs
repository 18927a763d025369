//! Keyboard and mouse injection with ordered fallback backends
//!
//! The primary backend uses enigo with explicit modifier holds; the secondary
//! one sends raw platform keycodes through enigo; the last one shells out to
//! the platform's scripting bridge (System Events, SendKeys, xdotool).

use anyhow::{anyhow, Context, Result};
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use serde::Serialize;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use crate::clipboard::CommandSpec;
use crate::clock::Clock;
use crate::platform::Platform;
use crate::strategy::{run_chain, Attempt, RetryPolicy};

/// Keyboard modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Control,
    Alt,
    Shift,
    Meta, // Windows key / Command key
}

impl Modifier {
    fn to_enigo(self) -> Key {
        match self {
            Modifier::Control => Key::Control,
            Modifier::Alt => Key::Alt,
            Modifier::Shift => Key::Shift,
            Modifier::Meta => Key::Meta,
        }
    }

    /// Parse a modifier from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ctrl" | "control" => Some(Modifier::Control),
            "alt" | "option" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "meta" | "win" | "super" | "cmd" | "command" => Some(Modifier::Meta),
            _ => None,
        }
    }
}

/// Keys the engine needs to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    /// A printable character; letters are stored lowercase
    Char(char),
    Enter,
    Tab,
    Escape,
    Space,
    Backspace,
    Delete,
    Home,
    End,
    Up,
    Down,
    Left,
    Right,
}

impl KeyCode {
    fn to_enigo(self) -> Key {
        match self {
            KeyCode::Char(c) => Key::Unicode(c),
            KeyCode::Enter => Key::Return,
            KeyCode::Tab => Key::Tab,
            KeyCode::Escape => Key::Escape,
            KeyCode::Space => Key::Space,
            KeyCode::Backspace => Key::Backspace,
            KeyCode::Delete => Key::Delete,
            KeyCode::Home => Key::Home,
            KeyCode::End => Key::End,
            KeyCode::Up => Key::UpArrow,
            KeyCode::Down => Key::DownArrow,
            KeyCode::Left => Key::LeftArrow,
            KeyCode::Right => Key::RightArrow,
        }
    }

    /// Parse a key from a string (e.g. "v", "enter", "end")
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        match lower.as_str() {
            "enter" | "return" => Some(KeyCode::Enter),
            "tab" => Some(KeyCode::Tab),
            "escape" | "esc" => Some(KeyCode::Escape),
            "space" => Some(KeyCode::Space),
            "backspace" | "bs" => Some(KeyCode::Backspace),
            "delete" | "del" => Some(KeyCode::Delete),
            "home" => Some(KeyCode::Home),
            "end" => Some(KeyCode::End),
            "up" => Some(KeyCode::Up),
            "down" => Some(KeyCode::Down),
            "left" => Some(KeyCode::Left),
            "right" => Some(KeyCode::Right),
            _ => {
                let mut chars = lower.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if !c.is_whitespace() => Some(KeyCode::Char(c)),
                    _ => None,
                }
            }
        }
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyCode::Char(c) => write!(f, "{}", c.to_uppercase()),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A key plus the modifiers held while it is pressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub modifiers: Vec<Modifier>,
    pub key: KeyCode,
}

impl KeyChord {
    pub fn new(modifiers: &[Modifier], key: KeyCode) -> Self {
        Self {
            modifiers: modifiers.to_vec(),
            key,
        }
    }

    pub fn key(key: KeyCode) -> Self {
        Self::new(&[], key)
    }

    /// Parse "Ctrl+Shift+V" style combinations
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('+').map(str::trim).filter(|p| !p.is_empty()).collect();
        let (key, modifiers) = parts.split_last()?;
        let modifiers = modifiers
            .iter()
            .map(|m| Modifier::parse(m))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            modifiers,
            key: KeyCode::parse(key)?,
        })
    }

    /// The paste chord for a platform's terminal emulators
    pub fn paste(platform: Platform) -> Self {
        match platform {
            Platform::MacOs => Self::new(&[Modifier::Meta], KeyCode::Char('v')),
            Platform::Windows => Self::new(&[Modifier::Control], KeyCode::Char('v')),
            // terminal emulators reserve Ctrl+V for literal-next
            Platform::Linux => Self::new(&[Modifier::Control, Modifier::Shift], KeyCode::Char('v')),
        }
    }

    pub fn enter() -> Self {
        Self::key(KeyCode::Enter)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{:?}+", modifier)?;
        }
        write!(f, "{}", self.key)
    }
}

/// A way of injecting keystrokes
pub trait KeystrokeBackend: Send + Sync {
    fn name(&self) -> &str;

    fn send_chord(&self, chord: &KeyChord) -> Result<()>;

    fn type_text(&self, _text: &str) -> Result<()> {
        Err(anyhow!("{} cannot type text", self.name()))
    }
}

/// Mouse clicks at absolute screen coordinates
pub trait Pointer: Send + Sync {
    fn click_at(&self, x: i32, y: i32) -> Result<()>;
}

/// Physical abort switch checked before every injection
pub trait FailSafe: Send + Sync {
    fn tripped(&self) -> bool;
}

fn new_enigo() -> Result<Enigo> {
    Enigo::new(&Settings::default())
        .map_err(|e| anyhow!("Failed to create input controller: {:?}", e))
}

/// enigo with explicit modifier-down / key / modifier-up and short holds
///
/// A fresh connection is opened per call so the backend stays `Send + Sync`.
pub struct EnigoBackend {
    hold: Duration,
    clock: Arc<dyn Clock>,
}

impl EnigoBackend {
    pub fn new(hold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { hold, clock }
    }
}

impl KeystrokeBackend for EnigoBackend {
    fn name(&self) -> &str {
        "enigo"
    }

    fn send_chord(&self, chord: &KeyChord) -> Result<()> {
        let mut enigo = new_enigo()?;

        for modifier in &chord.modifiers {
            enigo
                .key(modifier.to_enigo(), Direction::Press)
                .map_err(|e| anyhow!("Failed to press {:?}: {:?}", modifier, e))?;
            self.clock.sleep(self.hold);
        }

        let pressed = enigo
            .key(chord.key.to_enigo(), Direction::Click)
            .map_err(|e| anyhow!("Failed to press {}: {:?}", chord.key, e));

        self.clock.sleep(self.hold);

        // release even when the key press failed, so no modifier stays stuck
        for modifier in chord.modifiers.iter().rev() {
            enigo
                .key(modifier.to_enigo(), Direction::Release)
                .map_err(|e| anyhow!("Failed to release {:?}: {:?}", modifier, e))?;
        }

        pressed
    }

    fn type_text(&self, text: &str) -> Result<()> {
        new_enigo()?
            .text(text)
            .map_err(|e| anyhow!("Failed to type text: {:?}", e))
    }
}

impl Pointer for EnigoBackend {
    fn click_at(&self, x: i32, y: i32) -> Result<()> {
        let mut enigo = new_enigo()?;
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| anyhow!("Failed to move mouse: {:?}", e))?;
        self.clock.sleep(Duration::from_millis(50));
        enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| anyhow!("Failed to click: {:?}", e))
    }
}

/// Raw platform keycodes through enigo, bypassing its key-to-keysym mapping
pub struct EnigoRawBackend {
    platform: Platform,
    hold: Duration,
    clock: Arc<dyn Clock>,
}

impl EnigoRawBackend {
    pub fn new(platform: Platform, hold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            platform,
            hold,
            clock,
        }
    }
}

impl KeystrokeBackend for EnigoRawBackend {
    fn name(&self) -> &str {
        "enigo_raw"
    }

    fn send_chord(&self, chord: &KeyChord) -> Result<()> {
        let key = raw_keycode(self.platform, chord.key)
            .ok_or_else(|| anyhow!("no raw keycode for {} on {}", chord.key, self.platform))?;
        let modifiers = chord
            .modifiers
            .iter()
            .map(|m| {
                raw_modifier(self.platform, *m)
                    .ok_or_else(|| anyhow!("no raw keycode for {:?}", m))
            })
            .collect::<Result<Vec<u16>>>()?;

        let mut enigo = new_enigo()?;
        for code in &modifiers {
            enigo
                .raw(*code, Direction::Press)
                .map_err(|e| anyhow!("raw press {} failed: {:?}", code, e))?;
            self.clock.sleep(self.hold);
        }
        let pressed = enigo
            .raw(key, Direction::Click)
            .map_err(|e| anyhow!("raw click {} failed: {:?}", key, e));
        self.clock.sleep(self.hold);
        for code in modifiers.iter().rev() {
            enigo
                .raw(*code, Direction::Release)
                .map_err(|e| anyhow!("raw release {} failed: {:?}", code, e))?;
        }
        pressed
    }
}

/// Builds the scripting-bridge command for a chord or a text
pub type ChordScript = fn(&KeyChord) -> Option<CommandSpec>;
pub type TextScript = fn(&str) -> Option<CommandSpec>;

/// Keystrokes through an external program (osascript, powershell, xdotool)
pub struct CommandKeystrokeBackend {
    name: String,
    chord_script: ChordScript,
    text_script: TextScript,
}

impl CommandKeystrokeBackend {
    pub fn new(name: &str, chord_script: ChordScript, text_script: TextScript) -> Self {
        Self {
            name: name.to_string(),
            chord_script,
            text_script,
        }
    }

    fn run(&self, spec: CommandSpec) -> Result<()> {
        let output = spec
            .command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run {}", spec.program))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} exited with {}: {}",
                spec.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

impl KeystrokeBackend for CommandKeystrokeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_chord(&self, chord: &KeyChord) -> Result<()> {
        let spec = (self.chord_script)(chord)
            .ok_or_else(|| anyhow!("{} cannot express {}", self.name, chord))?;
        self.run(spec)
    }

    fn type_text(&self, text: &str) -> Result<()> {
        let spec = (self.text_script)(text)
            .ok_or_else(|| anyhow!("{} cannot type this text", self.name))?;
        self.run(spec)
    }
}

/// Pointer parked in a screen corner aborts all injection
pub struct CornerFailSafe {
    margin: i32,
}

impl CornerFailSafe {
    pub fn new() -> Self {
        Self { margin: 2 }
    }
}

impl Default for CornerFailSafe {
    fn default() -> Self {
        Self::new()
    }
}

impl FailSafe for CornerFailSafe {
    fn tripped(&self) -> bool {
        let Ok(enigo) = new_enigo() else {
            return false;
        };
        match (enigo.location(), enigo.main_display()) {
            (Ok(position), Ok(display)) => in_corner(position, display, self.margin),
            _ => false,
        }
    }
}

/// True when `position` lies within `margin` pixels of a corner of `display`
pub fn in_corner(position: (i32, i32), display: (i32, i32), margin: i32) -> bool {
    let (x, y) = position;
    let (w, h) = display;
    let near_left = x <= margin;
    let near_right = x >= w - 1 - margin;
    let near_top = y <= margin;
    let near_bottom = y >= h - 1 - margin;
    (near_left || near_right) && (near_top || near_bottom)
}

/// Result of one injection request
#[derive(Debug, Clone, Serialize)]
pub struct InjectionOutcome {
    pub success: bool,
    /// Backend that delivered the keystroke
    pub method: Option<String>,
    pub attempts: Vec<Attempt>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub aborted: bool,
}

impl InjectionOutcome {
    fn aborted() -> Self {
        Self {
            success: false,
            method: None,
            attempts: Vec::new(),
            aborted: true,
        }
    }
}

pub struct InputInjector {
    backends: Vec<Box<dyn KeystrokeBackend>>,
    platform: Platform,
    backoff: Duration,
    clock: Arc<dyn Clock>,
    fail_safe: Option<Box<dyn FailSafe>>,
}

impl InputInjector {
    pub fn new(
        backends: Vec<Box<dyn KeystrokeBackend>>,
        platform: Platform,
        backoff: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backends,
            platform,
            backoff,
            clock,
            fail_safe: None,
        }
    }

    pub fn with_fail_safe(mut self, fail_safe: Box<dyn FailSafe>) -> Self {
        self.fail_safe = Some(fail_safe);
        self
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn fail_safe_tripped(&self) -> bool {
        let tripped = self.fail_safe.as_ref().is_some_and(|f| f.tripped());
        if tripped {
            tracing::error!("Fail-safe triggered (pointer in screen corner), aborting input injection");
        }
        tripped
    }

    /// Platform paste chord
    pub fn send_paste(&self, max_attempts: u32) -> InjectionOutcome {
        self.send_combo(&KeyChord::paste(self.platform), max_attempts)
    }

    pub fn send_enter(&self, max_attempts: u32) -> InjectionOutcome {
        self.send_combo(&KeyChord::enter(), max_attempts)
    }

    pub fn send_key(&self, key: KeyCode, max_attempts: u32) -> InjectionOutcome {
        self.send_combo(&KeyChord::key(key), max_attempts)
    }

    pub fn send_combo(&self, chord: &KeyChord, max_attempts: u32) -> InjectionOutcome {
        if self.fail_safe_tripped() {
            return InjectionOutcome::aborted();
        }

        let outcome = run_chain(
            "input.chord",
            &self.backends,
            RetryPolicy::new(max_attempts, self.backoff),
            self.clock.as_ref(),
            |b| b.name().to_string(),
            |backend| backend.send_chord(chord),
        );

        match &outcome.used {
            Some(method) => tracing::debug!(%chord, %method, "keystroke sent"),
            None => tracing::warn!(%chord, "every keystroke backend failed"),
        }

        InjectionOutcome {
            success: outcome.succeeded(),
            method: outcome.used,
            attempts: outcome.attempts,
            aborted: false,
        }
    }

    pub fn type_text(&self, text: &str, max_attempts: u32) -> InjectionOutcome {
        if self.fail_safe_tripped() {
            return InjectionOutcome::aborted();
        }

        let outcome = run_chain(
            "input.text",
            &self.backends,
            RetryPolicy::new(max_attempts, self.backoff),
            self.clock.as_ref(),
            |b| b.name().to_string(),
            |backend| backend.type_text(text),
        );

        InjectionOutcome {
            success: outcome.succeeded(),
            method: outcome.used,
            attempts: outcome.attempts,
            aborted: false,
        }
    }
}

/// Raw keycode for a key: Win32 virtual keys, macOS kVK codes, X11 keycodes
pub fn raw_keycode(platform: Platform, key: KeyCode) -> Option<u16> {
    match platform {
        Platform::Windows => match key {
            KeyCode::Char(c) if c.is_ascii_alphanumeric() => Some(c.to_ascii_uppercase() as u16),
            KeyCode::Char(_) => None,
            KeyCode::Enter => Some(0x0D),
            KeyCode::Tab => Some(0x09),
            KeyCode::Escape => Some(0x1B),
            KeyCode::Space => Some(0x20),
            KeyCode::Backspace => Some(0x08),
            KeyCode::Delete => Some(0x2E),
            KeyCode::Home => Some(0x24),
            KeyCode::End => Some(0x23),
            KeyCode::Left => Some(0x25),
            KeyCode::Up => Some(0x26),
            KeyCode::Right => Some(0x27),
            KeyCode::Down => Some(0x28),
        },
        Platform::MacOs => match key {
            KeyCode::Char(c) => {
                const LETTERS: &str = "asdfhgzxcv_bqweryt";
                match c {
                    'o' => Some(0x1F),
                    'u' => Some(0x20),
                    'i' => Some(0x22),
                    'p' => Some(0x23),
                    'l' => Some(0x25),
                    'j' => Some(0x26),
                    'k' => Some(0x28),
                    'n' => Some(0x2D),
                    'm' => Some(0x2E),
                    '_' => None,
                    _ => LETTERS.find(c).map(|i| i as u16),
                }
            }
            KeyCode::Enter => Some(0x24),
            KeyCode::Tab => Some(0x30),
            KeyCode::Space => Some(0x31),
            KeyCode::Backspace => Some(0x33),
            KeyCode::Escape => Some(0x35),
            KeyCode::Delete => Some(0x75),
            KeyCode::Home => Some(0x73),
            KeyCode::End => Some(0x77),
            KeyCode::Left => Some(0x7B),
            KeyCode::Right => Some(0x7C),
            KeyCode::Down => Some(0x7D),
            KeyCode::Up => Some(0x7E),
        },
        Platform::Linux => match key {
            KeyCode::Char(c) => {
                const ROWS: [(&str, u16); 3] = [("qwertyuiop", 24), ("asdfghjkl", 38), ("zxcvbnm", 52)];
                ROWS.iter()
                    .find_map(|(row, base)| row.find(c).map(|i| base + i as u16))
            }
            KeyCode::Enter => Some(36),
            KeyCode::Tab => Some(23),
            KeyCode::Escape => Some(9),
            KeyCode::Space => Some(65),
            KeyCode::Backspace => Some(22),
            KeyCode::Delete => Some(119),
            KeyCode::Home => Some(110),
            KeyCode::End => Some(115),
            KeyCode::Up => Some(111),
            KeyCode::Left => Some(113),
            KeyCode::Right => Some(114),
            KeyCode::Down => Some(116),
        },
    }
}

pub fn raw_modifier(platform: Platform, modifier: Modifier) -> Option<u16> {
    let code = match (platform, modifier) {
        (Platform::Windows, Modifier::Control) => 0x11,
        (Platform::Windows, Modifier::Shift) => 0x10,
        (Platform::Windows, Modifier::Alt) => 0x12,
        (Platform::Windows, Modifier::Meta) => 0x5B,
        (Platform::MacOs, Modifier::Meta) => 0x37,
        (Platform::MacOs, Modifier::Shift) => 0x38,
        (Platform::MacOs, Modifier::Alt) => 0x3A,
        (Platform::MacOs, Modifier::Control) => 0x3B,
        (Platform::Linux, Modifier::Control) => 37,
        (Platform::Linux, Modifier::Shift) => 50,
        (Platform::Linux, Modifier::Alt) => 64,
        (Platform::Linux, Modifier::Meta) => 133,
    };
    Some(code)
}
