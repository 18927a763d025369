//! X11 / Wayland command builders (xdotool, wmctrl, wl-clipboard, xclip, xsel)

use crate::clipboard::{ClipboardBackend, CommandClipboard, CommandSpec};
use crate::input::{KeyChord, KeyCode, Modifier};
use crate::window::WindowRef;

/// Command-line clipboards, Wayland first
pub fn clipboard_backends() -> Vec<Box<dyn ClipboardBackend>> {
    vec![
        Box::new(CommandClipboard::new(
            "wl-clipboard",
            CommandSpec::new("wl-copy", &[]),
            CommandSpec::new("wl-paste", &["--no-newline"]),
        )),
        Box::new(CommandClipboard::new(
            "xclip",
            CommandSpec::new("xclip", &["-selection", "clipboard", "-in"]),
            CommandSpec::new("xclip", &["-selection", "clipboard", "-out"]),
        )),
        Box::new(CommandClipboard::new(
            "xsel",
            CommandSpec::new("xsel", &["--clipboard", "--input"]),
            CommandSpec::new("xsel", &["--clipboard", "--output"]),
        )),
    ]
}

fn keysym(key: KeyCode) -> String {
    match key {
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "Return".into(),
        KeyCode::Tab => "Tab".into(),
        KeyCode::Escape => "Escape".into(),
        KeyCode::Space => "space".into(),
        KeyCode::Backspace => "BackSpace".into(),
        KeyCode::Delete => "Delete".into(),
        KeyCode::Home => "Home".into(),
        KeyCode::End => "End".into(),
        KeyCode::Up => "Up".into(),
        KeyCode::Down => "Down".into(),
        KeyCode::Left => "Left".into(),
        KeyCode::Right => "Right".into(),
    }
}

/// `xdotool key` combination, e.g. `ctrl+shift+v`
pub fn xdotool_combo(chord: &KeyChord) -> String {
    let mut parts: Vec<String> = chord
        .modifiers
        .iter()
        .map(|m| {
            match m {
                Modifier::Control => "ctrl",
                Modifier::Alt => "alt",
                Modifier::Shift => "shift",
                Modifier::Meta => "super",
            }
            .to_string()
        })
        .collect();
    parts.push(keysym(chord.key));
    parts.join("+")
}

pub fn key_script(chord: &KeyChord) -> Option<CommandSpec> {
    let combo = xdotool_combo(chord);
    Some(CommandSpec::new("xdotool", &["key", "--clearmodifiers", &combo]))
}

pub fn type_script(text: &str) -> Option<CommandSpec> {
    Some(CommandSpec::new(
        "xdotool",
        &["type", "--clearmodifiers", "--delay", "5", "--", text],
    ))
}

/// Activate the first visible window owned by `pid`
pub fn activate_pid_script(pid: u32) -> Option<CommandSpec> {
    let pid = pid.to_string();
    Some(CommandSpec::new(
        "xdotool",
        &["search", "--onlyvisible", "--pid", &pid, "windowactivate", "--sync"],
    ))
}

/// Raise by X window id when known, by title otherwise
pub fn raise_window_script(window: &WindowRef) -> Option<CommandSpec> {
    if window.id.parse::<u64>().is_ok() {
        return Some(CommandSpec::new("xdotool", &["windowactivate", "--sync", &window.id]));
    }
    if window.title.is_empty() {
        return None;
    }
    Some(CommandSpec::new("wmctrl", &["-a", &window.title]))
}
