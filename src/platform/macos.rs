//! macOS command builders: System Events through `osascript`, pbcopy/pbpaste,
//! and the consent-dialog probe

use crate::clipboard::{ClipboardBackend, CommandClipboard, CommandSpec};
use crate::input::{KeyChord, KeyCode, Modifier};
use crate::permission::{DialogInfo, Rect};
use crate::window::WindowRef;

use super::escape_double_quoted;

/// Agents that own the accessibility / screen recording consent windows
pub const DIALOG_OWNERS: &[&str] = &[
    "UserNotificationCenter",
    "universalAccessAuthWarn",
    "SecurityAgent",
    "CoreServicesUIAgent",
];

pub fn clipboard_backends() -> Vec<Box<dyn ClipboardBackend>> {
    vec![Box::new(CommandClipboard::new(
        "pbcopy",
        CommandSpec::new("pbcopy", &[]),
        CommandSpec::new("pbpaste", &[]),
    ))]
}

fn osascript(script: &str) -> CommandSpec {
    CommandSpec::new("osascript", &["-e", script])
}

/// Virtual key code for keys System Events cannot `keystroke`
fn key_code(key: KeyCode) -> Option<u16> {
    Some(match key {
        KeyCode::Enter => 36,
        KeyCode::Tab => 48,
        KeyCode::Space => 49,
        KeyCode::Backspace => 51,
        KeyCode::Escape => 53,
        KeyCode::Home => 115,
        KeyCode::Delete => 117,
        KeyCode::End => 119,
        KeyCode::Left => 123,
        KeyCode::Right => 124,
        KeyCode::Down => 125,
        KeyCode::Up => 126,
        KeyCode::Char(_) => return None,
    })
}

/// AppleScript for one chord, e.g. `keystroke "v" using {command down}`
pub fn chord_statement(chord: &KeyChord) -> Option<String> {
    let action = match chord.key {
        KeyCode::Char(c) => format!("keystroke \"{}\"", escape_double_quoted(&c.to_string())),
        named => format!("key code {}", key_code(named)?),
    };
    if chord.modifiers.is_empty() {
        return Some(action);
    }

    let held: Vec<&str> = chord
        .modifiers
        .iter()
        .map(|m| match m {
            Modifier::Control => "control down",
            Modifier::Alt => "option down",
            Modifier::Shift => "shift down",
            Modifier::Meta => "command down",
        })
        .collect();
    Some(format!("{} using {{{}}}", action, held.join(", ")))
}

pub fn key_script(chord: &KeyChord) -> Option<CommandSpec> {
    Some(osascript(&format!(
        "tell application \"System Events\" to {}",
        chord_statement(chord)?
    )))
}

pub fn type_script(text: &str) -> Option<CommandSpec> {
    Some(osascript(&format!(
        "tell application \"System Events\" to keystroke \"{}\"",
        escape_double_quoted(text)
    )))
}

pub fn activate_pid_script(pid: u32) -> Option<CommandSpec> {
    Some(osascript(&format!(
        "tell application \"System Events\" to set frontmost of (first process whose unix id is {}) to true",
        pid
    )))
}

/// Bring the owning process forward and raise the titled window
pub fn raise_window_script(window: &WindowRef) -> Option<CommandSpec> {
    if window.title.is_empty() {
        return None;
    }
    let script = format!(
        "tell application \"System Events\"\n\
         set p to first process whose unix id is {pid}\n\
         set frontmost of p to true\n\
         perform action \"AXRaise\" of (first window of p whose name is \"{title}\")\n\
         end tell",
        pid = window.pid,
        title = escape_double_quoted(&window.title),
    );
    Some(osascript(&script))
}

/// Prints `owner|title|x,y,w,h|button,button` for the first consent window, or nothing
pub fn dialog_probe() -> CommandSpec {
    let owners = DIALOG_OWNERS
        .iter()
        .map(|o| format!("\"{}\"", o))
        .collect::<Vec<_>>()
        .join(", ");
    let script = format!(
        r#"tell application "System Events"
    repeat with procName in {{{owners}}}
        if exists process procName then
            tell process procName
                if (count of windows) > 0 then
                    set w to window 1
                    set {{px, py}} to position of w
                    set {{sx, sy}} to size of w
                    set AppleScript's text item delimiters to ","
                    set labels to (name of every button of w) as text
                    return (procName as text) & "|" & (name of w as text) & "|" & px & "," & py & "," & sx & "," & sy & "|" & labels
                end if
            end tell
        end if
    end repeat
end tell
return """#
    );
    osascript(&script)
}

/// Parse the probe's output line
pub fn parse_dialog(output: &str) -> Option<DialogInfo> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.splitn(4, '|');
    let owner = fields.next()?.trim().to_string();
    if owner.is_empty() {
        return None;
    }
    let title = match fields.next().map(str::trim) {
        Some("missing value") | None => String::new(),
        Some(t) => t.to_string(),
    };

    let bounds = fields.next().and_then(|b| {
        let nums: Vec<f64> = b
            .split(',')
            .filter_map(|n| n.trim().parse().ok())
            .collect();
        match nums.as_slice() {
            [x, y, w, h] => Some(Rect::new(*x, *y, *w, *h)),
            _ => None,
        }
    });

    let buttons = fields
        .next()
        .map(|b| {
            b.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != "missing value")
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Some(DialogInfo {
        owner,
        title,
        bounds,
        buttons,
    })
}

/// Click `button` in the dialog's front window
pub fn click_button_script(dialog: &DialogInfo, button: &str) -> Option<CommandSpec> {
    Some(osascript(&format!(
        "tell application \"System Events\" to tell process \"{}\" to click button \"{}\" of window 1",
        escape_double_quoted(&dialog.owner),
        escape_double_quoted(button)
    )))
}
