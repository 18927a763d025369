//! Windows command builders (PowerShell, WScript.Shell) and the Win32
//! foreground-window strategy

use crate::clipboard::{ClipboardBackend, CommandClipboard, CommandSpec};
use crate::input::{KeyChord, KeyCode, Modifier};
use crate::window::WindowRef;

fn powershell(script: &str) -> CommandSpec {
    CommandSpec::new(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", script],
    )
}

/// Single-quoted PowerShell literal
fn ps_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

pub fn clipboard_backends() -> Vec<Box<dyn ClipboardBackend>> {
    let reader = powershell("Get-Clipboard -Raw");
    vec![
        Box::new(CommandClipboard::new(
            "powershell",
            powershell("Set-Clipboard -Value ([Console]::In.ReadToEnd())"),
            reader.clone(),
        )),
        Box::new(CommandClipboard::new(
            "clip",
            CommandSpec::new("clip", &[]),
            reader,
        )),
    ]
}

/// `SendKeys` notation, e.g. `^v`, `{ENTER}`
pub fn send_keys_notation(chord: &KeyChord) -> Option<String> {
    let mut keys = String::new();
    for modifier in &chord.modifiers {
        keys.push(match modifier {
            Modifier::Control => '^',
            Modifier::Alt => '%',
            Modifier::Shift => '+',
            // SendKeys has no Windows-key prefix
            Modifier::Meta => return None,
        });
    }
    keys.push_str(&match chord.key {
        KeyCode::Char(c) => escape_send_keys(&c.to_string()),
        KeyCode::Enter => "{ENTER}".into(),
        KeyCode::Tab => "{TAB}".into(),
        KeyCode::Escape => "{ESC}".into(),
        KeyCode::Space => " ".into(),
        KeyCode::Backspace => "{BACKSPACE}".into(),
        KeyCode::Delete => "{DELETE}".into(),
        KeyCode::Home => "{HOME}".into(),
        KeyCode::End => "{END}".into(),
        KeyCode::Up => "{UP}".into(),
        KeyCode::Down => "{DOWN}".into(),
        KeyCode::Left => "{LEFT}".into(),
        KeyCode::Right => "{RIGHT}".into(),
    });
    Some(keys)
}

/// Brace the characters SendKeys treats as syntax
pub fn escape_send_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '+' | '^' | '%' | '~' | '(' | ')' | '{' | '}' | '[' | ']' => {
                out.push('{');
                out.push(c);
                out.push('}');
            }
            '\n' => out.push_str("{ENTER}"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

fn send_keys(keys: &str) -> CommandSpec {
    powershell(&format!(
        "(New-Object -ComObject WScript.Shell).SendKeys({})",
        ps_quote(keys)
    ))
}

pub fn key_script(chord: &KeyChord) -> Option<CommandSpec> {
    send_keys_notation(chord).map(|keys| send_keys(&keys))
}

pub fn type_script(text: &str) -> Option<CommandSpec> {
    Some(send_keys(&escape_send_keys(text)))
}

pub fn activate_pid_script(pid: u32) -> Option<CommandSpec> {
    Some(powershell(&format!(
        "if (-not (New-Object -ComObject WScript.Shell).AppActivate({})) {{ exit 1 }}",
        pid
    )))
}

pub fn raise_window_script(window: &WindowRef) -> Option<CommandSpec> {
    if window.title.is_empty() {
        return None;
    }
    Some(powershell(&format!(
        "if (-not (New-Object -ComObject WScript.Shell).AppActivate({})) {{ exit 1 }}",
        ps_quote(&window.title)
    )))
}

#[cfg(target_os = "windows")]
pub use native::ForegroundWindowStrategy;

#[cfg(target_os = "windows")]
mod native {
    use anyhow::{anyhow, Result};
    use ::windows::Win32::Foundation::{BOOL, HWND, LPARAM};
    use ::windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
        SetForegroundWindow, ShowWindow, SW_RESTORE,
    };

    use crate::process::ProcessHandle;
    use crate::window::{WindowRef, WindowStrategy};

    /// Finds a visible top-level window owned by the target's lineage and
    /// brings it to the foreground
    pub struct ForegroundWindowStrategy;

    struct Found {
        pids: Vec<u32>,
        window: Option<(HWND, u32, String)>,
    }

    unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let found = &mut *(lparam.0 as *mut Found);

        if !IsWindowVisible(hwnd).as_bool() {
            return BOOL(1);
        }

        let mut pid: u32 = 0;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        if !found.pids.contains(&pid) {
            return BOOL(1);
        }

        let mut title_buf = [0u16; 512];
        let len = GetWindowTextW(hwnd, &mut title_buf);
        if len <= 0 {
            return BOOL(1);
        }
        let title = String::from_utf16_lossy(&title_buf[..len as usize]);

        found.window = Some((hwnd, pid, title));
        BOOL(0)
    }

    impl WindowStrategy for ForegroundWindowStrategy {
        fn name(&self) -> &str {
            "win32_foreground"
        }

        fn activate(&self, target: &ProcessHandle) -> Result<WindowRef> {
            let mut found = Found {
                pids: target.lineage(),
                window: None,
            };

            unsafe {
                // stopping early makes EnumWindows report an error, so ignore it
                let _ = EnumWindows(Some(enum_callback), LPARAM(&mut found as *mut Found as isize));
            }

            let (hwnd, pid, title) = found
                .window
                .ok_or_else(|| anyhow!("no visible window for pid {}", target.pid))?;

            unsafe {
                let _ = ShowWindow(hwnd, SW_RESTORE);
                if !SetForegroundWindow(hwnd).as_bool() {
                    return Err(anyhow!("Failed to set foreground window"));
                }
            }

            Ok(WindowRef {
                id: (hwnd.0 as usize).to_string(),
                title,
                pid,
            })
        }
    }
}
