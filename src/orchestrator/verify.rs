//! Did the pasted text land in the tool's input?
//!
//! The clipboard holding the payload proves nothing about the screen, so the
//! check looks at the prompt region: an `End` probe moves the cursor without
//! editing, then OCR looks for a fragment of the payload, or without OCR the
//! region must have changed since before the paste.

use image::{imageops, RgbaImage};
use serde::Serialize;

use crate::clipboard::normalize_for_match;
use crate::input::{InputInjector, KeyCode};
use crate::screen::detectors::{changed_fraction, PIXEL_TOLERANCE};
use crate::screen::ocr::TextRecognizer;
use crate::screen::ScreenMonitor;

/// Default changed-pixel fraction when the monitor has no pixel-diff stage
pub const DEFAULT_CHANGE_THRESHOLD: f32 = 0.02;

/// Minimum normalized characters of payload that OCR must find
const FRAGMENT_CHARS: usize = 12;

#[derive(Debug, Clone, Serialize)]
pub struct PasteVerification {
    pub verified: bool,
    /// `ocr` or `pixel_diff`
    pub method: Option<String>,
    pub detail: String,
}

impl PasteVerification {
    fn verified(method: &str, detail: String) -> Self {
        Self {
            verified: true,
            method: Some(method.to_string()),
            detail,
        }
    }

    fn unverified(detail: impl Into<String>) -> Self {
        Self {
            verified: false,
            method: None,
            detail: detail.into(),
        }
    }
}

/// Capture the prompt region before pasting, if the screen can be read
pub fn capture_before(screen: &ScreenMonitor) -> Option<RgbaImage> {
    if !screen.can_capture() {
        return None;
    }
    match screen.capture_region() {
        Ok(region) => Some(region),
        Err(e) => {
            tracing::debug!("pre-paste capture failed: {}", e);
            None
        }
    }
}

pub fn verify_paste(
    screen: &ScreenMonitor,
    recognizer: &dyn TextRecognizer,
    input: &InputInjector,
    before: Option<&RgbaImage>,
    payload: &str,
) -> PasteVerification {
    if !screen.can_capture() {
        return PasteVerification::unverified("screen capture unavailable");
    }

    let probe = input.send_key(KeyCode::End, 1);
    if !probe.success {
        tracing::debug!("cursor probe was not delivered");
    }

    let after = match screen.capture_region() {
        Ok(region) => region,
        Err(e) => return PasteVerification::unverified(format!("capture failed: {}", e)),
    };

    if recognizer.is_available() {
        return match recognizer.recognize(&after) {
            Ok(text) if shows_payload(&text, payload) => {
                PasteVerification::verified("ocr", "payload text visible in input".to_string())
            }
            Ok(_) => PasteVerification::unverified("payload text not found on screen"),
            Err(e) => PasteVerification::unverified(format!("OCR failed: {}", e)),
        };
    }

    let Some(before) = before else {
        return PasteVerification::unverified("no frame from before the paste");
    };

    let threshold = screen.pixel_diff_threshold().unwrap_or(DEFAULT_CHANGE_THRESHOLD);
    let changed = changed_fraction(
        &imageops::grayscale(before),
        &imageops::grayscale(&after),
        PIXEL_TOLERANCE,
    );
    if changed > threshold {
        PasteVerification::verified("pixel_diff", format!("{:.1}% of input region changed", changed * 100.0))
    } else {
        PasteVerification::unverified(format!(
            "input region unchanged ({:.1}% <= {:.1}%)",
            changed * 100.0,
            threshold * 100.0
        ))
    }
}

/// OCR text shows the payload, either literally or as a collapsed paste marker
pub fn shows_payload(ocr_text: &str, payload: &str) -> bool {
    let screen = normalize_for_match(ocr_text);
    // long pastes are folded into "[Pasted text #1 +42 lines]"
    if screen.contains("pastedtext") {
        return true;
    }

    payload
        .lines()
        .map(normalize_for_match)
        .filter(|line| !line.starts_with('#') && line.chars().count() >= FRAGMENT_CHARS)
        .take(5)
        .any(|line| {
            let fragment: String = line.chars().take(FRAGMENT_CHARS).collect();
            screen.contains(&fragment)
        })
}
