//! Confirmation-prompt detectors

use anyhow::{anyhow, Result};
use image::{imageops, GrayImage, RgbaImage};
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};
use regex::Regex;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use super::ocr::TextRecognizer;
use super::{DetectionMethod, DetectionResult, SuggestedAction};

/// A precise detector run over the prompt region
pub trait Detector: Send + Sync {
    fn method(&self) -> DetectionMethod;

    fn detect(&self, region: &RgbaImage) -> Result<DetectionResult>;
}

fn question_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(do you want to|would you like to|proceed\?|are you sure)").unwrap()
    })
}

fn yes_no_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[\(\[]\s*y\s*/\s*n\s*[\)\]]").unwrap())
}

fn option_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "❯ 1. Yes", "> 2. No, and tell Claude what to do differently"
    RE.get_or_init(|| Regex::new(r"(?m)^[\s│|>❯›»*]*(\d)[\.\)]\s+(.+?)\s*[│|]?\s*$").unwrap())
}

fn choice_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // the whole word, so "Node setup" or "Yesterday" are not answers
    RE.get_or_init(|| Regex::new(r"(?i)^(yes|no)(?:[\s,.!]|$)").unwrap())
}

/// "yes" or "no" when the option answers with that word
fn choice_word(option: &str) -> Option<String> {
    choice_pattern()
        .captures(option)
        .map(|c| c[1].to_lowercase())
}

/// Parse OCR text for a confirmation prompt
///
/// A numbered list only counts when a question sits above it or when it
/// offers both a yes and a no answer.
pub fn parse_prompt(text: &str) -> Option<(Vec<String>, SuggestedAction)> {
    let options: Vec<String> = option_pattern()
        .captures_iter(text)
        .map(|c| c[2].trim().to_string())
        .collect();
    let answers: Vec<String> = options.iter().filter_map(|o| choice_word(o)).collect();
    let offers_both = answers.iter().any(|a| a == "yes") && answers.iter().any(|a| a == "no");
    let has_question = question_pattern().is_match(text);
    let has_yes_no = yes_no_pattern().is_match(text);

    let numbered_prompt = !options.is_empty() && (has_question || offers_both);
    if !(numbered_prompt || has_yes_no) {
        return None;
    }

    let options = if options.is_empty() && has_yes_no {
        vec!["y".to_string(), "n".to_string()]
    } else {
        options
    };

    let action = match options.first().and_then(|o| choice_word(o)) {
        Some(word) if word == "yes" => SuggestedAction::PressEnter,
        _ => SuggestedAction::CheckThenEnter,
    };

    Some((options, action))
}

/// OCR the region and look for prompt text
pub struct VisionDetector {
    recognizer: Box<dyn TextRecognizer>,
}

impl VisionDetector {
    pub fn new(recognizer: Box<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }
}

impl Detector for VisionDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Vision
    }

    fn detect(&self, region: &RgbaImage) -> Result<DetectionResult> {
        let text = self.recognizer.recognize(region)?;
        Ok(match parse_prompt(&text) {
            Some((options, action)) => DetectionResult::found(DetectionMethod::Vision, options, action),
            None => DetectionResult::none(),
        })
    }
}

/// Grayscale template matching with normalized SSE
pub struct TemplateDetector {
    templates: Vec<(String, GrayImage)>,
    threshold: f32,
}

impl TemplateDetector {
    pub fn new(templates: Vec<(String, GrayImage)>, threshold: f32) -> Self {
        Self { templates, threshold }
    }

    /// Every `*.png` in `dir`, named by file stem
    pub fn from_dir(dir: &Path, threshold: f32) -> Result<Self> {
        let mut templates = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            match image::open(&path) {
                Ok(img) => templates.push((name, img.to_luma8())),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable template: {}", e),
            }
        }
        if templates.is_empty() {
            return Err(anyhow!("no PNG templates in {}", dir.display()));
        }
        tracing::info!(count = templates.len(), "prompt templates loaded");
        Ok(Self::new(templates, threshold))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Detector for TemplateDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Template
    }

    fn detect(&self, region: &RgbaImage) -> Result<DetectionResult> {
        let gray = imageops::grayscale(region);

        for (name, template) in &self.templates {
            if template.width() > gray.width() || template.height() > gray.height() {
                continue;
            }
            let scores = match_template(&gray, template, MatchTemplateMethod::SumOfSquaredErrorsNormalized);
            let best = find_extremes(&scores).min_value;
            tracing::debug!(template = %name, score = best, "template score");
            if best <= self.threshold {
                return Ok(DetectionResult::found(
                    DetectionMethod::Template,
                    vec![name.clone()],
                    SuggestedAction::CheckThenEnter,
                ));
            }
        }
        Ok(DetectionResult::none())
    }
}

/// What the pixel-diff heuristic saw on one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiffSignal {
    /// No previous frame to compare against
    Baseline,
    /// Region changed by this fraction of pixels
    Changed(f32),
    /// First stable frame after a change
    Settled,
    Idle,
}

impl DiffSignal {
    /// Whether precise detectors should run on this frame
    pub fn opens_gate(self) -> bool {
        !matches!(self, DiffSignal::Idle)
    }
}

/// Luma difference below which a pixel counts as unchanged
pub const PIXEL_TOLERANCE: u8 = 24;

/// Fraction of changed pixels between successive frames of the prompt region
pub struct PixelDiffDetector {
    threshold: f32,
    tolerance: u8,
    state: Mutex<DiffState>,
}

#[derive(Default)]
struct DiffState {
    previous: Option<GrayImage>,
    pending_change: bool,
}

impl PixelDiffDetector {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            tolerance: PIXEL_TOLERANCE,
            state: Mutex::new(DiffState::default()),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compare against the previous frame and remember this one
    pub fn observe(&self, region: &RgbaImage) -> DiffSignal {
        let gray = imageops::grayscale(region);
        let Ok(mut guard) = self.state.lock() else {
            return DiffSignal::Baseline;
        };
        let state = &mut *guard;

        let signal = match state.previous.as_ref() {
            None => DiffSignal::Baseline,
            Some(previous) => {
                let changed = changed_fraction(previous, &gray, self.tolerance);
                if changed > self.threshold {
                    state.pending_change = true;
                    DiffSignal::Changed(changed)
                } else if state.pending_change {
                    state.pending_change = false;
                    DiffSignal::Settled
                } else {
                    DiffSignal::Idle
                }
            }
        };

        state.previous = Some(gray);
        signal
    }

    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = DiffState::default();
        }
    }

    /// The heuristic's own verdict when no precise detector is configured
    pub fn standalone_result(signal: DiffSignal) -> DetectionResult {
        match signal {
            DiffSignal::Settled => DetectionResult::found(
                DetectionMethod::PixelDiff,
                Vec::new(),
                SuggestedAction::CheckThenEnter,
            ),
            _ => DetectionResult::none(),
        }
    }
}

/// Fraction of pixels whose luma differs by more than `tolerance`;
/// differently sized frames count as fully changed
pub fn changed_fraction(a: &GrayImage, b: &GrayImage, tolerance: u8) -> f32 {
    if a.dimensions() != b.dimensions() || a.is_empty() {
        return 1.0;
    }
    let changed = a
        .pixels()
        .zip(b.pixels())
        .filter(|(p, q)| p.0[0].abs_diff(q.0[0]) > tolerance)
        .count();
    changed as f32 / (a.width() * a.height()) as f32
}
