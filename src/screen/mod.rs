//! Screen-based detection of confirmation prompts
//!
//! Frames are cropped to the lower part of the screen, where the tool renders
//! its prompts. A pixel-diff heuristic decides whether anything changed, and
//! gates the precise detectors (OCR, templates). Without any precise
//! detector, the heuristic reports a match once a change has settled.

pub mod capture;
pub mod detectors;
pub mod ocr;

use anyhow::Result;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use capture::{lower_region, ScreenSource, PROMPT_REGION_FRACTION};
use detectors::{Detector, PixelDiffDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    None,
    /// The default option is the affirmative one
    PressEnter,
    /// Someone should look before confirming
    CheckThenEnter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Vision,
    Template,
    PixelDiff,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub found: bool,
    pub matched_options: Vec<String>,
    pub suggested_action: SuggestedAction,
    pub detection_method: DetectionMethod,
}

impl DetectionResult {
    pub fn none() -> Self {
        Self {
            found: false,
            matched_options: Vec::new(),
            suggested_action: SuggestedAction::None,
            detection_method: DetectionMethod::None,
        }
    }

    pub fn found(method: DetectionMethod, options: Vec<String>, action: SuggestedAction) -> Self {
        Self {
            found: true,
            matched_options: options,
            suggested_action: action,
            detection_method: method,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Found,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorOutcome {
    pub status: MonitorStatus,
    pub result: Option<DetectionResult>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub polls: u32,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

pub struct ScreenMonitor {
    source: Option<Box<dyn ScreenSource>>,
    detectors: Vec<Box<dyn Detector>>,
    pixel_diff: Option<PixelDiffDetector>,
    region_fraction: f32,
    clock: Arc<dyn Clock>,
}

impl ScreenMonitor {
    pub fn new(
        source: Option<Box<dyn ScreenSource>>,
        detectors: Vec<Box<dyn Detector>>,
        pixel_diff: Option<PixelDiffDetector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            detectors,
            pixel_diff,
            region_fraction: PROMPT_REGION_FRACTION,
            clock,
        }
    }

    /// Monitor with no capture and no detectors
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self::new(None, Vec::new(), None, clock)
    }

    pub fn can_capture(&self) -> bool {
        self.source.is_some()
    }

    pub fn has_precise_detector(&self) -> bool {
        !self.detectors.is_empty()
    }

    pub fn pixel_diff_threshold(&self) -> Option<f32> {
        self.pixel_diff.as_ref().map(|p| p.threshold())
    }

    pub fn capture(&self) -> Result<RgbaImage> {
        match &self.source {
            Some(source) => source.capture(),
            None => Err(anyhow::anyhow!("screen capture unavailable")),
        }
    }

    /// Capture and crop to the prompt region
    pub fn capture_region(&self) -> Result<RgbaImage> {
        Ok(lower_region(&self.capture()?, self.region_fraction))
    }

    pub fn region_of(&self, frame: &RgbaImage) -> RgbaImage {
        lower_region(frame, self.region_fraction)
    }

    /// Run the detector chain on `screenshot`, or on a fresh capture
    pub fn detect(&self, screenshot: Option<&RgbaImage>) -> DetectionResult {
        let region = match screenshot {
            Some(frame) => self.region_of(frame),
            None => match self.capture_region() {
                Ok(region) => region,
                Err(e) => {
                    tracing::debug!("capture failed: {}", e);
                    return DetectionResult::none();
                }
            },
        };

        let signal = self.pixel_diff.as_ref().map(|p| p.observe(&region));
        let gate_open = signal.map_or(true, |s| s.opens_gate());

        if gate_open {
            for detector in &self.detectors {
                match detector.detect(&region) {
                    Ok(result) if result.found => {
                        tracing::info!(method = ?detector.method(), options = ?result.matched_options, "prompt detected");
                        return result;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(method = ?detector.method(), "detector failed: {}", e),
                }
            }
        }

        match signal {
            Some(signal) if self.detectors.is_empty() => {
                let result = PixelDiffDetector::standalone_result(signal);
                if result.found {
                    tracing::info!("screen changed and settled, possible prompt");
                }
                result
            }
            _ => DetectionResult::none(),
        }
    }

    /// Poll until a prompt is found or `duration` elapses
    pub fn monitor(&self, duration: Duration, poll_interval: Duration) -> MonitorOutcome {
        if let Some(pixel_diff) = &self.pixel_diff {
            pixel_diff.reset();
        }

        let start = self.clock.now();
        let mut polls = 0;
        loop {
            polls += 1;
            let result = self.detect(None);
            let elapsed = self.clock.elapsed_since(start);

            if result.found {
                return MonitorOutcome {
                    status: MonitorStatus::Found,
                    result: Some(result),
                    elapsed,
                    polls,
                };
            }
            if elapsed >= duration {
                tracing::debug!(polls, "monitoring window elapsed without a prompt");
                return MonitorOutcome {
                    status: MonitorStatus::Timeout,
                    result: None,
                    elapsed,
                    polls,
                };
            }
            self.clock.sleep(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Frames(Mutex<Vec<RgbaImage>>);

    impl ScreenSource for Frames {
        fn capture(&self) -> Result<RgbaImage> {
            let mut frames = self.0.lock().unwrap();
            if frames.len() > 1 {
                Ok(frames.remove(0))
            } else {
                Ok(frames[0].clone())
            }
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl Detector for Counting {
        fn method(&self) -> DetectionMethod {
            DetectionMethod::Vision
        }

        fn detect(&self, _region: &RgbaImage) -> Result<DetectionResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(DetectionResult::none())
        }
    }

    fn solid(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(20, 20, Rgba([value, value, value, 255]))
    }

    #[test]
    fn test_pixel_diff_gates_precise_detectors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let monitor = ScreenMonitor::new(
            None,
            vec![Box::new(Counting(Arc::clone(&calls)))],
            Some(PixelDiffDetector::new(0.05)),
            Arc::new(ManualClock::new()),
        );

        // baseline opens the gate, unchanged frames keep it shut
        monitor.detect(Some(&solid(0)));
        monitor.detect(Some(&solid(0)));
        monitor.detect(Some(&solid(0)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        monitor.detect(Some(&solid(200)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_standalone_pixel_diff_never_fires_on_first_frame() {
        let clock = Arc::new(ManualClock::new());
        let source = Frames(Mutex::new(vec![solid(0), solid(200), solid(200)]));
        let monitor = ScreenMonitor::new(
            Some(Box::new(source)),
            Vec::new(),
            Some(PixelDiffDetector::new(0.05)),
            clock,
        );

        assert!(!monitor.detect(None).found);
        assert!(!monitor.detect(None).found);
        let settled = monitor.detect(None);
        assert!(settled.found);
        assert_eq!(settled.detection_method, DetectionMethod::PixelDiff);
        assert_eq!(settled.suggested_action, SuggestedAction::CheckThenEnter);
    }

    #[test]
    fn test_monitor_times_out_within_bound() {
        let clock = Arc::new(ManualClock::new());
        let source = Frames(Mutex::new(vec![solid(0)]));
        let monitor = ScreenMonitor::new(
            Some(Box::new(source)),
            Vec::new(),
            Some(PixelDiffDetector::new(0.05)),
            clock,
        );

        let outcome = monitor.monitor(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(outcome.status, MonitorStatus::Timeout);
        assert!(outcome.elapsed >= Duration::from_secs(5));
        assert!(outcome.elapsed <= Duration::from_secs(7));
    }

    #[test]
    fn test_detect_without_capture_is_negative() {
        let monitor = ScreenMonitor::disabled(Arc::new(ManualClock::new()));
        assert!(!monitor.detect(None).found);
        assert!(!monitor.can_capture());
    }
}
