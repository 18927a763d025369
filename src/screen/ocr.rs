//! Optional text recognition

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A recognized word and its bounding box in image coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordBox {
    pub text: String,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
}

impl WordBox {
    pub fn center(&self) -> (i32, i32) {
        (self.left + self.width / 2, self.top + self.height / 2)
    }
}

pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    fn recognize(&self, image: &RgbaImage) -> Result<String>;

    fn locate_words(&self, image: &RgbaImage) -> Result<Vec<WordBox>>;
}

/// Used when no OCR engine is installed
pub struct UnavailableRecognizer;

impl TextRecognizer for UnavailableRecognizer {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn recognize(&self, _image: &RgbaImage) -> Result<String> {
        Err(anyhow!("no OCR engine configured"))
    }

    fn locate_words(&self, _image: &RgbaImage) -> Result<Vec<WordBox>> {
        Err(anyhow!("no OCR engine configured"))
    }
}

/// The `tesseract` command-line engine
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    command: String,
}

impl TesseractRecognizer {
    /// Returns `None` when `command --version` cannot be run
    pub fn detect(command: &str) -> Option<Self> {
        let found = Command::new(command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success());
        if !found {
            tracing::info!(command, "OCR engine not found, vision detection disabled");
        }
        found.then(|| Self {
            command: command.to_string(),
        })
    }

    fn run(&self, image: &RgbaImage, extra: &[&str]) -> Result<String> {
        let path = scratch_image_path();
        image
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let output = Command::new(&self.command)
            .arg(&path)
            .arg("stdout")
            .args(extra)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        let _ = fs::remove_file(&path);

        let output = output.with_context(|| format!("Failed to run {}", self.command))?;
        if !output.status.success() {
            return Err(anyhow!("{} exited with {}", self.command, output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &RgbaImage) -> Result<String> {
        self.run(image, &[])
    }

    fn locate_words(&self, image: &RgbaImage) -> Result<Vec<WordBox>> {
        Ok(parse_tsv(&self.run(image, &["tsv"])?))
    }
}

fn scratch_image_path() -> PathBuf {
    std::env::temp_dir().join(format!("cli-autopilot-ocr-{}.png", uuid::Uuid::new_v4()))
}

/// Word rows of tesseract's TSV output
pub fn parse_tsv(tsv: &str) -> Vec<WordBox> {
    tsv.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                return None;
            }
            let text = cols[11].trim();
            if text.is_empty() {
                return None;
            }
            Some(WordBox {
                text: text.to_string(),
                left: cols[6].parse().ok()?,
                top: cols[7].parse().ok()?,
                width: cols[8].parse().ok()?,
                height: cols[9].parse().ok()?,
                confidence: cols[10].parse().unwrap_or(-1.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tsv_keeps_word_rows() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t410\t300\t60\t20\t96.5\tAllow\n\
                   5\t1\t1\t1\t1\t2\t480\t300\t40\t20\t91\t \n";
        let words = parse_tsv(tsv);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "Allow");
        assert_eq!(words[0].center(), (440, 310));
    }

    #[test]
    fn test_unavailable_recognizer_reports_itself() {
        let ocr = UnavailableRecognizer;
        assert!(!ocr.is_available());
        assert!(ocr.recognize(&RgbaImage::new(1, 1)).is_err());
    }
}
