//! Task files in the scratch directory
//!
//! The generation side writes each payload as `prompt_YYYYmmdd_HHMMSS.txt`
//! with a fixed section layout; the delivery side picks the newest one up.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::Result;

const TITLE: &str = "# AI Agent Task Prompt";
const ROLE: &str = "## Role";
const GOAL: &str = "## Goal";
const FUNCTION_OUTPUT: &str = "## Function Output";
const UI_REQUIREMENTS: &str = "## UI Requirements";
const CLOSING: &str = "Please carry out the AI agent task described above.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSections {
    pub role: String,
    pub goal: String,
    pub function_output: String,
    pub ui_requirements: String,
}

impl PromptSections {
    pub fn render(&self) -> String {
        format!(
            "{TITLE}\n# Generated: {}\n\n{ROLE}\n{}\n\n{GOAL}\n{}\n\n{FUNCTION_OUTPUT}\n{}\n\n{UI_REQUIREMENTS}\n{}\n\n---\n{CLOSING}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.role.trim(),
            self.goal.trim(),
            self.function_output.trim(),
            self.ui_requirements.trim(),
        )
    }

    /// Read the four sections back out of a rendered task
    pub fn parse(text: &str) -> Self {
        let mut sections = Self::default();
        let mut which = Section::None;
        for line in text.lines() {
            match line.trim_end() {
                ROLE => which = Section::Role,
                GOAL => which = Section::Goal,
                FUNCTION_OUTPUT => which = Section::FunctionOutput,
                UI_REQUIREMENTS => which = Section::UiRequirements,
                "---" => which = Section::None,
                _ => {
                    let slot = match which {
                        Section::Role => &mut sections.role,
                        Section::Goal => &mut sections.goal,
                        Section::FunctionOutput => &mut sections.function_output,
                        Section::UiRequirements => &mut sections.ui_requirements,
                        Section::None => continue,
                    };
                    slot.push_str(line);
                    slot.push('\n');
                }
            }
        }

        for slot in [
            &mut sections.role,
            &mut sections.goal,
            &mut sections.function_output,
            &mut sections.ui_requirements,
        ] {
            *slot = slot.trim().to_string();
        }
        sections
    }
}

#[derive(Clone, Copy)]
enum Section {
    None,
    Role,
    Goal,
    FunctionOutput,
    UiRequirements,
}

/// Outcome of [`ScratchDir::cleanup_older_than`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScratchCleanup {
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Write `sections` to a new timestamped task file
    pub fn write_task(&self, sections: &PromptSections) -> Result<PathBuf> {
        self.ensure()?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut path = self.root.join(format!("prompt_{}.txt", stamp));
        let mut n = 2;
        while path.exists() {
            path = self.root.join(format!("prompt_{}_{}.txt", stamp, n));
            n += 1;
        }

        fs::write(&path, sections.render())?;
        tracing::info!(path = %path.display(), "task file written");
        Ok(path)
    }

    /// Most recently modified `prompt_*.txt`
    pub fn latest_task(&self) -> Result<Option<PathBuf>> {
        if !self.root.exists() {
            return Ok(None);
        }

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !(name.starts_with("prompt_") && name.ends_with(".txt")) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    pub fn cleanup_older_than(&self, hours: u64) -> Result<ScratchCleanup> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(hours.saturating_mul(3600)))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.cleanup_before(cutoff)
    }

    /// Delete regular files last modified before `cutoff`
    pub fn cleanup_before(&self, cutoff: SystemTime) -> Result<ScratchCleanup> {
        let mut report = ScratchCleanup::default();
        if !self.root.exists() {
            return Ok(report);
        }

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    report.errors.push(format!("{}: {}", name, e));
                    continue;
                }
            };
            let old = metadata.modified().map(|m| m < cutoff).unwrap_or(false);
            if !old {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => report.deleted.push(name),
                Err(e) => report.errors.push(format!("{}: {}", name, e)),
            }
        }

        tracing::info!(deleted = report.deleted.len(), errors = report.errors.len(), "scratch cleanup finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PromptSections {
        PromptSections {
            role: "Senior frontend engineer".into(),
            goal: "Build a landing page\nwith a hero section".into(),
            function_output: "index.html and styles.css".into(),
            ui_requirements: "Dark theme".into(),
        }
    }

    #[test]
    fn test_render_has_fixed_layout() {
        let text = sample().render();
        assert!(text.starts_with(TITLE));
        let role = text.find(ROLE).unwrap();
        let goal = text.find(GOAL).unwrap();
        let output = text.find(FUNCTION_OUTPUT).unwrap();
        let ui = text.find(UI_REQUIREMENTS).unwrap();
        assert!(role < goal && goal < output && output < ui);
        assert!(text.trim_end().ends_with(CLOSING));
    }

    #[test]
    fn test_parse_reads_rendered_sections() {
        assert_eq!(PromptSections::parse(&sample().render()), sample());
    }

    #[test]
    fn test_latest_task_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        assert!(scratch.latest_task().unwrap().is_none());

        let first = scratch.write_task(&sample()).unwrap();
        let second = scratch.write_task(&sample()).unwrap();
        assert_ne!(first, second);
        fs::write(dir.path().join("notes.md"), "not a task").unwrap();

        let latest = scratch.latest_task().unwrap().unwrap();
        assert!(latest == first || latest == second);

        let kept = scratch.cleanup_older_than(1).unwrap();
        assert!(kept.deleted.is_empty());

        let future = SystemTime::now() + Duration::from_secs(60);
        let purged = scratch.cleanup_before(future).unwrap();
        assert_eq!(purged.deleted.len(), 3);
        assert!(scratch.latest_task().unwrap().is_none());
    }

    #[test]
    fn test_huge_age_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        scratch.write_task(&sample()).unwrap();

        let report = scratch.cleanup_older_than(u64::MAX).unwrap();
        assert!(report.deleted.is_empty());
        assert!(report.errors.is_empty());
        assert!(scratch.latest_task().unwrap().is_some());
    }
}
