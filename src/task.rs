use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{AutomationError, Result};

/// Text to deliver and the file it came from; never mutated after loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTask {
    pub payload_text: String,
    pub source_file_path: PathBuf,
}

impl DeliveryTask {
    pub fn from_file(path: &Path) -> Result<Self> {
        let payload_text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                AutomationError::TaskFileMissing(path.to_path_buf())
            } else {
                AutomationError::TaskFileUnreadable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        tracing::debug!(path = %path.display(), chars = payload_text.chars().count(), "task loaded");

        Ok(Self {
            payload_text,
            source_file_path: path.to_path_buf(),
        })
    }
}
