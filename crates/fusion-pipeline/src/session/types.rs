//! Session bookkeeping: who ran what, when, and which files came out.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identity and timestamps of a reconstruction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub pipeline: String,
    /// Layout version of the persisted report and config.
    pub schema_version: u32,
    /// Seconds since the Unix epoch.
    pub started: u64,
    /// Bumped by every step, successful or not.
    pub updated: u64,
    /// Free text, e.g. the image directory the CLI was pointed at.
    pub description: Option<String>,
}

impl SessionMetadata {
    pub fn new(pipeline: impl Into<String>, schema_version: u32) -> Self {
        let now = current_timestamp();
        Self {
            pipeline: pipeline.into(),
            schema_version,
            started: now,
            updated: now,
            description: None,
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn touch(&mut self) {
        self.updated = current_timestamp();
    }
}

/// One executed step: `graph`, `infer`, `align`, `clean`, `export`, ...
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: u64,
    pub operation: String,
    pub success: bool,
    /// Step summary on success, error text on failure.
    pub notes: Option<String>,
}

impl LogEntry {
    fn at(operation: impl Into<String>, success: bool, notes: Option<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success,
            notes,
        }
    }

    pub fn success(operation: impl Into<String>) -> Self {
        Self::at(operation, true, None)
    }

    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self::at(operation, true, Some(notes.into()))
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self::at(operation, false, Some(error.into()))
    }
}

/// What an exported file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The GLB scene.
    Model,
    /// A depth or confidence heat map.
    DebugImage,
}

/// A file written by the export or visualize step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub timestamp: u64,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// On-disk size when the record was made; `None` if the file was unreadable.
    pub size_bytes: Option<u64>,
}

impl ArtifactRecord {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
        Self {
            timestamp: current_timestamp(),
            kind,
            path,
            size_bytes,
        }
    }
}

/// Seconds since the Unix epoch, or 0 on a clock set before it.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metadata_has_equal_timestamps() {
        let meta = SessionMetadata::new("fusion", 1);
        assert_eq!(meta.pipeline, "fusion");
        assert!(meta.started > 0);
        assert_eq!(meta.started, meta.updated);
        assert!(meta.description.is_none());
    }

    #[test]
    fn touch_keeps_description() {
        let mut meta = SessionMetadata::new("fusion", 1).described("garden");
        let before = meta.updated;
        meta.touch();
        assert!(meta.updated >= before);
        assert!(meta.updated >= meta.started);
        assert_eq!(meta.description.as_deref(), Some("garden"));
    }

    #[test]
    fn failed_steps_keep_the_error_text() {
        let ok = LogEntry::success_with_notes("align", "300 iterations");
        assert!(ok.success);
        assert_eq!(ok.notes.as_deref(), Some("300 iterations"));
        assert!(LogEntry::success("graph").notes.is_none());
        let err = LogEntry::failure("infer", "missing pair");
        assert!(!err.success);
        assert_eq!(err.operation, "infer");
        assert_eq!(err.notes.as_deref(), Some("missing pair"));
    }

    #[test]
    fn artifact_records_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.glb");
        std::fs::write(&path, [0u8; 12]).unwrap();
        let rec = ArtifactRecord::new(ArtifactKind::Model, &path);
        assert_eq!(rec.size_bytes, Some(12));

        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"model\""));
        let back: ArtifactRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);

        let missing = ArtifactRecord::new(ArtifactKind::DebugImage, dir.path().join("none.png"));
        assert!(missing.size_bytes.is_none());
    }
}
