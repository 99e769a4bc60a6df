//! Read-side views of the intake session for observers
//!
//! Everything here is computed on demand from the registry; nothing is
//! cached or updated on a timer.

use crate::models::{DuplicateConflict, IngestedFile, OutputCollections};
use crate::services::progress_reporter::{aggregate_progress, progress_for};
use intake_common::events::FileState;
use serde::{Deserialize, Serialize};

/// A file plus its derived progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileView {
    #[serde(flatten)]
    pub file: IngestedFile,
    pub progress_percent: u8,
}

impl From<&IngestedFile> for FileView {
    fn from(file: &IngestedFile) -> Self {
        Self {
            progress_percent: progress_for(file.state()),
            file: file.clone(),
        }
    }
}

/// Conflict on display and how many wait behind it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictView {
    #[serde(flatten)]
    pub conflict: DuplicateConflict,
    pub queued_behind: usize,
}

/// Counts per state
///
/// Display: "3 of 5 parsed, 1 needs attention"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeSummary {
    /// Every registered file, `Removed` included
    pub total: usize,
    pub uploading: usize,
    pub duplicate_check: usize,
    pub uploaded: usize,
    pub parsing: usize,
    pub parsed: usize,
    pub parse_error: usize,
    pub error: usize,
    pub duplicate_detected: usize,
    pub removed: usize,
    pub pending_conflicts: usize,
    /// Mean progress over files that are not `Removed`
    pub overall_progress: u8,
}

impl IntakeSummary {
    pub fn from_files<'a, I>(files: I, pending_conflicts: usize) -> Self
    where
        I: IntoIterator<Item = &'a IngestedFile>,
    {
        let mut summary = IntakeSummary {
            pending_conflicts,
            ..Default::default()
        };
        let mut states = Vec::new();

        for file in files {
            let state = file.state();
            summary.total += 1;
            match state {
                FileState::Uploading => summary.uploading += 1,
                FileState::DuplicateCheck => summary.duplicate_check += 1,
                FileState::Uploaded => summary.uploaded += 1,
                FileState::Parsing => summary.parsing += 1,
                FileState::Parsed => summary.parsed += 1,
                FileState::ParseError => summary.parse_error += 1,
                FileState::Error => summary.error += 1,
                FileState::DuplicateDetected => summary.duplicate_detected += 1,
                FileState::Removed => summary.removed += 1,
            }
            states.push(state);
        }

        summary.overall_progress = aggregate_progress(states);
        summary
    }

    /// Files still moving through the pipeline
    pub fn in_flight(&self) -> usize {
        self.uploading + self.duplicate_check + self.uploaded + self.parsing
    }

    /// Files waiting on the user (failures and duplicate decisions)
    pub fn needs_attention(&self) -> usize {
        self.parse_error + self.error + self.duplicate_detected
    }

    pub fn display_string(&self) -> String {
        let active = self.total - self.removed;
        if self.needs_attention() > 0 {
            format!(
                "{} of {} parsed, {} needs attention",
                self.parsed,
                active,
                self.needs_attention()
            )
        } else {
            format!("{} of {} parsed", self.parsed, active)
        }
    }
}

/// Complete observation of the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeSnapshot {
    pub files: Vec<FileView>,
    pub collections: OutputCollections,
    pub current_conflict: Option<ConflictView>,
    pub summary: IntakeSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawFile;
    use uuid::Uuid;

    fn file_in(state: FileState) -> IngestedFile {
        let mut file = IngestedFile::new(Uuid::new_v4(), &RawFile::new("a.pdf", b"%PDF".to_vec()));
        match state {
            FileState::Uploading => {}
            FileState::Error => {
                file.mark_error(intake_common::events::PipelineStage::Upload, "down")
                    .unwrap();
            }
            FileState::Removed => {
                file.transition_to(FileState::Removed).unwrap();
            }
            FileState::Uploaded => {
                file.mark_uploaded("srv".to_string()).unwrap();
            }
            other => panic!("unsupported fixture state {}", other),
        }
        file
    }

    #[test]
    fn test_summary_counts_and_progress() {
        let files = vec![
            file_in(FileState::Uploading),
            file_in(FileState::Uploaded),
            file_in(FileState::Error),
            file_in(FileState::Removed),
        ];
        let summary = IntakeSummary::from_files(&files, 0);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.uploading, 1);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.in_flight(), 2);
        assert_eq!(summary.needs_attention(), 1);
        // (20 + 60 + 100) / 3
        assert_eq!(summary.overall_progress, 60);
        assert_eq!(summary.display_string(), "0 of 3 parsed, 1 needs attention");
    }

    #[test]
    fn test_file_view_serializes_flat() {
        let view = FileView::from(&file_in(FileState::Uploaded));
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["state"], "UPLOADED");
        assert_eq!(json["progress_percent"], 60);
        assert_eq!(json["server_reference"], "srv");
        assert_eq!(json["name"], "a.pdf");
    }
}
