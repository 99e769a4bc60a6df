//! Intake workflow type definitions
//!
//! Supporting enums shared by the intake service and anything consuming
//! its event stream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one ingested file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    /// Raw upload in progress (also the state of freshly inserted files)
    Uploading,
    /// Duplicate check request in flight
    DuplicateCheck,
    /// Raw bytes accepted by the backend
    Uploaded,
    /// OCR classification in flight
    Parsing,
    /// Classified and routed
    Parsed,
    /// Classification failed or was unusable
    ParseError,
    /// Transport or server failure
    Error,
    /// Waiting for a human duplicate decision
    DuplicateDetected,
    /// Cancelled by the user or rejected as a duplicate
    Removed,
}

impl FileState {
    /// Terminal states: no automatic transition leaves them
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileState::Parsed | FileState::ParseError | FileState::Error | FileState::Removed
        )
    }

    /// Failed states that accept an explicit retry
    pub fn is_failed(self) -> bool {
        matches!(self, FileState::ParseError | FileState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileState::Uploading => "UPLOADING",
            FileState::DuplicateCheck => "DUPLICATE_CHECK",
            FileState::Uploaded => "UPLOADED",
            FileState::Parsing => "PARSING",
            FileState::Parsed => "PARSED",
            FileState::ParseError => "PARSE_ERROR",
            FileState::Error => "ERROR",
            FileState::DuplicateDetected => "DUPLICATE_DETECTED",
            FileState::Removed => "REMOVED",
        }
    }

    /// All states, in pipeline order
    pub const ALL: [FileState; 9] = [
        FileState::Uploading,
        FileState::DuplicateCheck,
        FileState::Uploaded,
        FileState::Parsing,
        FileState::Parsed,
        FileState::ParseError,
        FileState::Error,
        FileState::DuplicateDetected,
        FileState::Removed,
    ];
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document type reported by the classify endpoint
///
/// Unrecognised wire values deserialize as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    DeliveryNote,
    #[serde(other)]
    Unknown,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::DeliveryNote => "delivery_note",
            DocumentType::Unknown => "unknown",
        }
    }
}

/// One of the three routing targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Invoices,
    DeliveryNotes,
    Unclassified,
}

impl CollectionKind {
    /// Routing rule: anything not clearly an invoice or delivery note is unclassified
    pub fn for_document_type(document_type: DocumentType) -> Self {
        match document_type {
            DocumentType::Invoice => CollectionKind::Invoices,
            DocumentType::DeliveryNote => CollectionKind::DeliveryNotes,
            DocumentType::Unknown => CollectionKind::Unclassified,
        }
    }
}

/// Human answer to a duplicate conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateDecision {
    /// Keep the file as a new document
    Confirm,
    /// Discard the file as a duplicate
    Reject,
}

/// Network round-trip phase of the per-file pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Upload,
    DuplicateCheck,
    Parse,
}

impl PipelineStage {
    /// State a file re-enters when this stage is retried
    pub fn entry_state(self) -> FileState {
        match self {
            PipelineStage::Upload => FileState::Uploading,
            PipelineStage::DuplicateCheck => FileState::DuplicateCheck,
            PipelineStage::Parse => FileState::Parsing,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Upload => "upload",
            PipelineStage::DuplicateCheck => "duplicate_check",
            PipelineStage::Parse => "parse",
        };
        f.write_str(name)
    }
}

/// Failure category surfaced with each per-file error notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Network,
    Server,
    Ocr,
}
