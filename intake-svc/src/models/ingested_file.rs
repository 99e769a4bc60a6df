//! Per-file lifecycle state machine
//!
//! ```text
//! Uploading ─► Uploaded ─► DuplicateCheck ─► Uploaded ─► Parsing ─► Parsed
//!     │           │              │                          ├──────► ParseError
//!     └► Error    ├► Parsing     ├► DuplicateDetected       └──────► Error
//!                 └► Error       └► Error
//! DuplicateDetected ─confirm─► Uploaded | Uploading
//! DuplicateDetected ─reject──► Removed
//! Error / ParseError ─retry──► entry state of the failed stage
//! any state except Parsed ─cancel─► Removed (absorbing)
//! ```
//!
//! Lifecycle fields are private so the payload invariants hold:
//! classification is only present in `Parsed`/`ParseError`, the error message
//! only in `Error`/`ParseError`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use intake_common::events::{DocumentType, FileState, PipelineStage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// A file as handed over by the caller, before validation
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    /// Content type supplied by the client, if any
    pub content_type: Option<String>,
    pub bytes: Bytes,
    /// Size seen while streaming when the contents were not kept
    unbuffered_size: Option<u64>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes: bytes.into(),
            unbuffered_size: None,
        }
    }

    /// A file whose contents were dropped while streaming; only its name
    /// and size remain, enough for validation to refuse it
    pub fn unbuffered(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            unbuffered_size: Some(size_bytes),
            ..Self::new(name, Bytes::new())
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.unbuffered_size.unwrap_or(self.bytes.len() as u64)
    }

    /// Lowercase extension without the dot
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Best available type description: client header, sniffed magic bytes,
    /// then extension
    pub fn mime_or_extension(&self) -> String {
        if let Some(content_type) = self
            .content_type
            .as_deref()
            .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
        {
            return content_type.to_string();
        }
        if let Some(kind) = infer::get(&self.bytes) {
            return kind.mime_type().to_string();
        }
        self.extension().unwrap_or_else(|| "unknown".to_string())
    }
}

/// OCR classification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: DocumentType,
    /// Normalised to 0..=1
    pub confidence: f64,
    pub extracted_fields: BTreeMap<String, serde_json::Value>,
}

/// Where a file stands with respect to the duplicate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateCheckStatus {
    /// Check not run yet
    Pending,
    /// Backend reported no duplicate
    Passed,
    /// User confirmed the file as new; never re-checked
    Bypassed,
}

/// Record of one applied transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub file_id: Uuid,
    pub old_state: FileState,
    pub new_state: FileState,
    pub transitioned_at: DateTime<Utc>,
}

/// Attempted transition not allowed by the state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition for file {file_id}: {from} -> {to}")]
pub struct TransitionError {
    pub file_id: Uuid,
    pub from: FileState,
    pub to: FileState,
}

/// Transition table
pub fn is_allowed_transition(from: FileState, to: FileState) -> bool {
    use FileState::*;

    match (from, to) {
        (Removed, _) => false,
        (Parsed, _) => false,
        (_, Removed) => true,
        (Uploading, Uploaded | Error) => true,
        (Uploaded, DuplicateCheck | Parsing | Error) => true,
        (DuplicateCheck, Uploaded | DuplicateDetected | Error) => true,
        (Parsing, Parsed | ParseError | Error) => true,
        (DuplicateDetected, Uploaded | Uploading) => true,
        (Error, Uploading | DuplicateCheck | Parsing) => true,
        (ParseError, Parsing) => true,
        _ => false,
    }
}

/// One intake attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedFile {
    /// Stable identifier; two files with the same name are distinct entities
    pub id: Uuid,
    pub batch_id: Uuid,
    pub name: String,
    pub size_bytes: u64,
    pub mime_or_extension: String,
    /// SHA-256 of the file bytes, hex encoded
    pub content_hash: String,
    pub created_at: DateTime<Utc>,

    state: FileState,
    server_reference: Option<String>,
    classification: Option<Classification>,
    error_message: Option<String>,
    failed_stage: Option<PipelineStage>,
    duplicate_check: DuplicateCheckStatus,
    updated_at: DateTime<Utc>,
}

impl IngestedFile {
    /// Create a fresh record in `Uploading` (optimistic insertion)
    pub fn new(batch_id: Uuid, raw: &RawFile) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            name: raw.name.clone(),
            size_bytes: raw.size_bytes(),
            mime_or_extension: raw.mime_or_extension(),
            content_hash: format!("{:x}", Sha256::digest(&raw.bytes)),
            created_at: now,
            state: FileState::Uploading,
            server_reference: None,
            classification: None,
            error_message: None,
            failed_stage: None,
            duplicate_check: DuplicateCheckStatus::Pending,
            updated_at: now,
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn server_reference(&self) -> Option<&str> {
        self.server_reference.as_deref()
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn failed_stage(&self) -> Option<PipelineStage> {
        self.failed_stage
    }

    pub fn duplicate_check(&self) -> DuplicateCheckStatus {
        self.duplicate_check
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `new_state`, clearing payload that the new state may not carry
    pub fn transition_to(&mut self, new_state: FileState) -> Result<StateTransition, TransitionError> {
        if !is_allowed_transition(self.state, new_state) {
            return Err(TransitionError {
                file_id: self.id,
                from: self.state,
                to: new_state,
            });
        }

        let transition = StateTransition {
            file_id: self.id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };

        self.state = new_state;
        self.updated_at = transition.transitioned_at;

        if !matches!(new_state, FileState::Parsed | FileState::ParseError) {
            self.classification = None;
        }
        if !new_state.is_failed() {
            self.error_message = None;
            self.failed_stage = None;
        }

        Ok(transition)
    }

    /// `Uploading → Uploaded` with the backend's reference
    pub fn mark_uploaded(&mut self, server_reference: String) -> Result<StateTransition, TransitionError> {
        let transition = self.transition_to(FileState::Uploaded)?;
        self.server_reference = Some(server_reference);
        Ok(transition)
    }

    /// `DuplicateCheck → Uploaded` after a clean check
    pub fn mark_duplicate_check_passed(&mut self) -> Result<StateTransition, TransitionError> {
        let transition = self.transition_to(FileState::Uploaded)?;
        self.duplicate_check = DuplicateCheckStatus::Passed;
        Ok(transition)
    }

    /// Resume after a confirmed duplicate conflict, skipping the check from
    /// now on; resumes at `Uploaded` if the raw upload already happened
    pub fn confirm_as_new(&mut self) -> Result<StateTransition, TransitionError> {
        let next = if self.server_reference.is_some() {
            FileState::Uploaded
        } else {
            FileState::Uploading
        };
        let transition = self.transition_to(next)?;
        self.duplicate_check = DuplicateCheckStatus::Bypassed;
        Ok(transition)
    }

    /// `Parsing → Parsed`
    pub fn mark_parsed(&mut self, classification: Classification) -> Result<StateTransition, TransitionError> {
        let transition = self.transition_to(FileState::Parsed)?;
        self.classification = Some(classification);
        Ok(transition)
    }

    /// `Parsing → ParseError`; a low-confidence result keeps its classification
    pub fn mark_parse_error(
        &mut self,
        classification: Option<Classification>,
        message: impl Into<String>,
    ) -> Result<StateTransition, TransitionError> {
        let transition = self.transition_to(FileState::ParseError)?;
        self.classification = classification;
        self.error_message = Some(message.into());
        self.failed_stage = Some(PipelineStage::Parse);
        Ok(transition)
    }

    /// Any in-flight stage → `Error`
    pub fn mark_error(
        &mut self,
        stage: PipelineStage,
        message: impl Into<String>,
    ) -> Result<StateTransition, TransitionError> {
        let transition = self.transition_to(FileState::Error)?;
        self.error_message = Some(message.into());
        self.failed_stage = Some(stage);
        Ok(transition)
    }

    /// Re-enter the stage that failed; returns the stage and the transition
    pub fn retry(&mut self) -> Result<(PipelineStage, StateTransition), TransitionError> {
        let stage = match (self.state, self.failed_stage) {
            (FileState::ParseError, _) => PipelineStage::Parse,
            (FileState::Error, Some(stage)) => stage,
            (FileState::Error, None) => PipelineStage::Upload,
            (state, _) => {
                return Err(TransitionError {
                    file_id: self.id,
                    from: state,
                    to: FileState::Uploading,
                })
            }
        };
        // A lost server reference means the upload has to run again
        let stage = if stage != PipelineStage::Upload && self.server_reference.is_none() {
            PipelineStage::Upload
        } else {
            stage
        };
        let transition = self.transition_to(stage.entry_state())?;
        Ok((stage, transition))
    }

    /// Change the document type of a parsed file (routing follows)
    pub fn reclassify(&mut self, document_type: DocumentType) -> Result<(), TransitionError> {
        match (self.state, self.classification.as_mut()) {
            (FileState::Parsed, Some(classification)) => {
                classification.document_type = document_type;
                self.updated_at = Utc::now();
                Ok(())
            }
            (state, _) => Err(TransitionError {
                file_id: self.id,
                from: state,
                to: FileState::Parsed,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(name: &str) -> RawFile {
        RawFile::new(name, b"%PDF-1.4 test invoice".to_vec())
    }

    fn classification(document_type: DocumentType) -> Classification {
        Classification {
            document_type,
            confidence: 0.92,
            extracted_fields: BTreeMap::new(),
        }
    }

    #[test]
    fn test_new_file_starts_uploading_with_unique_id() {
        let batch = Uuid::new_v4();
        let a = IngestedFile::new(batch, &pdf("same.pdf"));
        let b = IngestedFile::new(batch, &pdf("same.pdf"));

        assert_eq!(a.state(), FileState::Uploading);
        assert_ne!(a.id, b.id);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
        assert!(a.classification().is_none());
        assert!(a.error_message().is_none());
    }

    #[test]
    fn test_mime_detection_prefers_header_then_magic_bytes() {
        let sniffed = pdf("scan.bin");
        assert_eq!(sniffed.mime_or_extension(), "application/pdf");

        let declared = pdf("scan.pdf").with_content_type("application/x-custom");
        assert_eq!(declared.mime_or_extension(), "application/x-custom");

        let plain = RawFile::new("notes.TXT", b"hello".to_vec());
        assert_eq!(plain.extension().as_deref(), Some("txt"));
        assert_eq!(plain.mime_or_extension(), "txt");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));

        file.mark_uploaded("srv-1".to_string()).unwrap();
        assert_eq!(file.server_reference(), Some("srv-1"));

        file.transition_to(FileState::DuplicateCheck).unwrap();
        file.mark_duplicate_check_passed().unwrap();
        assert_eq!(file.duplicate_check(), DuplicateCheckStatus::Passed);

        file.transition_to(FileState::Parsing).unwrap();
        file.mark_parsed(classification(DocumentType::Invoice)).unwrap();

        assert_eq!(file.state(), FileState::Parsed);
        assert!(file.classification().is_some());
        assert!(file.is_terminal());
    }

    #[test]
    fn test_classification_only_in_parse_states() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));
        file.mark_uploaded("srv".to_string()).unwrap();
        file.transition_to(FileState::Parsing).unwrap();
        file.mark_parse_error(Some(classification(DocumentType::Unknown)), "low confidence")
            .unwrap();

        assert!(file.classification().is_some());
        assert_eq!(file.error_message(), Some("low confidence"));

        // Rescan clears payload on the way back into Parsing
        let (stage, _) = file.retry().unwrap();
        assert_eq!(stage, PipelineStage::Parse);
        assert_eq!(file.state(), FileState::Parsing);
        assert!(file.classification().is_none());
        assert!(file.error_message().is_none());
    }

    #[test]
    fn test_retry_reenters_failed_stage_only() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));
        file.mark_uploaded("srv".to_string()).unwrap();
        file.transition_to(FileState::DuplicateCheck).unwrap();
        file.mark_error(PipelineStage::DuplicateCheck, "503").unwrap();
        assert_eq!(file.failed_stage(), Some(PipelineStage::DuplicateCheck));

        let (stage, transition) = file.retry().unwrap();
        assert_eq!(stage, PipelineStage::DuplicateCheck);
        assert_eq!(transition.new_state, FileState::DuplicateCheck);
        assert_eq!(file.server_reference(), Some("srv"));
    }

    #[test]
    fn test_upload_failure_retries_upload() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));
        file.mark_error(PipelineStage::Upload, "connection refused").unwrap();

        let (stage, _) = file.retry().unwrap();
        assert_eq!(stage, PipelineStage::Upload);
        assert_eq!(file.state(), FileState::Uploading);
    }

    #[test]
    fn test_uploaded_file_can_fail_between_stages() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));
        file.mark_uploaded("srv".to_string()).unwrap();

        let transition = file.mark_error(PipelineStage::Parse, "task aborted").unwrap();
        assert_eq!(transition.old_state, FileState::Uploaded);
        assert_eq!(file.state(), FileState::Error);

        let (stage, _) = file.retry().unwrap();
        assert_eq!(stage, PipelineStage::Parse);
        assert_eq!(file.state(), FileState::Parsing);
    }

    #[test]
    fn test_removed_is_absorbing() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));
        file.transition_to(FileState::Removed).unwrap();

        for state in FileState::ALL {
            assert!(file.transition_to(state).is_err(), "Removed -> {} allowed", state);
        }
        assert!(file.retry().is_err());
    }

    #[test]
    fn test_parsed_cannot_be_removed_or_reparsed() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));
        file.mark_uploaded("srv".to_string()).unwrap();
        file.transition_to(FileState::Parsing).unwrap();
        file.mark_parsed(classification(DocumentType::DeliveryNote)).unwrap();

        assert!(file.transition_to(FileState::Removed).is_err());
        assert!(file.transition_to(FileState::Parsing).is_err());

        file.reclassify(DocumentType::Invoice).unwrap();
        assert_eq!(
            file.classification().unwrap().document_type,
            DocumentType::Invoice
        );
    }

    #[test]
    fn test_confirm_resumes_after_upload() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));
        file.mark_uploaded("srv".to_string()).unwrap();
        file.transition_to(FileState::DuplicateCheck).unwrap();
        file.transition_to(FileState::DuplicateDetected).unwrap();

        let transition = file.confirm_as_new().unwrap();
        assert_eq!(transition.new_state, FileState::Uploaded);
        assert_eq!(file.duplicate_check(), DuplicateCheckStatus::Bypassed);
    }

    #[test]
    fn test_illegal_skip_is_rejected() {
        let mut file = IngestedFile::new(Uuid::new_v4(), &pdf("a.pdf"));
        let err = file.transition_to(FileState::Parsed).unwrap_err();
        assert_eq!(err.from, FileState::Uploading);
        assert_eq!(err.to, FileState::Parsed);
        assert_eq!(file.state(), FileState::Uploading);
    }
}
