//! Stage 2: duplicate check
//!
//! No match: `DuplicateCheck → Uploaded` (pipeline continues to parsing).
//! Match: `DuplicateCheck → DuplicateDetected`, conflict queued, task ends.

use super::IntakeOrchestrator;
use crate::models::DuplicateConflict;
use intake_common::events::{FileState, PipelineStage};
use uuid::Uuid;

impl IntakeOrchestrator {
    pub(super) async fn stage_duplicate_check(&self, file_id: Uuid) {
        let Some(request) = self.stage_request(file_id, FileState::DuplicateCheck).await else {
            return;
        };

        let result = self.backend.check_duplicate(&request).await;

        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_in_state_mut(file_id, FileState::DuplicateCheck) else {
            tracing::debug!(file_id = %file_id, "File left DuplicateCheck, discarding result");
            return;
        };

        let check = match result {
            Ok(check) => check,
            Err(e) => {
                self.fail_stage(entry, PipelineStage::DuplicateCheck, e.kind(), e.to_string());
                return;
            }
        };

        if !check.is_duplicate {
            match entry.file.mark_duplicate_check_passed() {
                Ok(transition) => self.emit_transition(&transition),
                Err(e) => tracing::error!(file_id = %file_id, "{}", e),
            }
            return;
        }

        let transition = match entry.file.transition_to(FileState::DuplicateDetected) {
            Ok(transition) => transition,
            Err(e) => {
                tracing::error!(file_id = %file_id, "{}", e);
                return;
            }
        };
        let conflict = DuplicateConflict::new(
            file_id,
            entry.file.name.clone(),
            check.matched_document,
            check.similarity_score,
        );
        tracing::info!(
            file_id = %file_id,
            file_name = %conflict.file_name,
            similarity = ?conflict.similarity_score,
            "Duplicate detected, awaiting decision"
        );
        self.emit_transition(&transition);

        if registry.gate.enqueue(conflict.clone()) {
            self.emit_conflict_surfaced(&conflict, registry.gate.queued_behind());
        }
    }
}
