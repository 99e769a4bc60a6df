//! Stage 1: raw upload
//!
//! `Uploading → Uploaded` with the backend's server reference, or
//! `Uploading → Error`.

use super::IntakeOrchestrator;
use intake_common::events::{FailureKind, FileState, PipelineStage};
use uuid::Uuid;

impl IntakeOrchestrator {
    pub(super) async fn stage_upload(&self, file_id: Uuid) {
        let Some(request) = self.stage_request(file_id, FileState::Uploading).await else {
            return;
        };

        tracing::debug!(file_id = %file_id, file_name = %request.file_name, "Uploading raw file");
        let result = self.backend.upload_raw(&request).await;

        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_in_state_mut(file_id, FileState::Uploading) else {
            tracing::debug!(file_id = %file_id, "File left Uploading during upload, discarding result");
            return;
        };

        match result {
            Ok(receipt) => match entry.file.mark_uploaded(receipt.server_reference) {
                Ok(transition) => self.emit_transition(&transition),
                Err(e) => tracing::error!(file_id = %file_id, "{}", e),
            },
            Err(e) => self.fail_stage(entry, PipelineStage::Upload, e.kind(), e.to_string()),
        }
    }

    /// Build the request for a stage, or `None` if the file moved on
    ///
    /// A file whose cached bytes are missing is failed in place.
    pub(super) async fn stage_request(
        &self,
        file_id: Uuid,
        expected: FileState,
    ) -> Option<crate::services::upload_client::UploadRequest> {
        {
            let registry = self.registry.read().await;
            let entry = registry.get(file_id)?;
            if entry.file.state() != expected {
                return None;
            }
            if let Some(request) = entry.upload_request() {
                return Some(request);
            }
        }

        let stage = match expected {
            FileState::Uploading => PipelineStage::Upload,
            FileState::DuplicateCheck => PipelineStage::DuplicateCheck,
            _ => PipelineStage::Parse,
        };
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.get_in_state_mut(file_id, expected) {
            self.fail_stage(
                entry,
                stage,
                FailureKind::Server,
                "File contents are no longer available".to_string(),
            );
        }
        None
    }
}
