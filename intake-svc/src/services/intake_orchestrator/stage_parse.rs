//! Stage 3: OCR classification and routing
//!
//! `Parsing → Parsed` (routed into a collection), `Parsing → ParseError`
//! for OCR failures and low-confidence results, or `Parsing → Error` for
//! transport failures.

use super::IntakeOrchestrator;
use crate::models::Classification;
use chrono::Utc;
use intake_common::events::{CollectionKind, FailureKind, FileState, IntakeEvent, PipelineStage};
use uuid::Uuid;

impl IntakeOrchestrator {
    pub(super) async fn stage_parse(&self, file_id: Uuid) {
        let Some(request) = self.stage_request(file_id, FileState::Parsing).await else {
            return;
        };

        tracing::debug!(file_id = %file_id, "Classifying document");
        let result = self.backend.classify_and_parse(&request).await;

        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_in_state_mut(file_id, FileState::Parsing) else {
            tracing::debug!(file_id = %file_id, "File left Parsing, discarding result");
            return;
        };

        let parsed = match result {
            Ok(parsed) => parsed,
            Err(e) => {
                self.fail_stage(entry, PipelineStage::Parse, e.kind(), e.to_string());
                return;
            }
        };

        let classification = Classification {
            document_type: parsed.document_type,
            confidence: parsed.normalized_confidence(),
            extracted_fields: parsed.extracted_fields,
        };

        let min_confidence = self.settings.min_confidence;
        if min_confidence > 0.0 && classification.confidence < min_confidence {
            let message = format!(
                "Classification confidence {:.0}% is below the {:.0}% minimum",
                classification.confidence * 100.0,
                min_confidence * 100.0
            );
            match entry.file.mark_parse_error(Some(classification), message.clone()) {
                Ok(transition) => {
                    tracing::warn!(file_id = %file_id, "{}", message);
                    self.emit_transition(&transition);
                    self.event_bus.emit_lossy(IntakeEvent::FileFailed {
                        file_id,
                        file_name: entry.file.name.clone(),
                        kind: FailureKind::Ocr,
                        stage: PipelineStage::Parse,
                        message,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => tracing::error!(file_id = %file_id, "{}", e),
            }
            return;
        }

        let document_type = classification.document_type;
        let confidence = classification.confidence;
        let transition = match entry.file.mark_parsed(classification) {
            Ok(transition) => transition,
            Err(e) => {
                tracing::error!(file_id = %file_id, "{}", e);
                return;
            }
        };
        // Parsed files are never resent
        entry.payload = None;
        self.emit_transition(&transition);

        let collection = CollectionKind::for_document_type(document_type);
        registry.collections.route(file_id, collection);
        self.event_bus.emit_lossy(IntakeEvent::FileRouted {
            file_id,
            collection,
            document_type,
            confidence,
            timestamp: Utc::now(),
        });

        tracing::info!(
            file_id = %file_id,
            document_type = document_type.as_str(),
            confidence,
            collection = ?collection,
            "Document parsed and routed"
        );
    }
}
