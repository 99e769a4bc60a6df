//! Pending human decision about a suspected duplicate document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conflict raised when the backend reports a matching document
///
/// Lives in the resolution queue until it is resolved or its file is
/// cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateConflict {
    pub file_id: Uuid,
    pub file_name: String,
    /// Summary of the existing document, as returned by the backend
    pub matched_document: Option<serde_json::Value>,
    pub similarity_score: Option<f64>,
    pub detected_at: DateTime<Utc>,
}

impl DuplicateConflict {
    pub fn new(
        file_id: Uuid,
        file_name: impl Into<String>,
        matched_document: Option<serde_json::Value>,
        similarity_score: Option<f64>,
    ) -> Self {
        Self {
            file_id,
            file_name: file_name.into(),
            matched_document,
            similarity_score,
            detected_at: Utc::now(),
        }
    }
}
