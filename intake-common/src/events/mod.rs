//! Event types for the intake event system
//!
//! Provides the shared event definitions and the EventBus used to observe
//! ingestion progress.

// Sub-modules (supporting types)
mod intake_types;

pub use intake_types::{
    CollectionKind, DocumentType, DuplicateDecision, FailureKind, FileState, PipelineStage,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Intake event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
/// Every observable change to an ingested file or to the output collections
/// is announced through exactly one of these variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IntakeEvent {
    /// Batch passed validation (possibly with some files rejected)
    BatchAccepted {
        batch_id: Uuid,
        /// Files that entered the pipeline
        accepted: usize,
        /// Files dropped by per-file validation
        rejected: usize,
        timestamp: DateTime<Utc>,
    },

    /// Whole batch rejected before any file entered the pipeline
    ///
    /// Triggers:
    /// - SSE: Show a single batch-level error banner
    BatchRejected {
        batch_id: Uuid,
        message: String,
        file_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Single file rejected by validation
    FileRejected {
        batch_id: Uuid,
        file_name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// File registered for observation (optimistic insertion)
    FileAdded {
        file_id: Uuid,
        batch_id: Uuid,
        file_name: String,
        size_bytes: u64,
        state: FileState,
        timestamp: DateTime<Utc>,
    },

    /// File moved between lifecycle states
    ///
    /// Triggers:
    /// - SSE: Update card badge and progress bar
    FileStateChanged {
        file_id: Uuid,
        old_state: FileState,
        new_state: FileState,
        /// Cosmetic progress derived from `new_state`
        progress_percent: u8,
        timestamp: DateTime<Utc>,
    },

    /// Per-file failure notification (toast + error badge)
    FileFailed {
        file_id: Uuid,
        file_name: String,
        kind: FailureKind,
        stage: PipelineStage,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Parsed file placed into an output collection
    FileRouted {
        file_id: Uuid,
        collection: CollectionKind,
        document_type: DocumentType,
        /// Normalised 0..1
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A duplicate conflict became the one shown to the user
    DuplicateConflictSurfaced {
        file_id: Uuid,
        file_name: String,
        matched_document: Option<serde_json::Value>,
        similarity_score: Option<f64>,
        /// Conflicts still waiting behind this one
        queued_behind: usize,
        timestamp: DateTime<Utc>,
    },

    /// Human decision applied to a conflict
    DuplicateConflictResolved {
        file_id: Uuid,
        decision: DuplicateDecision,
        timestamp: DateTime<Utc>,
    },

    /// Failed file re-entered the pipeline
    FileRetried {
        file_id: Uuid,
        stage: PipelineStage,
        timestamp: DateTime<Utc>,
    },

    /// All files, conflicts and collections dropped
    IntakeCleared {
        files_dropped: usize,
        timestamp: DateTime<Utc>,
    },
}

impl IntakeEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            IntakeEvent::BatchAccepted { .. } => "BatchAccepted",
            IntakeEvent::BatchRejected { .. } => "BatchRejected",
            IntakeEvent::FileRejected { .. } => "FileRejected",
            IntakeEvent::FileAdded { .. } => "FileAdded",
            IntakeEvent::FileStateChanged { .. } => "FileStateChanged",
            IntakeEvent::FileFailed { .. } => "FileFailed",
            IntakeEvent::FileRouted { .. } => "FileRouted",
            IntakeEvent::DuplicateConflictSurfaced { .. } => "DuplicateConflictSurfaced",
            IntakeEvent::DuplicateConflictResolved { .. } => "DuplicateConflictResolved",
            IntakeEvent::FileRetried { .. } => "FileRetried",
            IntakeEvent::IntakeCleared { .. } => "IntakeCleared",
        }
    }

    /// File this event concerns, if any
    pub fn file_id(&self) -> Option<Uuid> {
        match self {
            IntakeEvent::FileAdded { file_id, .. }
            | IntakeEvent::FileStateChanged { file_id, .. }
            | IntakeEvent::FileFailed { file_id, .. }
            | IntakeEvent::FileRouted { file_id, .. }
            | IntakeEvent::DuplicateConflictSurfaced { file_id, .. }
            | IntakeEvent::DuplicateConflictResolved { file_id, .. }
            | IntakeEvent::FileRetried { file_id, .. } => Some(*file_id),
            IntakeEvent::BatchAccepted { .. }
            | IntakeEvent::BatchRejected { .. }
            | IntakeEvent::FileRejected { .. }
            | IntakeEvent::IntakeCleared { .. } => None,
        }
    }
}

/// Broadcast bus for intake events
///
/// Cheap to clone; every clone shares the same channel.
///
/// # Examples
///
/// ```
/// use intake_common::events::{EventBus, IntakeEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(IntakeEvent::IntakeCleared {
///     files_dropped: 0,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "IntakeCleared");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IntakeEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers lag
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<IntakeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IntakeEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
