//! Document intake orchestrator
//!
//! Coordinates every file of a batch through its pipeline:
//!
//! ```text
//! validate → Uploading → Uploaded → [DuplicateCheck → Uploaded] → Parsing → Parsed → route
//! ```
//!
//! # Architecture
//! - `registry`: observation registry (files, insertion order, collections,
//!   duplicate queue) behind one `RwLock`
//! - `stage_*`: one backend round-trip each, applied to the registry only if
//!   the file is still where the stage left it
//! - `statistics`: summaries and snapshots for observers
//!
//! Pipelines run in spawned tasks. A batch goes through the
//! [`ConcurrencyScheduler`]; a process-wide semaphore additionally bounds
//! pipelines across overlapping batches, retries and duplicate resumptions.
//! A file waiting for a duplicate decision holds neither.

use crate::config::IntakeConfig;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{DuplicateConflict, IngestedFile, RawFile, StateTransition, UploadPolicy};
use crate::services::concurrency_scheduler::ConcurrencyScheduler;
use crate::services::file_validator::{validate_batch, RejectedFile};
use crate::services::progress_reporter::progress_for;
use crate::services::upload_client::IntakeBackend;
use chrono::Utc;
use intake_common::events::{
    CollectionKind, DocumentType, DuplicateDecision, EventBus, FailureKind, FileState,
    IntakeEvent, PipelineStage,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock, Semaphore};
use uuid::Uuid;

mod registry;
mod stage_duplicate;
mod stage_parse;
mod stage_upload;
pub mod statistics;

use registry::{FileEntry, IntakeRegistry};
pub use statistics::{ConflictView, FileView, IntakeSnapshot, IntakeSummary};

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub policy: UploadPolicy,
    pub concurrency_limit: usize,
    pub inter_batch_delay: Duration,
    pub duplicate_check_enabled: bool,
    /// 0..=1; 0 disables the low-confidence check
    pub min_confidence: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&IntakeConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &IntakeConfig) -> Self {
        Self {
            policy: config.policy.to_policy(),
            concurrency_limit: config.scheduler.concurrency_limit,
            inter_batch_delay: config.scheduler.inter_batch_delay(),
            duplicate_check_enabled: config.pipeline.duplicate_check_enabled,
            min_confidence: config.pipeline.min_confidence,
        }
    }
}

/// File that entered the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedFile {
    pub file_id: Uuid,
    pub file_name: String,
}

/// Immediate answer to a batch submission
#[derive(Debug, Clone, Serialize)]
pub struct BatchReceipt {
    pub batch_id: Uuid,
    pub accepted: Vec<AcceptedFile>,
    pub rejected: Vec<RejectedFile>,
    /// Set when the batch as a whole was refused
    pub batch_error: Option<String>,
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled { previous_state: FileState },
    AlreadyRemoved,
}

/// Result of a duplicate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// Confirmed as new; pipeline resumed
    Resumed,
    /// Rejected as duplicate
    Removed,
    /// No pending conflict for this file (already resolved or withdrawn)
    AlreadyResolved,
}

/// How one pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Parsed(CollectionKind),
    ParseError,
    Failed,
    AwaitingDecision,
    Cancelled,
    /// File dropped from the registry (cleared)
    Gone,
    /// A retry or duplicate confirmation started a newer driver
    Superseded,
}

/// Document intake orchestrator
pub struct IntakeOrchestrator {
    backend: Arc<dyn IntakeBackend>,
    event_bus: EventBus,
    settings: OrchestratorSettings,
    scheduler: ConcurrencyScheduler,
    permits: Arc<Semaphore>,
    registry: RwLock<IntakeRegistry>,
    active_tasks: AtomicUsize,
    idle: Notify,
}

/// Keeps `active_tasks` accurate even if a driver task panics
struct ActiveTask(Arc<IntakeOrchestrator>);

impl ActiveTask {
    fn start(orchestrator: &Arc<IntakeOrchestrator>) -> Self {
        orchestrator.active_tasks.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(orchestrator))
    }
}

impl Drop for ActiveTask {
    fn drop(&mut self) {
        if self.0.active_tasks.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl IntakeOrchestrator {
    /// Create a new orchestrator
    ///
    /// # Arguments
    /// * `backend` - OCR backend client
    /// * `event_bus` - Event bus for progress updates
    /// * `settings` - Policy and pipeline tunables
    pub fn new(
        backend: Arc<dyn IntakeBackend>,
        event_bus: EventBus,
        settings: OrchestratorSettings,
    ) -> intake_common::Result<Arc<Self>> {
        let scheduler =
            ConcurrencyScheduler::new(settings.concurrency_limit, settings.inter_batch_delay)?;
        if !(0.0..=1.0).contains(&settings.min_confidence) {
            return Err(intake_common::Error::InvalidInput(format!(
                "min_confidence must be within 0..=1 (got {})",
                settings.min_confidence
            )));
        }

        Ok(Arc::new(Self {
            backend,
            event_bus,
            permits: Arc::new(Semaphore::new(settings.concurrency_limit)),
            scheduler,
            settings,
            registry: RwLock::new(IntakeRegistry::default()),
            active_tasks: AtomicUsize::new(0),
            idle: Notify::new(),
        }))
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Policy applied to new batches
    pub fn policy(&self) -> &UploadPolicy {
        &self.settings.policy
    }

    /// Refuse callers whose role may not upload
    pub fn authorize_upload(&self, role: Option<&str>) -> IntakeResult<()> {
        if self.settings.policy.permits_role(role) {
            return Ok(());
        }
        tracing::warn!(role = ?role, "Upload refused for role");
        Err(IntakeError::UploadNotPermitted(role.map(str::to_string)))
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Validate a batch and start a pipeline for every accepted file
    ///
    /// Returns as soon as accepted files are registered (in `Uploading`);
    /// the pipelines run in the background.
    pub async fn submit_batch(self: &Arc<Self>, files: Vec<RawFile>) -> BatchReceipt {
        let batch_id = Uuid::new_v4();
        let policy = self.settings.policy.clone();
        let file_count = files.len();
        let validation = validate_batch(files, &policy);

        if let Some(message) = validation.batch_error {
            tracing::warn!(batch_id = %batch_id, file_count, "Batch rejected: {}", message);
            self.event_bus.emit_lossy(IntakeEvent::BatchRejected {
                batch_id,
                message: message.clone(),
                file_count,
                timestamp: Utc::now(),
            });
            return BatchReceipt {
                batch_id,
                accepted: Vec::new(),
                rejected: validation.rejected,
                batch_error: Some(message),
            };
        }

        for rejected in &validation.rejected {
            self.event_bus.emit_lossy(IntakeEvent::FileRejected {
                batch_id,
                file_name: rejected.file_name.clone(),
                reason: rejected.message.clone(),
                timestamp: Utc::now(),
            });
        }

        let mut accepted = Vec::with_capacity(validation.accepted.len());
        {
            let mut registry = self.registry.write().await;
            for raw in validation.accepted {
                let file = IngestedFile::new(batch_id, &raw);
                self.event_bus.emit_lossy(IntakeEvent::FileAdded {
                    file_id: file.id,
                    batch_id,
                    file_name: file.name.clone(),
                    size_bytes: file.size_bytes,
                    state: file.state(),
                    timestamp: Utc::now(),
                });
                accepted.push(AcceptedFile {
                    file_id: file.id,
                    file_name: file.name.clone(),
                });
                registry.insert(FileEntry::new(file, raw));
            }
        }

        tracing::info!(
            batch_id = %batch_id,
            accepted = accepted.len(),
            rejected = validation.rejected.len(),
            "Batch accepted"
        );
        self.event_bus.emit_lossy(IntakeEvent::BatchAccepted {
            batch_id,
            accepted: accepted.len(),
            rejected: validation.rejected.len(),
            timestamp: Utc::now(),
        });

        if !accepted.is_empty() {
            self.spawn_pipelines(accepted.iter().map(|f| (f.file_id, 0)).collect());
        }

        BatchReceipt {
            batch_id,
            accepted,
            rejected: validation.rejected,
            batch_error: None,
        }
    }

    /// Remove a file from the session
    ///
    /// In-flight backend calls are not interrupted; their results are
    /// discarded when they return.
    pub async fn cancel(&self, file_id: Uuid) -> IntakeResult<CancelOutcome> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .get_mut(file_id)
            .ok_or(IntakeError::FileNotFound(file_id))?;

        let previous_state = entry.file.state();
        match previous_state {
            FileState::Removed => return Ok(CancelOutcome::AlreadyRemoved),
            FileState::Parsed => return Err(IntakeError::NotCancellable(file_id)),
            _ => {}
        }

        let transition = entry.file.transition_to(FileState::Removed)?;
        entry.release();
        self.emit_transition(&transition);

        registry.collections.remove(file_id);
        if let Some(removal) = registry.gate.remove(file_id) {
            tracing::debug!(file_id = %file_id, "Duplicate conflict withdrawn");
            if let Some(next) = removal.surfaced {
                let queued_behind = registry.gate.queued_behind();
                self.emit_conflict_surfaced(&next, queued_behind);
            }
        }

        tracing::info!(file_id = %file_id, previous_state = %previous_state, "File cancelled");
        Ok(CancelOutcome::Cancelled { previous_state })
    }

    /// Re-run the stage that failed, using the cached bytes
    pub async fn retry(self: &Arc<Self>, file_id: Uuid) -> IntakeResult<PipelineStage> {
        let (stage, generation) = {
            let mut registry = self.registry.write().await;
            let entry = registry
                .get_mut(file_id)
                .ok_or(IntakeError::FileNotFound(file_id))?;

            let state = entry.file.state();
            if !state.is_failed() {
                return Err(IntakeError::NotRetryable { file_id, state });
            }
            if entry.payload.is_none() {
                return Err(IntakeError::Common(intake_common::Error::Internal(format!(
                    "Contents of file {} are no longer cached",
                    file_id
                ))));
            }

            let (stage, transition) = entry.file.retry()?;
            self.emit_transition(&transition);
            self.event_bus.emit_lossy(IntakeEvent::FileRetried {
                file_id,
                stage,
                timestamp: Utc::now(),
            });
            (stage, entry.next_driver())
        };

        tracing::info!(file_id = %file_id, stage = %stage, "Retrying file");
        self.spawn_pipelines(vec![(file_id, generation)]);
        Ok(stage)
    }

    /// Apply the user's decision to a pending duplicate conflict
    ///
    /// Resolving a conflict that is no longer pending is a no-op.
    pub async fn resolve_duplicate(
        self: &Arc<Self>,
        file_id: Uuid,
        decision: DuplicateDecision,
    ) -> IntakeResult<ResolveOutcome> {
        let resumed_driver = {
            let mut registry = self.registry.write().await;
            if registry.get(file_id).is_none() {
                return Err(IntakeError::FileNotFound(file_id));
            }

            let Some(removal) = registry.gate.remove(file_id) else {
                tracing::debug!(file_id = %file_id, "No pending conflict, ignoring decision");
                return Ok(ResolveOutcome::AlreadyResolved);
            };
            if let Some(next) = &removal.surfaced {
                let queued_behind = registry.gate.queued_behind();
                self.emit_conflict_surfaced(next, queued_behind);
            }

            let entry = registry
                .get_mut(file_id)
                .ok_or(IntakeError::FileNotFound(file_id))?;
            let (transition, resumed_driver) = match decision {
                DuplicateDecision::Confirm => {
                    (entry.file.confirm_as_new()?, Some(entry.next_driver()))
                }
                DuplicateDecision::Reject => {
                    let transition = entry.file.transition_to(FileState::Removed)?;
                    entry.release();
                    (transition, None)
                }
            };

            self.event_bus.emit_lossy(IntakeEvent::DuplicateConflictResolved {
                file_id,
                decision,
                timestamp: Utc::now(),
            });
            self.emit_transition(&transition);

            resumed_driver
        };

        tracing::info!(file_id = %file_id, decision = ?decision, "Duplicate conflict resolved");
        match resumed_driver {
            Some(generation) => {
                self.spawn_pipelines(vec![(file_id, generation)]);
                Ok(ResolveOutcome::Resumed)
            }
            None => Ok(ResolveOutcome::Removed),
        }
    }

    /// Correct the document type of a parsed file, moving it between
    /// collections
    pub async fn reclassify(
        &self,
        file_id: Uuid,
        document_type: DocumentType,
    ) -> IntakeResult<CollectionKind> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .get_mut(file_id)
            .ok_or(IntakeError::FileNotFound(file_id))?;

        let state = entry.file.state();
        if state != FileState::Parsed {
            return Err(IntakeError::NotReclassifiable { file_id, state });
        }
        entry.file.reclassify(document_type)?;
        let confidence = entry
            .file
            .classification()
            .map(|c| c.confidence)
            .unwrap_or_default();

        let collection = CollectionKind::for_document_type(document_type);
        registry.collections.route(file_id, collection);
        self.event_bus.emit_lossy(IntakeEvent::FileRouted {
            file_id,
            collection,
            document_type,
            confidence,
            timestamp: Utc::now(),
        });

        tracing::info!(file_id = %file_id, collection = ?collection, "File reclassified");
        Ok(collection)
    }

    /// Drop every file, conflict and collection entry
    ///
    /// Running pipelines notice their file is gone and stop.
    pub async fn clear(&self) -> usize {
        let files_dropped = self.registry.write().await.clear();
        self.event_bus.emit_lossy(IntakeEvent::IntakeCleared {
            files_dropped,
            timestamp: Utc::now(),
        });
        tracing::info!(files_dropped, "Intake session cleared");
        files_dropped
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub async fn get_file(&self, file_id: Uuid) -> Option<FileView> {
        let registry = self.registry.read().await;
        registry.get(file_id).map(|entry| FileView::from(&entry.file))
    }

    /// All files in insertion order
    pub async fn files(&self) -> Vec<FileView> {
        let registry = self.registry.read().await;
        registry.files().map(FileView::from).collect()
    }

    pub async fn current_conflict(&self) -> Option<ConflictView> {
        let registry = self.registry.read().await;
        registry.gate.current().map(|conflict| ConflictView {
            conflict: conflict.clone(),
            queued_behind: registry.gate.queued_behind(),
        })
    }

    pub async fn collections(&self) -> crate::models::OutputCollections {
        self.registry.read().await.collections.clone()
    }

    pub async fn summary(&self) -> IntakeSummary {
        let registry = self.registry.read().await;
        IntakeSummary::from_files(registry.files(), registry.gate.pending_count())
    }

    pub async fn snapshot(&self) -> IntakeSnapshot {
        let registry = self.registry.read().await;
        IntakeSnapshot {
            files: registry.files().map(FileView::from).collect(),
            collections: registry.collections.clone(),
            current_conflict: registry.gate.current().map(|conflict| ConflictView {
                conflict: conflict.clone(),
                queued_behind: registry.gate.queued_behind(),
            }),
            summary: IntakeSummary::from_files(registry.files(), registry.gate.pending_count()),
        }
    }

    /// Wait until no pipeline task is running
    ///
    /// Files waiting for a duplicate decision do not count as running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active_tasks.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    // ------------------------------------------------------------------
    // Pipeline driver
    // ------------------------------------------------------------------

    /// Start drivers for `(file_id, generation)` pairs
    fn spawn_pipelines(self: &Arc<Self>, drivers: Vec<(Uuid, u64)>) {
        let guard = ActiveTask::start(self);
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let _guard = guard;
            let tasks: Vec<_> = drivers
                .iter()
                .map(|&(file_id, generation)| {
                    let this = Arc::clone(&this);
                    move || this.drive(file_id, generation)
                })
                .collect();

            let outcomes = this.scheduler.run(tasks).await;
            for ((file_id, generation), outcome) in drivers.into_iter().zip(outcomes) {
                match outcome {
                    Ok(outcome) => {
                        tracing::debug!(file_id = %file_id, outcome = ?outcome, "Pipeline finished")
                    }
                    Err(e) => this.fail_crashed(file_id, generation, e.to_string()).await,
                }
            }

            let summary = this.summary().await;
            tracing::info!(
                needs_attention = summary.needs_attention(),
                "Pipelines finished: {}",
                summary.display_string()
            );
        });
    }

    /// Run one file's pipeline until it needs nothing more from us
    ///
    /// Stops with [`PipelineOutcome::Superseded`] as soon as the entry's
    /// driver generation no longer matches `generation`.
    async fn drive(self: Arc<Self>, file_id: Uuid, generation: u64) -> PipelineOutcome {
        let cancel = match self.registry.read().await.get(file_id) {
            Some(entry) if entry.driver != generation => return PipelineOutcome::Superseded,
            Some(entry) => entry.cancel.clone(),
            None => return PipelineOutcome::Gone,
        };

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PipelineOutcome::Cancelled,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return PipelineOutcome::Gone,
            },
        };

        loop {
            let step = {
                let registry = self.registry.read().await;
                registry.get(file_id).map(|entry| {
                    (entry.driver, entry.file.state(), entry.file.duplicate_check())
                })
            };
            let Some((driver, state, duplicate_check)) = step else {
                return PipelineOutcome::Gone;
            };
            if driver != generation {
                tracing::debug!(file_id = %file_id, generation, "Newer driver took over");
                return PipelineOutcome::Superseded;
            }

            match state {
                FileState::Uploading => self.stage_upload(file_id).await,
                FileState::Uploaded => {
                    let next = if self.settings.duplicate_check_enabled
                        && duplicate_check == crate::models::DuplicateCheckStatus::Pending
                    {
                        FileState::DuplicateCheck
                    } else {
                        FileState::Parsing
                    };
                    self.advance(file_id, FileState::Uploaded, next).await;
                }
                FileState::DuplicateCheck => self.stage_duplicate_check(file_id).await,
                FileState::Parsing => self.stage_parse(file_id).await,
                FileState::Parsed => {
                    let registry = self.registry.read().await;
                    let kind = registry
                        .collections
                        .kind_of(file_id)
                        .unwrap_or(CollectionKind::Unclassified);
                    return PipelineOutcome::Parsed(kind);
                }
                FileState::ParseError => return PipelineOutcome::ParseError,
                FileState::Error => return PipelineOutcome::Failed,
                FileState::DuplicateDetected => return PipelineOutcome::AwaitingDecision,
                FileState::Removed => return PipelineOutcome::Cancelled,
            }
        }
    }

    /// Plain transition between two pipeline states
    async fn advance(&self, file_id: Uuid, from: FileState, to: FileState) {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_in_state_mut(file_id, from) else {
            return;
        };
        match entry.file.transition_to(to) {
            Ok(transition) => self.emit_transition(&transition),
            Err(e) => tracing::error!(file_id = %file_id, "{}", e),
        }
    }

    /// A pipeline task died unexpectedly; park the file in `Error`
    async fn fail_crashed(&self, file_id: Uuid, generation: u64, message: String) {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_mut(file_id).filter(|e| e.driver == generation) else {
            return;
        };
        let stage = match entry.file.state() {
            FileState::Uploading => PipelineStage::Upload,
            FileState::DuplicateCheck => PipelineStage::DuplicateCheck,
            FileState::Uploaded | FileState::Parsing => PipelineStage::Parse,
            _ => return,
        };
        tracing::error!(file_id = %file_id, stage = %stage, "Pipeline task crashed: {}", message);
        self.fail_stage(entry, stage, FailureKind::Server, message);
    }

    /// Move a file into `Error` (or `ParseError` for OCR failures) and
    /// notify observers
    fn fail_stage(
        &self,
        entry: &mut FileEntry,
        stage: PipelineStage,
        kind: FailureKind,
        message: String,
    ) {
        let file_id = entry.file.id;
        let result = if kind == FailureKind::Ocr && stage == PipelineStage::Parse {
            entry.file.mark_parse_error(None, message.clone())
        } else {
            entry.file.mark_error(stage, message.clone())
        };

        match result {
            Ok(transition) => {
                tracing::warn!(
                    file_id = %file_id,
                    file_name = %entry.file.name,
                    stage = %stage,
                    kind = ?kind,
                    "File failed: {}",
                    message
                );
                self.emit_transition(&transition);
                self.event_bus.emit_lossy(IntakeEvent::FileFailed {
                    file_id,
                    file_name: entry.file.name.clone(),
                    kind,
                    stage,
                    message,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => tracing::error!(file_id = %file_id, "{}", e),
        }
    }

    fn emit_transition(&self, transition: &StateTransition) {
        tracing::debug!(
            file_id = %transition.file_id,
            old_state = %transition.old_state,
            new_state = %transition.new_state,
            "State transition"
        );
        self.event_bus.emit_lossy(IntakeEvent::FileStateChanged {
            file_id: transition.file_id,
            old_state: transition.old_state,
            new_state: transition.new_state,
            progress_percent: progress_for(transition.new_state),
            timestamp: transition.transitioned_at,
        });
    }

    fn emit_conflict_surfaced(&self, conflict: &DuplicateConflict, queued_behind: usize) {
        self.event_bus.emit_lossy(IntakeEvent::DuplicateConflictSurfaced {
            file_id: conflict.file_id,
            file_name: conflict.file_name.clone(),
            matched_document: conflict.matched_document.clone(),
            similarity_score: conflict.similarity_score,
            queued_behind,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::upload_client::{
        BackendError, DuplicateCheckResult, ParseResult, UploadReceipt, UploadRequest,
    };
    use async_trait::async_trait;

    /// Counts backend calls; uploads wait for a permit on `upload_gate`
    struct CountingBackend {
        calls: AtomicUsize,
        upload_gate: Semaphore,
    }

    impl CountingBackend {
        fn new(upload_permits: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                upload_gate: Semaphore::new(upload_permits),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IntakeBackend for CountingBackend {
        async fn upload_raw(&self, _request: &UploadRequest) -> Result<UploadReceipt, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .upload_gate
                .acquire()
                .await
                .map_err(|e| BackendError::Network(e.to_string()))?;
            Ok(UploadReceipt {
                server_reference: "srv-1".to_string(),
            })
        }

        async fn check_duplicate(
            &self,
            _request: &UploadRequest,
        ) -> Result<DuplicateCheckResult, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DuplicateCheckResult {
                is_duplicate: false,
                matched_document: None,
                similarity_score: None,
            })
        }

        async fn classify_and_parse(
            &self,
            _request: &UploadRequest,
        ) -> Result<ParseResult, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ParseResult {
                document_type: DocumentType::Invoice,
                confidence_score: 90.0,
                extracted_fields: Default::default(),
            })
        }
    }

    fn orchestrator(backend: Arc<CountingBackend>) -> Arc<IntakeOrchestrator> {
        let settings = OrchestratorSettings {
            policy: UploadPolicy::default(),
            concurrency_limit: 2,
            inter_batch_delay: Duration::ZERO,
            duplicate_check_enabled: false,
            min_confidence: 0.0,
        };
        IntakeOrchestrator::new(backend, EventBus::new(64), settings).unwrap()
    }

    /// Register a file without starting a driver
    async fn register(orchestrator: &IntakeOrchestrator, name: &str) -> Uuid {
        let raw = RawFile::new(name, b"%PDF-1.4 test".to_vec());
        let file = IngestedFile::new(Uuid::new_v4(), &raw);
        let file_id = file.id;
        orchestrator
            .registry
            .write()
            .await
            .insert(FileEntry::new(file, raw));
        file_id
    }

    async fn hand_over(orchestrator: &IntakeOrchestrator, file_id: Uuid) -> u64 {
        orchestrator
            .registry
            .write()
            .await
            .get_mut(file_id)
            .unwrap()
            .next_driver()
    }

    async fn state_of(orchestrator: &IntakeOrchestrator, file_id: Uuid) -> FileState {
        orchestrator.get_file(file_id).await.unwrap().file.state()
    }

    #[tokio::test]
    async fn test_stale_driver_never_starts() {
        let backend = CountingBackend::new(8);
        let orchestrator = orchestrator(backend.clone());
        let file_id = register(&orchestrator, "a.pdf").await;
        let current = hand_over(&orchestrator, file_id).await;

        let outcome = Arc::clone(&orchestrator).drive(file_id, 0).await;
        assert_eq!(outcome, PipelineOutcome::Superseded);
        assert_eq!(backend.calls(), 0);
        assert_eq!(state_of(&orchestrator, file_id).await, FileState::Uploading);

        let outcome = Arc::clone(&orchestrator).drive(file_id, current).await;
        assert_eq!(outcome, PipelineOutcome::Parsed(CollectionKind::Invoices));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_driver_stops_after_stage_when_superseded() {
        let backend = CountingBackend::new(0);
        let orchestrator = orchestrator(backend.clone());
        let file_id = register(&orchestrator, "a.pdf").await;

        let stale = tokio::spawn(Arc::clone(&orchestrator).drive(file_id, 0));
        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.calls() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // A newer driver takes the file while the upload is in flight
        hand_over(&orchestrator, file_id).await;
        backend.upload_gate.add_permits(1);

        assert_eq!(stale.await.unwrap(), PipelineOutcome::Superseded);
        assert_eq!(backend.calls(), 1);
        assert_eq!(state_of(&orchestrator, file_id).await, FileState::Uploaded);
    }

    #[tokio::test]
    async fn test_crash_report_from_stale_driver_is_ignored() {
        let orchestrator = orchestrator(CountingBackend::new(8));
        let file_id = register(&orchestrator, "a.pdf").await;
        let current = hand_over(&orchestrator, file_id).await;

        orchestrator
            .fail_crashed(file_id, current - 1, "panicked".to_string())
            .await;
        assert_eq!(state_of(&orchestrator, file_id).await, FileState::Uploading);

        orchestrator
            .fail_crashed(file_id, current, "panicked".to_string())
            .await;
        let view = orchestrator.get_file(file_id).await.unwrap();
        assert_eq!(view.file.state(), FileState::Error);
        assert_eq!(view.file.failed_stage(), Some(PipelineStage::Upload));
    }

    #[tokio::test]
    async fn test_crash_while_uploaded_parks_file_in_error() {
        let orchestrator = orchestrator(CountingBackend::new(8));
        let file_id = register(&orchestrator, "a.pdf").await;
        orchestrator
            .registry
            .write()
            .await
            .get_mut(file_id)
            .unwrap()
            .file
            .mark_uploaded("srv-1".to_string())
            .unwrap();

        orchestrator.fail_crashed(file_id, 0, "panicked".to_string()).await;

        let view = orchestrator.get_file(file_id).await.unwrap();
        assert_eq!(view.file.state(), FileState::Error);
        assert_eq!(view.file.failed_stage(), Some(PipelineStage::Parse));
    }

    #[tokio::test]
    async fn test_authorize_upload_by_role() {
        let orchestrator = orchestrator(CountingBackend::new(8));
        assert!(orchestrator.authorize_upload(Some("GM")).is_ok());
        assert!(matches!(
            orchestrator.authorize_upload(Some("Chef")),
            Err(IntakeError::UploadNotPermitted(Some(role))) if role == "Chef"
        ));
        assert!(matches!(
            orchestrator.authorize_upload(None),
            Err(IntakeError::UploadNotPermitted(None))
        ));
    }
}
