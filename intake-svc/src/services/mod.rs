//! Service modules for the document intake pipeline

pub mod concurrency_scheduler;
pub mod duplicate_gate;
pub mod file_validator;
pub mod intake_orchestrator;
pub mod progress_reporter;
pub mod upload_client;

pub use concurrency_scheduler::{ConcurrencyScheduler, TaskError};
pub use duplicate_gate::{DuplicateResolutionGate, GateRemoval};
pub use file_validator::{validate_batch, validate_file, BatchValidation, RejectReason, RejectedFile};
pub use intake_orchestrator::{
    AcceptedFile, BatchReceipt, CancelOutcome, ConflictView, FileView, IntakeOrchestrator,
    IntakeSnapshot, IntakeSummary, OrchestratorSettings, PipelineOutcome, ResolveOutcome,
};
pub use progress_reporter::{aggregate_progress, progress_for};
pub use upload_client::{
    BackendError, DuplicateCheckResult, HttpUploadClient, IntakeBackend, ParseResult,
    UploadReceipt, UploadRequest,
};
