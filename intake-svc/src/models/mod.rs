//! Data models for intake-svc (document intake microservice)

pub mod duplicate_conflict;
pub mod ingested_file;
pub mod output_collections;
pub mod upload_policy;

pub use duplicate_conflict::DuplicateConflict;
pub use ingested_file::{
    is_allowed_transition, Classification, DuplicateCheckStatus, IngestedFile, RawFile,
    StateTransition, TransitionError,
};
pub use output_collections::OutputCollections;
pub use upload_policy::UploadPolicy;
