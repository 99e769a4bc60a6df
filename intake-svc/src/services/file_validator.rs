//! Batch and per-file validation against an upload policy
//!
//! Rules, applied in order:
//! 1. Batch size: more than `max_files_per_batch` files rejects the whole batch
//! 2. Per file: within `max_file_size_bytes`
//! 3. Per file: extension present and in `allowed_extensions`
//!
//! Pure functions; nothing here touches the network or the registry.

use crate::models::{RawFile, UploadPolicy};
use serde::Serialize;
use std::fmt;

/// Why a single file was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// Whole batch refused; every file carries this reason
    BatchTooLarge { file_count: usize, max_files: usize },
    TooLarge { size_bytes: u64, max_bytes: u64 },
    MissingExtension,
    UnsupportedType { extension: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BatchTooLarge {
                file_count,
                max_files,
            } => write!(
                f,
                "Too many files: {} submitted, at most {} per batch",
                file_count, max_files
            ),
            RejectReason::TooLarge {
                size_bytes,
                max_bytes,
            } => write!(
                f,
                "File is too large ({} bytes, limit {} bytes)",
                size_bytes, max_bytes
            ),
            RejectReason::MissingExtension => write!(f, "File has no extension"),
            RejectReason::UnsupportedType { extension } => {
                write!(f, "File type .{} is not supported", extension)
            }
        }
    }
}

/// A file refused by validation, with its reason
#[derive(Debug, Clone, Serialize)]
pub struct RejectedFile {
    pub file_name: String,
    pub reason: RejectReason,
    /// Human-readable message for notifications
    pub message: String,
}

/// Outcome of validating one batch
#[derive(Debug, Clone, Default)]
pub struct BatchValidation {
    pub accepted: Vec<RawFile>,
    pub rejected: Vec<RejectedFile>,
    /// Set when the batch as a whole was refused; `accepted` is then empty
    /// and every submitted file is listed in `rejected`
    pub batch_error: Option<String>,
}

/// Check one file against the per-file rules
pub fn validate_file(file: &RawFile, policy: &UploadPolicy) -> Result<(), RejectReason> {
    let size_bytes = file.size_bytes();
    if size_bytes > policy.max_file_size_bytes() {
        return Err(RejectReason::TooLarge {
            size_bytes,
            max_bytes: policy.max_file_size_bytes(),
        });
    }

    let extension = file.extension().ok_or(RejectReason::MissingExtension)?;
    if !policy.allows_extension(&extension) {
        return Err(RejectReason::UnsupportedType { extension });
    }

    Ok(())
}

/// Validate a whole batch
///
/// An oversized batch is refused in full (every file counted as rejected
/// under one batch message); otherwise each file is judged on its own.
pub fn validate_batch(files: Vec<RawFile>, policy: &UploadPolicy) -> BatchValidation {
    let max_files = policy.max_files_per_batch();
    let file_count = files.len();
    if file_count > max_files {
        let reason = RejectReason::BatchTooLarge {
            file_count,
            max_files,
        };
        let message = reason.to_string();
        tracing::warn!(file_count, max_files, "Batch rejected by size limit");
        return BatchValidation {
            accepted: Vec::new(),
            rejected: files
                .into_iter()
                .map(|file| RejectedFile {
                    file_name: file.name,
                    reason: reason.clone(),
                    message: message.clone(),
                })
                .collect(),
            batch_error: Some(message),
        };
    }

    let mut validation = BatchValidation::default();
    for file in files {
        match validate_file(&file, policy) {
            Ok(()) => validation.accepted.push(file),
            Err(reason) => {
                tracing::debug!(file_name = %file.name, %reason, "File rejected");
                validation.rejected.push(RejectedFile {
                    message: format!("{}: {}", file.name, reason),
                    file_name: file.name,
                    reason,
                });
            }
        }
    }
    validation
}
