//! Upload policy (who may upload, batch size, file size and type limits)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Roles allowed to upload unless configured otherwise
pub const DEFAULT_UPLOAD_ROLES: [&str; 3] = ["GM", "Finance", "admin"];

/// Immutable limits applied by the file validator
///
/// A batch captures a clone of the policy at submit time, so changing the
/// orchestrator configuration never affects a batch already in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    max_files_per_batch: usize,
    max_file_size_bytes: u64,
    /// Lowercase, without leading dot
    allowed_extensions: BTreeSet<String>,
    /// Exact role names; empty means any caller may upload
    allowed_roles: BTreeSet<String>,
}

impl UploadPolicy {
    /// Build a policy; extensions are normalised (leading dot stripped,
    /// lowercased, blanks dropped). Upload roles start at
    /// [`DEFAULT_UPLOAD_ROLES`].
    pub fn new<I, S>(max_files_per_batch: usize, max_file_size_bytes: u64, allowed_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_extensions = allowed_extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            max_files_per_batch,
            max_file_size_bytes,
            allowed_extensions,
            allowed_roles: DEFAULT_UPLOAD_ROLES.iter().map(|role| role.to_string()).collect(),
        }
    }

    /// Replace the set of roles allowed to submit batches
    pub fn with_allowed_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_roles = roles
            .into_iter()
            .map(|role| role.as_ref().trim().to_string())
            .filter(|role| !role.is_empty())
            .collect();
        self
    }

    pub fn max_files_per_batch(&self) -> usize {
        self.max_files_per_batch
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    pub fn allowed_extensions(&self) -> &BTreeSet<String> {
        &self.allowed_extensions
    }

    pub fn allowed_roles(&self) -> &BTreeSet<String> {
        &self.allowed_roles
    }

    /// Role names match exactly. A missing role is refused unless the
    /// policy allows everyone.
    pub fn permits_role(&self, role: Option<&str>) -> bool {
        if self.allowed_roles.is_empty() {
            return true;
        }
        role.map(str::trim)
            .is_some_and(|role| self.allowed_roles.contains(role))
    }

    /// Case-insensitive membership test; accepts ".PDF" as well as "pdf"
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions
            .contains(&normalize_extension(extension))
    }
}

impl Default for UploadPolicy {
    /// 10 files per batch, 10 MB per file, PDF and scanned image formats
    fn default() -> Self {
        Self::new(
            10,
            10 * 1024 * 1024,
            ["pdf", "jpg", "jpeg", "png", "tiff", "tif"],
        )
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}
