//! Configuration resolution for intake-svc
//!
//! Priority (highest first): command line → `INTAKE_*` environment → TOML
//! file → built-in defaults. Command-line values are applied by `main` on top
//! of the value returned by [`IntakeConfig::load`].

use crate::models::UploadPolicy;
use intake_common::config::{load_toml_config_or_default, ConfigFileResolver, LoggingConfig};
use intake_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Module name used for the TOML file (`intake-svc.toml`)
pub const MODULE_NAME: &str = "intake-svc";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "INTAKE_CONFIG";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5790;

/// Upload limits and roles as written in TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_files_per_batch: usize,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    /// Roles that may submit batches; an empty list lets anyone upload
    pub allowed_roles: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = UploadPolicy::default();
        Self {
            max_files_per_batch: policy.max_files_per_batch(),
            max_file_size_bytes: policy.max_file_size_bytes(),
            allowed_extensions: policy.allowed_extensions().iter().cloned().collect(),
            allowed_roles: policy.allowed_roles().iter().cloned().collect(),
        }
    }
}

impl PolicyConfig {
    pub fn to_policy(&self) -> UploadPolicy {
        UploadPolicy::new(
            self.max_files_per_batch,
            self.max_file_size_bytes,
            &self.allowed_extensions,
        )
        .with_allowed_roles(&self.allowed_roles)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum pipelines in flight at once
    pub concurrency_limit: usize,
    /// Pause between consecutive chunks of one batch
    pub inter_batch_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            inter_batch_delay_ms: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub duplicate_check_enabled: bool,
    /// Classifications below this confidence (0..=1) land in ParseError;
    /// 0.0 disables the check
    pub min_confidence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            duplicate_check_enabled: true,
            min_confidence: 0.0,
        }
    }
}

/// External OCR backend location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub upload_path: String,
    pub duplicate_path: String,
    pub classify_path: String,
    /// Per-request timeout; OCR on large scans is slow
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            upload_path: "/api/upload/raw".to_string(),
            duplicate_path: "/api/upload/check-duplicate".to_string(),
            classify_path: "/api/ocr/classify".to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join `base_url` and an endpoint path without doubling slashes
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast buffer; slow SSE clients lag beyond this
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub port: u16,
    pub bind_address: String,
    pub logging: LoggingConfig,
    pub policy: PolicyConfig,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    pub backend: BackendConfig,
    pub events: EventsConfig,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "127.0.0.1".to_string(),
            logging: LoggingConfig::default(),
            policy: PolicyConfig::default(),
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            backend: BackendConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl IntakeConfig {
    /// Resolve the config file, load it and apply environment overrides
    ///
    /// A missing or unreadable file falls back to defaults; malformed
    /// environment values are an error.
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self> {
        let resolver = ConfigFileResolver::new(MODULE_NAME, CONFIG_ENV_VAR);
        let path = resolver.resolve(cli_config_path);

        let mut config: IntakeConfig = load_toml_config_or_default(path.as_deref());
        config.apply_env_overrides(|key| std::env::var(key).ok())?;

        info!(
            config_file = ?path,
            port = config.port,
            backend = %config.backend.base_url,
            "Configuration resolved"
        );
        Ok(config)
    }

    /// Apply `INTAKE_*` overrides using `lookup` to read variables
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("INTAKE_PORT") {
            self.port = parse_env("INTAKE_PORT", &v)?;
        }
        if let Some(v) = get("INTAKE_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = get("INTAKE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("INTAKE_BACKEND_URL") {
            self.backend.base_url = v;
        }
        if let Some(v) = get("INTAKE_REQUEST_TIMEOUT_SECS") {
            self.backend.request_timeout_secs = parse_env("INTAKE_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("INTAKE_MAX_FILES_PER_BATCH") {
            self.policy.max_files_per_batch = parse_env("INTAKE_MAX_FILES_PER_BATCH", &v)?;
        }
        if let Some(v) = get("INTAKE_MAX_FILE_SIZE_BYTES") {
            self.policy.max_file_size_bytes = parse_env("INTAKE_MAX_FILE_SIZE_BYTES", &v)?;
        }
        if let Some(v) = get("INTAKE_ALLOWED_EXTENSIONS") {
            self.policy.allowed_extensions = v
                .split(',')
                .map(|ext| ext.trim().to_string())
                .filter(|ext| !ext.is_empty())
                .collect();
        }
        if let Some(v) = get("INTAKE_ALLOWED_ROLES") {
            self.policy.allowed_roles = v
                .split(',')
                .map(|role| role.trim().to_string())
                .filter(|role| !role.is_empty())
                .collect();
        }
        if let Some(v) = get("INTAKE_CONCURRENCY_LIMIT") {
            self.scheduler.concurrency_limit = parse_env("INTAKE_CONCURRENCY_LIMIT", &v)?;
        }
        if let Some(v) = get("INTAKE_INTER_BATCH_DELAY_MS") {
            self.scheduler.inter_batch_delay_ms = parse_env("INTAKE_INTER_BATCH_DELAY_MS", &v)?;
        }
        if let Some(v) = get("INTAKE_DUPLICATE_CHECK_ENABLED") {
            self.pipeline.duplicate_check_enabled =
                parse_env("INTAKE_DUPLICATE_CHECK_ENABLED", &v)?;
        }
        if let Some(v) = get("INTAKE_MIN_CONFIDENCE") {
            self.pipeline.min_confidence = parse_env("INTAKE_MIN_CONFIDENCE", &v)?;
        }

        Ok(())
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency_limit == 0 {
            return Err(Error::Config(
                "scheduler.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.policy.max_files_per_batch == 0 {
            return Err(Error::Config(
                "policy.max_files_per_batch must be at least 1".to_string(),
            ));
        }
        if self.policy.to_policy().allowed_extensions().is_empty() {
            return Err(Error::Config(
                "policy.allowed_extensions must list at least one extension".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pipeline.min_confidence) {
            return Err(Error::Config(format!(
                "pipeline.min_confidence must be within 0..=1 (got {})",
                self.pipeline.min_confidence
            )));
        }
        if self.events.capacity == 0 {
            return Err(Error::Config("events.capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", key, value, e)))
}
