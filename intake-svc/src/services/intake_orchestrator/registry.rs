//! Observation registry: every file of the current intake session
//!
//! Owned by the orchestrator behind a single `RwLock`; one write guard per
//! transition keeps each file's changes atomic.

use crate::models::{IngestedFile, OutputCollections, RawFile};
use crate::services::duplicate_gate::DuplicateResolutionGate;
use crate::services::upload_client::UploadRequest;
use bytes::Bytes;
use intake_common::events::FileState;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One registered file with its cached contents
#[derive(Debug)]
pub(crate) struct FileEntry {
    pub file: IngestedFile,
    pub content_type: Option<String>,
    /// File bytes; kept until `Parsed` or `Removed` so retries can resend
    pub payload: Option<Bytes>,
    /// Cancelled when the file is removed or the registry is cleared
    pub cancel: CancellationToken,
    /// Generation of the pipeline driver that owns this file; a driver
    /// whose generation is behind stops at its next step
    pub driver: u64,
}

impl FileEntry {
    pub fn new(file: IngestedFile, raw: RawFile) -> Self {
        Self {
            file,
            content_type: raw.content_type,
            payload: Some(raw.bytes),
            cancel: CancellationToken::new(),
            driver: 0,
        }
    }

    /// Hand the file to a new driver; returns its generation
    pub fn next_driver(&mut self) -> u64 {
        self.driver += 1;
        self.driver
    }

    /// Stage request built from the cached bytes
    pub fn upload_request(&self) -> Option<UploadRequest> {
        let bytes = self.payload.clone()?;
        Some(UploadRequest {
            file_id: self.file.id,
            file_name: self.file.name.clone(),
            content_type: self.content_type.clone(),
            content_hash: self.file.content_hash.clone(),
            bytes,
            server_reference: self.file.server_reference().map(str::to_string),
        })
    }

    /// Drop cached bytes and stop any waiting pipeline
    pub fn release(&mut self) {
        self.payload = None;
        self.cancel.cancel();
    }
}

#[derive(Debug, Default)]
pub(crate) struct IntakeRegistry {
    files: HashMap<Uuid, FileEntry>,
    /// Insertion order for listing
    order: Vec<Uuid>,
    pub collections: OutputCollections,
    pub gate: DuplicateResolutionGate,
}

impl IntakeRegistry {
    pub fn insert(&mut self, entry: FileEntry) {
        let id = entry.file.id;
        self.order.push(id);
        self.files.insert(id, entry);
    }

    pub fn get(&self, file_id: Uuid) -> Option<&FileEntry> {
        self.files.get(&file_id)
    }

    pub fn get_mut(&mut self, file_id: Uuid) -> Option<&mut FileEntry> {
        self.files.get_mut(&file_id)
    }

    /// Entry only if it is still in `expected`; late stage results use this
    /// to detect that the file moved on (cancelled, cleared) meanwhile
    pub fn get_in_state_mut(&mut self, file_id: Uuid, expected: FileState) -> Option<&mut FileEntry> {
        self.files
            .get_mut(&file_id)
            .filter(|entry| entry.file.state() == expected)
    }

    /// Files in insertion order
    pub fn files(&self) -> impl Iterator<Item = &IngestedFile> {
        self.order
            .iter()
            .filter_map(|id| self.files.get(id))
            .map(|entry| &entry.file)
    }

    /// Drop everything; returns the number of files dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.files.len();
        for entry in self.files.values_mut() {
            entry.release();
        }
        self.files.clear();
        self.order.clear();
        self.collections.clear();
        self.gate.clear();
        dropped
    }
}
