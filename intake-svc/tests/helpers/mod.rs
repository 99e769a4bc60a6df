//! Test Helper Utilities
//!
//! Shared utilities for testing intake-svc: a scripted in-process backend,
//! orchestrator construction and state polling.

#![allow(dead_code)]

use async_trait::async_trait;
use intake_common::events::{DocumentType, EventBus, FileState, IntakeEvent};
use intake_svc::models::RawFile;
use intake_svc::services::{
    BackendError, DuplicateCheckResult, IntakeBackend, IntakeOrchestrator, OrchestratorSettings,
    ParseResult, UploadReceipt, UploadRequest,
};
use intake_svc::models::UploadPolicy;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

/// Backend stage, as seen by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Upload,
    Duplicate,
    Classify,
}

#[derive(Default)]
struct Script {
    uploads: HashMap<String, VecDeque<Result<UploadReceipt, BackendError>>>,
    duplicates: HashMap<String, VecDeque<Result<DuplicateCheckResult, BackendError>>>,
    classifications: HashMap<String, VecDeque<Result<ParseResult, BackendError>>>,
    holds: HashMap<(Stage, String), Arc<Semaphore>>,
    calls: Vec<(Stage, String)>,
}

/// Scripted `IntakeBackend`
///
/// Unscripted calls succeed: upload returns `srv-<name>`, the duplicate
/// check finds nothing and classification returns an invoice at 90%.
/// Scripted outcomes are consumed one per call, keyed by file name.
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<Script>,
    latency: Mutex<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct ActiveCall<'a>(&'a MockBackend);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call sleeps this long before answering
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn script_upload(&self, name: &str, outcome: Result<UploadReceipt, BackendError>) {
        let mut script = self.script.lock().unwrap();
        script.uploads.entry(name.to_string()).or_default().push_back(outcome);
    }

    pub fn script_duplicate(&self, name: &str, outcome: Result<DuplicateCheckResult, BackendError>) {
        let mut script = self.script.lock().unwrap();
        script.duplicates.entry(name.to_string()).or_default().push_back(outcome);
    }

    pub fn script_classify(&self, name: &str, outcome: Result<ParseResult, BackendError>) {
        let mut script = self.script.lock().unwrap();
        script
            .classifications
            .entry(name.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Make calls for (`stage`, `name`) block until the returned semaphore
    /// gets a permit
    pub fn hold(&self, stage: Stage, name: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.script
            .lock()
            .unwrap()
            .holds
            .insert((stage, name.to_string()), gate.clone());
        gate
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(s, _)| *s == stage)
            .count()
    }

    pub fn calls_for(&self, stage: Stage, name: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(s, n)| *s == stage && n == name)
            .count()
    }

    /// Call log in arrival order
    pub fn call_log(&self) -> Vec<(Stage, String)> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Highest number of simultaneous calls observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self, stage: Stage, name: &str) -> ActiveCall<'_> {
        let hold = {
            let mut script = self.script.lock().unwrap();
            script.calls.push((stage, name.to_string()));
            script.holds.get(&(stage, name.to_string())).cloned()
        };

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let call = ActiveCall(self);

        if let Some(gate) = hold {
            gate.acquire().await.unwrap().forget();
        }
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        call
    }
}

#[async_trait]
impl IntakeBackend for MockBackend {
    async fn upload_raw(&self, request: &UploadRequest) -> Result<UploadReceipt, BackendError> {
        let _call = self.enter(Stage::Upload, &request.file_name).await;
        let scripted = self
            .script
            .lock()
            .unwrap()
            .uploads
            .get_mut(&request.file_name)
            .and_then(|q| q.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(UploadReceipt {
                server_reference: format!("srv-{}", request.file_name),
            })
        })
    }

    async fn check_duplicate(
        &self,
        request: &UploadRequest,
    ) -> Result<DuplicateCheckResult, BackendError> {
        let _call = self.enter(Stage::Duplicate, &request.file_name).await;
        let scripted = self
            .script
            .lock()
            .unwrap()
            .duplicates
            .get_mut(&request.file_name)
            .and_then(|q| q.pop_front());
        scripted.unwrap_or_else(|| Ok(DuplicateCheckResult::unique()))
    }

    async fn classify_and_parse(
        &self,
        request: &UploadRequest,
    ) -> Result<ParseResult, BackendError> {
        let _call = self.enter(Stage::Classify, &request.file_name).await;
        let scripted = self
            .script
            .lock()
            .unwrap()
            .classifications
            .get_mut(&request.file_name)
            .and_then(|q| q.pop_front());
        scripted.unwrap_or_else(|| Ok(parse_result(DocumentType::Invoice, 90.0)))
    }
}

pub fn parse_result(document_type: DocumentType, confidence_score: f64) -> ParseResult {
    let mut extracted_fields = BTreeMap::new();
    extracted_fields.insert("supplier".to_string(), serde_json::json!("Acme Foods"));
    ParseResult {
        document_type,
        confidence_score,
        extracted_fields,
    }
}

pub fn duplicate_match(score: f64) -> DuplicateCheckResult {
    DuplicateCheckResult {
        is_duplicate: true,
        matched_document: Some(serde_json::json!({"id": "inv-2041", "supplier": "Acme Foods"})),
        similarity_score: Some(score),
    }
}

pub fn pdf(name: &str) -> RawFile {
    RawFile::new(name, format!("%PDF-1.4 {}", name).into_bytes()).with_content_type("application/pdf")
}

pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        policy: UploadPolicy::new(10, 10 * 1024 * 1024, ["pdf", "jpg", "jpeg", "png"]),
        concurrency_limit: 2,
        inter_batch_delay: Duration::ZERO,
        duplicate_check_enabled: true,
        min_confidence: 0.0,
    }
}

pub fn orchestrator_with(
    backend: Arc<MockBackend>,
    settings: OrchestratorSettings,
) -> Arc<IntakeOrchestrator> {
    IntakeOrchestrator::new(backend, EventBus::new(1024), settings).unwrap()
}

pub fn orchestrator(backend: Arc<MockBackend>) -> Arc<IntakeOrchestrator> {
    orchestrator_with(backend, test_settings())
}

/// Poll until the file reaches `state` (5 s timeout)
pub async fn wait_for_state(orchestrator: &IntakeOrchestrator, file_id: Uuid, state: FileState) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(view) = orchestrator.get_file(file_id).await {
                if view.file.state() == state {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let current = orchestrator
        .get_file(file_id)
        .await
        .map(|view| view.file.state());
    assert!(result.is_ok(), "file {} never reached {} (now {:?})", file_id, state, current);
}

/// Poll until the backend has seen `count` calls for `stage`
pub async fn wait_for_calls(backend: &MockBackend, stage: Stage, count: usize) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while backend.calls(stage) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "expected {} {:?} calls, saw {}", count, stage, backend.calls(stage));
}

/// Drain everything currently buffered on a subscription
pub fn drain(rx: &mut broadcast::Receiver<IntakeEvent>) -> Vec<IntakeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// State changes recorded for one file, in order
pub fn states_of(events: &[IntakeEvent], file_id: Uuid) -> Vec<FileState> {
    events
        .iter()
        .filter_map(|event| match event {
            IntakeEvent::FileStateChanged {
                file_id: id,
                new_state,
                ..
            } if *id == file_id => Some(*new_state),
            _ => None,
        })
        .collect()
}
