//! Scripted collaborators for unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::llm::{ChatMessage, InferenceParams, ModelClient, ModelError, RetryPolicy, TextSink};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::retrieval::{
    MemoryBlobStore, ReferenceIndex, RetrievalConfig, RetrievalGateway, SearchHit, SearchMode,
};
use crate::store::{MemoryTemplateStore, ReferenceMetadata, TemplateStore};
use crate::validation::{TemplateValidator, ValidationGateway, ValidationOutcome};

pub const PNG: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
pub const EXPLANATION: &str =
    "1. Users upload files to an S3 bucket.\n2. A Lambda function processes each upload.";

/// What a [`ScriptedModel`] was asked.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model_id: String,
    pub system: String,
    /// Text of every message, joined with newlines
    pub text: String,
    pub streamed: bool,
}

/// Model that replays queued responses in order.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    recorded: Mutex<Vec<RecordedCall>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_text(&self, text: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
    }

    pub fn push_error(&self, error: ModelError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn invoke(
        &self,
        model_id: &str,
        system: &str,
        messages: &[ChatMessage],
        _params: &InferenceParams,
        sink: Option<&dyn TextSink>,
    ) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().push(RecordedCall {
            model_id: model_id.to_string(),
            system: system.to_string(),
            text: messages
                .iter()
                .map(ChatMessage::text)
                .collect::<Vec<_>>()
                .join("\n"),
            streamed: sink.is_some(),
        });

        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Failed("no scripted response".to_string())));

        if let (Ok(text), Some(sink)) = (&next, sink) {
            let split = text.char_indices().nth(text.chars().count() / 2).map(|(i, _)| i);
            match split {
                Some(i) => {
                    sink.on_partial_text(&text[..i]);
                    sink.on_partial_text(&text[i..]);
                }
                None => sink.on_partial_text(text),
            }
        }
        next
    }
}

/// Index returning a fixed hit list and counting searches.
pub struct CountingIndex {
    hits: Vec<ReferenceMetadata>,
    queries: Mutex<Vec<String>>,
}

impl CountingIndex {
    pub fn new(hits: Vec<ReferenceMetadata>) -> Self {
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReferenceIndex for CountingIndex {
    async fn search(&self, query: &str, top_k: usize, _mode: SearchMode) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self
            .hits
            .iter()
            .take(top_k)
            .map(|metadata| SearchHit {
                score: 1.0,
                metadata: metadata.clone(),
            })
            .collect())
    }
}

/// Validator replaying queued outcomes. An empty queue is a transport error.
pub struct ScriptedValidator {
    outcomes: Mutex<VecDeque<ValidationOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, outcome: ValidationOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateValidator for ScriptedValidator {
    async fn validate(&self, _content: &str) -> Result<ValidationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => Ok(outcome),
            None => anyhow::bail!("no scripted outcome"),
        }
    }
}

/// Sink that records streamed text and retry notices.
#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<String>>,
    retries: Mutex<Vec<u32>>,
}

impl RecordingSink {
    pub fn text(&self) -> String {
        self.chunks.lock().unwrap().concat()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn retries(&self) -> Vec<u32> {
        self.retries.lock().unwrap().clone()
    }
}

impl TextSink for RecordingSink {
    fn on_partial_text(&self, text: &str) {
        self.chunks.lock().unwrap().push(text.to_string());
    }

    fn on_retry(&self, attempt: u32) {
        self.retries.lock().unwrap().push(attempt);
    }
}

/// Orchestrator wired to scripted collaborators. `model` serves every
/// conversation call, `summary` the retrieval query summaries.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub model: Arc<ScriptedModel>,
    pub summary: Arc<ScriptedModel>,
    pub validator: Arc<ScriptedValidator>,
    pub index: Arc<CountingIndex>,
}

pub fn no_wait_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        max_jitter: Duration::ZERO,
    }
}

pub fn harness_with(reiterate: bool, store: Arc<dyn TemplateStore>) -> Harness {
    let model = Arc::new(ScriptedModel::new());
    let summary = Arc::new(ScriptedModel::new());
    let validator = Arc::new(ScriptedValidator::new());
    let index = Arc::new(CountingIndex::new(vec![ReferenceMetadata {
        reference_template_location: "s3://refs/upload.yaml".to_string(),
        reference_image_location: "s3://refs/upload.png".to_string(),
    }]));
    let blobs = Arc::new(MemoryBlobStore::new());
    blobs.insert(
        "s3://refs/upload.yaml",
        "Resources:\n  ReferenceBucket:\n    Type: AWS::S3::Bucket",
    );

    let retrieval = RetrievalGateway::new(
        index.clone(),
        blobs,
        store.clone(),
        summary.clone(),
        no_wait_retry(),
        RetrievalConfig::default(),
    );
    let orchestrator = Orchestrator::new(
        model.clone(),
        retrieval,
        store,
        ValidationGateway::new(validator.clone()),
        no_wait_retry(),
        OrchestratorConfig {
            reiterate,
            ..OrchestratorConfig::default()
        },
    );

    Harness {
        orchestrator: Arc::new(orchestrator),
        model,
        summary,
        validator,
        index,
    }
}

pub fn harness() -> Harness {
    harness_with(
        false,
        Arc::new(MemoryTemplateStore::new(Duration::from_secs(900))),
    )
}
