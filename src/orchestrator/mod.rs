//! Session Orchestrator.
//!
//! Drives one conversation through its states:
//!
//! ```text
//! Idle --upload--> Explaining --> AwaitingConfirmation --confirm--> Generating --> Generated
//! Generating --> Validating [--invalid--> Resolving --> Validating] --> Generated
//! Generated --validate--> Validating --> Generated
//! Generated --update--> Updating --> Generated
//! Generated --resolve--> Resolving --> Generated
//! any --clear--> Idle (new session id)
//! ```
//!
//! Every operation returns a [`TurnResult`]; failures become an error turn in
//! the conversation and roll the state back, they never propagate as `Err`.
//! A confirm that fails after storing a revision ends in `Generated` so the
//! stored template can still be validated, updated or resolved.
//! The current template is always read back from the store, never cached on
//! the session.


use std::sync::Arc;

use serde::Serialize;

use crate::error::ArchformError;
use crate::llm::{InferenceParams, ModelClient, ModelError, RetryError, RetryPolicy, TextSink};
use crate::prompts::{self, Prompt};
use crate::retrieval::{ReferenceImage, RetrievalGateway};
use crate::session::{ChatTurn, Session, SessionState, TraceCategory, TraceEntry};
use crate::settings::ArchformSettings;
use crate::store::{StoreError, TemplateRevision, TemplateStore, Validity};
use crate::validation::ValidationGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    /// The validate guard refused the request
    Locked,
    /// Bad input or wrong state; nothing remote was called
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnError {
    pub kind: String,
    pub message: String,
}

impl From<&ArchformError> for TurnError {
    fn from(err: &ArchformError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one user operation.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub session_id: String,
    pub status: TurnStatus,
    pub state: SessionState,
    pub chat_turns_delta: Vec<ChatTurn>,
    pub trace_entries: Vec<TraceEntry>,
    pub explanation: Option<String>,
    pub current_template: Option<String>,
    pub current_validity: Option<Validity>,
    pub current_version: Option<u64>,
    /// Validator output when the turn ended on an invalid template
    pub diagnostic: Option<String>,
    pub error: Option<TurnError>,
}

impl TurnResult {
    pub fn is_ok(&self) -> bool {
        self.status == TurnStatus::Ok
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model_id: String,
    pub params: InferenceParams,
    /// Run the best-practices pass after generation
    pub reiterate: bool,
    /// User validations allowed per template, and automatic validations per
    /// generate cycle
    pub max_validations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&ArchformSettings::default())
    }
}

impl From<&ArchformSettings> for OrchestratorConfig {
    fn from(settings: &ArchformSettings) -> Self {
        Self {
            model_id: settings.ai.model.clone(),
            params: InferenceParams::from(&settings.ai),
            reiterate: settings.orchestrator.reiterate,
            max_validations: settings.orchestrator.max_validations,
        }
    }
}

/// What a successful operation shows the user.
enum Reply {
    Explanation(String),
    Template {
        revision: TemplateRevision,
        diagnostic: Option<String>,
    },
    Cleared,
}

/// Chat turns and trace collected during one operation.
#[derive(Default)]
struct Turn {
    chat: Vec<ChatTurn>,
    trace: Vec<TraceEntry>,
}

impl Turn {
    fn note(&mut self, category: TraceCategory, heading: &str, content: impl Into<String>) {
        self.trace.push(TraceEntry::new(category, heading, content));
    }

    fn push(&mut self, session: &mut Session, chat: ChatTurn) {
        session.chat.push(chat.clone());
        self.chat.push(chat);
    }
}

pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    retrieval: RetrievalGateway,
    store: Arc<dyn TemplateStore>,
    validation: ValidationGateway,
    retry: RetryPolicy,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        retrieval: RetrievalGateway,
        store: Arc<dyn TemplateStore>,
        validation: ValidationGateway,
        retry: RetryPolicy,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            retrieval,
            store,
            validation,
            retry,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Explain an architecture diagram. Accepted while idle or while an
    /// earlier explanation awaits confirmation.
    pub async fn upload_image(
        &self,
        session: &mut Session,
        image: &[u8],
        media_type: &str,
        sink: Option<&dyn TextSink>,
    ) -> TurnResult {
        let mut turn = Turn::default();
        let outcome = self
            .run_upload(session, &mut turn, image, media_type, sink)
            .await;
        self.finish(session, "upload", turn, outcome).await
    }

    /// Accept the (possibly edited) explanation and run the generate cycle.
    pub async fn confirm_explanation(
        &self,
        session: &mut Session,
        explanation: &str,
        sink: Option<&dyn TextSink>,
    ) -> TurnResult {
        let mut turn = Turn::default();
        let outcome = self
            .run_confirm(session, &mut turn, explanation, sink)
            .await;
        self.finish(session, "confirm", turn, outcome).await
    }

    pub async fn send_update_instruction(
        &self,
        session: &mut Session,
        instruction: &str,
        sink: Option<&dyn TextSink>,
    ) -> TurnResult {
        let mut turn = Turn::default();
        let outcome = self
            .run_update(session, &mut turn, instruction, sink)
            .await;
        self.finish(session, "update", turn, outcome).await
    }

    /// Validate the latest template, resolving once if it is invalid.
    pub async fn request_validate(
        &self,
        session: &mut Session,
        sink: Option<&dyn TextSink>,
    ) -> TurnResult {
        let mut turn = Turn::default();
        let outcome = self.run_validate(session, &mut turn, sink).await;
        self.finish(session, "validate", turn, outcome).await
    }

    /// Fix the latest template against an error the user supplies.
    pub async fn resolve_error(
        &self,
        session: &mut Session,
        error_text: &str,
        sink: Option<&dyn TextSink>,
    ) -> TurnResult {
        let mut turn = Turn::default();
        let outcome = self.run_resolve(session, &mut turn, error_text, sink).await;
        self.finish(session, "resolve", turn, outcome).await
    }

    /// Start over under a new session id. Stored revisions of the old id stay
    /// readable.
    pub async fn clear_session(&self, session: &mut Session) -> TurnResult {
        let mut turn = Turn::default();
        let previous = session.id.clone();
        session.reset();
        turn.note(
            TraceCategory::Rationale,
            "Clear session",
            format!("Started {}; templates of {} remain stored", session.id, previous),
        );
        tracing::info!("[orchestrator] session {} cleared, now {}", previous, session.id);
        self.finish(session, "clear", turn, Ok(Reply::Cleared)).await
    }

    pub async fn current_template(
        &self,
        session_id: &str,
    ) -> Result<Option<TemplateRevision>, ArchformError> {
        Ok(self.store.get_latest(session_id).await?)
    }

    pub async fn template_versions(
        &self,
        session_id: &str,
    ) -> Result<Vec<TemplateRevision>, ArchformError> {
        Ok(self.store.list_versions(session_id).await?)
    }

    pub async fn reference_images(
        &self,
        session_id: &str,
    ) -> Result<Vec<ReferenceImage>, ArchformError> {
        self.retrieval.fetch_reference_images(session_id).await
    }

    /// Drop expired store records. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, ArchformError> {
        Ok(self.store.purge_expired().await?)
    }

    async fn run_upload(
        &self,
        session: &mut Session,
        turn: &mut Turn,
        image: &[u8],
        media_type: &str,
        sink: Option<&dyn TextSink>,
    ) -> Result<Reply, ArchformError> {
        if image.is_empty() {
            return Err(ArchformError::MissingParameter("image".to_string()));
        }
        if !media_type.starts_with("image/") {
            return Err(ArchformError::MissingParameter(format!(
                "image media type (got '{}')",
                media_type
            )));
        }
        require_state(
            session,
            &[SessionState::Idle, SessionState::AwaitingConfirmation],
            "upload an image",
        )?;

        turn.push(
            session,
            ChatTurn::user(format!(
                "Uploaded architecture diagram ({}, {} bytes)",
                media_type,
                image.len()
            )),
        );

        let previous = session.state;
        session.state = SessionState::Explaining;

        let prompt = prompts::explain(image, media_type);
        match self.call_model(turn, "Explain architecture", &prompt, sink).await {
            Ok(text) if !text.trim().is_empty() => {
                let explanation = text.trim().to_string();
                session.explanation = Some(explanation.clone());
                session.state = SessionState::AwaitingConfirmation;
                Ok(Reply::Explanation(explanation))
            }
            Ok(_) => {
                session.state = previous;
                Err(ArchformError::RemoteCallFailed(
                    "model returned empty explanation".to_string(),
                ))
            }
            Err(e) => {
                session.state = previous;
                Err(e)
            }
        }
    }

    async fn run_confirm(
        &self,
        session: &mut Session,
        turn: &mut Turn,
        explanation: &str,
        sink: Option<&dyn TextSink>,
    ) -> Result<Reply, ArchformError> {
        let explanation = explanation.trim();
        if explanation.is_empty() {
            return Err(ArchformError::MissingParameter("explanation".to_string()));
        }
        require_state(
            session,
            &[SessionState::AwaitingConfirmation],
            "confirm an explanation",
        )?;

        turn.push(session, ChatTurn::user(explanation));
        session.explanation = Some(explanation.to_string());

        let previous = session.state;
        let stored_before = self.latest_version(session).await;
        session.state = SessionState::Generating;
        let result = self.generate_cycle(session, turn, explanation, sink).await;

        // A failure after the first revision was stored leaves that revision
        // current, so the session must be able to act on it.
        let stored = self.latest_version(session).await != stored_before;
        if result.is_ok() || stored {
            session.state = SessionState::Generated;
            session.validate_counter = 0;
        } else {
            session.state = previous;
        }
        result
    }

    /// generate, optional reiterate, then validate with at most one resolve.
    async fn generate_cycle(
        &self,
        session: &mut Session,
        turn: &mut Turn,
        explanation: &str,
        sink: Option<&dyn TextSink>,
    ) -> Result<Reply, ArchformError> {
        let references = self.references(session, turn, explanation).await?;

        let prompt = prompts::generate(&references, explanation);
        let content = self
            .template_call(turn, "Generate template", &prompt, sink)
            .await?;
        let mut revision = self.store_generated(session, turn, &content).await?;

        if self.config.reiterate {
            let prompt = prompts::reiterate(&references, &revision.content);
            let content = self
                .template_call(turn, "Reiterate template", &prompt, sink)
                .await?;
            revision = self.store_generated(session, turn, &content).await?;
        }

        let budget = self.config.max_validations.max(1);
        self.validate_and_resolve(session, turn, revision, Some(references), budget, sink)
            .await
    }

    async fn run_update(
        &self,
        session: &mut Session,
        turn: &mut Turn,
        instruction: &str,
        sink: Option<&dyn TextSink>,
    ) -> Result<Reply, ArchformError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(ArchformError::MissingParameter(
                "update instruction".to_string(),
            ));
        }
        require_state(session, &[SessionState::Generated], "update the template")?;

        turn.push(session, ChatTurn::user(instruction));
        session.state = SessionState::Updating;

        let result = async {
            let latest = self.latest(session).await?;
            let query = session
                .explanation
                .clone()
                .unwrap_or_else(|| instruction.to_string());
            let references = self.references(session, turn, &query).await?;
            let prompt = prompts::update(&references, &latest.content, instruction);
            let content = self
                .template_call(turn, "Update template", &prompt, sink)
                .await?;
            self.store_generated(session, turn, &content).await
        }
        .await;

        session.state = SessionState::Generated;
        let revision = result?;
        session.validate_counter = 0;
        Ok(Reply::Template {
            revision,
            diagnostic: None,
        })
    }

    async fn run_validate(
        &self,
        session: &mut Session,
        turn: &mut Turn,
        sink: Option<&dyn TextSink>,
    ) -> Result<Reply, ArchformError> {
        require_state(session, &[SessionState::Generated], "validate")?;
        if session.validate_counter >= self.config.max_validations {
            return Err(ArchformError::LockedOut(format!(
                "validate has been called {} times, returning control. Update or regenerate the template before validating again",
                session.validate_counter
            )));
        }

        turn.push(session, ChatTurn::user("Validate the template"));
        session.validate_counter += 1;

        let result = async {
            let latest = self.latest(session).await?;
            // one validator call per counted request
            self.validate_and_resolve(session, turn, latest, None, 1, sink)
                .await
        }
        .await;

        session.state = SessionState::Generated;
        result
    }

    async fn run_resolve(
        &self,
        session: &mut Session,
        turn: &mut Turn,
        error_text: &str,
        sink: Option<&dyn TextSink>,
    ) -> Result<Reply, ArchformError> {
        let error_text = error_text.trim();
        if error_text.is_empty() {
            return Err(ArchformError::MissingParameter("error text".to_string()));
        }
        require_state(session, &[SessionState::Generated], "resolve an error")?;

        turn.push(session, ChatTurn::user(error_text));
        session.state = SessionState::Resolving;

        let result = async {
            let latest = self.latest(session).await?;
            let query = session.explanation.clone().unwrap_or_default();
            let references = self.references(session, turn, &query).await?;
            let prompt = prompts::resolve_error(&references, &latest.content, error_text);
            let content = self
                .template_call(turn, "Resolve error", &prompt, sink)
                .await?;
            self.store_generated(session, turn, &content).await
        }
        .await;

        session.state = SessionState::Generated;
        Ok(Reply::Template {
            revision: result?,
            diagnostic: None,
        })
    }

    /// Validate `current`, and while it is invalid and fewer than `budget`
    /// validator calls were made, resolve and validate again. Every verdict is
    /// stored as a new version.
    async fn validate_and_resolve(
        &self,
        session: &mut Session,
        turn: &mut Turn,
        mut current: TemplateRevision,
        mut references: Option<Vec<String>>,
        budget: u32,
        sink: Option<&dyn TextSink>,
    ) -> Result<Reply, ArchformError> {
        let mut used = 0;

        loop {
            session.state = SessionState::Validating;
            used += 1;
            turn.note(
                TraceCategory::ToolCall,
                "Validate template",
                format!("v{}", current.version),
            );
            let outcome = self.validation.validate(&current.content).await;
            let validated = self
                .store
                .put_validated(&session.id, &current.content, outcome.is_valid)
                .await
                .map_err(storage_failure)?;

            if outcome.is_valid {
                turn.note(
                    TraceCategory::ToolOutput,
                    "Validate template",
                    format!("valid, stored as v{}", validated.version),
                );
                return Ok(Reply::Template {
                    revision: validated,
                    diagnostic: None,
                });
            }

            turn.note(
                TraceCategory::ToolOutput,
                "Validate template",
                outcome.diagnostic.clone(),
            );
            if used >= budget {
                return Ok(Reply::Template {
                    revision: validated,
                    diagnostic: Some(outcome.diagnostic),
                });
            }

            session.state = SessionState::Resolving;
            turn.note(
                TraceCategory::Rationale,
                "Resolve error",
                "Template failed validation; asking the model to fix the reported error",
            );
            let refs = match references.take() {
                Some(refs) => refs,
                None => {
                    let query = session.explanation.clone().unwrap_or_default();
                    self.references(session, turn, &query).await?
                }
            };
            let prompt = prompts::resolve_error(&refs, &validated.content, &outcome.diagnostic);
            references = Some(refs);

            let content = self
                .template_call(turn, "Resolve error", &prompt, sink)
                .await?;
            current = self.store_generated(session, turn, &content).await?;
        }
    }

    async fn references(
        &self,
        session: &Session,
        turn: &mut Turn,
        query: &str,
    ) -> Result<Vec<String>, ArchformError> {
        turn.note(
            TraceCategory::ToolCall,
            "Retrieve references",
            "reference templates for this session",
        );
        let documents = self
            .retrieval
            .fetch_reference_documents(&session.id, query)
            .await?;
        turn.note(
            TraceCategory::ToolOutput,
            "Retrieve references",
            format!("{} reference templates", documents.len()),
        );
        Ok(documents)
    }

    async fn latest_version(&self, session: &Session) -> Option<u64> {
        match self.store.get_latest(&session.id).await {
            Ok(latest) => latest.map(|r| r.version),
            Err(e) => {
                tracing::warn!("[orchestrator] {} failed to read latest template: {}", session.id, e);
                None
            }
        }
    }

    async fn latest(&self, session: &Session) -> Result<TemplateRevision, ArchformError> {
        self.store.get_latest(&session.id).await?.ok_or_else(|| {
            ArchformError::InvalidState(
                "no template stored for this session; it may have expired".to_string(),
            )
        })
    }

    async fn store_generated(
        &self,
        session: &Session,
        turn: &mut Turn,
        content: &str,
    ) -> Result<TemplateRevision, ArchformError> {
        let revision = self
            .store
            .put_generated(&session.id, content)
            .await
            .map_err(storage_failure)?;
        turn.note(
            TraceCategory::ToolOutput,
            "Store template",
            format!("v{}", revision.version),
        );
        Ok(revision)
    }

    /// Model call whose output is a template; fences stripped, never empty.
    async fn template_call(
        &self,
        turn: &mut Turn,
        heading: &str,
        prompt: &Prompt,
        sink: Option<&dyn TextSink>,
    ) -> Result<String, ArchformError> {
        let raw = self.call_model(turn, heading, prompt, sink).await?;
        let content = prompts::strip_code_fences(&raw);
        if content.is_empty() {
            return Err(ArchformError::RemoteCallFailed(
                "model returned empty template".to_string(),
            ));
        }
        Ok(content)
    }

    async fn call_model(
        &self,
        turn: &mut Turn,
        heading: &str,
        prompt: &Prompt,
        sink: Option<&dyn TextSink>,
    ) -> Result<String, ArchformError> {
        turn.note(TraceCategory::ToolCall, heading, self.config.model_id.clone());

        let text = self
            .retry
            .run(heading, sink, || {
                self.model.invoke(
                    &self.config.model_id,
                    &prompt.system,
                    &prompt.messages,
                    &self.config.params,
                    sink,
                )
            })
            .await
            .map_err(model_failure)?;

        turn.note(
            TraceCategory::ToolOutput,
            heading,
            format!("{} characters", text.chars().count()),
        );
        Ok(text)
    }

    async fn finish(
        &self,
        session: &mut Session,
        op: &str,
        mut turn: Turn,
        outcome: Result<Reply, ArchformError>,
    ) -> TurnResult {
        let (status, error, diagnostic) = match outcome {
            Ok(reply) => {
                let (chat, diagnostic) = match reply {
                    Reply::Explanation(text) => (Some(ChatTurn::assistant(text)), None),
                    Reply::Template {
                        revision,
                        diagnostic,
                    } => {
                        let mut chat = ChatTurn::assistant(revision.content);
                        chat.validity = Some(revision.validity);
                        chat.version = Some(revision.version);
                        (Some(chat), diagnostic)
                    }
                    Reply::Cleared => (None, None),
                };
                if let Some(mut chat) = chat {
                    chat.trace = turn.trace.clone();
                    turn.push(session, chat);
                }
                tracing::info!("[orchestrator] {} {} completed", session.id, op);
                (TurnStatus::Ok, None, diagnostic)
            }
            Err(err) => {
                tracing::warn!("[orchestrator] {} {} failed: {}", session.id, op, err);
                turn.note(TraceCategory::Failure, op, err.to_string());
                let mut chat = ChatTurn::assistant_error(err.to_string());
                chat.trace = turn.trace.clone();
                turn.push(session, chat);
                (status_for(&err), Some(TurnError::from(&err)), None)
            }
        };
        session.touch();

        let latest = match self.store.get_latest(&session.id).await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!("[orchestrator] {} failed to read latest template: {}", session.id, e);
                None
            }
        };

        TurnResult {
            session_id: session.id.clone(),
            status,
            state: session.state,
            chat_turns_delta: turn.chat,
            trace_entries: turn.trace,
            explanation: session.explanation.clone(),
            current_template: latest.as_ref().map(|r| r.content.clone()),
            current_validity: latest.as_ref().map(|r| r.validity),
            current_version: latest.as_ref().map(|r| r.version),
            diagnostic,
            error,
        }
    }
}

fn require_state(
    session: &Session,
    allowed: &[SessionState],
    action: &str,
) -> Result<(), ArchformError> {
    if allowed.contains(&session.state) {
        Ok(())
    } else {
        Err(ArchformError::InvalidState(format!(
            "cannot {} while the session is {:?}",
            action, session.state
        )))
    }
}

fn status_for(err: &ArchformError) -> TurnStatus {
    match err {
        ArchformError::LockedOut(_) => TurnStatus::Locked,
        ArchformError::MissingParameter(_) | ArchformError::InvalidState(_) => TurnStatus::Rejected,
        _ => TurnStatus::Failed,
    }
}

fn model_failure(err: RetryError<ModelError>) -> ArchformError {
    match err {
        RetryError::Exhausted { attempts, last } => ArchformError::RemoteCallFailed(format!(
            "model still throttled after {} attempts: {}",
            attempts, last
        )),
        RetryError::Fatal(ModelError::Throttled(msg)) => ArchformError::Throttled(msg),
        RetryError::Fatal(ModelError::Failed(msg)) => ArchformError::RemoteCallFailed(msg),
    }
}

fn storage_failure(err: StoreError) -> ArchformError {
    tracing::error!("[orchestrator] template store: {}", err);
    err.into()
}
