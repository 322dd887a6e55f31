//! HTTP request handlers for the conversation server.
//!
//! Conversation endpoints always answer with the full [`TurnResult`]; only
//! the HTTP status differs by outcome:
//!
//! | Outcome | Status |
//! |---------|--------|
//! | ok | 200 |
//! | locked_out | 423 |
//! | missing_parameter | 400 |
//! | invalid_state | 409 |
//! | storage or internal failure | 500 |
//! | model, retrieval or validator failure | 502 |

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::Engine;
use tokio_util::sync::CancellationToken;

use super::session::{ServerSession, SessionManager};
use super::types::*;
use crate::orchestrator::{Orchestrator, TurnResult, TurnStatus};

/// Application state shared across all handlers
pub struct AppState {
    pub session_manager: SessionManager,
    pub orchestrator: Arc<Orchestrator>,
    /// Shutdown token for graceful server shutdown
    pub shutdown_token: CancellationToken,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        max_sessions: usize,
    ) -> (Arc<Self>, CancellationToken) {
        let shutdown_token = CancellationToken::new();
        let state = Arc::new(Self {
            session_manager: SessionManager::new(max_sessions),
            orchestrator,
            shutdown_token: shutdown_token.clone(),
        });
        (state, shutdown_token)
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type TurnResponse = Result<(StatusCode, Json<TurnResult>), ApiError>;

fn not_found(session_id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::with_code(
            format!("Session '{}' not found", session_id),
            "SESSION_NOT_FOUND",
        )),
    )
}

async fn find_session(state: &AppState, session_id: &str) -> Result<Arc<ServerSession>, ApiError> {
    let session = state
        .session_manager
        .get(session_id)
        .ok_or_else(|| not_found(session_id))?;
    session.touch().await;
    Ok(session)
}

/// HTTP status for a finished turn.
pub fn turn_status(result: &TurnResult) -> StatusCode {
    let kind = result.error.as_ref().map(|e| e.kind.as_str()).unwrap_or("");
    match result.status {
        TurnStatus::Ok => StatusCode::OK,
        TurnStatus::Locked => StatusCode::LOCKED,
        TurnStatus::Rejected if kind == "missing_parameter" => StatusCode::BAD_REQUEST,
        TurnStatus::Rejected => StatusCode::CONFLICT,
        TurnStatus::Failed => match kind {
            "storage_write_failed" | "io" | "internal" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        },
    }
}

/// Run one turn, abandoning it if the session is removed meanwhile.
async fn run_turn<F>(session: &ServerSession, turn: F) -> TurnResponse
where
    F: Future<Output = TurnResult>,
{
    tokio::select! {
        result = turn => Ok((turn_status(&result), Json(result))),
        _ = session.cancel_token.cancelled() => Err((
            StatusCode::GONE,
            Json(ErrorResponse::with_code(
                format!("Session '{}' was removed during the turn", session.id),
                "SESSION_CANCELLED",
            )),
        )),
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Create a new session.
///
/// # Response
///
/// - `201 Created`: Session created successfully
/// - `503 Service Unavailable`: Maximum session limit reached
pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let session = state.session_manager.create().map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::with_code(
                e.to_string(),
                "SESSION_LIMIT_REACHED",
            )),
        )
    })?;

    let conversation_id = session.conversation.lock().await.id.clone();
    tracing::info!(
        "Created session {} (conversation {})",
        session.id,
        conversation_id
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id.clone(),
            conversation_id,
            created_at: chrono::Utc::now().to_rfc3339(),
        }),
    ))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<ListSessionsResponse> {
    let sessions = state.session_manager.list_sessions();
    Json(ListSessionsResponse {
        count: sessions.len(),
        max_sessions: state.session_manager.max_sessions,
        sessions,
    })
}

/// Session with its conversation history. Waits for a running turn.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let conversation = session.conversation.lock().await.clone();
    Ok(Json(SessionDetail {
        id: session.id.clone(),
        conversation,
    }))
}

/// Delete a session, cancelling any running turn.
///
/// - `204 No Content`: Session deleted successfully
/// - `404 Not Found`: Session does not exist
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.session_manager.remove(&session_id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(not_found(&session_id)),
    }
}

/// Upload a diagram and get its explanation.
///
/// # Request Body
///
/// ```json
/// { "image_base64": "iVBORw0KGgo...", "media_type": "image/png" }
/// ```
///
/// Undecodable base64 is rejected with `400` before the turn runs.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<UploadImageRequest>,
) -> TurnResponse {
    let image = base64::engine::general_purpose::STANDARD
        .decode(req.image_base64.trim())
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::with_code(
                    format!("image_base64 is not valid base64: {}", e),
                    "INVALID_IMAGE",
                )),
            )
        })?;

    let session = find_session(&state, &session_id).await?;
    let mut conversation = session.conversation.lock().await;
    let turn = state
        .orchestrator
        .upload_image(&mut conversation, &image, req.media_type(), None);
    run_turn(&session, turn).await
}

/// Confirm (or replace) the explanation and run the generate cycle.
pub async fn confirm_explanation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<ConfirmRequest>,
) -> TurnResponse {
    let session = find_session(&state, &session_id).await?;
    let mut conversation = session.conversation.lock().await;
    let turn = state
        .orchestrator
        .confirm_explanation(&mut conversation, &req.explanation, None);
    run_turn(&session, turn).await
}

pub async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> TurnResponse {
    let session = find_session(&state, &session_id).await?;
    let mut conversation = session.conversation.lock().await;
    let turn = state
        .orchestrator
        .send_update_instruction(&mut conversation, &req.instruction, None);
    run_turn(&session, turn).await
}

/// Validate the current template. Answers `423` once the per-template
/// validate limit is reached.
pub async fn validate_template(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> TurnResponse {
    let session = find_session(&state, &session_id).await?;
    let mut conversation = session.conversation.lock().await;
    let turn = state.orchestrator.request_validate(&mut conversation, None);
    run_turn(&session, turn).await
}

pub async fn resolve_error(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> TurnResponse {
    let session = find_session(&state, &session_id).await?;
    let mut conversation = session.conversation.lock().await;
    let turn = state
        .orchestrator
        .resolve_error(&mut conversation, &req.error, None);
    run_turn(&session, turn).await
}

/// Start a new conversation on the same route. Earlier templates stay
/// stored under the previous conversation id.
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> TurnResponse {
    let session = find_session(&state, &session_id).await?;
    let mut conversation = session.conversation.lock().await;
    let turn = state.orchestrator.clear_session(&mut conversation);
    run_turn(&session, turn).await
}

/// Stored template versions of the current conversation.
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<TemplatesResponse>, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let conversation_id = session.conversation.lock().await.id.clone();

    let versions = state
        .orchestrator
        .template_versions(&conversation_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list templates for {}: {}", conversation_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_code(e.to_string(), e.kind().to_uppercase())),
            )
        })?;

    Ok(Json(TemplatesResponse {
        conversation_id,
        versions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::testing::{harness, Harness, EXPLANATION, PNG};
    use crate::validation::ValidationOutcome;

    const TEMPLATE: &str = "Resources:\n  Bucket:\n    Type: AWS::S3::Bucket";

    fn create_test_app(max_sessions: usize) -> (Router, Harness) {
        let h = harness();
        let (state, _shutdown) = AppState::new(h.orchestrator.clone(), max_sessions);
        (super::super::create_router(state), h)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &Router) -> String {
        let (status, body) = send(app, "POST", "/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().unwrap().to_string()
    }

    fn png_upload() -> Value {
        json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(PNG),
            "media_type": "image/png",
        })
    }

    /// Create a session and drive it to a generated, valid template.
    async fn generated(app: &Router, h: &Harness) -> String {
        let id = create(app).await;

        h.model.push_text(EXPLANATION);
        let (status, _) = send(app, "POST", &format!("/sessions/{}/image", id), Some(png_upload())).await;
        assert_eq!(status, StatusCode::OK);

        h.summary.push_text("Amazon S3");
        h.model.push_text(TEMPLATE);
        h.validator.push(ValidationOutcome::valid());
        let (status, body) = send(
            app,
            "POST",
            &format!("/sessions/{}/confirm", id),
            Some(json!({ "explanation": EXPLANATION })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        id
    }

    mod session_tests {
        use super::*;

        #[tokio::test]
        async fn health_returns_ok() {
            let (app, _h) = create_test_app(10);
            let (status, body) = send(&app, "GET", "/health", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
        }

        #[tokio::test]
        async fn session_lifecycle() {
            let (app, _h) = create_test_app(10);
            let id = create(&app).await;

            let (status, body) = send(&app, "GET", "/sessions", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["count"], 1);
            assert_eq!(body["max_sessions"], 10);

            let (status, body) = send(&app, "GET", &format!("/sessions/{}", id), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["id"], id.as_str());
            assert_eq!(body["conversation"]["state"], "idle");

            let (status, _) = send(&app, "DELETE", &format!("/sessions/{}", id), None).await;
            assert_eq!(status, StatusCode::NO_CONTENT);

            let (status, body) = send(&app, "GET", &format!("/sessions/{}", id), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["code"], "SESSION_NOT_FOUND");
        }

        #[tokio::test]
        async fn create_fails_at_capacity() {
            let (app, _h) = create_test_app(1);
            create(&app).await;

            let (status, body) = send(&app, "POST", "/sessions", None).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body["code"], "SESSION_LIMIT_REACHED");
        }

        #[tokio::test]
        async fn turn_on_unknown_session_is_not_found() {
            let (app, h) = create_test_app(10);
            let (status, _) = send(&app, "POST", "/sessions/nope/validate", None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(h.model.calls(), 0);
        }
    }

    mod conversation_tests {
        use super::*;

        #[tokio::test]
        async fn upload_confirm_and_list_templates() {
            let (app, h) = create_test_app(10);
            let id = generated(&app, &h).await;

            let (status, body) = send(&app, "GET", &format!("/sessions/{}/templates", id), None).await;
            assert_eq!(status, StatusCode::OK);
            let versions = body["versions"].as_array().unwrap();
            assert_eq!(versions.len(), 2);
            assert_eq!(versions[1]["content"], TEMPLATE);
            assert_eq!(versions[1]["validity"], "valid");
        }

        #[tokio::test]
        async fn confirm_result_carries_template() {
            let (app, h) = create_test_app(10);
            let id = create(&app).await;

            h.model.push_text(EXPLANATION);
            let (_, body) = send(&app, "POST", &format!("/sessions/{}/image", id), Some(png_upload())).await;
            assert_eq!(body["state"], "awaiting_confirmation");
            assert_eq!(body["explanation"], EXPLANATION);

            h.summary.push_text("Amazon S3");
            h.model.push_text(TEMPLATE);
            h.validator.push(ValidationOutcome::valid());
            let (_, body) = send(
                &app,
                "POST",
                &format!("/sessions/{}/confirm", id),
                Some(json!({ "explanation": EXPLANATION })),
            )
            .await;
            assert_eq!(body["status"], "ok");
            assert_eq!(body["state"], "generated");
            assert_eq!(body["current_template"], TEMPLATE);
            assert_eq!(body["current_version"], 2);
        }

        #[tokio::test]
        async fn invalid_base64_is_bad_request() {
            let (app, h) = create_test_app(10);
            let id = create(&app).await;

            let (status, body) = send(
                &app,
                "POST",
                &format!("/sessions/{}/image", id),
                Some(json!({ "image_base64": "not base64!" })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], "INVALID_IMAGE");
            assert_eq!(h.model.calls(), 0);
        }

        #[tokio::test]
        async fn wrong_state_is_conflict() {
            let (app, _h) = create_test_app(10);
            let id = create(&app).await;

            let (status, body) = send(
                &app,
                "POST",
                &format!("/sessions/{}/confirm", id),
                Some(json!({ "explanation": EXPLANATION })),
            )
            .await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(body["status"], "rejected");
            assert_eq!(body["error"]["kind"], "invalid_state");
        }

        #[tokio::test]
        async fn empty_instruction_is_bad_request() {
            let (app, h) = create_test_app(10);
            let id = generated(&app, &h).await;

            let (status, body) = send(
                &app,
                "POST",
                &format!("/sessions/{}/update", id),
                Some(json!({ "instruction": "   " })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"]["kind"], "missing_parameter");
            assert_eq!(body["current_version"], 2);
        }

        #[tokio::test]
        async fn third_validate_is_locked() {
            let (app, h) = create_test_app(10);
            let id = generated(&app, &h).await;
            let uri = format!("/sessions/{}/validate", id);

            h.validator.push(ValidationOutcome::valid());
            h.validator.push(ValidationOutcome::valid());
            assert_eq!(send(&app, "POST", &uri, None).await.0, StatusCode::OK);
            assert_eq!(send(&app, "POST", &uri, None).await.0, StatusCode::OK);

            let validator_calls = h.validator.calls();
            let (status, body) = send(&app, "POST", &uri, None).await;
            assert_eq!(status, StatusCode::LOCKED);
            assert_eq!(body["status"], "locked");
            assert_eq!(body["error"]["kind"], "locked_out");
            assert_eq!(h.validator.calls(), validator_calls);
        }

        #[tokio::test]
        async fn resolve_stores_new_version() {
            let (app, h) = create_test_app(10);
            let id = generated(&app, &h).await;

            h.model.push_text(TEMPLATE);
            let (status, body) = send(
                &app,
                "POST",
                &format!("/sessions/{}/resolve", id),
                Some(json!({ "error": "Bucket name already exists" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["current_version"], 3);
        }

        #[tokio::test]
        async fn model_failure_is_bad_gateway() {
            let (app, _h) = create_test_app(10);
            let id = create(&app).await;

            // nothing scripted, so the model call fails
            let (status, body) = send(&app, "POST", &format!("/sessions/{}/image", id), Some(png_upload())).await;
            assert_eq!(status, StatusCode::BAD_GATEWAY);
            assert_eq!(body["status"], "failed");
            assert_eq!(body["error"]["kind"], "remote_call_failed");
            assert_eq!(body["state"], "idle");
        }

        #[tokio::test]
        async fn clear_starts_new_conversation_on_same_route() {
            let (app, h) = create_test_app(10);
            let id = generated(&app, &h).await;

            let (_, before) = send(&app, "GET", &format!("/sessions/{}/templates", id), None).await;
            let (status, body) = send(&app, "POST", &format!("/sessions/{}/clear", id), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["state"], "idle");
            assert_ne!(body["session_id"], before["conversation_id"]);

            let (_, after) = send(&app, "GET", &format!("/sessions/{}/templates", id), None).await;
            assert_eq!(after["conversation_id"], body["session_id"]);
            assert!(after["versions"].as_array().unwrap().is_empty());

            let old_id = before["conversation_id"].as_str().unwrap();
            let kept = h.orchestrator.template_versions(old_id).await.unwrap();
            assert_eq!(kept.len(), 2);
        }
    }

    mod status_mapping_tests {
        use super::*;
        use crate::error::ArchformError;
        use crate::orchestrator::TurnError;
        use crate::session::SessionState;

        fn failed(err: ArchformError, status: TurnStatus) -> TurnResult {
            TurnResult {
                session_id: "s".to_string(),
                status,
                state: SessionState::Generated,
                chat_turns_delta: Vec::new(),
                trace_entries: Vec::new(),
                explanation: None,
                current_template: None,
                current_validity: None,
                current_version: None,
                diagnostic: None,
                error: Some(TurnError::from(&err)),
            }
        }

        #[test]
        fn storage_failure_is_internal_error() {
            let result = failed(
                ArchformError::StorageWriteFailed("disk full".to_string()),
                TurnStatus::Failed,
            );
            assert_eq!(turn_status(&result), StatusCode::INTERNAL_SERVER_ERROR);
        }

        #[test]
        fn throttled_is_bad_gateway() {
            let result = failed(
                ArchformError::Throttled("slow down".to_string()),
                TurnStatus::Failed,
            );
            assert_eq!(turn_status(&result), StatusCode::BAD_GATEWAY);
        }
    }
}
