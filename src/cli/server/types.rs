//! Request/Response types for the HTTP server.
//!
//! Conversation endpoints answer with a [`TurnResult`](crate::orchestrator::TurnResult)
//! body; the types here cover requests and the session bookkeeping routes.

use serde::{Deserialize, Serialize};

use crate::session::Session;
use crate::store::TemplateRevision;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Server status (always "ok" when healthy)
    pub status: String,
    /// Server version from Cargo.toml
    pub version: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionResponse {
    /// Server-generated session ID (UUID v4), used in routes
    pub session_id: String,
    /// Id of the conversation currently held by the session
    pub conversation_id: String,
    /// Creation timestamp in RFC 3339 format
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    /// Milliseconds elapsed since the session was created
    pub age_ms: u64,
    /// Whether the session is active (not cancelled)
    pub is_active: bool,
}

/// A session with its full conversation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub id: String,
    pub conversation: Session,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionInfo>,
    pub count: usize,
    pub max_sessions: usize,
}

/// Diagram upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadImageRequest {
    /// Image bytes, standard base64
    pub image_base64: String,
    /// Defaults to `image/png`
    #[serde(default)]
    pub media_type: Option<String>,
}

impl UploadImageRequest {
    pub const DEFAULT_MEDIA_TYPE: &'static str = "image/png";

    pub fn media_type(&self) -> &str {
        self.media_type
            .as_deref()
            .unwrap_or(Self::DEFAULT_MEDIA_TYPE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfirmRequest {
    /// Explanation as confirmed or edited by the user
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateRequest {
    #[serde(default)]
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResolveRequest {
    /// Error text reported against the template
    #[serde(default)]
    pub error: String,
}

/// Stored versions for the session's current conversation, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct TemplatesResponse {
    pub conversation_id: String,
    pub versions: Vec<TemplateRevision>,
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    /// Error code for programmatic handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: Some(code.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod health_response_tests {
        use super::*;

        #[test]
        fn healthy_includes_status_and_version() {
            let resp = HealthResponse::healthy();
            assert_eq!(resp.status, "ok");
            assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));

            let json = serde_json::to_string(&resp).unwrap();
            assert!(json.contains("\"status\":\"ok\""));
        }
    }

    mod request_tests {
        use super::*;

        #[test]
        fn upload_media_type_defaults_to_png() {
            let req: UploadImageRequest =
                serde_json::from_str(r#"{"image_base64":"iVBORw0KGgo="}"#).unwrap();
            assert_eq!(req.media_type(), "image/png");

            let req: UploadImageRequest = serde_json::from_str(
                r#"{"image_base64":"/9j/4AAQ","media_type":"image/jpeg"}"#,
            )
            .unwrap();
            assert_eq!(req.media_type(), "image/jpeg");
        }

        #[test]
        fn upload_requires_image() {
            assert!(serde_json::from_str::<UploadImageRequest>("{}").is_err());
        }

        #[test]
        fn text_requests_default_to_empty() {
            // Empty fields reach the orchestrator, which reports missing_parameter
            let confirm: ConfirmRequest = serde_json::from_str("{}").unwrap();
            assert!(confirm.explanation.is_empty());

            let update: UpdateRequest = serde_json::from_str("{}").unwrap();
            assert!(update.instruction.is_empty());

            let resolve: ResolveRequest =
                serde_json::from_str(r#"{"error":"Template format error"}"#).unwrap();
            assert_eq!(resolve.error, "Template format error");
        }
    }

    mod error_response_tests {
        use super::*;

        #[test]
        fn code_is_omitted_when_absent() {
            let json = serde_json::to_string(&ErrorResponse::new("boom")).unwrap();
            assert_eq!(json, r#"{"error":"boom"}"#);

            let json =
                serde_json::to_string(&ErrorResponse::with_code("gone", "SESSION_NOT_FOUND"))
                    .unwrap();
            assert!(json.contains("\"code\":\"SESSION_NOT_FOUND\""));
        }
    }

    #[test]
    fn session_detail_serializes_conversation() {
        let detail = SessionDetail {
            id: "route".to_string(),
            conversation: Session::new(),
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["id"], "route");
        assert_eq!(value["conversation"]["state"], "idle");
        assert_eq!(value["conversation"]["validate_counter"], 0);
    }
}
