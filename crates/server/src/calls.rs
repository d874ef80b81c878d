//! Call ingress for the telephony collaborator.
//!
//! - `POST /calls`                       start a session, returns its id
//! - `POST /calls/{session_id}/utterances` deliver a partial or final transcript
//! - `POST /calls/{session_id}/hangup`     caller hung up
//! - `POST /calls/{session_id}/transfer`   caller asked for a human
//! - `GET  /calls/{session_id}`            live or archived session snapshot
//! - `GET  /calls/{session_id}/audit`      audit read-back with chain verification
//! - `GET  /calls/{session_id}/commands`   drain queued speak/stop/transfer commands

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use frontdesk_agent::{BufferedTransport, Delivery, SessionRegistry, TransportCommand};
use frontdesk_core::audit::ChainVerification;
use frontdesk_core::errors::{ApplicationError, InterfaceError};
use frontdesk_core::{verify_chain, AuditEvent, AuditSink, CallError, ProviderId, Session, SessionId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct CallsState {
    registry: Arc<SessionRegistry>,
    transport: Arc<BufferedTransport>,
    audit: Arc<dyn AuditSink>,
}

impl CallsState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transport: Arc<BufferedTransport>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { registry, transport, audit }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartCallRequest {
    #[serde(default)]
    pub provider_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartCallResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct UtteranceRequest {
    pub text: String,
    #[serde(default = "default_is_final")]
    pub is_final: bool,
}

fn default_is_final() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct UtteranceResponse {
    pub delivery: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_phrase: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransferRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct AuditReadback {
    pub session_id: SessionId,
    pub chain: ChainVerification,
    pub events: Vec<AuditEvent>,
}

#[derive(Debug, Serialize)]
pub struct CommandsResponse {
    pub commands: Vec<TransportCommand>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: &'static str,
    pub correlation_id: String,
}

/// HTTP face of [`InterfaceError`].
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_application(error: ApplicationError) -> Self {
        Self(error.into_interface(Uuid::new_v4().to_string()))
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: Uuid::new_v4().to_string(),
        })
    }
}

impl From<CallError> for ApiError {
    fn from(error: CallError) -> Self {
        Self::from_application(ApplicationError::Call(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(
                event_name = "http.request_failed",
                correlation_id = self.0.correlation_id(),
                error = %self.0,
            );
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            message: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: CallsState) -> Router {
    Router::new()
        .route("/calls", post(start_call))
        .route("/calls/{session_id}", get(get_call))
        .route("/calls/{session_id}/utterances", post(deliver_utterance))
        .route("/calls/{session_id}/hangup", post(hangup))
        .route("/calls/{session_id}/transfer", post(request_transfer))
        .route("/calls/{session_id}/audit", get(audit_readback))
        .route("/calls/{session_id}/commands", get(drain_commands))
        .with_state(state)
}

async fn start_call(
    State(state): State<CallsState>,
    Json(request): Json<StartCallRequest>,
) -> (StatusCode, Json<StartCallResponse>) {
    let provider_id = request
        .provider_id
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(ProviderId);
    let session_id = state.registry.start_call(provider_id).await;

    // Evicts the live entry once the session seals.
    let registry = Arc::clone(&state.registry);
    let watched = session_id.clone();
    tokio::spawn(async move {
        if let Err(error) = registry.wait_until_sealed(&watched).await {
            warn!(event_name = "session.eviction_failed", session_id = %watched, error = %error);
        }
    });

    info!(event_name = "http.call_started", session_id = %session_id);
    (StatusCode::CREATED, Json(StartCallResponse { session_id }))
}

async fn deliver_utterance(
    Path(session_id): Path<String>,
    State(state): State<CallsState>,
    Json(request): Json<UtteranceRequest>,
) -> Result<Json<UtteranceResponse>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::bad_request("utterance text must not be empty"));
    }

    let delivery = state
        .registry
        .deliver_utterance(&SessionId(session_id), &request.text, request.is_final)
        .await?;

    let response = match delivery {
        Delivery::Queued => UtteranceResponse { delivery: "queued", matched_phrase: None },
        Delivery::Observed => UtteranceResponse { delivery: "observed", matched_phrase: None },
        Delivery::Emergency { matched_phrase } => {
            UtteranceResponse { delivery: "emergency", matched_phrase: Some(matched_phrase) }
        }
    };
    Ok(Json(response))
}

async fn hangup(
    Path(session_id): Path<String>,
    State(state): State<CallsState>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    state.registry.hangup(&SessionId(session_id)).await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: true })))
}

async fn request_transfer(
    Path(session_id): Path<String>,
    State(state): State<CallsState>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let reason = request.reason.unwrap_or_else(|| "caller_request".to_owned());
    state.registry.request_transfer(&SessionId(session_id), reason).await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: true })))
}

async fn get_call(
    Path(session_id): Path<String>,
    State(state): State<CallsState>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.registry.snapshot(&SessionId(session_id)).await?))
}

async fn audit_readback(
    Path(session_id): Path<String>,
    State(state): State<CallsState>,
) -> Result<Json<AuditReadback>, ApiError> {
    let session_id = SessionId(session_id);
    let events = state.audit.events_for_session(&session_id).await.map_err(|error| {
        ApiError::from_application(ApplicationError::Persistence(error.to_string()))
    })?;
    if events.is_empty() {
        return Err(CallError::SessionNotFound { session_id }.into());
    }

    let chain = verify_chain(&events);
    if !chain.valid {
        warn!(
            event_name = "audit.chain_invalid",
            session_id = %session_id,
            reason = chain.failure_reason.as_deref().unwrap_or("unknown"),
        );
    }
    Ok(Json(AuditReadback { session_id, chain, events }))
}

async fn drain_commands(
    Path(session_id): Path<String>,
    State(state): State<CallsState>,
) -> Json<CommandsResponse> {
    Json(CommandsResponse { commands: state.transport.drain(&SessionId(session_id)) })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use frontdesk_agent::ScriptedOracle;
    use frontdesk_core::config::AppConfig;
    use frontdesk_core::{CallState, SessionId};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, CallsState};
    use crate::bootstrap::{bootstrap_with_oracle, Application};

    async fn app() -> Application {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;
        bootstrap_with_oracle(config, Arc::new(ScriptedOracle::default()))
            .await
            .expect("bootstrap")
    }

    fn routes(app: &Application) -> Router {
        router(CallsState::new(app.registry.clone(), app.transport.clone(), app.audit.clone()))
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response =
            router.clone().oneshot(request.body(body).expect("request")).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    async fn start(router: &Router) -> String {
        let (status, body) = send(router, "POST", "/calls", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().expect("session id").to_string()
    }

    async fn wait_for_state(app: &Application, session_id: &str, state: CallState) {
        let session_id = SessionId(session_id.to_string());
        for _ in 0..200 {
            if let Ok(session) = app.registry.snapshot(&session_id).await {
                if session.state == state {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached {state:?}");
    }

    #[tokio::test]
    async fn started_call_greets_the_caller() {
        let app = app().await;
        let router = routes(&app);
        let session_id = start(&router).await;
        wait_for_state(&app, &session_id, CallState::Greeting).await;

        let (status, body) = send(&router, "GET", &format!("/calls/{session_id}/commands"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["commands"][0]["command"], "speak");
        assert!(body["commands"][0]["text"].as_str().unwrap_or_default().contains("Valley Family Medicine"));

        let (_, drained) = send(&router, "GET", &format!("/calls/{session_id}/commands"), None).await;
        assert_eq!(drained["commands"], json!([]));
    }

    #[tokio::test]
    async fn emergency_utterance_is_reported_and_transferred() {
        let app = app().await;
        let router = routes(&app);
        let session_id = start(&router).await;
        wait_for_state(&app, &session_id, CallState::Greeting).await;

        let (status, body) = send(
            &router,
            "POST",
            &format!("/calls/{session_id}/utterances"),
            Some(json!({ "text": "my husband is having a stroke", "is_final": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivery"], "emergency");
        assert_eq!(body["matched_phrase"], "stroke");

        wait_for_state(&app, &session_id, CallState::Emergency).await;
        let sealed = app
            .registry
            .wait_until_sealed(&SessionId(session_id.clone()))
            .await
            .expect("sealed");
        assert!(sealed.emergency_triggered);

        let (_, commands) = send(&router, "GET", &format!("/calls/{session_id}/commands"), None).await;
        assert!(commands["commands"]
            .as_array()
            .expect("commands")
            .iter()
            .any(|command| command["command"] == "transfer" && command["destination"] == "911"));

        let (status, audit) = send(&router, "GET", &format!("/calls/{session_id}/audit"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(audit["chain"]["valid"], true);

        let (status, snapshot) = send(&router, "GET", &format!("/calls/{session_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["outcome"], "emergency");
    }

    #[tokio::test]
    async fn sealed_calls_reject_new_utterances() {
        let app = app().await;
        let router = routes(&app);
        let session_id = start(&router).await;
        wait_for_state(&app, &session_id, CallState::Greeting).await;

        let (status, _) = send(&router, "POST", &format!("/calls/{session_id}/hangup"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        app.registry.wait_until_sealed(&SessionId(session_id.clone())).await.expect("sealed");

        let (status, body) = send(
            &router,
            "POST",
            &format!("/calls/{session_id}/utterances"),
            Some(json!({ "text": "hello?" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["correlation_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn unknown_sessions_and_blank_utterances_are_rejected() {
        let app = app().await;
        let router = routes(&app);

        let (status, body) = send(&router, "GET", "/calls/no-such-call", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "The requested call session does not exist.");

        let (status, _) = send(&router, "GET", "/calls/no-such-call/audit", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let session_id = start(&router).await;
        let (status, _) = send(
            &router,
            "POST",
            &format!("/calls/{session_id}/utterances"),
            Some(json!({ "text": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
