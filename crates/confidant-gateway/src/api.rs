use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use confidant_agents::{
    ChatReply, ChatSubmission, ExtractionOutcome, FeedbackSubmission, FlashcardOutcome, Mode,
};
use confidant_common::Error;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::identity::Caller;
use crate::state::SharedState;

type ApiResult = (StatusCode, axum::Json<Value>);

/// Map an orchestrator error to a JSON error response. Internal details stay
/// in the log.
fn error_response(context: &str, err: Error) -> ApiResult {
    let (status, message) = match &err {
        Error::Agent(message) => (StatusCode::BAD_REQUEST, message.clone()),
        Error::ProviderUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "upstream providers are unavailable".to_string(),
        ),
        _ => {
            error!("{context} failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
        }
    };
    (
        status,
        axum::Json(json!({
            "status": "error",
            "message": message,
        })),
    )
}

fn ok(body: Value) -> ApiResult {
    (StatusCode::OK, axum::Json(body))
}

// Chat

/// Reply for a chat body that could not be parsed.
pub const MALFORMED_CHAT_REPLY: &str =
    "⚠️ I couldn't read that message or its attachment. Please try sending it again.";

/// POST /api/chat. Always answers 200 with a reply; failures are soft messages,
/// including a body that does not parse.
pub async fn chat(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    body: Result<axum::Json<ChatSubmission>, JsonRejection>,
) -> axum::Json<ChatReply> {
    match body {
        Ok(axum::Json(submission)) => {
            axum::Json(state.orchestrator.handle_chat(&identity, submission).await)
        }
        Err(rejection) => {
            warn!("unreadable chat body from {}: {rejection}", identity.user_id);
            axum::Json(ChatReply {
                reply: MALFORMED_CHAT_REPLY.to_string(),
                session_id: String::new(),
                mode: Mode::Chat.as_str().to_string(),
            })
        }
    }
}

// Sessions

pub async fn list_sessions(
    State(state): State<SharedState>,
    Caller(identity): Caller,
) -> ApiResult {
    match state.orchestrator.list_sessions(&identity).await {
        Ok(sessions) => ok(json!({ "sessions": sessions })),
        Err(e) => error_response("list sessions", e),
    }
}

/// POST /api/sessions. Hands out a fresh id; the session is stored with its
/// first message.
pub async fn create_session(State(state): State<SharedState>, Caller(_): Caller) -> ApiResult {
    let session_id = state.orchestrator.create_session();
    (
        StatusCode::CREATED,
        axum::Json(json!({ "session_id": session_id.as_str() })),
    )
}

#[derive(Deserialize)]
pub struct RenameSessionRequest {
    pub new_title: String,
}

pub async fn rename_session(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    Path(session_id): Path<String>,
    axum::Json(body): axum::Json<RenameSessionRequest>,
) -> ApiResult {
    match state
        .orchestrator
        .rename_session(&identity, &session_id, &body.new_title)
        .await
    {
        Ok(true) => ok(json!({ "status": "ok" })),
        Ok(false) => not_found("session"),
        Err(e) => error_response("rename session", e),
    }
}

pub async fn delete_session(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    Path(session_id): Path<String>,
) -> ApiResult {
    match state
        .orchestrator
        .delete_session(&identity, &session_id)
        .await
    {
        Ok(true) => ok(json!({ "status": "ok" })),
        Ok(false) => not_found("session"),
        Err(e) => error_response("delete session", e),
    }
}

/// DELETE /api/sessions. Clears every session the caller owns.
pub async fn delete_all_sessions(
    State(state): State<SharedState>,
    Caller(identity): Caller,
) -> ApiResult {
    match state.orchestrator.delete_all_sessions(&identity).await {
        Ok(deleted) => ok(json!({ "status": "ok", "deleted": deleted })),
        Err(e) => error_response("delete all sessions", e),
    }
}

pub async fn session_messages(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    Path(session_id): Path<String>,
) -> ApiResult {
    match state
        .orchestrator
        .session_history(&identity, &session_id)
        .await
    {
        Ok(Some(messages)) => ok(json!({ "session_id": session_id, "messages": messages })),
        Ok(None) => not_found("session"),
        Err(e) => error_response("session history", e),
    }
}

fn not_found(what: &str) -> ApiResult {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({
            "status": "error",
            "message": format!("{what} not found"),
        })),
    )
}

// Memories

#[derive(Deserialize)]
pub struct MemoryRequest {
    pub memory_text: String,
}

pub async fn list_memories(
    State(state): State<SharedState>,
    Caller(identity): Caller,
) -> ApiResult {
    match state.orchestrator.list_memories(&identity).await {
        Ok(facts) => ok(json!({ "memories": facts })),
        Err(e) => error_response("list memories", e),
    }
}

pub async fn add_memory(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    axum::Json(body): axum::Json<MemoryRequest>,
) -> ApiResult {
    match state
        .orchestrator
        .add_memory(&identity, &body.memory_text)
        .await
    {
        Ok(ExtractionOutcome::Stored(fact)) => (
            StatusCode::CREATED,
            axum::Json(json!({ "status": "stored", "memory": fact })),
        ),
        Ok(ExtractionOutcome::Duplicate) => ok(json!({ "status": "duplicate" })),
        Ok(other) => {
            warn!("manual memory was not stored: {other:?}");
            ok(json!({ "status": "ignored" }))
        }
        Err(e) => error_response("add memory", e),
    }
}

/// DELETE /api/memories. `memory_text` may be the fact text or its id.
pub async fn delete_memory(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    axum::Json(body): axum::Json<MemoryRequest>,
) -> ApiResult {
    match state
        .orchestrator
        .delete_memory(&identity, &body.memory_text)
        .await
    {
        Ok(true) => ok(json!({ "status": "ok" })),
        Ok(false) => not_found("memory"),
        Err(e) => error_response("delete memory", e),
    }
}

// Instruction and profile

#[derive(Deserialize)]
pub struct InstructionRequest {
    pub instruction: String,
}

pub async fn get_instruction(
    State(state): State<SharedState>,
    Caller(identity): Caller,
) -> ApiResult {
    match state.orchestrator.instruction(&identity).await {
        Ok(instruction) => ok(json!({ "instruction": instruction.unwrap_or_default() })),
        Err(e) => error_response("get instruction", e),
    }
}

pub async fn set_instruction(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    axum::Json(body): axum::Json<InstructionRequest>,
) -> ApiResult {
    match state
        .orchestrator
        .set_instruction(&identity, &body.instruction)
        .await
    {
        Ok(()) => ok(json!({ "status": "ok" })),
        Err(e) => error_response("set instruction", e),
    }
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: String,
}

pub async fn get_profile(State(state): State<SharedState>, Caller(identity): Caller) -> ApiResult {
    match state.orchestrator.profile(&identity).await {
        Ok(profile) => ok(json!(profile)),
        Err(e) => error_response("get profile", e),
    }
}

pub async fn update_profile(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    axum::Json(body): axum::Json<UpdateProfileRequest>,
) -> ApiResult {
    match state
        .orchestrator
        .set_display_name(&identity, &body.name)
        .await
    {
        Ok(profile) => ok(json!(profile)),
        Err(e) => error_response("update profile", e),
    }
}

// Speech

#[derive(Deserialize)]
pub struct SpeakRequest {
    pub text: String,
}

/// POST /api/speak. Returns the audio body, or 503 with the soft message
/// when every speech provider failed.
pub async fn speak(
    State(state): State<SharedState>,
    Caller(_): Caller,
    axum::Json(body): axum::Json<SpeakRequest>,
) -> Response {
    match state.orchestrator.speak(&body.text).await {
        Ok(audio) => ([(header::CONTENT_TYPE, audio.mime_type)], audio.bytes).into_response(),
        Err(Error::ProviderUnavailable(reason)) => {
            warn!("speech unavailable: {reason}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(json!({
                    "status": "error",
                    "message": confidant_agents::Capability::Speech.unavailable_message(),
                })),
            )
                .into_response()
        }
        Err(e) => error_response("speak", e).into_response(),
    }
}

// Study tools and feedback

#[derive(Deserialize)]
pub struct FlashcardsRequest {
    pub topic: String,
}

/// POST /api/tools/flashcards. 502 carries the raw reply when the model did
/// not return a card array.
pub async fn flashcards(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    axum::Json(body): axum::Json<FlashcardsRequest>,
) -> ApiResult {
    match state.orchestrator.flashcards(&identity, &body.topic).await {
        Ok(FlashcardOutcome::Deck(cards)) => ok(json!({ "status": "success", "data": cards })),
        Ok(FlashcardOutcome::Malformed(raw)) => (
            StatusCode::BAD_GATEWAY,
            axum::Json(json!({
                "status": "error",
                "message": "AI couldn't format the flashcards properly.",
                "raw": raw,
            })),
        ),
        Err(e) => error_response("flashcards", e),
    }
}

pub async fn feedback(
    State(state): State<SharedState>,
    Caller(identity): Caller,
    axum::Json(body): axum::Json<FeedbackSubmission>,
) -> ApiResult {
    match state.orchestrator.submit_feedback(&identity, body).await {
        Ok(()) => (
            StatusCode::CREATED,
            axum::Json(json!({ "status": "success", "message": "Feedback recorded" })),
        ),
        Err(e) => error_response("feedback", e),
    }
}

// Usage and status

pub async fn usage(State(state): State<SharedState>) -> ApiResult {
    match state.orchestrator.usage().await {
        Ok(counts) => ok(json!({ "usage": counts })),
        Err(e) => error_response("usage", e),
    }
}

pub async fn status(State(state): State<SharedState>) -> axum::Json<Value> {
    let report = state.orchestrator.status();
    axum::Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "assistant": state.config.assistant.name,
        "chains": report.chains,
        "pools": report.pools,
        "memory_index": report.memory_index,
    }))
}
