use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use confidant_common::{Error, Result};
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api;
use crate::state::SharedState;

/// JSON overhead allowed on top of a base64 attachment.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Result<Router> {
    // Per-IP rate limit from config (default: 1 req/sec, burst 60).
    let rl = &state.config.gateway.rate_limit;
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(rl.per_second.max(1))
        .burst_size(rl.burst_size.max(1))
        .finish()
        .ok_or_else(|| {
            Error::Gateway(format!(
                "invalid rate limit: {} per second, burst {}",
                rl.per_second, rl.burst_size
            ))
        })?;
    let governor_limiter = governor_conf.limiter().clone();
    let governor_layer = GovernorLayer::new(governor_conf);

    // Spawn a background task to clean up rate-limiter state for inactive IPs.
    tokio::spawn(async move {
        let interval = Duration::from_secs(60);
        loop {
            tokio::time::sleep(interval).await;
            governor_limiter.retain_recent();
        }
    });

    // Base64 inflates attachments by a third.
    let body_limit = state.config.gateway.max_attachment_bytes / 3 * 4 + BODY_OVERHEAD_BYTES;
    let cors = cors_layer(&state.config.gateway.cors_origins);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api::status))
        .route("/api/chat", post(api::chat))
        .route(
            "/api/sessions",
            get(api::list_sessions)
                .post(api::create_session)
                .delete(api::delete_all_sessions),
        )
        .route(
            "/api/sessions/{id}",
            patch(api::rename_session).delete(api::delete_session),
        )
        .route("/api/sessions/{id}/messages", get(api::session_messages))
        .route(
            "/api/memories",
            get(api::list_memories)
                .post(api::add_memory)
                .delete(api::delete_memory),
        )
        .route(
            "/api/instruction",
            get(api::get_instruction).put(api::set_instruction),
        )
        .route(
            "/api/profile",
            get(api::get_profile).post(api::update_profile),
        )
        .route("/api/speak", post(api::speak))
        .route("/api/tools/flashcards", post(api::flashcards))
        .route("/api/feedback", post(api::feedback))
        .route("/api/usage", get(api::usage))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(governor_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

async fn health() -> &'static str {
    "ok"
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin: {origin}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}
