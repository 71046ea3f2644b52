use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use confidant_agents::Identity;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

const MAX_USER_ID_LEN: usize = 256;

/// Caller identity as asserted by the authenticating proxy in front of the
/// gateway. Requests without a user id are rejected with 401.
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, axum::Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let Some(user_id) = header(USER_ID_HEADER).filter(|id| id.len() <= MAX_USER_ID_LEN)
        else {
            return Err((
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({
                    "status": "error",
                    "message": "missing caller identity",
                })),
            ));
        };
        let display_name = header(USER_NAME_HEADER).unwrap_or("User");

        Ok(Caller(Identity::new(user_id, display_name)))
    }
}
