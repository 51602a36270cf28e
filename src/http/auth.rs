use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::app::error::FeedError;
use crate::app::identity::require_session;
use crate::domain::session::Session;
use crate::http::AppError;
use crate::AppState;

/// The signed-in user behind a bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub session: Session,
    pub token: String,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(FeedError::Unauthenticated)?;

        let session = state
            .identity
            .current_session(token)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, "failed to authenticate");
                AppError::internal("failed to authenticate")
            })?;
        let session = require_session(session)?;

        Ok(AuthUser {
            session,
            token: token.to_string(),
        })
    }
}
