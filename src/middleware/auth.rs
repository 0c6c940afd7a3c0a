//! Session extractor: user id from the `session` cookie or a Bearer token.

use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::models::Id;
use crate::services::channel::SESSION_COOKIE;

const BEARER_PREFIX: &str = "Bearer ";

/// Authenticated viewer of a push stream.
#[derive(Clone, Debug)]
pub struct SessionUser(pub Id);

#[axum::async_trait]
impl axum::extract::FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.strip_prefix(BEARER_PREFIX))
                    .map(str::to_string)
            });
        let Some(token) = token else {
            debug!("request without session");
            return Err(AppError::Unauthorized);
        };
        let user_id = state.jwt_secret().validate(&token).map_err(|e| {
            debug!(error = %e, "session rejected");
            AppError::Unauthorized
        })?;
        Ok(SessionUser(user_id))
    }
}
