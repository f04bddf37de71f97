//! Request authentication and caller identity.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use keel_core::models::Actor;
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::handlers::ApiError;
use crate::config::Config;

/// Header naming the person or service performing a mutation.
pub const ACTOR_HEADER: &str = "x-keel-actor";
/// Optional request id copied onto audit events.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    /// Bearer token every request must carry, if set.
    pub api_key: Option<String>,
    /// Allowed CORS origins. `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
}

impl SecurityConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.api_key.clone(),
            cors_origins: config.cors_origins.clone(),
        }
    }

    /// No authentication, any origin (local use and tests).
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            cors_origins: None,
        }
    }

    pub fn cors_layer(&self) -> CorsLayer {
        match &self.cors_origins {
            None => CorsLayer::permissive(),
            Some(origins) => {
                let origins: Vec<HeaderValue> = origins
                    .iter()
                    .filter_map(|o| match HeaderValue::from_str(o) {
                        Ok(v) => Some(v),
                        Err(_) => {
                            tracing::warn!("Ignoring invalid CORS origin: {}", o);
                            None
                        }
                    })
                    .collect();
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(tower_http::cors::Any)
                    .allow_headers(tower_http::cors::Any)
            }
        }
    }
}

/// Rejects requests without the configured bearer token.
pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected_key = match &config.api_key {
        Some(key) => key,
        None => return Ok(next.run(request).await),
    };

    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if token == expected_key => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Caller identity taken from [`ACTOR_HEADER`] and [`CORRELATION_HEADER`].
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("missing {ACTOR_HEADER} header")))?;

        let mut actor = Actor::new(name);
        if let Some(id) = parts
            .headers
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            actor = actor.with_correlation(id);
        }
        Ok(Self(actor))
    }
}
