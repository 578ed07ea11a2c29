//! PIN authentication, bearer sessions and per-route permission checks.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::errors::ServiceError;
use crate::models::Permission;

pub mod pin;
pub mod roster_cache;
pub mod session;

pub use pin::{validate_pin, PinHasher};
pub use roster_cache::{RosterCache, RosterCacheError};
pub use session::{Session, SessionStore};

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolves the bearer token to a [`Session`] and stores it in the request
/// extensions.
pub async fn session_middleware(
    State(sessions): State<SessionStore>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let session = {
        let token = bearer_token(request.headers())
            .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".into()))?;
        sessions.authenticate(token)?
    };
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Rejects requests whose session lacks `permission`. Runs after
/// [`session_middleware`].
pub async fn permission_middleware(
    State(permission): State<Permission>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let session = request
        .extensions()
        .get::<Session>()
        .ok_or_else(|| ServiceError::Unauthorized("Missing session".into()))?;
    session.require(permission)?;
    Ok(next.run(request).await)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_session(self, sessions: &SessionStore) -> Self;
    fn with_permission(self, sessions: &SessionStore, permission: Permission) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_session(self, sessions: &SessionStore) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            sessions.clone(),
            session_middleware,
        ))
    }

    fn with_permission(self, sessions: &SessionStore, permission: Permission) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            permission,
            permission_middleware,
        ))
        .with_session(sessions)
    }
}
