use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::instrument;

use crate::api::server::AppState;

/// Header the entitlement provider's frontend forwards the caller token in.
pub const USER_TOKEN_HEADER: &str = "x-whop-user-token";

/// Resolves the caller's capability set once per request and stashes it in
/// request extensions for the handlers.
///
/// Resolution is fail-closed and never rejects the request here: routes
/// decide for themselves whether an anonymous capability set is acceptable
/// (the claim-status poll serves anonymous callers, the board does not).
#[instrument(skip(state, req, next), fields(uri = req.uri().to_string()))]
pub async fn resolve_capabilities(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let credential = req
        .headers()
        .get(USER_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let caps = state.resolver.resolve(credential.as_deref()).await;
    tracing::debug!(
        authenticated = caps.identity.is_some(),
        is_admin = caps.is_admin,
        has_premium_access = caps.has_premium_access,
        "resolved request capabilities"
    );

    req.extensions_mut().insert(caps);
    next.run(req).await
}
