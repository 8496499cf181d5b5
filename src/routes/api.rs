use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// API Router Module
///
/// Endpoints nested under `/api`. They carry no session requirement of their own:
/// `decide_access` reads the forwarded visitor session, the rest is public metadata.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // GET /api/health
        // Liveness probe for the load balancer.
        .route("/health", get(handlers::health))
        // GET /api/access/decide?uri=...
        // Forward-auth: the verdict for the page named in `x-forwarded-uri` (or `uri`).
        .route("/access/decide", get(handlers::decide_access))
        // GET /api/settings/flags
        // Feature flag snapshot used to hide navigation entries of disabled modules.
        .route("/settings/flags", get(handlers::get_feature_flags))
}
