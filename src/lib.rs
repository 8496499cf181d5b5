use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// The route access decision engine and its path tables.
pub mod access;
// Collaborators: session provider / cookie store, feature flag store.
pub mod auth;
pub mod settings;

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

pub mod routes;
use routes::api;

// --- Public Re-exports ---

pub use access::{AccessEngine, AccessState, RouteTable};
pub use config::AppConfig;
pub use models::{ImpersonationMarkers, RequestContext, SessionState, Verdict};
pub use settings::{CachedSettingsStore, MockSettingsStore, PostgresSettingsStore, SettingsState};

/// ApiDoc
///
/// OpenAPI document for the `/api` endpoints, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::decide_access, handlers::get_feature_flags),
    components(
        schemas(
            models::Verdict, models::FeatureFlagSnapshot, models::FeatureFlag,
            models::Role, models::ErrorBody,
        )
    ),
    tags(
        (name = "panel-gate", description = "SMM panel route access API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Single immutable container shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// The route access decision engine.
    pub access: AccessState,
    /// Feature flag store (normally the cached Postgres store).
    pub settings: SettingsState,
    /// The loaded environment configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Wires an engine over `settings` using the route table from `config`.
    pub fn new(settings: SettingsState, config: AppConfig) -> Self {
        let access = std::sync::Arc::new(AccessEngine::new(
            config.route_table.clone(),
            settings.clone(),
        ));
        Self {
            access,
            settings,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for AccessState {
    fn from_ref(app_state: &AppState) -> AccessState {
        app_state.access.clone()
    }
}

impl FromRef<AppState> for SettingsState {
    fn from_ref(app_state: &AppState) -> SettingsState {
        app_state.settings.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// route_gate
///
/// Runs the access engine in front of every route. `Allow` continues to the handler;
/// `Redirect` short-circuits with a 307 to the computed location.
///
/// *Mechanism*: `SessionState` and `ImpersonationMarkers` are extractors that never
/// reject, so a malformed cookie degrades to an anonymous caller instead of a 401.
/// The `Location` header is built fallibly: a location that is not a valid header
/// value is logged and replaced by the user home rather than failing the request.
pub async fn route_gate(
    State(engine): State<AccessState>,
    session: SessionState,
    markers: ImpersonationMarkers,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_uri(request.uri());

    match engine.decide(&ctx, &session, &markers).await {
        Verdict::Allow => next.run(request).await,
        Verdict::Redirect { location } => {
            tracing::debug!(path = %ctx.path, %location, "route gate redirect");
            let value = HeaderValue::from_str(&location).unwrap_or_else(|_| {
                tracing::warn!(%location, "redirect location is not a valid header value");
                HeaderValue::from_str(&engine.routes().user_home)
                    .unwrap_or(HeaderValue::from_static("/"))
            });
            (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, value)]).into_response()
        }
    }
}

/// create_router
///
/// Assembles the routes, the route gate and the observability layers.
///
/// The gate is applied to the whole router, `/api` included: the engine's bypass
/// table is what lets API calls, webhooks and the Swagger UI through, so a custom
/// route table loaded from `ROUTE_TABLE_PATH` governs them as well.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api::api_routes())
        // Pages themselves are rendered by the web tier.
        .fallback(handlers::page_not_found)
        // 2a. Route gate: one verdict per request before any handler runs.
        .layer(middleware::from_fn_with_state(state.clone(), route_gate))
        .with_state(state);

    // 3. Observability and Correlation Layers (outermost)
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID generation
                .layer(SetRequestIdLayer::new(
                    x_request_id.clone(),
                    MakeRequestUuid,
                ))
                // 3b. Request tracing, one span per request
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Echo x-request-id back to the caller
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Span for every request, correlated by the generated `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
