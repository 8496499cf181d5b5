use crate::{
    access::AccessState,
    error::ApiError,
    models::{ErrorBody, FeatureFlagSnapshot, ImpersonationMarkers, RequestContext, SessionState, Verdict},
    settings::SettingsState,
};
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
};
use serde::Deserialize;

/// Header set by the web tier to name the page it wants judged.
pub const FORWARDED_URI_HEADER: &str = "x-forwarded-uri";

/// DecideParams
///
/// Query fallback for callers that cannot set `x-forwarded-uri`.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct DecideParams {
    /// Page URI (path and optional query string) to judge.
    pub uri: Option<String>,
}

/// health
///
/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is up", body = String))
)]
pub async fn health() -> &'static str {
    "ok"
}

/// decide_access
///
/// Forward-auth endpoint. The web tier forwards the visitor's cookies and names the
/// page they asked for; the response is the verdict the route gate would apply to it.
#[utoipa::path(
    get,
    path = "/api/access/decide",
    params(DecideParams),
    responses(
        (status = 200, description = "Verdict for the forwarded page", body = Verdict),
        (status = 400, description = "No page URI given", body = ErrorBody)
    )
)]
pub async fn decide_access(
    State(engine): State<AccessState>,
    session: SessionState,
    markers: ImpersonationMarkers,
    headers: HeaderMap,
    Query(params): Query<DecideParams>,
) -> Result<Json<Verdict>, ApiError> {
    let raw = headers
        .get(FORWARDED_URI_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or(params.uri)
        .filter(|uri| !uri.trim().is_empty())
        .ok_or(ApiError::MissingForwardedUri)?;

    let uri = raw
        .parse::<Uri>()
        .map_err(|e| ApiError::InvalidForwardedUri(e.to_string()))?;
    let ctx = RequestContext::from_uri(&uri);

    let verdict = engine.decide(&ctx, &session, &markers).await;
    tracing::debug!(path = %ctx.path, ?verdict, "forward-auth decision");

    Ok(Json(verdict))
}

/// get_feature_flags
///
/// Current state of every page-group switch, for the frontend navigation.
/// Domains that cannot be read are reported as disabled.
#[utoipa::path(
    get,
    path = "/api/settings/flags",
    responses((status = 200, description = "Feature flag snapshot", body = FeatureFlagSnapshot))
)]
pub async fn get_feature_flags(State(settings): State<SettingsState>) -> Json<FeatureFlagSnapshot> {
    Json(FeatureFlagSnapshot::resolve(settings.as_ref()).await)
}

/// page_not_found
///
/// Fallback for allowed paths this service does not serve. Pages are rendered by the
/// web tier.
pub async fn page_not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: format!("no page at {}", uri.path()),
        }),
    )
}
