use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, Method, Request, Uri, header, request::Parts},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use panel_gate::{
    AppConfig, AppState, ImpersonationMarkers, MockSettingsStore, SessionState,
    auth::{Claims, IMPERSONATED_USER_COOKIE, ORIGINAL_ADMIN_COOKIE, decode_session},
    error::SessionError,
    models::Role,
};
use std::{sync::Arc, time::SystemTime};
use uuid::Uuid;

// --- Helper Functions ---

const TEST_SECRET: &str = "test-secret-value-1234567890";
const TEST_USER_ID: Uuid = Uuid::from_u128(1);

fn now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn token_with(role: &str, impersonating: bool, exp: u64, secret: &str) -> String {
    let claims = Claims {
        sub: TEST_USER_ID,
        role: role.to_string(),
        iat: now() as usize,
        exp: exp as usize,
        impersonating,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn token(role: &str) -> String {
    token_with(role, false, now() + 3600, TEST_SECRET)
}

fn config() -> AppConfig {
    AppConfig {
        session_secret: TEST_SECRET.to_string(),
        ..AppConfig::default()
    }
}

fn app_state() -> AppState {
    AppState::new(Arc::new(MockSettingsStore::all_enabled()), config())
}

fn parts_with(cookie: Option<String>, bearer: Option<String>) -> Parts {
    let mut request = Request::builder()
        .method(Method::GET)
        .uri("/dashboard".parse::<Uri>().unwrap())
        .body(axum::body::Body::empty())
        .unwrap();
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
    }
    if let Some(bearer) = bearer {
        request.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {bearer}")).unwrap(),
        );
    }
    request.into_parts().0
}

fn session_cookie(token: &str) -> String {
    format!("{}={}", config().session_cookie, token)
}

// --- Tests ---

#[tokio::test]
async fn test_session_from_cookie() {
    let mut parts = parts_with(Some(session_cookie(&token("admin"))), None);

    let session = SessionState::from_request_parts(&mut parts, &app_state())
        .await
        .unwrap();

    assert_eq!(
        session,
        SessionState::Authenticated {
            user_id: TEST_USER_ID,
            role: Role::Admin,
            impersonating: false,
        }
    );
}

#[tokio::test]
async fn test_session_from_bearer_header() {
    let mut parts = parts_with(None, Some(token("user")));

    let session = SessionState::from_request_parts(&mut parts, &app_state())
        .await
        .unwrap();

    assert_eq!(session.role(), Some(Role::User));
}

#[tokio::test]
async fn test_impersonation_claim_is_carried() {
    let jwt = token_with("admin", true, now() + 3600, TEST_SECRET);
    let parts = parts_with(Some(session_cookie(&jwt)), None);

    let session = decode_session(&parts.headers, &config()).unwrap();

    assert!(matches!(
        session,
        SessionState::Authenticated {
            impersonating: true,
            ..
        }
    ));
}

#[tokio::test]
async fn test_missing_token_is_anonymous() {
    let mut parts = parts_with(None, None);

    assert!(matches!(
        decode_session(&parts.headers, &config()),
        Err(SessionError::Missing)
    ));
    let session = SessionState::from_request_parts(&mut parts, &app_state())
        .await
        .unwrap();
    assert_eq!(session, SessionState::Anonymous);
}

#[tokio::test]
async fn test_wrong_signature_is_anonymous() {
    let jwt = token_with("admin", false, now() + 3600, "some-other-secret-value");
    let mut parts = parts_with(Some(session_cookie(&jwt)), None);

    let session = SessionState::from_request_parts(&mut parts, &app_state())
        .await
        .unwrap();
    assert_eq!(session, SessionState::Anonymous);
}

#[tokio::test]
async fn test_expired_token_is_anonymous() {
    // Well past the default validation leeway.
    let jwt = token_with("admin", false, now() - 3600, TEST_SECRET);
    let parts = parts_with(Some(session_cookie(&jwt)), None);

    assert!(matches!(
        decode_session(&parts.headers, &config()),
        Err(SessionError::Token(_))
    ));
}

#[tokio::test]
async fn test_unknown_role_is_malformed() {
    let parts = parts_with(Some(session_cookie(&token("superuser"))), None);

    assert!(matches!(
        decode_session(&parts.headers, &config()),
        Err(SessionError::UnknownRole(role)) if role == "superuser"
    ));
}

#[tokio::test]
async fn test_garbage_cookie_is_anonymous() {
    let mut parts = parts_with(Some(session_cookie("not-a-jwt")), None);

    let session = SessionState::from_request_parts(&mut parts, &app_state())
        .await
        .unwrap();
    assert_eq!(session, SessionState::Anonymous);
}

#[tokio::test]
async fn test_impersonation_markers_from_cookies() {
    let cookie = format!(
        "{IMPERSONATED_USER_COOKIE}=user-42; {ORIGINAL_ADMIN_COOKIE}=admin-1; theme=dark"
    );
    let mut parts = parts_with(Some(cookie), None);

    let markers = ImpersonationMarkers::from_request_parts(&mut parts, &app_state())
        .await
        .unwrap();

    assert_eq!(markers.impersonated_user_id.as_deref(), Some("user-42"));
    assert_eq!(markers.original_admin_id.as_deref(), Some("admin-1"));
    assert!(markers.is_active());
}

#[tokio::test]
async fn test_no_markers_without_cookies() {
    let mut parts = parts_with(None, None);

    let markers = ImpersonationMarkers::from_request_parts(&mut parts, &app_state())
        .await
        .unwrap();

    assert_eq!(markers, ImpersonationMarkers::default());
    assert!(!markers.is_active());
}
