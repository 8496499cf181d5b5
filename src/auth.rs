use std::convert::Infallible;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use axum_extra::extract::CookieJar;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::SessionError,
    models::{ImpersonationMarkers, Role, SessionState},
};

/// Cookie written with the id of the user an admin is operating as.
pub const IMPERSONATED_USER_COOKIE: &str = "impersonated-user-id";
/// Cookie written with the id of the admin who started the impersonation.
pub const ORIGINAL_ADMIN_COOKIE: &str = "original-admin-id";

/// Claims
///
/// Payload of the signed session token issued at sign-in.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user the session acts as.
    pub sub: Uuid,
    /// Role as stored on the user record. Parsed into the closed `Role` enum.
    pub role: String,
    /// Expiration Time (exp): the token is rejected past this timestamp.
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
    /// True when the token was minted for an admin impersonating `sub`.
    #[serde(default)]
    pub impersonating: bool,
}

/// decode_session
///
/// Resolves the session from the request headers: the session cookie first, then a
/// `Bearer` token.
///
/// Every failure is reported as a `SessionError`; the extractor below turns all of
/// them into `SessionState::Anonymous`.
pub fn decode_session(headers: &HeaderMap, config: &AppConfig) -> Result<SessionState, SessionError> {
    let jar = CookieJar::from_headers(headers);

    let token = match jar.get(&config.session_cookie) {
        Some(cookie) => cookie.value().to_string(),
        None => headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
            .ok_or(SessionError::Missing)?,
    };

    let decoding_key = DecodingKey::from_secret(config.session_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    let claims = decode::<Claims>(&token, &decoding_key, &validation)?.claims;
    let role = claims.role.parse::<Role>()?;

    Ok(SessionState::Authenticated {
        user_id: claims.sub,
        role,
        impersonating: claims.impersonating,
    })
}

/// SessionState Extractor Implementation
///
/// Never rejects. A missing token is an anonymous visitor; a malformed, expired or
/// unrecognised one is treated the same way so a broken session can never widen
/// access.
impl<S> FromRequestParts<S> for SessionState
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);

        match decode_session(&parts.headers, &config) {
            Ok(session) => Ok(session),
            Err(SessionError::Missing) => Ok(SessionState::Anonymous),
            Err(e) => {
                tracing::warn!(error = %e, "malformed session, continuing as anonymous");
                Ok(SessionState::Anonymous)
            }
        }
    }
}

impl ImpersonationMarkers {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let jar = CookieJar::from_headers(headers);
        let read = |name: &str| jar.get(name).map(|c| c.value().to_string());

        Self {
            impersonated_user_id: read(IMPERSONATED_USER_COOKIE),
            original_admin_id: read(ORIGINAL_ADMIN_COOKIE),
        }
    }
}

impl<S> FromRequestParts<S> for ImpersonationMarkers
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ImpersonationMarkers::from_headers(&parts.headers))
    }
}
