use std::{collections::HashMap, fmt, str::FromStr};

use axum::{extract::Query, http::Uri};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::SessionError;

// --- Identity ---

/// Role
///
/// The closed set of panel roles carried in the session token.
/// Unknown role strings are rejected instead of falling through to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    User,
    Admin,
    Moderator,
}

impl FromStr for Role {
    type Err = SessionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "moderator" => Ok(Role::Moderator),
            other => Err(SessionError::UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Moderator => "moderator",
        };
        f.write_str(name)
    }
}

/// SessionState
///
/// The identity resolved for a single request by the session provider.
/// A request either carries no usable session at all, or a fully-typed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated {
        user_id: Uuid,
        role: Role,
        /// Set when the session token itself was issued for an impersonation.
        impersonating: bool,
    },
}

impl SessionState {
    pub fn role(&self) -> Option<Role> {
        match self {
            SessionState::Anonymous => None,
            SessionState::Authenticated { role, .. } => Some(*role),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }
}

/// ImpersonationMarkers
///
/// The two cookies written when an admin starts operating the panel as another user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImpersonationMarkers {
    pub impersonated_user_id: Option<String>,
    pub original_admin_id: Option<String>,
}

impl ImpersonationMarkers {
    /// An impersonation is only considered active when both markers are set.
    pub fn is_active(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.impersonated_user_id) && present(&self.original_admin_id)
    }
}

// --- Request ---

/// RequestContext
///
/// The immutable view of the incoming request the access engine works on.
/// Matching only ever looks at `path`; the query survives for `callbackUrl` construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub path: String,
    pub query_params: HashMap<String, String>,
    pub raw_query: Option<String>,
}

impl RequestContext {
    pub fn new(path: &str) -> Self {
        Self {
            path: normalize_path(path),
            ..Default::default()
        }
    }

    /// Builds the context from a request URI, or from a forwarded `path?query` string.
    pub fn from_uri(uri: &Uri) -> Self {
        let query_params = Query::<HashMap<String, String>>::try_from_uri(uri)
            .map(|Query(params)| params)
            .unwrap_or_default();

        Self {
            path: normalize_path(uri.path()),
            query_params,
            raw_query: uri.query().filter(|q| !q.is_empty()).map(str::to_string),
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query_params.insert(key.to_string(), value.to_string());
        let pair = format!("{}={}", encode_uri_component(key), encode_uri_component(value));
        self.raw_query = Some(match self.raw_query.take() {
            Some(existing) => format!("{existing}&{pair}"),
            None => pair,
        });
        self
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    /// The original path plus query string, as it should be replayed after sign-in.
    pub fn original_target(&self) -> String {
        match &self.raw_query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// Canonical form used for every table match.
///
/// Resolves `.` and `..` segments (percent-encoded dots included), collapses
/// repeated separators, treats `\\` as `/`, and drops the trailing slash. The result
/// always starts with `/` and never climbs above the root, so `/api/../admin`
/// is matched as `/admin`.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.trim().split(['/', '\\']) {
        match segment.to_ascii_lowercase().as_str() {
            "" | "." | "%2e" => {}
            ".." | ".%2e" | "%2e." | "%2e%2e" => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

// `encodeURIComponent` leaves these marks alone; the panel's links are built with it.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encodes a query value the way the browser's `encodeURIComponent` does.
pub fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

// --- Verdict ---

/// Verdict
///
/// The engine's only output. Exported to the frontend, which receives it from the
/// forward-auth endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "verdict", rename_all = "lowercase")]
#[ts(export)]
pub enum Verdict {
    Allow,
    Redirect { location: String },
}

impl Verdict {
    pub fn redirect(location: impl Into<String>) -> Self {
        Verdict::Redirect {
            location: location.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::Redirect { location } => Some(location),
        }
    }
}

// --- Feature Flags ---

/// FeatureFlag
///
/// Every runtime switch that can close a page group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum FeatureFlag {
    TicketSystemEnabled,
    AffiliateSystemEnabled,
    ChildPanelSellingEnabled,
    MassOrderEnabled,
    ServiceUpdateLogsEnabled,
    ServicesListPublic,
    ContactSystemEnabled,
}

/// SettingsDomain
///
/// Flags are stored (and cached) per domain; one lookup resolves every flag in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsDomain {
    Ticket,
    Module,
}

impl FeatureFlag {
    pub const ALL: [FeatureFlag; 7] = [
        FeatureFlag::TicketSystemEnabled,
        FeatureFlag::AffiliateSystemEnabled,
        FeatureFlag::ChildPanelSellingEnabled,
        FeatureFlag::MassOrderEnabled,
        FeatureFlag::ServiceUpdateLogsEnabled,
        FeatureFlag::ServicesListPublic,
        FeatureFlag::ContactSystemEnabled,
    ];

    pub fn domain(self) -> SettingsDomain {
        match self {
            FeatureFlag::TicketSystemEnabled => SettingsDomain::Ticket,
            _ => SettingsDomain::Module,
        }
    }
}

/// TicketSettings
///
/// Single-row `ticket_settings` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TicketSettings {
    pub ticket_system_enabled: bool,
}

/// ModuleSettings
///
/// Single-row `module_settings` table holding the per-module switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ModuleSettings {
    pub affiliate_system_enabled: bool,
    pub child_panel_selling_enabled: bool,
    pub mass_order_enabled: bool,
    pub service_update_logs_enabled: bool,
    pub services_list_public: bool,
    pub contact_system_enabled: bool,
}

/// FeatureFlagSnapshot
///
/// Typed record of every flag. Built per domain; a domain that could not be read
/// contributes `false` for all of its flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FeatureFlagSnapshot {
    pub ticket_system_enabled: bool,
    pub affiliate_system_enabled: bool,
    pub child_panel_selling_enabled: bool,
    pub mass_order_enabled: bool,
    pub service_update_logs_enabled: bool,
    pub services_list_public: bool,
    pub contact_system_enabled: bool,
}

impl FeatureFlagSnapshot {
    pub fn from_parts(ticket: Option<&TicketSettings>, module: Option<&ModuleSettings>) -> Self {
        let mut snapshot = Self::default();
        if let Some(ticket) = ticket {
            snapshot.ticket_system_enabled = ticket.ticket_system_enabled;
        }
        if let Some(module) = module {
            snapshot.affiliate_system_enabled = module.affiliate_system_enabled;
            snapshot.child_panel_selling_enabled = module.child_panel_selling_enabled;
            snapshot.mass_order_enabled = module.mass_order_enabled;
            snapshot.service_update_logs_enabled = module.service_update_logs_enabled;
            snapshot.services_list_public = module.services_list_public;
            snapshot.contact_system_enabled = module.contact_system_enabled;
        }
        snapshot
    }

    pub fn get(&self, flag: FeatureFlag) -> bool {
        match flag {
            FeatureFlag::TicketSystemEnabled => self.ticket_system_enabled,
            FeatureFlag::AffiliateSystemEnabled => self.affiliate_system_enabled,
            FeatureFlag::ChildPanelSellingEnabled => self.child_panel_selling_enabled,
            FeatureFlag::MassOrderEnabled => self.mass_order_enabled,
            FeatureFlag::ServiceUpdateLogsEnabled => self.service_update_logs_enabled,
            FeatureFlag::ServicesListPublic => self.services_list_public,
            FeatureFlag::ContactSystemEnabled => self.contact_system_enabled,
        }
    }
}

/// ErrorBody
///
/// JSON body returned by the API on failures.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}
