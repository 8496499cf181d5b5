//! Route access decision engine.
//!
//! One call per request: classify the path, consult a feature flag when the path
//! belongs to a gated page group, and produce exactly one [`Verdict`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    models::{
        FeatureFlag, ImpersonationMarkers, RequestContext, SessionState, Verdict,
        encode_uri_component,
    },
    settings::{SettingsState, resolve_flag},
};

pub const CALLBACK_PARAM: &str = "callbackUrl";
pub const REASON_PARAM: &str = "reason";

/// PathMatcher
///
/// `Exact` matches a single path. `Prefix` matches the path itself and anything
/// nested beneath it (`/affiliate` covers `/affiliate/stats`, not `/affiliates`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMatcher {
    Exact(String),
    Prefix(String),
}

impl PathMatcher {
    pub fn exact(path: &str) -> Self {
        PathMatcher::Exact(path.to_string())
    }

    pub fn prefix(path: &str) -> Self {
        PathMatcher::Prefix(path.to_string())
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Exact(exact) => path == exact,
            PathMatcher::Prefix(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                path == prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

fn any_match(matchers: &[PathMatcher], path: &str) -> bool {
    matchers.iter().any(|m| m.matches(path))
}

/// FallbackRule
///
/// Where a request goes when its page group is switched off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum FallbackRule {
    /// Back to the caller's home: `/admin` for a non-impersonating admin, `/dashboard` otherwise.
    Home,
    /// Logged-in sessions go home; anonymous visitors go to sign-in with a `reason`.
    Restricted { reason: String },
}

/// PageGroup
///
/// A set of pages that exist only while `flag` is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageGroup {
    pub name: String,
    pub matchers: Vec<PathMatcher>,
    pub flag: FeatureFlag,
    pub fallback: FallbackRule,
}

impl PageGroup {
    fn new(name: &str, prefixes: &[&str], flag: FeatureFlag, fallback: FallbackRule) -> Self {
        Self {
            name: name.to_string(),
            matchers: prefixes.iter().map(|p| PathMatcher::prefix(p)).collect(),
            flag,
            fallback,
        }
    }
}

/// RouteTable
///
/// The path tables the engine classifies against. Page groups are evaluated in
/// order and the first matching group wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTable {
    pub sign_in: String,
    pub admin_home: String,
    pub user_home: String,
    pub bypass: Vec<PathMatcher>,
    pub auth_routes: Vec<PathMatcher>,
    pub public_routes: Vec<PathMatcher>,
    pub page_groups: Vec<PageGroup>,
}

impl Default for RouteTable {
    fn default() -> Self {
        use FallbackRule::Home;
        use FeatureFlag::*;

        Self {
            sign_in: "/sign-in".to_string(),
            admin_home: "/admin".to_string(),
            user_home: "/dashboard".to_string(),
            bypass: vec![
                PathMatcher::prefix("/api"),
                PathMatcher::prefix("/payment/webhook"),
                PathMatcher::prefix("/_next"),
                PathMatcher::prefix("/swagger-ui"),
                PathMatcher::prefix("/api-docs"),
                PathMatcher::exact("/favicon.ico"),
            ],
            auth_routes: [
                "/sign-in",
                "/sign-up",
                "/reset-password",
                "/new-password",
                "/new-verification",
                "/two-factor",
                "/auth-error",
            ]
            .into_iter()
            .map(PathMatcher::exact)
            .collect(),
            public_routes: vec![
                PathMatcher::exact("/"),
                PathMatcher::prefix("/about"),
                PathMatcher::prefix("/terms"),
                PathMatcher::prefix("/privacy"),
                PathMatcher::prefix("/blogs"),
                PathMatcher::prefix("/faqs"),
                PathMatcher::prefix("/our-services"),
                PathMatcher::prefix("/contact-us"),
            ],
            page_groups: vec![
                PageGroup::new(
                    "tickets",
                    &["/support-tickets", "/admin/tickets"],
                    TicketSystemEnabled,
                    Home,
                ),
                PageGroup::new(
                    "affiliate",
                    &["/affiliate", "/admin/affiliates"],
                    AffiliateSystemEnabled,
                    Home,
                ),
                PageGroup::new(
                    "child-panel",
                    &["/child-panel", "/admin/child-panels"],
                    ChildPanelSellingEnabled,
                    Home,
                ),
                PageGroup::new("mass-order", &["/mass-orders"], MassOrderEnabled, Home),
                PageGroup::new(
                    "service-updates",
                    &["/services/updates", "/admin/services/updates"],
                    ServiceUpdateLogsEnabled,
                    Home,
                ),
                PageGroup::new(
                    "contact",
                    &["/contact-support", "/admin/contact-messages"],
                    ContactSystemEnabled,
                    Home,
                ),
                PageGroup::new(
                    "our-services",
                    &["/our-services"],
                    ServicesListPublic,
                    FallbackRule::Restricted {
                        reason: "services-restricted".to_string(),
                    },
                ),
            ],
        }
    }
}

impl RouteTable {
    pub fn is_bypass(&self, path: &str) -> bool {
        any_match(&self.bypass, path)
    }

    pub fn is_auth_route(&self, path: &str) -> bool {
        any_match(&self.auth_routes, path)
    }

    pub fn is_public(&self, path: &str) -> bool {
        any_match(&self.public_routes, path)
    }

    pub fn page_group(&self, path: &str) -> Option<&PageGroup> {
        self.page_groups.iter().find(|g| any_match(&g.matchers, path))
    }

    fn is_admin_area(&self, path: &str) -> bool {
        PathMatcher::Prefix(self.admin_home.clone()).matches(path)
    }

    fn is_user_area(&self, path: &str) -> bool {
        PathMatcher::Prefix(self.user_home.clone()).matches(path)
    }
}

/// AccessEngine
///
/// Stateless apart from the shared flag store, which it only reads.
pub struct AccessEngine {
    routes: Arc<RouteTable>,
    settings: SettingsState,
}

/// AccessState
///
/// The concrete type used to share the engine across the application state.
pub type AccessState = Arc<AccessEngine>;

/// The caller's identity, reduced to what the classification rules look at.
#[derive(Debug, Clone, Copy)]
struct Caller {
    logged_in: bool,
    admin: bool,
    impersonating: bool,
}

impl Caller {
    fn new(session: &SessionState, markers: &ImpersonationMarkers) -> Self {
        match session {
            SessionState::Anonymous => Caller {
                logged_in: false,
                admin: false,
                impersonating: false,
            },
            SessionState::Authenticated { impersonating, .. } => Caller {
                logged_in: true,
                admin: session.is_admin(),
                impersonating: *impersonating || markers.is_active(),
            },
        }
    }

    fn reaches_admin(&self) -> bool {
        self.admin && !self.impersonating
    }
}

impl AccessEngine {
    pub fn new(routes: RouteTable, settings: SettingsState) -> Self {
        Self {
            routes: Arc::new(routes),
            settings,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// decide
    ///
    /// Classifies the request. The rules are tried in a fixed order and the first
    /// one that matches produces the verdict:
    ///
    /// 1. Bypass paths (API, webhooks, framework assets) are always allowed and never
    ///    touch the flag store.
    /// 2. A path inside a feature-gated page group costs exactly one flag lookup. A
    ///    disabled flag, or a lookup that fails, applies the group's fallback rule.
    /// 3. Auth pages send signed-in sessions away (home or `callbackUrl`).
    /// 4. `/admin/*` and `/dashboard/*` are reserved to the matching caller.
    /// 5. Anonymous visitors outside the public list go to sign-in.
    /// 6. Everything else is allowed.
    ///
    /// Never fails. `ctx.path` is already normalised, so `..` segments cannot step
    /// out of a bypass prefix.
    pub async fn decide(
        &self,
        ctx: &RequestContext,
        session: &SessionState,
        markers: &ImpersonationMarkers,
    ) -> Verdict {
        let path = ctx.path.as_str();

        // 1. Bypass
        if self.routes.is_bypass(path) {
            return Verdict::Allow;
        }

        let caller = Caller::new(session, markers);

        // 2. Feature-gated page groups (lazy flag lookup)
        if let Some(group) = self.routes.page_group(path) {
            if !self.flag_enabled(group).await {
                let verdict = self.fallback(group, caller);
                tracing::debug!(path, group = %group.name, ?verdict, "page group disabled");
                return verdict;
            }
        }

        // 3. Auth pages
        if self.routes.is_auth_route(path) {
            if !caller.logged_in {
                return Verdict::Allow;
            }
            let target = if caller.impersonating {
                self.routes.user_home.clone()
            } else if caller.admin {
                self.routes.admin_home.clone()
            } else {
                self.callback_target(ctx)
            };
            return Verdict::redirect(target);
        }

        // 4. Role-scoped areas, 5. authentication gate
        if caller.logged_in {
            if self.routes.is_admin_area(path) && !caller.reaches_admin() {
                tracing::debug!(path, impersonating = caller.impersonating, "admin area denied");
                return Verdict::redirect(self.routes.user_home.clone());
            }
            if self.routes.is_user_area(path) && caller.reaches_admin() {
                return Verdict::redirect(self.routes.admin_home.clone());
            }
        } else if !self.routes.is_public(path) {
            return Verdict::redirect(self.sign_in_redirect(ctx));
        }

        Verdict::Allow
    }

    async fn flag_enabled(&self, group: &PageGroup) -> bool {
        match resolve_flag(self.settings.as_ref(), group.flag).await {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::warn!(group = %group.name, flag = ?group.flag, error = %e, "flag lookup failed, treating as disabled");
                false
            }
        }
    }

    fn home(&self, caller: Caller) -> String {
        if caller.reaches_admin() {
            self.routes.admin_home.clone()
        } else {
            self.routes.user_home.clone()
        }
    }

    fn fallback(&self, group: &PageGroup, caller: Caller) -> Verdict {
        match &group.fallback {
            FallbackRule::Home => Verdict::redirect(self.home(caller)),
            FallbackRule::Restricted { .. } if caller.logged_in => {
                Verdict::redirect(self.home(caller))
            }
            FallbackRule::Restricted { reason } => Verdict::redirect(format!(
                "{}?{}={}",
                self.routes.sign_in,
                REASON_PARAM,
                encode_uri_component(reason)
            )),
        }
    }

    fn sign_in_redirect(&self, ctx: &RequestContext) -> String {
        if ctx.path == "/" {
            return self.routes.sign_in.clone();
        }
        format!(
            "{}?{}={}",
            self.routes.sign_in,
            CALLBACK_PARAM,
            encode_uri_component(&ctx.original_target())
        )
    }

    /// The `callbackUrl` of an auth page, accepted only when it stays on this site
    /// and does not lead back into the auth pages.
    fn callback_target(&self, ctx: &RequestContext) -> String {
        ctx.query(CALLBACK_PARAM)
            .filter(|target| is_local_path(target))
            .filter(|target| {
                let path = target.split(['?', '#']).next().unwrap_or_default();
                !self.routes.is_auth_route(path)
            })
            .map(str::to_string)
            .unwrap_or_else(|| self.routes.user_home.clone())
    }
}

/// A same-site absolute path. Whitespace and control characters are refused
/// outright: browsers drop tab/CR/LF from URLs (`/\t/host` turns into `//host`) and
/// they are not valid in a `Location` header either.
fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(|c| c.is_whitespace() || c.is_control())
}
