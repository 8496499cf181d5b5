use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::RwLock;

use crate::{
    error::SettingsError,
    models::{FeatureFlag, FeatureFlagSnapshot, ModuleSettings, SettingsDomain, TicketSettings},
};

// 1. SettingsStore Contract
/// SettingsStore
///
/// The feature flag store as seen by the access engine: one async getter per settings
/// domain. Implementations are swapped freely (Postgres, cached, mock) behind
/// `Arc<dyn SettingsStore>`.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Reads the ticket settings domain (`ticketSystemEnabled`).
    async fn ticket_settings(&self) -> Result<TicketSettings, SettingsError>;

    /// Reads the module settings domain (every other page-group switch).
    async fn module_settings(&self) -> Result<ModuleSettings, SettingsError>;
}

/// SettingsState
///
/// The concrete type used to share the flag store across the application state.
pub type SettingsState = Arc<dyn SettingsStore>;

/// resolve_flag
///
/// Looks up a single flag, touching only the domain that owns it.
pub async fn resolve_flag(
    store: &dyn SettingsStore,
    flag: FeatureFlag,
) -> Result<bool, SettingsError> {
    let snapshot = match flag.domain() {
        SettingsDomain::Ticket => {
            FeatureFlagSnapshot::from_parts(Some(&store.ticket_settings().await?), None)
        }
        SettingsDomain::Module => {
            FeatureFlagSnapshot::from_parts(None, Some(&store.module_settings().await?))
        }
    };
    Ok(snapshot.get(flag))
}

impl FeatureFlagSnapshot {
    /// resolve
    ///
    /// Reads both domains. A domain that fails contributes `false` for all of its flags.
    pub async fn resolve(store: &dyn SettingsStore) -> Self {
        let ticket = store
            .ticket_settings()
            .await
            .map_err(|e| tracing::warn!(error = %e, "ticket settings lookup failed"))
            .ok();
        let module = store
            .module_settings()
            .await
            .map_err(|e| tracing::warn!(error = %e, "module settings lookup failed"))
            .ok();

        Self::from_parts(ticket.as_ref(), module.as_ref())
    }
}

// 2. The Real Implementation (Postgres)
/// PostgresSettingsStore
///
/// Reads the single-row settings tables maintained by the admin settings pages.
pub struct PostgresSettingsStore {
    pool: PgPool,
}

impl PostgresSettingsStore {
    /// Creates a new store using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PostgresSettingsStore {
    async fn ticket_settings(&self) -> Result<TicketSettings, SettingsError> {
        sqlx::query_as::<_, TicketSettings>(
            r#"SELECT ticket_system_enabled FROM ticket_settings ORDER BY id LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SettingsError::NotConfigured("ticket_settings"))
    }

    async fn module_settings(&self) -> Result<ModuleSettings, SettingsError> {
        sqlx::query_as::<_, ModuleSettings>(
            r#"
            SELECT
                affiliate_system_enabled, child_panel_selling_enabled, mass_order_enabled,
                service_update_logs_enabled, services_list_public, contact_system_enabled
            FROM module_settings
            ORDER BY id
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SettingsError::NotConfigured("module_settings"))
    }
}

// 3. The Cache
/// Clock
///
/// Source of "now" for the cache. Injected so expiry can be driven by tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct CacheEntry<T> {
    value: T,
    fetched_at: DateTime<Utc>,
}

/// CachedSettingsStore
///
/// Time-boxed cache in front of another store. Each domain has its own entry and
/// expires independently. Failed lookups are passed through and never cached.
pub struct CachedSettingsStore<S, C = SystemClock> {
    inner: S,
    clock: C,
    ttl: Duration,
    ticket: RwLock<Option<CacheEntry<TicketSettings>>>,
    module: RwLock<Option<CacheEntry<ModuleSettings>>>,
}

impl<S: SettingsStore> CachedSettingsStore<S, SystemClock> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self::with_clock(inner, ttl, SystemClock)
    }
}

impl<S: SettingsStore, C: Clock> CachedSettingsStore<S, C> {
    pub fn with_clock(inner: S, ttl: Duration, clock: C) -> Self {
        Self {
            inner,
            clock,
            ttl,
            ticket: RwLock::new(None),
            module: RwLock::new(None),
        }
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>) -> bool {
        self.clock.now() - fetched_at < self.ttl
    }
}

/// Serves a fresh cached value, or refreshes the slot through `fetch`.
async fn cached_or_fetch<T, F, Fut>(
    slot: &RwLock<Option<CacheEntry<T>>>,
    is_fresh: impl Fn(DateTime<Utc>) -> bool,
    now: DateTime<Utc>,
    fetch: F,
) -> Result<T, SettingsError>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, SettingsError>>,
{
    if let Some(entry) = slot.read().await.as_ref() {
        if is_fresh(entry.fetched_at) {
            return Ok(entry.value.clone());
        }
    }

    let value = fetch().await?;
    *slot.write().await = Some(CacheEntry {
        value: value.clone(),
        fetched_at: now,
    });
    Ok(value)
}

#[async_trait]
impl<S: SettingsStore, C: Clock> SettingsStore for CachedSettingsStore<S, C> {
    async fn ticket_settings(&self) -> Result<TicketSettings, SettingsError> {
        cached_or_fetch(
            &self.ticket,
            |at| self.is_fresh(at),
            self.clock.now(),
            || self.inner.ticket_settings(),
        )
        .await
    }

    async fn module_settings(&self) -> Result<ModuleSettings, SettingsError> {
        cached_or_fetch(
            &self.module,
            |at| self.is_fresh(at),
            self.clock.now(),
            || self.inner.module_settings(),
        )
        .await
    }
}

// 4. The Mock Implementation (For Tests)
/// MockSettingsStore
///
/// In-process store for tests. A `None` domain fails every lookup, which lets tests
/// exercise the fail-closed paths. Every lookup is counted.
#[derive(Default)]
pub struct MockSettingsStore {
    pub ticket: Option<TicketSettings>,
    pub module: Option<ModuleSettings>,
    lookups: AtomicUsize,
}

impl MockSettingsStore {
    /// Every flag on.
    pub fn all_enabled() -> Self {
        Self::new(
            Some(TicketSettings {
                ticket_system_enabled: true,
            }),
            Some(ModuleSettings {
                affiliate_system_enabled: true,
                child_panel_selling_enabled: true,
                mass_order_enabled: true,
                service_update_logs_enabled: true,
                services_list_public: true,
                contact_system_enabled: true,
            }),
        )
    }

    /// Every lookup fails.
    pub fn failing() -> Self {
        Self::new(None, None)
    }

    pub fn new(ticket: Option<TicketSettings>, module: Option<ModuleSettings>) -> Self {
        Self {
            ticket,
            module,
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of domain lookups served so far, failed ones included.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsStore for MockSettingsStore {
    async fn ticket_settings(&self) -> Result<TicketSettings, SettingsError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.ticket
            .clone()
            .ok_or_else(|| SettingsError::Unavailable("mock ticket settings disabled".into()))
    }

    async fn module_settings(&self) -> Result<ModuleSettings, SettingsError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.module
            .clone()
            .ok_or_else(|| SettingsError::Unavailable("mock module settings disabled".into()))
    }
}

#[async_trait]
impl<T: SettingsStore + ?Sized> SettingsStore for Arc<T> {
    async fn ticket_settings(&self) -> Result<TicketSettings, SettingsError> {
        (**self).ticket_settings().await
    }

    async fn module_settings(&self) -> Result<ModuleSettings, SettingsError> {
        (**self).module_settings().await
    }
}
