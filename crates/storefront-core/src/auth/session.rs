//! Session lifecycle: restore or re-authenticate on start, periodic refresh,
//! expiry tracking, login, logout and forced refresh.
//!
//! One [`SessionManager`] exists per process. It is constructed at start-up,
//! shared by `Arc`, and is the only writer of the [`Session`]; consumers get
//! clones.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use super::claims::{self, Claims};
use super::error::{IdentityError, SessionError, TokenStoreError};
use super::identity::{IdentityClient, InitOptions, Navigation, RefreshPolicy};
use super::store::{StoredTokens, TokenStore};
use super::timers::SessionTimers;
use crate::api::TokenProvider;
use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Restoring,
    Authenticated,
    RefreshPending,
    Unauthenticated,
}

/// The in-memory session. Empty until a restore or login succeeds.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub claims: Option<Claims>,
    pub authenticated: bool,
}

impl Session {
    fn from_identity(identity: &dyn IdentityClient) -> Self {
        Self {
            access_token: identity.token(),
            refresh_token: identity.refresh_token(),
            claims: identity.token_parsed(),
            authenticated: true,
        }
    }

    /// The persistable token pair, if both halves are present
    pub fn tokens(&self) -> Option<StoredTokens> {
        Some(StoredTokens::new(
            self.access_token.clone()?,
            self.refresh_token.clone()?,
        ))
    }

    pub fn display_name(&self) -> &str {
        claims::display_name(self.claims.as_ref())
    }

    pub fn roles(&self) -> BTreeSet<String> {
        claims::roles(self.claims.as_ref())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.claims.as_ref().map(|c| c.has_role(role)).unwrap_or(false)
    }

    /// Seconds until the access token expires, `exp*1000 - now` in seconds
    pub fn seconds_remaining(&self) -> Option<i64> {
        self.claims.as_ref()?.seconds_remaining(Utc::now())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("claims", &self.claims)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Result of [`SessionManager::start`].
#[derive(Debug)]
pub enum StartOutcome {
    /// The stored session was restored. The timers run until the guard is
    /// dropped; `persisted` is false when storage refused the tokens and the
    /// session only lives in memory.
    Authenticated {
        timers: SessionTimers,
        persisted: bool,
    },
    /// Interactive login is required; perform this navigation and stop.
    Redirect(Navigation),
}

/// Result of one refresh-loop tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New tokens were issued and persisted
    Refreshed,
    /// Token still valid for the requested window
    StillValid,
    /// No authenticated session to refresh
    Skipped,
    /// Refresh failed; the session was logged out
    LoggedOut(Navigation),
}

struct Inner {
    state: SessionState,
    session: Session,
    persisted: bool,
    // Bumped on every reset; token requests started under an older
    // generation must not bring the session back
    generation: u64,
}

pub struct SessionManager {
    identity: Option<Arc<dyn IdentityClient>>,
    store: TokenStore,
    config: SessionConfig,
    inner: Mutex<Inner>,
    // Serializes every token refresh path so there is one writer at a time
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// `identity` is `None` when the identity client could not be created;
    /// the manager then degrades to page reloads for login and logout.
    pub fn new(
        identity: Option<Arc<dyn IdentityClient>>,
        store: TokenStore,
        config: SessionConfig,
    ) -> Self {
        Self {
            identity,
            store,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                session: Session::default(),
                persisted: false,
                generation: 0,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ===== Start-up =====

    /// Restore the stored session, or fall back to interactive login.
    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome, SessionError> {
        let identity = self.identity.clone().ok_or_else(|| {
            SessionError::AuthInit(IdentityError::Configuration(
                "no identity client available".to_string(),
            ))
        })?;

        self.set_state(SessionState::Restoring);
        let generation = self.generation();

        match self.store.load() {
            Ok(tokens) => {
                info!("Stored tokens found, attempting restore");
                match identity.init(InitOptions::with_tokens(tokens)).await {
                    Ok(true) => {
                        if let Some(persisted) = self.adopt_tokens(identity.as_ref(), generation) {
                            self.log_expiry();
                            let timers = SessionTimers::spawn(self.clone());
                            return Ok(StartOutcome::Authenticated { timers, persisted });
                        }
                    }
                    Ok(false) => info!("Stored tokens are invalid or expired"),
                    Err(e) => warn!(error = %e, "Restoring stored session failed"),
                }
                self.store.clear();
            }
            Err(TokenStoreError::NotFound) => debug!("No stored session"),
            Err(e) => warn!(error = %e, "Could not read stored session"),
        }

        self.reset(SessionState::Unauthenticated);
        info!("Interactive login required");
        let navigation = identity.login().await.map_err(|e| {
            error!(error = %e, "Could not start interactive login");
            SessionError::AuthInit(e)
        })?;
        Ok(StartOutcome::Redirect(navigation))
    }

    /// Finish an interactive login from the provider's callback URL, persist
    /// the new tokens and start the session timers.
    pub async fn complete_login(self: &Arc<Self>, callback: &Url) -> Result<StartOutcome, SessionError> {
        let identity = self.identity.clone().ok_or_else(|| {
            SessionError::Login(IdentityError::Configuration(
                "no identity client available".to_string(),
            ))
        })?;

        let _guard = self.refresh_lock.lock().await;
        let generation = self.generation();

        if let Err(e) = identity.complete_login(callback).await {
            warn!(error = %e, "Interactive login failed");
            self.reset(SessionState::Unauthenticated);
            return Err(SessionError::Login(e));
        }

        let persisted = self
            .adopt_tokens(identity.as_ref(), generation)
            .ok_or(SessionError::Login(IdentityError::NotAuthenticated))?;
        info!(user = %self.display_name(), "Logged in");
        let timers = SessionTimers::spawn(self.clone());
        Ok(StartOutcome::Authenticated { timers, persisted })
    }

    // ===== Refresh =====

    /// One refresh-loop tick: refresh if the token expires within the
    /// configured window. A failure is not retried and logs the session out.
    /// A session that was logged out while the refresh was in flight stays
    /// logged out.
    pub async fn refresh_tick(&self) -> RefreshOutcome {
        let _guard = self.refresh_lock.lock().await;

        let Some(identity) = self.identity.clone() else {
            return RefreshOutcome::Skipped;
        };
        let generation = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Authenticated {
                return RefreshOutcome::Skipped;
            }
            inner.state = SessionState::RefreshPending;
            inner.generation
        };

        let policy = RefreshPolicy::MinValidity(self.config.min_validity());
        match identity.update_token(policy).await {
            Ok(true) => match self.adopt_tokens(identity.as_ref(), generation) {
                Some(_) => {
                    info!("Token refreshed");
                    RefreshOutcome::Refreshed
                }
                None => RefreshOutcome::Skipped,
            },
            Ok(false) => {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    return RefreshOutcome::Skipped;
                }
                inner.state = SessionState::Authenticated;
                RefreshOutcome::StillValid
            }
            Err(_) if self.generation() != generation => RefreshOutcome::Skipped,
            Err(e) => {
                error!(error = %e, "Token refresh failed, logging out");
                RefreshOutcome::LoggedOut(self.logout().await)
            }
        }
    }

    /// Refresh unconditionally ("silent login").
    ///
    /// Returns `Reload` after new tokens were persisted, the logout navigation
    /// if the refresh failed, or `None` if nothing changed.
    pub async fn force_refresh(&self) -> Option<Navigation> {
        let identity = self.identity.clone()?;
        let _guard = self.refresh_lock.lock().await;
        if !self.is_authenticated() {
            return None;
        }
        let generation = self.generation();

        match identity.update_token(RefreshPolicy::Force).await {
            Ok(true) => {
                self.adopt_tokens(identity.as_ref(), generation)?;
                info!("Silent login succeeded");
                Some(Navigation::Reload)
            }
            Ok(false) => None,
            Err(_) if self.generation() != generation => None,
            Err(e) => {
                warn!(error = %e, "Silent login failed, logging out");
                Some(self.logout().await)
            }
        }
    }

    // ===== Login / logout =====

    pub async fn login(&self) -> Result<Navigation, IdentityError> {
        match &self.identity {
            Some(identity) => identity.login().await,
            None => Ok(Navigation::Reload),
        }
    }

    /// Clear stored tokens and the in-memory session, then leave through the
    /// identity provider. Safe to call repeatedly, and final for any refresh
    /// still in flight.
    pub async fn logout(&self) -> Navigation {
        info!("Logging out");
        {
            let mut inner = self.inner.lock();
            // Storage first: a crash below must not leave tokens behind
            self.store.clear();
            inner.reset(SessionState::Unauthenticated);
        }

        match &self.identity {
            Some(identity) => identity.logout().await.unwrap_or_else(|e| {
                warn!(error = %e, "Identity provider logout failed, reloading instead");
                Navigation::Reload
            }),
            None => Navigation::Reload,
        }
    }

    // ===== Queries =====

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().session.authenticated
    }

    /// Whether the current tokens made it into persistent storage
    pub fn is_persisted(&self) -> bool {
        self.inner.lock().persisted
    }

    pub fn session(&self) -> Session {
        self.inner.lock().session.clone()
    }

    pub fn current_token(&self) -> Option<String> {
        self.inner.lock().session.access_token.clone()
    }

    pub fn claims(&self) -> Option<Claims> {
        self.inner.lock().session.claims.clone()
    }

    pub fn display_name(&self) -> String {
        self.inner.lock().session.display_name().to_string()
    }

    pub fn roles(&self) -> BTreeSet<String> {
        self.inner.lock().session.roles()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.inner.lock().session.has_role(role)
    }

    /// Seconds left in the session, for display only
    pub fn session_time(&self) -> Option<i64> {
        self.inner.lock().session.seconds_remaining()
    }

    // ===== Internals =====

    fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    fn set_state(&self, state: SessionState) {
        let mut inner = self.inner.lock();
        if inner.state != state {
            debug!(from = ?inner.state, to = ?state, "Session state change");
            inner.state = state;
        }
    }

    fn reset(&self, state: SessionState) {
        self.inner.lock().reset(state);
    }

    /// Take over the identity client's current tokens and persist them,
    /// unless the session was reset since `generation` was read.
    /// Returns whether persistence succeeded, or `None` for a stale session.
    fn adopt_tokens(&self, identity: &dyn IdentityClient, generation: u64) -> Option<bool> {
        let session = Session::from_identity(identity);

        // Held across the save; logout clears storage under the same lock
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!("Session was reset during token request, discarding tokens");
            return None;
        }

        let persisted = match session.tokens() {
            Some(tokens) => match self.store.save(&tokens) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Session will only last for this run");
                    false
                }
            },
            None => {
                warn!("Identity client returned an incomplete token pair, not persisting");
                false
            }
        };

        inner.session = session;
        inner.persisted = persisted;
        inner.state = SessionState::Authenticated;
        Some(persisted)
    }

    fn log_expiry(&self) {
        if let Some(expires_in) = self.session_time() {
            info!(expires_in, "Session restored");
        }
    }
}

impl Inner {
    /// Drop the session and start a new generation
    fn reset(&mut self, state: SessionState) {
        self.session = Session::default();
        self.persisted = false;
        self.state = state;
        self.generation += 1;
    }
}

#[async_trait]
impl TokenProvider for SessionManager {
    /// Current access token, refreshed first if it is about to expire.
    /// A failed refresh here is only logged; the request then runs with the
    /// current token and a 401 drives the logout.
    async fn access_token(&self) -> Option<String> {
        if let Some(identity) = self.identity.clone() {
            let _guard = self.refresh_lock.lock().await;
            if !self.is_authenticated() {
                return None;
            }
            let generation = self.generation();
            let policy = RefreshPolicy::MinValidity(self.config.request_min_validity());
            match identity.update_token(policy).await {
                Ok(true) => {
                    self.adopt_tokens(identity.as_ref(), generation)?;
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Pre-request token refresh failed"),
            }
        }
        self.current_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{KeyValueStorage, MemoryStorage};
    use crate::auth::store::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::auth::testing::FakeIdentity;
    use crate::auth::timers::SessionEvent;
    use std::time::Duration;

    struct Fixture {
        manager: Arc<SessionManager>,
        identity: Arc<FakeIdentity>,
        storage: Arc<MemoryStorage>,
    }

    fn fixture(identity: FakeIdentity, storage: MemoryStorage) -> Fixture {
        let identity = Arc::new(identity);
        let storage = Arc::new(storage);
        let manager = Arc::new(SessionManager::new(
            Some(identity.clone()),
            TokenStore::new(storage.clone()),
            SessionConfig::default(),
        ));
        Fixture {
            manager,
            identity,
            storage,
        }
    }

    fn with_stored_tokens() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.set(ACCESS_TOKEN_KEY, "a").unwrap();
        storage.set(REFRESH_TOKEN_KEY, "r").unwrap();
        storage
    }

    fn stored(storage: &Arc<MemoryStorage>) -> Option<StoredTokens> {
        TokenStore::new(storage.clone()).load().ok()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_restores_valid_stored_tokens() {
        let f = fixture(FakeIdentity::new(), with_stored_tokens());

        let outcome = f.manager.start().await.unwrap();
        let StartOutcome::Authenticated { persisted, .. } = outcome else {
            panic!("expected an authenticated start");
        };

        assert!(persisted);
        assert_eq!(f.manager.state(), SessionState::Authenticated);
        assert_eq!(f.identity.calls().init, 1);
        assert_eq!(f.identity.calls().login, 0);
        // Rotated tokens were written back
        assert_eq!(
            stored(&f.storage),
            Some(StoredTokens::new("access-1", "refresh-1"))
        );
        assert_eq!(f.manager.display_name(), "alice");
        assert!(f.manager.session_time().unwrap() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_rejected_tokens_clears_and_redirects_once() {
        let f = fixture(FakeIdentity::new().restoring(false), with_stored_tokens());

        let outcome = f.manager.start().await.unwrap();

        assert!(matches!(outcome, StartOutcome::Redirect(Navigation::Redirect(_))));
        assert!(f.storage.is_empty());
        assert_eq!(f.identity.calls().login, 1);
        assert_eq!(f.manager.state(), SessionState::Unauthenticated);
        assert!(!f.manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_restore_error_behaves_like_rejection() {
        let f = fixture(FakeIdentity::new().failing_init(), with_stored_tokens());

        let outcome = f.manager.start().await.unwrap();

        assert!(matches!(outcome, StartOutcome::Redirect(_)));
        assert!(f.storage.is_empty());
        assert_eq!(f.identity.calls().login, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_tokens_skips_restore() {
        let f = fixture(FakeIdentity::new(), MemoryStorage::new());

        let outcome = f.manager.start().await.unwrap();

        assert!(matches!(outcome, StartOutcome::Redirect(_)));
        assert_eq!(f.identity.calls().init, 0);
        assert_eq!(f.identity.calls().login, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_login_failure_is_fatal() {
        let f = fixture(FakeIdentity::new().failing_login(), MemoryStorage::new());

        let result = f.manager.start().await;
        assert!(matches!(result, Err(SessionError::AuthInit(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_full_storage_keeps_in_memory_session() {
        // Fits the initial "a"/"r" pair (25 bytes) but not the rotated pair
        let storage = MemoryStorage::with_capacity(30);
        storage.set(ACCESS_TOKEN_KEY, "a").unwrap();
        storage.set(REFRESH_TOKEN_KEY, "r").unwrap();
        let f = fixture(FakeIdentity::new(), storage);

        let outcome = f.manager.start().await.unwrap();

        assert!(matches!(
            outcome,
            StartOutcome::Authenticated { persisted: false, .. }
        ));
        assert!(f.manager.is_authenticated());
        assert!(!f.manager.is_persisted());
        assert_eq!(f.manager.current_token().as_deref(), Some("access-1"));
        assert!(stored(&f.storage).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_identity_client() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = Arc::new(SessionManager::new(
            None,
            TokenStore::new(storage),
            SessionConfig::default(),
        ));

        assert!(matches!(
            manager.start().await,
            Err(SessionError::AuthInit(_))
        ));
        assert_eq!(manager.login().await.unwrap(), Navigation::Reload);
        assert_eq!(manager.logout().await, Navigation::Reload);
        assert_eq!(manager.force_refresh().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_ticks_until_first_failure() {
        let identity = FakeIdentity::new().with_refreshes(vec![
            Ok(true),
            Ok(false),
            Ok(true),
            Ok(true),
            Err(()),
            Ok(true),
        ]);
        let f = fixture(identity, with_stored_tokens());
        let StartOutcome::Authenticated { timers, .. } = f.manager.start().await.unwrap() else {
            panic!("expected an authenticated start");
        };
        // Drive ticks by hand
        drop(timers);

        let mut last_exp = f.manager.claims().unwrap().expires_at.unwrap();
        for _ in 0..4 {
            let outcome = f.manager.refresh_tick().await;
            assert!(matches!(
                outcome,
                RefreshOutcome::Refreshed | RefreshOutcome::StillValid
            ));
            assert_eq!(f.manager.state(), SessionState::Authenticated);
            let exp = f.manager.claims().unwrap().expires_at.unwrap();
            assert!(exp >= last_exp);
            last_exp = exp;
            assert_eq!(stored(&f.storage), f.manager.session().tokens());
        }

        let outcome = f.manager.refresh_tick().await;
        assert!(matches!(outcome, RefreshOutcome::LoggedOut(Navigation::Redirect(_))));
        assert_eq!(f.manager.state(), SessionState::Unauthenticated);
        assert!(f.storage.is_empty());
        assert!(f.manager.claims().is_none());
        assert_eq!(f.identity.calls().logout, 1);

        // No retry: further ticks do nothing
        assert_eq!(f.manager.refresh_tick().await, RefreshOutcome::Skipped);
        assert_eq!(f.identity.calls().update, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_twice_is_harmless() {
        let f = fixture(FakeIdentity::new(), with_stored_tokens());
        let _outcome = f.manager.start().await.unwrap();

        let first = f.manager.logout().await;
        assert!(matches!(first, Navigation::Redirect(_)));
        assert!(f.storage.is_empty());

        let second = f.manager.logout().await;
        assert!(matches!(second, Navigation::Redirect(_)));
        assert!(f.storage.is_empty());
        assert_eq!(f.manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_success_reloads() {
        let f = fixture(
            FakeIdentity::new().with_refreshes(vec![Ok(true)]),
            with_stored_tokens(),
        );
        let _outcome = f.manager.start().await.unwrap();

        assert_eq!(f.manager.force_refresh().await, Some(Navigation::Reload));
        assert_eq!(
            stored(&f.storage),
            Some(StoredTokens::new("access-2", "refresh-2"))
        );
        assert_eq!(f.identity.last_policy(), Some(RefreshPolicy::Force));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_failure_logs_out_without_retry() {
        let f = fixture(
            FakeIdentity::new().with_refreshes(vec![Err(()), Ok(true)]),
            with_stored_tokens(),
        );
        let _outcome = f.manager.start().await.unwrap();

        let navigation = f.manager.force_refresh().await;
        assert!(matches!(navigation, Some(Navigation::Redirect(_))));
        assert!(f.storage.is_empty());
        assert_eq!(f.identity.calls().update, 1);
        assert_eq!(f.identity.calls().logout, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_session_degrades_to_defaults() {
        let f = fixture(FakeIdentity::new(), MemoryStorage::new());
        assert_eq!(f.manager.state(), SessionState::Uninitialized);
        assert_eq!(f.manager.display_name(), claims::DEFAULT_DISPLAY_NAME);
        assert!(f.manager.roles().is_empty());
        assert!(!f.manager.has_role("ADMIN"));
        assert_eq!(f.manager.session_time(), None);
        assert_eq!(f.manager.access_token().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_token_refreshes_before_request() {
        let f = fixture(
            FakeIdentity::new().with_refreshes(vec![Ok(true), Err(())]),
            with_stored_tokens(),
        );
        let _outcome = f.manager.start().await.unwrap();

        assert_eq!(f.manager.access_token().await.as_deref(), Some("access-2"));
        assert_eq!(
            f.identity.last_policy(),
            Some(RefreshPolicy::MinValidity(Duration::from_secs(30)))
        );

        // A failed pre-request refresh keeps the session and its token
        assert_eq!(f.manager.access_token().await.as_deref(), Some("access-2"));
        assert!(f.manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_refresh_every_interval_until_dropped() {
        let f = fixture(
            FakeIdentity::new().with_refreshes(vec![Ok(true), Ok(true), Ok(true)]),
            with_stored_tokens(),
        );
        let StartOutcome::Authenticated { mut timers, .. } = f.manager.start().await.unwrap()
        else {
            panic!("expected an authenticated start");
        };

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(f.identity.calls().update, 1);
        assert_eq!(
            f.identity.last_policy(),
            Some(RefreshPolicy::MinValidity(Duration::from_secs(70)))
        );

        let events = timers.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Refreshed { .. })));
        // Six display ticks in the first minute
        let display_ticks = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::SessionTime(_)))
            .count();
        assert_eq!(display_ticks, 6);

        drop(timers);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(f.identity.calls().update, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_report_logout_on_refresh_failure() {
        let f = fixture(
            FakeIdentity::new().with_refreshes(vec![Err(())]),
            with_stored_tokens(),
        );
        let StartOutcome::Authenticated { mut timers, .. } = f.manager.start().await.unwrap()
        else {
            panic!("expected an authenticated start");
        };

        let navigation = loop {
            match timers.next_event().await {
                Some(SessionEvent::LoggedOut(navigation)) => break navigation,
                Some(_) => continue,
                None => panic!("timers stopped without a logout event"),
            }
        };

        assert!(matches!(navigation, Navigation::Redirect(_)));
        assert!(f.storage.is_empty());
        assert!(timers.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_loop_warns_when_expiring_soon() {
        let f = fixture(FakeIdentity::new().lifetime_secs(45), with_stored_tokens());
        let StartOutcome::Authenticated { mut timers, .. } = f.manager.start().await.unwrap()
        else {
            panic!("expected an authenticated start");
        };

        tokio::time::sleep(Duration::from_secs(11)).await;
        let events = timers.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::ExpiringSoon(secs) if *secs < 60)));
        // Display ticks never touch auth state
        assert_eq!(f.manager.state(), SessionState::Authenticated);
        assert_eq!(f.identity.calls().update, 0);
    }

    fn login_callback(query: &str) -> Url {
        Url::parse(&format!("http://localhost:3000/?{}", query)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_refresh_tick_stays_logged_out() {
        let f = fixture(
            FakeIdentity::new()
                .slow_refresh(Duration::from_secs(1))
                .with_refreshes(vec![Ok(true)]),
            with_stored_tokens(),
        );
        let StartOutcome::Authenticated { timers, .. } = f.manager.start().await.unwrap() else {
            panic!("expected an authenticated start");
        };
        drop(timers);

        let manager = f.manager.clone();
        let tick = tokio::spawn(async move { manager.refresh_tick().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.manager.state(), SessionState::RefreshPending);
        f.manager.logout().await;

        assert_eq!(tick.await.unwrap(), RefreshOutcome::Skipped);
        assert_eq!(f.manager.state(), SessionState::Unauthenticated);
        assert!(!f.manager.is_authenticated());
        assert!(f.storage.is_empty(), "logout was undone by in-flight refresh");
        assert_eq!(f.manager.current_token(), None);
        assert_eq!(f.identity.calls().logout, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_pre_request_refresh_yields_no_token() {
        let f = fixture(
            FakeIdentity::new()
                .slow_refresh(Duration::from_secs(1))
                .with_refreshes(vec![Ok(true)]),
            with_stored_tokens(),
        );
        let StartOutcome::Authenticated { timers, .. } = f.manager.start().await.unwrap() else {
            panic!("expected an authenticated start");
        };
        drop(timers);

        let manager = f.manager.clone();
        let request = tokio::spawn(async move { manager.access_token().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        f.manager.logout().await;

        assert_eq!(request.await.unwrap(), None);
        assert!(f.storage.is_empty());
        assert!(!f.manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_login_persists_new_session() {
        let f = fixture(FakeIdentity::new(), MemoryStorage::new());
        assert!(matches!(f.manager.start().await.unwrap(), StartOutcome::Redirect(_)));

        let outcome = f
            .manager
            .complete_login(&login_callback("state=s&code=c"))
            .await
            .unwrap();
        let StartOutcome::Authenticated { timers, persisted } = outcome else {
            panic!("expected an authenticated session");
        };
        drop(timers);

        assert!(persisted);
        assert_eq!(f.manager.state(), SessionState::Authenticated);
        assert_eq!(f.manager.display_name(), "alice");
        assert_eq!(
            stored(&f.storage),
            Some(StoredTokens::new("access-1", "refresh-1"))
        );
        assert_eq!(f.identity.calls().complete_login, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_login_rejection_leaves_nothing_behind() {
        let f = fixture(FakeIdentity::new().rejecting_callback(), MemoryStorage::new());
        let _outcome = f.manager.start().await.unwrap();

        let result = f
            .manager
            .complete_login(&login_callback("state=s&code=c"))
            .await;

        assert!(matches!(result, Err(SessionError::Login(_))));
        assert!(f.storage.is_empty());
        assert_eq!(f.manager.state(), SessionState::Unauthenticated);
        assert!(!f.manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_do_not_stop_the_timers() {
        let identity = Arc::new(FakeIdentity::new().with_refreshes(vec![Ok(true)]));
        let storage = Arc::new(with_stored_tokens());
        let manager = Arc::new(SessionManager::new(
            Some(identity.clone()),
            TokenStore::new(storage),
            SessionConfig {
                refresh_interval_secs: 0,
                display_interval_secs: 0,
                ..SessionConfig::default()
            },
        ));
        let StartOutcome::Authenticated { mut timers, .. } = manager.start().await.unwrap() else {
            panic!("expected an authenticated start");
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(identity.calls().update, 1);
        assert!(timers
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionTime(_))));
        assert!(!timers.is_cancelled());
    }
}
