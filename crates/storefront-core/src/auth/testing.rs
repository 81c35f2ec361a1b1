//! Scriptable in-process identity client for tests.

use std::collections::VecDeque;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use url::Url;

use super::claims::Claims;
use super::error::IdentityError;
use super::identity::{IdentityClient, InitOptions, Navigation, RefreshPolicy};
use super::store::StoredTokens;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub init: usize,
    pub update: usize,
    pub login: usize,
    pub complete_login: usize,
    pub logout: usize,
}

struct State {
    restore: Result<bool, ()>,
    login_fails: bool,
    login_completes: bool,
    refresh_delay: Option<StdDuration>,
    refreshes: VecDeque<Result<bool, ()>>,
    lifetime_secs: i64,
    generation: u32,
    tokens: Option<StoredTokens>,
    claims: Option<Claims>,
    last_policy: Option<RefreshPolicy>,
    calls: Calls,
}

/// Issues `access-N`/`refresh-N` tokens for user `alice` (role `CLIENT`),
/// each generation expiring `lifetime_secs` after issue.
pub struct FakeIdentity {
    state: Mutex<State>,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                restore: Ok(true),
                login_fails: false,
                login_completes: true,
                refresh_delay: None,
                refreshes: VecDeque::new(),
                lifetime_secs: 300,
                generation: 0,
                tokens: None,
                claims: None,
                last_policy: None,
                calls: Calls::default(),
            }),
        }
    }

    /// Result of restoring stored tokens
    pub fn restoring(self, restored: bool) -> Self {
        self.state.lock().restore = Ok(restored);
        self
    }

    pub fn failing_init(self) -> Self {
        self.state.lock().restore = Err(());
        self
    }

    pub fn failing_login(self) -> Self {
        self.state.lock().login_fails = true;
        self
    }

    /// `complete_login` rejects every callback
    pub fn rejecting_callback(self) -> Self {
        self.state.lock().login_completes = false;
        self
    }

    /// Each `update_token` call waits this long before answering, like a
    /// slow token endpoint
    pub fn slow_refresh(self, delay: StdDuration) -> Self {
        self.state.lock().refresh_delay = Some(delay);
        self
    }

    /// Scripted `update_token` results; `Ok(false)` once exhausted
    pub fn with_refreshes(self, results: Vec<Result<bool, ()>>) -> Self {
        self.state.lock().refreshes = results.into();
        self
    }

    pub fn lifetime_secs(self, secs: i64) -> Self {
        self.state.lock().lifetime_secs = secs;
        self
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().calls
    }

    pub fn last_policy(&self) -> Option<RefreshPolicy> {
        self.state.lock().last_policy
    }
}

impl State {
    fn issue(&mut self) {
        self.generation += 1;
        self.tokens = Some(StoredTokens::new(
            format!("access-{}", self.generation),
            format!("refresh-{}", self.generation),
        ));
        self.claims = Some(Claims {
            subject: Some("42".to_string()),
            expires_at: Some(Utc::now() + Duration::seconds(self.lifetime_secs)),
            preferred_username: Some("alice".to_string()),
            roles: ["CLIENT".to_string()].into_iter().collect(),
            ..Claims::default()
        });
    }

    fn forget(&mut self) {
        self.tokens = None;
        self.claims = None;
    }
}

fn url(s: &str) -> Url {
    Url::parse(s).expect("static test URL")
}

#[async_trait]
impl IdentityClient for FakeIdentity {
    async fn init(&self, options: InitOptions) -> Result<bool, IdentityError> {
        let mut state = self.state.lock();
        state.calls.init += 1;
        match (options.tokens, state.restore) {
            (Some(_), Ok(true)) => {
                state.issue();
                Ok(true)
            }
            (_, Err(())) => Err(IdentityError::InvalidResponse("init failed".to_string())),
            _ => {
                state.forget();
                Ok(false)
            }
        }
    }

    async fn update_token(&self, policy: RefreshPolicy) -> Result<bool, IdentityError> {
        let (result, delay) = {
            let mut state = self.state.lock();
            state.calls.update += 1;
            state.last_policy = Some(policy);
            if state.tokens.is_none() {
                return Err(IdentityError::NotAuthenticated);
            }
            let result = state.refreshes.pop_front().unwrap_or(Ok(false));
            (result, state.refresh_delay)
        };

        // The request is already on the wire: issue regardless of a logout
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match result {
            Ok(true) => {
                self.state.lock().issue();
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(()) => Err(IdentityError::RefreshRejected { status: 400 }),
        }
    }

    async fn login(&self) -> Result<Navigation, IdentityError> {
        let mut state = self.state.lock();
        state.calls.login += 1;
        if state.login_fails {
            return Err(IdentityError::Configuration("bad realm".to_string()));
        }
        Ok(Navigation::Redirect(url("https://id.example/login")))
    }

    async fn complete_login(&self, callback: &Url) -> Result<(), IdentityError> {
        let mut state = self.state.lock();
        state.calls.complete_login += 1;
        let has_code = callback.query_pairs().any(|(k, _)| k == "code");
        if !state.login_completes || !has_code {
            return Err(IdentityError::LoginFailed("callback rejected".to_string()));
        }
        state.issue();
        Ok(())
    }

    async fn logout(&self) -> Result<Navigation, IdentityError> {
        let mut state = self.state.lock();
        state.calls.logout += 1;
        state.forget();
        Ok(Navigation::Redirect(url("https://id.example/logout")))
    }

    fn token(&self) -> Option<String> {
        self.state.lock().tokens.as_ref().map(|t| t.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.state.lock().tokens.as_ref().map(|t| t.refresh_token.clone())
    }

    fn token_parsed(&self) -> Option<Claims> {
        self.state.lock().claims.clone()
    }
}
