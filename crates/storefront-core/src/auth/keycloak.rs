//! Keycloak implementation of [`IdentityClient`].
//!
//! Uses the realm's standard OpenID Connect endpoints: the token endpoint for
//! refresh and authorization-code grants, and the authorization/logout
//! endpoints for redirects. Logins use PKCE (S256).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use super::claims::Claims;
use super::error::IdentityError;
use super::identity::{IdentityClient, InitOptions, Navigation, RefreshPolicy};
use crate::config::IdentityConfig;

/// HTTP timeout for identity provider calls
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Length of the random `state` and `nonce` login parameters
const LOGIN_NONCE_LENGTH: usize = 32;

/// Length of the PKCE code verifier (43 to 128 characters allowed)
const CODE_VERIFIER_LENGTH: usize = 64;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
}

struct TokenSet {
    access_token: String,
    refresh_token: String,
    id_token: Option<String>,
    claims: Claims,
}

/// Secrets of the login redirect in flight, checked on the way back.
struct PendingLogin {
    state: String,
    nonce: String,
    code_verifier: String,
}

pub struct KeycloakClient {
    http: Client,
    config: IdentityConfig,
    tokens: RwLock<Option<TokenSet>>,
    pending_login: Mutex<Option<PendingLogin>>,
    // Bumped whenever the token set is replaced wholesale (init, logout);
    // a grant started under an older epoch must not install its tokens.
    epoch: AtomicU64,
}

impl KeycloakClient {
    pub fn new(config: IdentityConfig) -> Result<Self, IdentityError> {
        if config.realm.trim().is_empty() {
            return Err(IdentityError::Configuration("realm is empty".to_string()));
        }
        if config.client_id.trim().is_empty() {
            return Err(IdentityError::Configuration("client id is empty".to_string()));
        }
        Url::parse(&config.url)?;
        Url::parse(&config.redirect_uri)?;

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            config,
            tokens: RwLock::new(None),
            pending_login: Mutex::new(None),
            epoch: AtomicU64::new(0),
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url, IdentityError> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/{}",
            self.config.url.trim_end_matches('/'),
            self.config.realm,
            name
        );
        Ok(Url::parse(&url)?)
    }

    fn random_string(len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    /// S256 code challenge: base64url(sha256(verifier)) without padding
    fn code_challenge(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Replace the token set, and bump the epoch so in-flight grants are
    /// discarded. Returns the previous set.
    fn replace_tokens(&self, set: Option<TokenSet>) -> Option<TokenSet> {
        let mut tokens = self.tokens.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        std::mem::replace(&mut *tokens, set)
    }

    /// Install tokens from a grant started at `epoch`, unless the session
    /// was replaced or logged out meanwhile.
    fn install(
        &self,
        epoch: u64,
        body: TokenResponse,
        fallback_refresh: Option<&str>,
    ) -> Result<(), IdentityError> {
        let claims = Claims::decode(&body.access_token)?;
        // Providers may keep the refresh token and omit it from the response
        let refresh_token = body
            .refresh_token
            .or_else(|| fallback_refresh.map(str::to_string))
            .ok_or_else(|| IdentityError::InvalidResponse("no refresh token issued".to_string()))?;

        let mut tokens = self.tokens.write();
        if self.current_epoch() != epoch {
            debug!("Session changed during token request, discarding new tokens");
            return Err(IdentityError::NotAuthenticated);
        }
        let previous_id_token = tokens.take().and_then(|t| t.id_token);
        *tokens = Some(TokenSet {
            access_token: body.access_token,
            refresh_token,
            id_token: body.id_token.or(previous_id_token),
            claims,
        });
        Ok(())
    }

    /// POST a form to the token endpoint. `rejected` builds the error for a
    /// 400/401 answer.
    async fn token_request(
        &self,
        form: &[(&str, &str)],
        rejected: impl FnOnce(u16) -> IdentityError,
    ) -> Result<TokenResponse, IdentityError> {
        let response = self
            .http
            .post(self.endpoint("token")?)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(rejected(status.as_u16()));
        }
        if !status.is_success() {
            return Err(IdentityError::InvalidResponse(format!(
                "token endpoint returned {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))
    }

    /// Exchange a refresh token for a new token set and install it.
    async fn refresh_grant(&self, refresh_token: &str) -> Result<(), IdentityError> {
        let epoch = self.current_epoch();
        let body = self
            .token_request(
                &[
                    ("grant_type", "refresh_token"),
                    ("client_id", self.config.client_id.as_str()),
                    ("refresh_token", refresh_token),
                ],
                |status| IdentityError::RefreshRejected { status },
            )
            .await?;

        self.install(epoch, body, Some(refresh_token))?;
        debug!("Token refreshed");
        Ok(())
    }
}

#[async_trait]
impl IdentityClient for KeycloakClient {
    async fn init(&self, options: InitOptions) -> Result<bool, IdentityError> {
        let Some(stored) = options.tokens else {
            self.replace_tokens(None);
            return Ok(false);
        };

        let claims = match Claims::decode(&stored.access_token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Stored access token is unreadable");
                return Ok(false);
            }
        };

        let still_valid = !claims.expires_within(Utc::now(), chrono::Duration::zero());
        self.replace_tokens(Some(TokenSet {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token.clone(),
            id_token: None,
            claims,
        }));
        if still_valid {
            info!("Restored session from stored tokens");
            return Ok(true);
        }

        debug!("Stored access token expired, trying refresh token");
        match self.refresh_grant(&stored.refresh_token).await {
            Ok(()) => Ok(true),
            Err(IdentityError::RefreshRejected { status }) => {
                info!(status, "Stored refresh token rejected");
                self.replace_tokens(None);
                Ok(false)
            }
            Err(e) => {
                self.replace_tokens(None);
                Err(e)
            }
        }
    }

    async fn update_token(&self, policy: RefreshPolicy) -> Result<bool, IdentityError> {
        let (refresh_token, needs_refresh) = {
            let tokens = self.tokens.read();
            let set = tokens.as_ref().ok_or(IdentityError::NotAuthenticated)?;
            let needs_refresh = match policy {
                RefreshPolicy::Force => true,
                RefreshPolicy::MinValidity(window) => match chrono::Duration::from_std(window) {
                    Ok(window) => set.claims.expires_within(Utc::now(), window),
                    // Beyond chrono's range: no token is that fresh
                    Err(_) => true,
                },
            };
            (set.refresh_token.clone(), needs_refresh)
        };

        if !needs_refresh {
            return Ok(false);
        }
        self.refresh_grant(&refresh_token).await?;
        Ok(true)
    }

    async fn login(&self) -> Result<Navigation, IdentityError> {
        let pending = PendingLogin {
            state: Self::random_string(LOGIN_NONCE_LENGTH),
            nonce: Self::random_string(LOGIN_NONCE_LENGTH),
            code_verifier: Self::random_string(CODE_VERIFIER_LENGTH),
        };

        let mut url = self.endpoint("auth")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid")
            .append_pair("state", &pending.state)
            .append_pair("nonce", &pending.nonce)
            .append_pair("code_challenge", &Self::code_challenge(&pending.code_verifier))
            .append_pair("code_challenge_method", "S256");

        *self.pending_login.lock() = Some(pending);
        Ok(Navigation::Redirect(url))
    }

    async fn complete_login(&self, callback: &Url) -> Result<(), IdentityError> {
        // One attempt per login redirect
        let pending = self
            .pending_login
            .lock()
            .take()
            .ok_or_else(|| IdentityError::LoginFailed("no login in progress".to_string()))?;

        let params: HashMap<String, String> = callback.query_pairs().into_owned().collect();
        if let Some(error) = params.get("error") {
            let description = params
                .get("error_description")
                .map(String::as_str)
                .unwrap_or("");
            let reason = format!("{} {}", error, description);
            return Err(IdentityError::LoginFailed(reason.trim().to_string()));
        }
        if params.get("state") != Some(&pending.state) {
            return Err(IdentityError::LoginFailed("state mismatch".to_string()));
        }
        let code = params
            .get("code")
            .ok_or_else(|| IdentityError::LoginFailed("callback carries no code".to_string()))?;

        let epoch = self.current_epoch();
        let body = self
            .token_request(
                &[
                    ("grant_type", "authorization_code"),
                    ("client_id", self.config.client_id.as_str()),
                    ("code", code.as_str()),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("code_verifier", pending.code_verifier.as_str()),
                ],
                |status| {
                    IdentityError::LoginFailed(format!("code exchange rejected (status {})", status))
                },
            )
            .await?;

        if let Some(id_token) = &body.id_token {
            let id_claims = Claims::decode(id_token)?;
            if id_claims.nonce.as_deref() != Some(pending.nonce.as_str()) {
                return Err(IdentityError::LoginFailed("nonce mismatch".to_string()));
            }
        }

        self.install(epoch, body, None)?;
        info!("Interactive login completed");
        Ok(())
    }

    async fn logout(&self) -> Result<Navigation, IdentityError> {
        let id_token = self.replace_tokens(None).and_then(|t| t.id_token);
        self.pending_login.lock().take();

        let mut url = self.endpoint("logout")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("post_logout_redirect_uri", &self.config.redirect_uri);
            if let Some(ref hint) = id_token {
                query.append_pair("id_token_hint", hint);
            }
        }
        Ok(Navigation::Redirect(url))
    }

    fn token(&self) -> Option<String> {
        self.tokens.read().as_ref().map(|t| t.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens.read().as_ref().map(|t| t.refresh_token.clone())
    }

    fn token_parsed(&self) -> Option<Claims> {
        self.tokens.read().as_ref().map(|t| t.claims.clone())
    }
}
