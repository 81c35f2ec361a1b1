//! The identity client capability consumed by the session manager.
//!
//! Token issuance, validation and rotation belong to the identity provider.
//! This trait is the seam: a provider adapter (see
//! [`KeycloakClient`](super::keycloak::KeycloakClient)) or a test fake sits
//! behind it.

use async_trait::async_trait;
use url::Url;

use super::claims::Claims;
use super::error::IdentityError;
use super::store::StoredTokens;

/// A browser-level navigation the owner must perform.
///
/// Login and logout leave the application: once a `Navigation` is returned,
/// the caller performs it and the flow resumes at a fresh start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Send the user agent to this URL
    Redirect(Url),
    /// Reload the application from scratch
    Reload,
}

/// How eagerly `update_token` should refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Refresh only if the access token expires within this window
    MinValidity(std::time::Duration),
    /// Refresh unconditionally
    Force,
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Previously issued tokens to restore instead of a fresh login
    pub tokens: Option<StoredTokens>,
}

impl InitOptions {
    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            tokens: Some(tokens),
        }
    }
}

#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Initialize the client. Returns whether a session is authenticated;
    /// expired or rejected tokens yield `Ok(false)`, not an error.
    async fn init(&self, options: InitOptions) -> Result<bool, IdentityError>;

    /// Refresh the access token according to `policy`.
    /// Returns `true` if new tokens were issued.
    async fn update_token(&self, policy: RefreshPolicy) -> Result<bool, IdentityError>;

    /// Build the interactive login redirect.
    async fn login(&self) -> Result<Navigation, IdentityError>;

    /// Finish the login started by [`login`](Self::login) from the URL the
    /// provider redirected back to. On success the client holds the new
    /// tokens.
    async fn complete_login(&self, callback: &Url) -> Result<(), IdentityError>;

    /// Forget the session and build the logout redirect.
    async fn logout(&self) -> Result<Navigation, IdentityError>;

    fn token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    fn token_parsed(&self) -> Option<Claims>;

    /// Current token pair, if the client holds both halves
    fn tokens(&self) -> Option<StoredTokens> {
        Some(StoredTokens::new(self.token()?, self.refresh_token()?))
    }
}
