//! Authentication module for managing the user session and its tokens.
//!
//! This module provides:
//! - `TokenStore`: the persisted access/refresh token pair over a pluggable
//!   `KeyValueStorage` (JSON file, OS keychain, or memory)
//! - `Claims`: decoded token payload with display-name and role helpers
//! - `IdentityClient`: the identity provider seam, implemented for Keycloak
//!   by `KeycloakClient`
//! - `SessionManager`: restore-or-login on start, periodic refresh, expiry
//!   display, login/logout, forced refresh
//! - `SessionTimers`: the scoped timer tasks of an authenticated session
//! - `CallbackListener`: loopback receiver for the login redirect

pub mod callback;
pub mod claims;
pub mod error;
pub mod identity;
pub mod keycloak;
pub mod session;
pub mod storage;
pub mod store;
pub mod timers;

#[cfg(test)]
pub(crate) mod testing;

pub use callback::CallbackListener;
pub use claims::Claims;
pub use error::{ClaimsError, IdentityError, SessionError, StorageError, TokenStoreError};
pub use identity::{IdentityClient, InitOptions, Navigation, RefreshPolicy};
pub use keycloak::KeycloakClient;
pub use session::{RefreshOutcome, Session, SessionManager, SessionState, StartOutcome};
pub use storage::{FileStorage, KeyValueStorage, KeyringStorage, MemoryStorage, StorageBackend};
pub use store::{StoredTokens, TokenStore};
pub use timers::{SessionEvent, SessionTimers};
