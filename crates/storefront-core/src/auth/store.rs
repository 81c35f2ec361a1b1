use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::TokenStoreError;
use super::storage::KeyValueStorage;

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "kc_token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "kc_refreshToken";

/// The persisted half of a session. Always both tokens, never one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl StoredTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Token values stay out of logs and panic messages
impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Access/refresh token pair on top of a key-value storage.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Persist both tokens.
    ///
    /// The refresh token is written before the access token, and any failure
    /// removes both keys again, so `load` never sees half a pair.
    pub fn save(&self, tokens: &StoredTokens) -> Result<(), TokenStoreError> {
        let result = self
            .storage
            .set(REFRESH_TOKEN_KEY, &tokens.refresh_token)
            .and_then(|_| self.storage.set(ACCESS_TOKEN_KEY, &tokens.access_token));

        match result {
            Ok(()) => {
                debug!("Tokens persisted");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist tokens, session will not survive a restart");
                self.clear();
                Err(TokenStoreError::StorageUnavailable(e))
            }
        }
    }

    /// Load both tokens, or `NotFound` when either one is missing.
    pub fn load(&self) -> Result<StoredTokens, TokenStoreError> {
        let access = self.read(ACCESS_TOKEN_KEY);
        let refresh = self.read(REFRESH_TOKEN_KEY);

        match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => Ok(StoredTokens {
                access_token,
                refresh_token,
            }),
            (None, None) => Err(TokenStoreError::NotFound),
            _ => {
                debug!("Found only one of the token pair, ignoring it");
                Err(TokenStoreError::NotFound)
            }
        }
    }

    /// Remove both tokens. Best-effort: errors are logged, never returned.
    pub fn clear(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!(key, error = %e, "Failed to remove stored token");
            }
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read stored token");
                None
            }
        }
    }
}
