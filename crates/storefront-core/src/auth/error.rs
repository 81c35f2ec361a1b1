use thiserror::Error;

/// Failure of the underlying key-value storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage is disabled")]
    Disabled,

    #[error("Storage quota exceeded ({used} of {capacity} bytes)")]
    QuotaExceeded { used: usize, capacity: usize },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),
}

#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("No stored session")]
    NotFound,

    #[error("Session storage unavailable - session will not survive a restart: {0}")]
    StorageUnavailable(#[source] StorageError),
}

#[derive(Error, Debug)]
pub enum ClaimsError {
    #[error("Token is not a three-part JWT")]
    Malformed,

    #[error("Token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors raised by an identity client.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Identity client misconfigured: {0}")]
    Configuration(String),

    #[error("Refresh token rejected by identity provider (status {status})")]
    RefreshRejected { status: u16 },

    #[error("No active session")]
    NotAuthenticated,

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Invalid identity provider response: {0}")]
    InvalidResponse(String),
}

impl From<url::ParseError> for IdentityError {
    fn from(err: url::ParseError) -> Self {
        IdentityError::Configuration(err.to_string())
    }
}

impl From<ClaimsError> for IdentityError {
    fn from(err: ClaimsError) -> Self {
        IdentityError::InvalidResponse(err.to_string())
    }
}

/// Fatal session start-up errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authentication could not be initialized: {0}")]
    AuthInit(#[source] IdentityError),

    #[error("Interactive login could not be completed: {0}")]
    Login(#[source] IdentityError),
}
