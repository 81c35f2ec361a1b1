use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Session expired")]
    SessionExpired,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Server unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::SessionExpired,
            403 => ApiError::Forbidden(truncated),
            code => ApiError::RequestFailed {
                status: code,
                body: truncated,
            },
        }
    }

    /// Classify a transport error: no response means the server is unreachable
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ApiError::InvalidResponse(err.to_string());
        }
        match err.status() {
            Some(status) => ApiError::from_status(status, ""),
            None => ApiError::Unreachable(err),
        }
    }

    /// Message shown inline in the catalog view
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "Not signed in.",
            ApiError::SessionExpired => "Session expired. Redirecting...",
            ApiError::Forbidden(_) => "Access denied. You do not have the required permissions.",
            ApiError::Unreachable(_) => {
                "Unable to reach the server. Check that the API gateway is running."
            }
            ApiError::RequestFailed { .. } | ApiError::InvalidResponse(_) => {
                "Error while loading products."
            }
        }
    }

    /// Whether offering a manual "Retry" makes sense
    pub fn can_retry(&self) -> bool {
        matches!(
            self,
            ApiError::Unreachable(_) | ApiError::RequestFailed { .. } | ApiError::InvalidResponse(_)
        )
    }

    /// Whether the session must be ended after showing the message
    pub fn requires_logout(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
    }
}
