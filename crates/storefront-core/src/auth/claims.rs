//! Decoded access-token claims.
//!
//! Claims are decoded once, when a token is received, into an explicit
//! structure with named optional fields. The signature is not verified here:
//! tokens come straight from the identity provider and are only read for
//! display and role gating, while the backend does the actual validation.

use std::collections::BTreeSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::ClaimsError;

/// Display name used when a token carries no usable name
pub const DEFAULT_DISPLAY_NAME: &str = "User";

/// Remaining session time below which the session is "about to expire"
pub const EXPIRING_SOON_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Claims {
    pub subject: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub preferred_username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Login nonce echoed back by the provider
    pub nonce: Option<String>,
    pub roles: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<String>,
    exp: Option<i64>,
    preferred_username: Option<String>,
    name: Option<String>,
    email: Option<String>,
    nonce: Option<String>,
    realm_access: Option<RealmAccess>,
}

#[derive(Debug, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

impl Claims {
    /// Decode the payload segment of a JWT without verifying its signature.
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let mut parts = token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
            _ => return Err(ClaimsError::Malformed),
        };

        // Some issuers pad their segments even though JWT says not to
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        Self::from_json(&bytes)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ClaimsError> {
        let raw: RawClaims = serde_json::from_slice(bytes)?;
        Ok(Self::from(raw))
    }

    /// Best available name: preferred username, then name, then email.
    pub fn display_name(&self) -> &str {
        [&self.preferred_username, &self.name, &self.email]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Time left until expiry at `now`. Negative once expired.
    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.expires_at.map(|exp| exp - now)
    }

    /// Whole seconds left until expiry at `now`, the value shown to users.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_in(now).map(|d| d.num_seconds())
    }

    /// True if the token is expired or expires within `min_validity` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, min_validity: chrono::Duration) -> bool {
        match self.expires_in(now) {
            Some(remaining) => remaining < min_validity,
            // No expiry claim: the provider decides, so treat as stale
            None => true,
        }
    }
}

impl From<RawClaims> for Claims {
    fn from(raw: RawClaims) -> Self {
        Self {
            subject: raw.sub,
            expires_at: raw.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)),
            preferred_username: raw.preferred_username,
            name: raw.name,
            email: raw.email,
            nonce: raw.nonce,
            roles: raw
                .realm_access
                .map(|access| access.roles.into_iter().collect())
                .unwrap_or_default(),
        }
    }
}

/// Display name for a possibly-absent set of claims
pub fn display_name(claims: Option<&Claims>) -> &str {
    claims.map(Claims::display_name).unwrap_or(DEFAULT_DISPLAY_NAME)
}

/// Roles for a possibly-absent set of claims
pub fn roles(claims: Option<&Claims>) -> BTreeSet<String> {
    claims.map(|c| c.roles.clone()).unwrap_or_default()
}

/// Build an unsigned JWT around a JSON payload. Test helper.
#[cfg(test)]
pub(crate) fn unsigned_jwt(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.sig", header, body)
}
