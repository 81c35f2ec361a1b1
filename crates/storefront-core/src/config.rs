//! Application configuration management.
//!
//! Configuration is read from `~/.config/storefront/config.json` when present,
//! falls back to defaults for the local development stack otherwise, and is
//! then overridden by `STOREFRONT_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::StorageBackend;

/// Application name used for config/data directory paths
const APP_NAME: &str = "storefront";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Upper bound for timer periods and validity windows (one day)
const MAX_SESSION_SECS: u64 = 86_400;

/// Upper bound for the delayed logout
const MAX_LOGOUT_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity provider base URL
    pub url: String,
    pub realm: String,
    pub client_id: String,
    /// Where the provider sends the user back after login/logout
    pub redirect_uri: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            realm: "devsecops-realm".to_string(),
            client_id: "ecom-frontend".to_string(),
            redirect_uri: "http://localhost:3000/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API gateway base URL
    pub gateway_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:8888".to_string(),
            timeout_secs: 10,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 || self.timeout_secs > MAX_SESSION_SECS {
            anyhow::bail!(
                "api.timeout_secs must be between 1 and {}, got {}",
                MAX_SESSION_SECS,
                self.timeout_secs
            );
        }
        Ok(())
    }
}

/// Session timer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often the refresh loop runs
    pub refresh_interval_secs: u64,
    /// Refresh when the access token expires within this window
    pub min_validity_secs: u64,
    /// Validity window requested right before each API call
    pub request_min_validity_secs: u64,
    /// How often the remaining session time is recomputed
    pub display_interval_secs: u64,
    /// Delay between a "session expired" message and the logout redirect
    pub logout_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            min_validity_secs: 70,
            request_min_validity_secs: 30,
            display_interval_secs: 10,
            logout_delay_ms: 2000,
        }
    }
}

impl SessionConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn min_validity(&self) -> Duration {
        Duration::from_secs(self.min_validity_secs)
    }

    pub fn request_min_validity(&self) -> Duration {
        Duration::from_secs(self.request_min_validity_secs)
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_secs(self.display_interval_secs)
    }

    pub fn logout_delay(&self) -> Duration {
        Duration::from_millis(self.logout_delay_ms)
    }

    /// Timer periods must be non-zero; every window is capped at one day.
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("display_interval_secs", self.display_interval_secs),
        ];
        for (name, value) in periods {
            if value == 0 || value > MAX_SESSION_SECS {
                anyhow::bail!(
                    "session.{} must be between 1 and {}, got {}",
                    name,
                    MAX_SESSION_SECS,
                    value
                );
            }
        }

        let windows = [
            ("min_validity_secs", self.min_validity_secs),
            ("request_min_validity_secs", self.request_min_validity_secs),
        ];
        for (name, value) in windows {
            if value > MAX_SESSION_SECS {
                anyhow::bail!(
                    "session.{} must be at most {}, got {}",
                    name,
                    MAX_SESSION_SECS,
                    value
                );
            }
        }

        if self.logout_delay_ms > MAX_LOGOUT_DELAY_MS {
            anyhow::bail!(
                "session.logout_delay_ms must be at most {}, got {}",
                MAX_LOGOUT_DELAY_MS,
                self.logout_delay_ms
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub identity: IdentityConfig,
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub storage: StorageBackend,
}

impl Config {
    /// Load the config file (or defaults), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.session.validate()
    }

    /// Apply `STOREFRONT_*` overrides from a variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("STOREFRONT_IDENTITY_URL") {
            self.identity.url = v;
        }
        if let Some(v) = non_empty("STOREFRONT_REALM") {
            self.identity.realm = v;
        }
        if let Some(v) = non_empty("STOREFRONT_CLIENT_ID") {
            self.identity.client_id = v;
        }
        if let Some(v) = non_empty("STOREFRONT_REDIRECT_URI") {
            self.identity.redirect_uri = v;
        }
        if let Some(v) = non_empty("STOREFRONT_GATEWAY_URL") {
            self.api.gateway_url = v;
        }
        if let Some(v) = non_empty("STOREFRONT_STORAGE") {
            self.storage = StorageBackend::parse(&v)
                .ok_or_else(|| anyhow::anyhow!("Unknown storage backend: {}", v))?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding persisted session data
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_local_stack() {
        let config = Config::default();
        assert_eq!(config.identity.realm, "devsecops-realm");
        assert_eq!(config.api.gateway_url, "http://localhost:8888");
        assert_eq!(config.api.timeout(), Duration::from_secs(10));
        assert_eq!(config.session.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.session.min_validity(), Duration::from_secs(70));
        assert_eq!(config.session.display_interval(), Duration::from_secs(10));
        assert_eq!(config.storage, StorageBackend::File);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api": {"gateway_url": "https://shop.example"}}"#).unwrap();
        assert_eq!(config.api.gateway_url, "https://shop.example");
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.identity, IdentityConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("STOREFRONT_REALM", "prod"),
            ("STOREFRONT_GATEWAY_URL", "https://gw.example"),
            ("STOREFRONT_CLIENT_ID", "   "),
            ("STOREFRONT_STORAGE", "keyring"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.identity.realm, "prod");
        assert_eq!(config.api.gateway_url, "https://gw.example");
        // Blank values are ignored
        assert_eq!(config.identity.client_id, "ecom-frontend");
        assert_eq!(config.storage, StorageBackend::Keyring);
    }

    #[test]
    fn test_validate_rejects_zero_and_oversized_periods() {
        assert!(Config::default().validate().is_ok());

        let config: Config =
            serde_json::from_str(r#"{"session": {"refresh_interval_secs": 0}}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("refresh_interval_secs"));

        let mut config = Config::default();
        config.session.display_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.min_validity_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.logout_delay_ms = 3_600_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.api.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override_rejects_unknown_storage() {
        let mut config = Config::default();
        let result = config.apply_overrides(|k| {
            (k == "STOREFRONT_STORAGE").then(|| "cookie".to_string())
        });
        assert!(result.is_err());
    }
}
