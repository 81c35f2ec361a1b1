//! API client for the storefront backend behind the gateway.
//!
//! Every request carries the current bearer token, fetched from a
//! [`TokenProvider`] right before sending. Failures are classified into
//! [`ApiError`] categories the catalog view can act on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::ApiError;
use crate::config::ApiConfig;
use crate::models::{Command, Product};

/// Path of the product service behind the gateway
const PRODUCT_SERVICE_PATH: [&str; 2] = ["product-service", "products"];

/// Path of the command (order) service behind the gateway
const COMMAND_SERVICE_PATH: [&str; 2] = ["command-service", "commands"];

/// Source of the bearer token attached to each request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, or `None` when there is no session
    async fn access_token(&self) -> Option<String>;
}

/// API client for the storefront gateway.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::with_timeout(&config.gateway_url, tokens, config.timeout())
    }

    pub fn with_timeout(
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid gateway URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Gateway URL cannot be used as a base: {}", base_url);
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Check if response is successful, returning a classified error if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let token = self.tokens.access_token().await.ok_or_else(|| {
            debug!(url = %url, "No access token, not sending request");
            ApiError::Unauthenticated
        })?;

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Request failed without a response");
                ApiError::from_transport(e)
            })?;

        let response = Self::check_response(response).await?;
        response.json().await.map_err(ApiError::from_transport)
    }

    // ===== Data Fetching Methods =====

    /// Fetch the full product catalog
    pub async fn fetch_products(&self) -> Result<Vec<Product>, ApiError> {
        let products: Vec<Product> = self.get(self.endpoint(&PRODUCT_SERVICE_PATH)).await?;
        debug!(count = products.len(), "Products fetched");
        Ok(products)
    }

    /// Fetch a single product by id
    pub async fn fetch_product(&self, id: &str) -> Result<Product, ApiError> {
        let [service, collection] = PRODUCT_SERVICE_PATH;
        self.get(self.endpoint(&[service, collection, id])).await
    }

    /// Fetch the orders visible to the current user
    pub async fn fetch_commands(&self) -> Result<Vec<Command>, ApiError> {
        let commands: Vec<Command> = self.get(self.endpoint(&COMMAND_SERVICE_PATH)).await?;
        debug!(count = commands.len(), "Commands fetched");
        Ok(commands)
    }
}
