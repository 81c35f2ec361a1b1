//! REST client for the storefront API gateway.
//!
//! This module provides the `ApiClient` used by the catalog view to fetch
//! products. Requests are authenticated with the session's bearer token,
//! obtained through the `TokenProvider` seam right before each call.

pub mod client;
pub mod error;

pub use client::{ApiClient, TokenProvider};
pub use error::ApiError;
