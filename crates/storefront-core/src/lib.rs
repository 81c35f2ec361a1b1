//! Storefront core: session lifecycle and catalog access for the storefront
//! client.
//!
//! The session side restores a stored OIDC token pair on start, keeps it
//! fresh with periodic silent refreshes and tracks its remaining lifetime.
//! The catalog side fetches products from the API gateway with the current
//! bearer token and turns failures into inline messages or a delayed logout.

pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod models;
pub mod utils;
