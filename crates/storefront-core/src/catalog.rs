//! Product catalog view state.
//!
//! Holds the last successful product fetch together with the sort state and
//! the inline error of the most recent load. An expired session is reported
//! inline first; the logout follows after the configured delay.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::auth::{Navigation, SessionManager};
use crate::models::{Product, ProductActions, ProductSortColumn, ADMIN_ROLE, CLIENT_ROLE};

pub struct Catalog {
    api: ApiClient,
    session: Arc<SessionManager>,
    products: Vec<Product>,
    error: Option<ApiError>,
    sort_column: Option<ProductSortColumn>,
    sort_ascending: bool,
    logout_scheduled: bool,
    pending_logout: Option<JoinHandle<Navigation>>,
}

impl Catalog {
    pub fn new(api: ApiClient, session: Arc<SessionManager>) -> Self {
        Self {
            api,
            session,
            products: Vec::new(),
            error: None,
            sort_column: None,
            sort_ascending: true,
            logout_scheduled: false,
            pending_logout: None,
        }
    }

    // ===== Loading =====

    /// Fetch the catalog. On failure the previous list is kept and the error
    /// is recorded. Returns whether the fetch succeeded.
    pub async fn load(&mut self) -> bool {
        match self.api.fetch_products().await {
            Ok(products) => {
                info!(count = products.len(), "Catalog loaded");
                self.products = products;
                self.error = None;
                true
            }
            Err(e) => {
                warn!(error = %e, "Catalog load failed");
                if e.requires_logout() {
                    self.schedule_logout();
                }
                self.error = Some(e);
                false
            }
        }
    }

    pub async fn retry(&mut self) -> bool {
        debug!("Retrying catalog load");
        self.load().await
    }

    fn schedule_logout(&mut self) {
        if self.logout_scheduled {
            return;
        }
        self.logout_scheduled = true;

        let session = self.session.clone();
        let delay = session.config().logout_delay();
        info!(delay_ms = delay.as_millis() as u64, "Session expired, logout scheduled");
        self.pending_logout = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.logout().await
        }));
    }

    /// The delayed logout started by an expired session, if any.
    /// Its output is the navigation to perform.
    pub fn take_pending_logout(&mut self) -> Option<JoinHandle<Navigation>> {
        self.pending_logout.take()
    }

    // ===== Error state =====

    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    pub fn error_message(&self) -> Option<&'static str> {
        self.error.as_ref().map(ApiError::user_message)
    }

    pub fn can_retry(&self) -> bool {
        self.error.as_ref().map(ApiError::can_retry).unwrap_or(false)
    }

    // ===== Contents =====

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// Sum of the listed prices, one unit per product
    pub fn total_value(&self) -> f64 {
        self.products.iter().map(|p| p.price).sum()
    }

    /// Units in stock across the catalog
    pub fn total_stock(&self) -> u64 {
        self.products.iter().map(|p| u64::from(p.quantity)).sum()
    }

    // ===== Sorting =====

    pub fn sort_column(&self) -> Option<ProductSortColumn> {
        self.sort_column
    }

    pub fn sort_ascending(&self) -> bool {
        self.sort_ascending
    }

    /// Toggle sort direction on the current column, or switch to a new
    /// column ascending.
    pub fn sort_by(&mut self, column: ProductSortColumn) {
        if self.sort_column == Some(column) {
            self.sort_ascending = !self.sort_ascending;
        } else {
            self.sort_column = Some(column);
            self.sort_ascending = true;
        }
    }

    /// Products in display order; fetch order when no column is selected
    pub fn sorted(&self) -> Vec<&Product> {
        let mut sorted: Vec<&Product> = self.products.iter().collect();
        if let Some(column) = self.sort_column {
            sorted.sort_by(|a, b| {
                let cmp = column.compare(a, b);
                if self.sort_ascending {
                    cmp
                } else {
                    cmp.reverse()
                }
            });
        }
        sorted
    }

    pub fn actions_for(&self, product: &Product) -> ProductActions {
        ProductActions::for_product(
            product,
            self.session.has_role(ADMIN_ROLE),
            self.session.has_role(CLIENT_ROLE),
        )
    }
}
