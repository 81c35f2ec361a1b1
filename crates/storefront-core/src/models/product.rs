use std::cmp::Ordering;

use serde::{Deserialize, Deserializer, Serialize};

use crate::utils::cmp_ignore_case;

/// Role allowed to edit catalog entries
pub const ADMIN_ROLE: &str = "ADMIN";

/// Role allowed to place orders
pub const CLIENT_ROLE: &str = "CLIENT";

/// Above this quantity a product counts as well stocked
pub const LOW_STOCK_THRESHOLD: u32 = 10;

/// A catalog entry as served by the product service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "non_negative_price")]
    pub price: f64,
    pub quantity: u32,
}

impl Product {
    pub fn in_stock(&self) -> bool {
        self.quantity > 0
    }

    pub fn stock_level(&self) -> StockLevel {
        match self.quantity {
            0 => StockLevel::OutOfStock,
            q if q <= LOW_STOCK_THRESHOLD => StockLevel::Low,
            _ => StockLevel::InStock,
        }
    }
}

fn non_negative_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let price = f64::deserialize(deserializer)?;
    if price.is_finite() && price >= 0.0 {
        Ok(price)
    } else {
        Err(serde::de::Error::custom(format!(
            "price must be a non-negative amount, got {}",
            price
        )))
    }
}

/// Stock badge shown next to the quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockLevel {
    InStock,
    Low,
    OutOfStock,
}

impl StockLevel {
    pub fn label(&self) -> &'static str {
        match self {
            StockLevel::InStock => "in stock",
            StockLevel::Low => "low",
            StockLevel::OutOfStock => "out",
        }
    }
}

/// Column the catalog is sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductSortColumn {
    Id,
    Name,
    Description,
    Price,
    Quantity,
}

impl ProductSortColumn {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "id" => Some(ProductSortColumn::Id),
            "name" => Some(ProductSortColumn::Name),
            "description" => Some(ProductSortColumn::Description),
            "price" => Some(ProductSortColumn::Price),
            "quantity" | "stock" => Some(ProductSortColumn::Quantity),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ProductSortColumn::Id => "ID",
            ProductSortColumn::Name => "Name",
            ProductSortColumn::Description => "Description",
            ProductSortColumn::Price => "Price",
            ProductSortColumn::Quantity => "Stock",
        }
    }

    /// Compare two products on this column, ties broken by name
    pub fn compare(&self, a: &Product, b: &Product) -> Ordering {
        let name_cmp = || cmp_ignore_case(&a.name, &b.name);
        match self {
            ProductSortColumn::Id => a.id.cmp(&b.id),
            ProductSortColumn::Name => name_cmp(),
            ProductSortColumn::Description => {
                cmp_ignore_case(&a.description, &b.description).then_with(name_cmp)
            }
            ProductSortColumn::Price => a.price.total_cmp(&b.price).then_with(name_cmp),
            ProductSortColumn::Quantity => a.quantity.cmp(&b.quantity).then_with(name_cmp),
        }
    }
}

/// What the current user may do with a product
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductActions {
    pub can_edit: bool,
    pub can_order: bool,
}

impl ProductActions {
    pub fn for_product(product: &Product, is_admin: bool, is_client: bool) -> Self {
        Self {
            can_edit: is_admin,
            can_order: is_client && product.in_stock(),
        }
    }
}
