//! Data models for storefront entities.
//!
//! - `Product`: catalog entry served by the product service
//! - `ProductSortColumn`: catalog sort keys
//! - `ProductActions`: role-gated actions on a product
//! - `StockLevel`: stock badge of a product
//! - `Command`: an order served by the command service

pub mod command;
pub mod product;

pub use command::{Command, CommandLine};
pub use product::{
    Product, ProductActions, ProductSortColumn, StockLevel, ADMIN_ROLE, CLIENT_ROLE,
    LOW_STOCK_THRESHOLD,
};
