use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Product;

/// An order as served by the command service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(default)]
    pub date: Option<NaiveDateTime>,
    #[serde(default)]
    pub status: String,
    pub amount: f64,
    #[serde(default)]
    pub products: Vec<CommandLine>,
}

/// One ordered product and its quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLine {
    pub id: String,
    #[serde(default)]
    pub product: Option<Product>,
    pub quantity: u32,
}

impl Command {
    /// Number of items across all lines
    pub fn item_count(&self) -> u64 {
        self.products.iter().map(|line| u64::from(line.quantity)).sum()
    }
}
