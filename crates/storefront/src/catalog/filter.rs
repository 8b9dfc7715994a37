//! Catalog browsing filters: name search, category, and price band.

use std::str::FromStr;

use bioapp_core::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Product;

/// Price bands offered in the shop filter bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceRange {
    /// Under 30.
    #[serde(rename = "lt30")]
    Under30,
    /// 30 to 60 inclusive.
    #[serde(rename = "30to60")]
    From30To60,
    /// Over 60.
    #[serde(rename = "gt60")]
    Over60,
}

impl PriceRange {
    #[must_use]
    pub fn contains(self, price: Price) -> bool {
        let amount = price.amount();
        let thirty = Decimal::from(30);
        let sixty = Decimal::from(60);
        match self {
            Self::Under30 => amount < thirty,
            Self::From30To60 => amount >= thirty && amount <= sixty,
            Self::Over60 => amount > sixty,
        }
    }

    /// Label shown on the filter pill.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Under30 => "< $30",
            Self::From30To60 => "$30 - $60",
            Self::Over60 => "> $60",
        }
    }
}

impl FromStr for PriceRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt30" => Ok(Self::Under30),
            "30to60" => Ok(Self::From30To60),
            "gt60" => Ok(Self::Over60),
            _ => Err(format!("invalid price range: {s} (expected lt30, 30to60 or gt60)")),
        }
    }
}

/// Combined shop filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    /// Case-insensitive substring of the product name.
    pub query: String,
    /// Exact category, `None` for all categories.
    pub category: Option<String>,
    pub price_range: Option<PriceRange>,
}

impl CatalogFilter {
    #[must_use]
    pub fn matches(&self, product: &Product) -> bool {
        let query = self.query.trim().to_lowercase();
        let matches_query = query.is_empty() || product.name.to_lowercase().contains(&query);
        let matches_category = self
            .category
            .as_deref()
            .is_none_or(|category| product.category.as_deref() == Some(category));
        let matches_price = self
            .price_range
            .is_none_or(|range| range.contains(product.price));

        matches_query && matches_category && matches_price
    }
}
