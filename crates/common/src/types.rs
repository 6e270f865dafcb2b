//! Domain types shared across the dashboard core.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Dataset ───────────────────────────────────────────────────────────

/// One category's values, aligned positionally with `Dataset::date_range`.
/// `None` is the explicit "no data" marker.
pub type Series = Vec<Option<f64>>;

/// Category name → series, for a single brand.
pub type BrandSeries = BTreeMap<String, Series>;

/// The sales payload displayed by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    /// Ordered period labels shared by every series.
    pub date_range: Vec<String>,
    /// Brand name → category name → series.
    pub brands: BTreeMap<String, BrandSeries>,
}

impl Dataset {
    pub fn new(date_range: Vec<String>) -> Self {
        Self {
            date_range,
            brands: BTreeMap::new(),
        }
    }

    /// Insert (or replace) one brand/category series.
    pub fn insert_series(&mut self, brand: &str, category: &str, values: Series) {
        self.brands
            .entry(brand.to_string())
            .or_default()
            .insert(category.to_string(), values);
    }

    pub fn period_count(&self) -> usize {
        self.date_range.len()
    }

    pub fn brand_names(&self) -> impl Iterator<Item = &str> {
        self.brands.keys().map(String::as_str)
    }

    pub fn series(&self, brand: &str, category: &str) -> Option<&Series> {
        self.brands.get(brand).and_then(|b| b.get(category))
    }

    /// Total number of brand/category series.
    pub fn series_count(&self) -> usize {
        self.brands.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }
}

// ── Load metadata ─────────────────────────────────────────────────────

/// Where a load result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOrigin {
    Cache,
    Api,
}

impl std::fmt::Display for DataOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Api => write!(f, "api"),
        }
    }
}
