use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Normalized input to a scrape plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    /// Selects the plugin, e.g. `SHOPIFY` or `STACKS`.
    pub source_type: String,
    /// Display name of the reseller website.
    pub reseller: String,
    pub reseller_id: String,
    /// Category assigned to every product of this scrape.
    pub category: String,
    /// Plugin-specific tuning (pagination limits, collection handles, ...).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_type: source_type.into(),
            ..Self::default()
        }
    }

    pub fn with_reseller(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.reseller_id = id.into();
        self.reseller = name.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Option flag that defaults to `true` unless explicitly `"false"`.
    pub fn flag_enabled(&self, key: &str) -> bool {
        self.option(key) != Some("false")
    }
}

/// One purchasable configuration of a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedVariant {
    pub name: String,
    pub sku: String,
    pub price: f64,
    pub currency: String,
    pub available: bool,
    pub url: String,
    pub images: Vec<String>,
    /// Attribute name → selected value.
    pub options: BTreeMap<String, String>,
    pub source_id: String,
}

/// A product normalized from any source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedProduct {
    pub name: String,
    pub description: String,
    /// URL-safe slug.
    pub handle: String,
    pub url: String,
    pub brand: String,
    pub category: String,
    pub tags: BTreeSet<String>,
    pub images: Vec<String>,
    pub variants: Vec<ScrapedVariant>,
    pub source_type: String,
    pub source_id: String,
    /// Source-specific provenance.
    pub metadata: BTreeMap<String, String>,
}

/// Output of a plugin run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub products: Vec<ScrapedProduct>,
    /// Non-fatal per-item errors.
    pub errors: Vec<String>,
    pub stats: ScrapeStats,
    /// Set when the source has nothing after the requested page.
    #[serde(default)]
    pub last_page: bool,
}

impl ScrapeResult {
    pub fn variant_count(&self) -> usize {
        self.products.iter().map(|p| p.variants.len()).sum()
    }

    /// Append another result's products and errors (stats are recomputed by the manager).
    pub fn merge(&mut self, other: ScrapeResult) {
        self.products.extend(other.products);
        self.errors.extend(other.errors);
    }
}

/// Counters describing one scrape. Zero / empty values are back-filled by the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeStats {
    pub products_found: usize,
    pub variants_found: usize,
    pub error_count: usize,
    pub duration_ms: u64,
    pub source: String,
}

/// Payload of a `scrape_products` job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJobPayload {
    #[serde(default)]
    pub config_id: String,
    pub reseller_id: String,
    #[serde(default)]
    pub reseller_name: String,
    pub url: String,
    pub source_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Walk pages through the manager when the plugin does not paginate itself.
    #[serde(default)]
    pub all_pages: bool,
    #[serde(default)]
    pub max_pages: Option<u32>,
}

impl ScrapeJobPayload {
    pub fn to_request(&self) -> ScrapeRequest {
        ScrapeRequest {
            url: self.url.clone(),
            source_type: self.source_type.clone(),
            reseller: self.reseller_name.clone(),
            reseller_id: self.reseller_id.clone(),
            category: self.category.clone(),
            options: self.options.clone(),
        }
    }
}

/// Result document attached to a completed `scrape_products` job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJobResult {
    pub products_found: usize,
    pub variants_found: usize,
    pub products_saved: usize,
    pub products_created: usize,
    pub products_updated: usize,
    #[serde(default)]
    pub tag_jobs_enqueued: usize,
    pub total_errors: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub scraped_at: String,
    pub source: String,
}

/// Whether a save inserted a new product or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
