use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use gator_core::brand::BrandLexicon;
use gator_core::context::ExecContext;
use gator_core::error::AppError;
use gator_core::manager::PAGE_OPTION;
use gator_core::models::{ScrapeRequest, ScrapeResult, ScrapedProduct, ScrapedVariant};
use gator_core::plugin::Plugin;
use gator_core::traits::Fetcher;
use gator_core::util::{derive_source_id, generate_handle, parse_price};

pub const SOURCE_TYPE: &str = "SHOPIFY";
pub const MAX_LIMIT: u32 = 250;
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_VARIANT_TITLE: &str = "Default Title";

/// Structured-feed plugin for Shopify storefronts (`/products.json`).
///
/// One `scrape` call fetches one feed page; page walking is left to the manager.
///
/// Options: `limit` (1..=250, default 250), `page`, `collection_handle`,
/// `include_images` (default true), `include_variants` (default true).
#[derive(Clone)]
pub struct ShopifyPlugin<F: Fetcher> {
    fetcher: F,
    lexicon: BrandLexicon,
    currency: String,
}

impl<F: Fetcher> ShopifyPlugin<F> {
    pub fn new(fetcher: F, lexicon: BrandLexicon) -> Self {
        Self {
            fetcher,
            lexicon,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// `<site>[/collections/<handle>]/products.json?limit=N[&page=P]`
    pub fn feed_url(req: &ScrapeRequest) -> String {
        let mut url = req.url.trim_end_matches('/').to_string();
        if let Some(collection) = req.option("collection_handle") {
            url.push_str("/collections/");
            url.push_str(collection);
        }
        url.push_str("/products.json?limit=");
        url.push_str(req.option("limit").unwrap_or("250"));
        if let Some(page) = req.option(PAGE_OPTION) {
            url.push_str("&page=");
            url.push_str(page);
        }
        url
    }

    async fn run(&self, req: &ScrapeRequest) -> Result<ScrapeResult, AppError> {
        let url = Self::feed_url(req);
        let body = self.fetcher.fetch(&url).await?;
        let feed: FeedResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::ParseError(format!("invalid product feed from {url}: {e}")))?;

        let include_images = req.flag_enabled("include_images");
        let include_variants = req.flag_enabled("include_variants");
        let site = req.url.trim_end_matches('/');

        let limit = req
            .option("limit")
            .and_then(|l| l.parse::<usize>().ok())
            .unwrap_or(MAX_LIMIT as usize);

        let mut result = ScrapeResult {
            last_page: feed.products.len() < limit,
            ..Default::default()
        };
        for record in feed.products {
            let converted = self.convert(
                record,
                req,
                site,
                include_images,
                include_variants,
                &mut result.errors,
            );
            match converted {
                Ok(product) => result.products.push(product),
                Err(message) => result.errors.push(message),
            }
        }

        tracing::debug!(
            url = %url,
            products = result.products.len(),
            errors = result.errors.len(),
            "Parsed product feed"
        );
        Ok(result)
    }

    /// Unreadable variants are skipped and noted in `errors`.
    fn convert(
        &self,
        record: FeedProduct,
        req: &ScrapeRequest,
        site: &str,
        include_images: bool,
        include_variants: bool,
        errors: &mut Vec<String>,
    ) -> Result<ScrapedProduct, String> {
        let label = record
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| record.title.clone());
        let handle = if record.handle.is_empty() {
            generate_handle(&record.title)
        } else {
            record.handle.clone()
        };
        let product_url = format!("{site}/products/{handle}");

        let option_names: Vec<String> = record.options.iter().map(|o| o.name.clone()).collect();
        let mut variants: Vec<ScrapedVariant> = Vec::new();
        for variant in &record.variants {
            match self.convert_variant(variant, &product_url, &option_names, include_images) {
                Ok(Some(converted)) => variants.push(converted),
                Ok(None) => {}
                Err(message) => errors.push(format!("product {label}: {message}")),
            }
        }
        if !include_variants {
            variants.truncate(1);
        }
        if variants.is_empty() {
            return Err(format!("product {label}: no convertible variants"));
        }

        let mut metadata = BTreeMap::new();
        if let Some(id) = record.id {
            metadata.insert("shopify_product_id".to_string(), id.to_string());
        }
        for (key, value) in [
            ("vendor", &record.vendor),
            ("product_type", &record.product_type),
            ("created_at", &record.created_at),
            ("updated_at", &record.updated_at),
            ("published_at", &record.published_at),
        ] {
            if !value.is_empty() {
                metadata.insert(key.to_string(), value.clone());
            }
        }

        let source_id = match record.id {
            Some(id) => id.to_string(),
            None => derive_source_id(&product_url, &record.title),
        };
        let category = if req.category.is_empty() {
            record.product_type.clone()
        } else {
            req.category.clone()
        };
        let images = if include_images {
            record.images.into_iter().map(|i| i.src).collect()
        } else {
            Vec::new()
        };

        Ok(ScrapedProduct {
            brand: self.lexicon.infer(Some(&record.vendor), &record.title),
            name: record.title,
            description: record.body_html,
            handle,
            url: product_url,
            category,
            tags: record.tags.into_set(),
            images,
            variants,
            source_type: SOURCE_TYPE.to_string(),
            source_id,
            metadata,
        })
    }

    /// `None` for records we cannot identify (no variant id).
    fn convert_variant(
        &self,
        variant: &FeedVariant,
        product_url: &str,
        option_names: &[String],
        include_images: bool,
    ) -> Result<Option<ScrapedVariant>, String> {
        let Some(id) = variant.id else {
            return Ok(None);
        };
        let price = price_text(variant.price.as_ref())
            .map_err(|e| format!("variant {id}: {e}"))?
            .map(|p| parse_price(&p))
            .unwrap_or(0.0);

        let mut options = BTreeMap::new();
        for (i, value) in [&variant.option1, &variant.option2, &variant.option3]
            .into_iter()
            .enumerate()
        {
            let Some(value) = value.as_deref().filter(|v| !v.is_empty()) else {
                continue;
            };
            let name = option_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("option{}", i + 1));
            options.insert(name, value.to_string());
        }
        if let Ok(Some(compare_at)) = price_text(variant.compare_at_price.as_ref())
            && !compare_at.is_empty()
        {
            options.insert("compare_at_price".to_string(), compare_at);
        }

        let name = if variant.title.is_empty() || variant.title == DEFAULT_VARIANT_TITLE {
            "Default".to_string()
        } else {
            variant.title.clone()
        };
        let images = match (&variant.featured_image, include_images) {
            (Some(image), true) => vec![image.src.clone()],
            _ => Vec::new(),
        };

        Ok(Some(ScrapedVariant {
            name,
            sku: variant.sku.clone().unwrap_or_default(),
            price,
            currency: self.currency.clone(),
            available: variant.available,
            url: format!("{product_url}?variant={id}"),
            images,
            options,
            source_id: id.to_string(),
        }))
    }
}

impl<F: Fetcher + 'static> Plugin for ShopifyPlugin<F> {
    fn name(&self) -> &str {
        "shopify"
    }

    fn supported_types(&self) -> &[&str] {
        &[SOURCE_TYPE]
    }

    fn supported_options(&self) -> &[(&str, &str)] {
        &[
            ("limit", "Number of products to fetch (default: 250, max: 250)"),
            ("collection_handle", "Specific collection handle to scrape (e.g., 'keycaps')"),
            ("page", "Page number for pagination (default: 1)"),
            ("include_images", "Include product images (true/false, default: true)"),
            (
                "include_variants",
                "Include all variants or just the first one (true/false, default: true)",
            ),
        ]
    }

    fn validate_request(&self, req: &ScrapeRequest) -> Result<(), AppError> {
        if req.url.trim().is_empty() {
            return Err(AppError::ValidationError("url is required".into()));
        }
        let parsed = Url::parse(&req.url)
            .map_err(|e| AppError::ValidationError(format!("invalid url '{}': {e}", req.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::ValidationError(
                "url must include http:// or https://".into(),
            ));
        }
        if let Some(limit) = req.option("limit") {
            match limit.parse::<u32>() {
                Ok(n) if (1..=MAX_LIMIT).contains(&n) => {}
                _ => {
                    return Err(AppError::ValidationError(format!(
                        "limit must be a number between 1 and {MAX_LIMIT}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn scrape<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        req: &'a ScrapeRequest,
    ) -> BoxFuture<'a, Result<ScrapeResult, AppError>> {
        Box::pin(self.run(req))
    }
}

// -- Feed wire types --

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    products: Vec<FeedProduct>,
}

#[derive(Debug, Deserialize)]
struct FeedProduct {
    id: Option<u64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    handle: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    body_html: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    vendor: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    product_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    created_at: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    updated_at: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    published_at: String,
    #[serde(default)]
    tags: FeedTags,
    #[serde(default)]
    variants: Vec<FeedVariant>,
    #[serde(default)]
    images: Vec<FeedImage>,
    #[serde(default)]
    options: Vec<FeedOption>,
}

#[derive(Debug, Deserialize)]
struct FeedVariant {
    id: Option<u64>,
    #[serde(default)]
    title: String,
    option1: Option<String>,
    option2: Option<String>,
    option3: Option<String>,
    sku: Option<String>,
    #[serde(default)]
    available: bool,
    price: Option<Value>,
    compare_at_price: Option<Value>,
    featured_image: Option<FeedImage>,
}

#[derive(Debug, Deserialize)]
struct FeedImage {
    src: String,
}

#[derive(Debug, Deserialize)]
struct FeedOption {
    name: String,
}

/// Feeds serve tags either as an array or as one comma-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedTags {
    List(Vec<String>),
    Joined(String),
}

impl Default for FeedTags {
    fn default() -> Self {
        FeedTags::List(Vec::new())
    }
}

impl FeedTags {
    fn into_set(self) -> std::collections::BTreeSet<String> {
        let raw: Vec<String> = match self {
            FeedTags::List(tags) => tags,
            FeedTags::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Prices arrive as `"1299.00"` from most stores and as bare numbers from some.
fn price_text(value: Option<&Value>) -> Result<Option<String>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(format!("unreadable price {other}")),
    }
}

fn null_as_empty<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
