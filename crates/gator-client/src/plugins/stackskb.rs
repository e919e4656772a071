use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::future::BoxFuture;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use url::Url;

use gator_core::brand::BrandLexicon;
use gator_core::context::ExecContext;
use gator_core::error::AppError;
use gator_core::models::{ScrapeRequest, ScrapeResult, ScrapedProduct, ScrapedVariant};
use gator_core::plugin::Plugin;
use gator_core::traits::Fetcher;
use gator_core::util::{derive_source_id, generate_handle, parse_price};

const LISTING_MARKER: &str = "/product-category/";
const DEFAULT_VARIANT: &str = "Default";
const PLACEHOLDER_OPTION: &str = "Choose an option";
const STOP_WORDS: &[&str] = &["the", "and", "for", "with", "from"];

/// Settings for the WooCommerce HTML plugin.
#[derive(Debug, Clone)]
pub struct HtmlPluginConfig {
    /// Pause between listing page requests.
    pub page_delay: Duration,
    pub currency: String,
    /// Request URLs must be on this domain or one of its subdomains.
    pub host_filter: Option<String>,
    /// Brand used when neither the page nor the lexicon names one.
    pub default_brand: String,
    pub source_type: String,
}

impl Default for HtmlPluginConfig {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_secs(2),
            currency: "INR".to_string(),
            host_filter: Some("stackskb.com".to_string()),
            default_brand: "StacksKB".to_string(),
            source_type: "STACKS".to_string(),
        }
    }
}

impl HtmlPluginConfig {
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_host_filter(mut self, host: Option<String>) -> Self {
        self.host_filter = host;
        self
    }
}

/// Unstructured-page plugin for the StacksKB WooCommerce storefront.
///
/// URLs under `/product-category/` are listings: the first page reports the
/// highest page number and every page is then fetched in turn with
/// [`HtmlPluginConfig::page_delay`] between requests. A page that fails is
/// recorded as a soft error, and a deadline that would pass during the delay
/// ends the walk with the pages collected so far. Any other URL is a product
/// detail page.
#[derive(Clone)]
pub struct StacksKbPlugin<F: Fetcher> {
    fetcher: F,
    lexicon: BrandLexicon,
    config: HtmlPluginConfig,
}

impl<F: Fetcher> StacksKbPlugin<F> {
    pub fn new(fetcher: F, lexicon: BrandLexicon) -> Self {
        Self::with_config(fetcher, lexicon, HtmlPluginConfig::default())
    }

    pub fn with_config(fetcher: F, lexicon: BrandLexicon, config: HtmlPluginConfig) -> Self {
        Self {
            fetcher,
            lexicon,
            config,
        }
    }

    async fn scrape_listing(
        &self,
        ctx: &ExecContext,
        req: &ScrapeRequest,
    ) -> Result<ScrapeResult, AppError> {
        let base = listing_base(&req.url);
        let first = self.fetcher.fetch(&base).await?;
        let (mut result, last_page) = self.parse_listing_page(&first, req)?;

        for page in 2..=last_page {
            let delay = self.config.page_delay;
            let out_of_time = ctx.remaining().is_some_and(|left| left <= delay);
            if out_of_time || ctx.sleep(delay).await.is_err() {
                tracing::warn!(page, last_page, "Deadline reached, stopping listing walk");
                result
                    .errors
                    .push(format!("stopped at page {page} of {last_page}: deadline reached"));
                break;
            }
            let url = format!("{}/page/{page}/", base.trim_end_matches('/'));
            let parsed = match self.fetcher.fetch(&url).await {
                Ok(body) => self.parse_listing_page(&body, req),
                Err(e) => Err(e),
            };
            match parsed {
                Ok((page_result, _)) => result.merge(page_result),
                Err(e) => {
                    tracing::warn!(page, url = %url, error = %e, "Listing page failed");
                    result.errors.push(format!("page {page}: {e}"));
                }
            }
        }

        Ok(result)
    }

    async fn scrape_detail(&self, req: &ScrapeRequest) -> Result<ScrapeResult, AppError> {
        let body = self.fetcher.fetch(&req.url).await?;
        let product = self.parse_detail_page(&body, req)?;
        Ok(ScrapeResult {
            products: vec![product],
            ..Default::default()
        })
    }

    /// Products of one listing page plus the highest page number it links to.
    fn parse_listing_page(
        &self,
        body: &str,
        req: &ScrapeRequest,
    ) -> Result<(ScrapeResult, u32), AppError> {
        let doc = Html::parse_document(body);
        let item_sel = sel("li.product")?;
        let title_sel = sel("h2.woocommerce-loop-product__title a")?;
        let image_sel = sel("a.woocommerce-loop-image-link img")?;
        let price_sel = sel("span.price")?;
        let page_sel = sel("nav.woocommerce-pagination ul.page-numbers a.page-numbers")?;

        let mut result = ScrapeResult::default();
        for (i, item) in doc.select(&item_sel).enumerate() {
            let Some(link) = item.select(&title_sel).next() else {
                result.errors.push(format!("product {i}: no title link found"));
                continue;
            };
            let Some(url) = link.value().attr("href") else {
                result.errors.push(format!("product {i}: no product URL found"));
                continue;
            };
            let name = text_of(link);
            let images: Vec<String> = item
                .select(&image_sel)
                .next()
                .and_then(image_src)
                .into_iter()
                .collect();
            let price = match item.select(&price_sel).next() {
                Some(price) => extract_price(price)?,
                None => 0.0,
            };
            let categories = categories_from_classes(item);

            let mut metadata = BTreeMap::new();
            metadata.insert("listing_page".to_string(), "true".to_string());
            metadata.insert("categories".to_string(), categories.join(","));

            result.products.push(ScrapedProduct {
                handle: generate_handle(&name),
                url: url.to_string(),
                brand: self.brand_from_title(&name),
                category: req.category.clone(),
                tags: generate_tags(&name, &categories),
                images: images.clone(),
                variants: vec![self.default_variant(price, url, images)],
                source_type: self.config.source_type.clone(),
                source_id: derive_source_id(url, &name),
                metadata,
                name,
                ..Default::default()
            });
        }

        let last_page = doc
            .select(&page_sel)
            .filter_map(|a| text_of(a).parse::<u32>().ok())
            .max()
            .unwrap_or(1);

        Ok((result, last_page))
    }

    fn parse_detail_page(&self, body: &str, req: &ScrapeRequest) -> Result<ScrapedProduct, AppError> {
        let doc = Html::parse_document(body);

        let title = doc
            .select(&sel("h1.product_title")?)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::ParseError(format!("no product title found at {}", req.url)))?;

        let price = match doc.select(&sel("p.price")?).next() {
            Some(price) => extract_price(price)?,
            None => 0.0,
        };
        let images = gallery_images(&doc)?;
        let brand = match attribute_brand(&doc)? {
            Some(brand) => brand,
            None => self.brand_from_title(&title),
        };
        let categories = detail_categories(&doc)?;
        let variants = self.detail_variants(&doc, price, &images, &req.url)?;

        let sku = doc
            .select(&sel("div.product_meta span.sku_wrapper span.sku")?)
            .next()
            .map(text_of)
            .unwrap_or_default();
        let source_id = if sku.is_empty() {
            derive_source_id(&req.url, &title)
        } else {
            sku
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("detail_page".to_string(), "true".to_string());
        metadata.insert("categories".to_string(), categories.join(","));

        Ok(ScrapedProduct {
            description: description(&doc)?,
            handle: generate_handle(&title),
            url: req.url.clone(),
            brand,
            category: req.category.clone(),
            tags: generate_tags(&title, &categories),
            images,
            variants,
            source_type: self.config.source_type.clone(),
            source_id,
            metadata,
            name: title,
        })
    }

    /// Variants from the inline variations blob, else the cross-product of the
    /// rendered option selects, else one default variant.
    fn detail_variants(
        &self,
        doc: &Html,
        base_price: f64,
        images: &[String],
        product_url: &str,
    ) -> Result<Vec<ScrapedVariant>, AppError> {
        let Some(form) = doc.select(&sel("form.variations_form")?).next() else {
            return Ok(vec![self.default_variant(base_price, product_url, images.to_vec())]);
        };

        let mut variants = Vec::new();
        if let Some(blob) = form.value().attr("data-product_variations") {
            match serde_json::from_str::<Vec<Variation>>(blob) {
                Ok(variations) => {
                    variants = variations
                        .into_iter()
                        .map(|v| self.variant_from_blob(v, images, product_url))
                        .collect();
                }
                Err(e) => {
                    tracing::debug!(url = product_url, error = %e, "Unreadable variations blob");
                }
            }
        }

        if variants.is_empty() {
            variants = self.variants_from_selects(doc, base_price, images, product_url)?;
        }
        if variants.is_empty() {
            variants.push(self.default_variant(base_price, product_url, images.to_vec()));
        }
        Ok(variants)
    }

    fn variant_from_blob(
        &self,
        variation: Variation,
        images: &[String],
        product_url: &str,
    ) -> ScrapedVariant {
        let options: BTreeMap<String, String> = variation
            .attributes
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| {
                let key = key.replace("attribute_", "").replace("pa_", "");
                (key, value)
            })
            .collect();
        let name = if options.is_empty() {
            DEFAULT_VARIANT.to_string()
        } else {
            options.values().cloned().collect::<Vec<_>>().join(" ")
        };

        let source_id = variation
            .variation_id
            .map(|id| id.as_text())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let url = if source_id == "unknown" {
            product_url.to_string()
        } else {
            format!("{product_url}?variant={source_id}")
        };
        let images = match variation.image.and_then(|i| i.full_src).filter(|s| !s.is_empty()) {
            Some(src) => vec![src],
            None => images.to_vec(),
        };

        ScrapedVariant {
            name,
            price: variation
                .display_price
                .map(|p| parse_price(&p.as_text()))
                .unwrap_or(0.0),
            currency: self.config.currency.clone(),
            available: variation.is_in_stock.unwrap_or(true),
            url,
            images,
            options,
            source_id,
            ..Default::default()
        }
    }

    /// Every combination of the rendered option lists, each at `base_price`.
    ///
    /// The page only shows one price, so per-combination prices are unknown.
    fn variants_from_selects(
        &self,
        doc: &Html,
        base_price: f64,
        images: &[String],
        product_url: &str,
    ) -> Result<Vec<ScrapedVariant>, AppError> {
        let row_sel = sel("table.variations tr")?;
        let label_sel = sel("label")?;
        let select_sel = sel("select")?;
        let option_sel = sel("option")?;

        let mut attributes: Vec<(String, Vec<SelectOption>)> = Vec::new();
        for row in doc.select(&row_sel) {
            let label = row.select(&label_sel).next().map(text_of).unwrap_or_default();
            let Some(select) = row.select(&select_sel).next() else {
                continue;
            };
            if label.is_empty() {
                continue;
            }
            let options: Vec<SelectOption> = select
                .select(&option_sel)
                .filter_map(|opt| {
                    let value = opt.value().attr("value").filter(|v| !v.is_empty())?;
                    let text = text_of(opt);
                    (!text.is_empty() && text != PLACEHOLDER_OPTION).then(|| SelectOption {
                        value: value.to_string(),
                        text,
                    })
                })
                .collect();
            if !options.is_empty() {
                attributes.push((label, options));
            }
        }
        if attributes.is_empty() {
            return Ok(Vec::new());
        }

        let lists: Vec<&[SelectOption]> = attributes.iter().map(|(_, o)| o.as_slice()).collect();
        Ok(cross_product(&lists)
            .into_iter()
            .map(|combination| {
                let options = combination
                    .iter()
                    .zip(&attributes)
                    .map(|(opt, (label, _))| (label.to_lowercase(), opt.value.clone()))
                    .collect();
                ScrapedVariant {
                    name: combination
                        .iter()
                        .map(|o| o.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" - "),
                    price: base_price,
                    currency: self.config.currency.clone(),
                    available: true,
                    url: product_url.to_string(),
                    images: images.to_vec(),
                    options,
                    source_id: combination
                        .iter()
                        .map(|o| o.value.as_str())
                        .collect::<Vec<_>>()
                        .join("-"),
                    ..Default::default()
                }
            })
            .collect())
    }

    fn default_variant(&self, price: f64, url: &str, images: Vec<String>) -> ScrapedVariant {
        ScrapedVariant {
            name: DEFAULT_VARIANT.to_string(),
            price,
            currency: self.config.currency.clone(),
            available: true,
            url: url.to_string(),
            images,
            source_id: "default".to_string(),
            ..Default::default()
        }
    }

    fn brand_from_title(&self, title: &str) -> String {
        self.lexicon
            .resolve(None, title)
            .unwrap_or_else(|| self.config.default_brand.clone())
    }
}

impl<F: Fetcher + 'static> Plugin for StacksKbPlugin<F> {
    fn name(&self) -> &str {
        "stackskb"
    }

    fn supported_types(&self) -> &[&str] {
        &["STACKS", "STACKSKB"]
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
        if let Some(host) = &self.config.host_filter
            && !parsed.host_str().is_some_and(|h| host_matches(h, host))
        {
            return Err(AppError::ValidationError(format!("url must be from {host}")));
        }
        Ok(())
    }

    fn scrape<'a>(
        &'a self,
        ctx: &'a ExecContext,
        req: &'a ScrapeRequest,
    ) -> BoxFuture<'a, Result<ScrapeResult, AppError>> {
        Box::pin(async move {
            if req.url.contains(LISTING_MARKER) {
                self.scrape_listing(ctx, req).await
            } else {
                self.scrape_detail(req).await
            }
        })
    }

    fn paginates(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Page helpers
// ---------------------------------------------------------------------------

/// `host` is `domain` itself or one of its subdomains.
fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain
        || host
            .strip_suffix(domain.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn sel(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ParseError(format!("selector '{css}': {e:?}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn image_src(img: ElementRef<'_>) -> Option<String> {
    img.value()
        .attr("data-src")
        .or_else(|| img.value().attr("src"))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Listing URL without a trailing `/page/N/`, always ending in `/`.
fn listing_base(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if let Some((rest, last)) = trimmed.rsplit_once('/')
        && !last.is_empty()
        && last.chars().all(|c| c.is_ascii_digit())
        && let Some(base) = rest.strip_suffix("/page")
    {
        return format!("{base}/");
    }
    format!("{trimmed}/")
}

/// Sale price (`ins`) when present, else the first amount (a range's minimum).
fn extract_price(price: ElementRef<'_>) -> Result<f64, AppError> {
    let sale_sel = sel("ins span.woocommerce-Price-amount")?;
    let amount_sel = sel("span.woocommerce-Price-amount")?;
    let amount = price
        .select(&sale_sel)
        .next()
        .or_else(|| price.select(&amount_sel).next());
    Ok(amount.map(|a| parse_price(&text_of(a))).unwrap_or(0.0))
}

/// `product_cat-mechanical-keyboards` → `Mechanical Keyboards`
fn categories_from_classes(item: ElementRef<'_>) -> Vec<String> {
    item.value()
        .classes()
        .filter_map(|class| class.strip_prefix("product_cat-"))
        .map(|slug| {
            slug.split('-')
                .filter(|w| !w.is_empty())
                .map(capitalize)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Breadcrumb and product-meta categories, uppercased and de-duplicated in page order.
fn detail_categories(doc: &Html) -> Result<Vec<String>, AppError> {
    let crumbs = sel("nav.kadence-breadcrumbs div.kadence-breadcrumb-container a")?;
    let posted_in = sel("div.product_meta span.posted_in a")?;

    let mut categories: Vec<String> = Vec::new();
    for name in doc
        .select(&crumbs)
        .map(text_of)
        .filter(|n| !n.is_empty() && n != "Home" && n != "Store")
        .chain(doc.select(&posted_in).map(text_of).filter(|n| !n.is_empty()))
    {
        let upper = name.to_uppercase();
        if !categories.contains(&upper) {
            categories.push(upper);
        }
    }
    Ok(categories)
}

/// Category slugs plus title words longer than two characters, minus stop words.
fn generate_tags(title: &str, categories: &[String]) -> BTreeSet<String> {
    let mut tags: BTreeSet<String> = categories
        .iter()
        .map(|c| c.to_lowercase().replace(' ', "-"))
        .collect();
    let lower = title.to_lowercase();
    tags.extend(
        lower
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
            .map(str::to_string),
    );
    tags
}

fn attribute_brand(doc: &Html) -> Result<Option<String>, AppError> {
    let row_sel = sel("table.woocommerce-product-attributes tr")?;
    let label_sel = sel("th.woocommerce-product-attributes-item__label")?;
    let value_sel = sel("td.woocommerce-product-attributes-item__value")?;

    let mut found = None;
    for row in doc.select(&row_sel) {
        let label = row
            .select(&label_sel)
            .next()
            .map(text_of)
            .unwrap_or_default()
            .to_lowercase();
        if !(label.contains("manufacturer") || label.contains("brand")) {
            continue;
        }
        let value = row.select(&value_sel).next().map(text_of).unwrap_or_default();
        if !value.is_empty() {
            found = Some(value);
        }
    }
    Ok(found)
}

/// Full-size gallery images in page order, de-duplicated.
fn gallery_images(doc: &Html) -> Result<Vec<String>, AppError> {
    let slide_sel =
        sel("div.woocommerce-product-gallery__wrapper div.woocommerce-product-gallery__image")?;
    let link_sel = sel("a")?;
    let img_sel = sel("img")?;

    let mut images: Vec<String> = Vec::new();
    for slide in doc.select(&slide_sel) {
        let href = slide
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        let Some(url) = href.or_else(|| slide.select(&img_sel).next().and_then(image_src)) else {
            continue;
        };
        if !images.contains(&url) {
            images.push(url);
        }
    }
    Ok(images)
}

/// Short description followed by the description tab, without the tab's heading.
fn description(doc: &Html) -> Result<String, AppError> {
    let mut parts = Vec::new();
    if let Some(short) = doc
        .select(&sel("div.woocommerce-product-details__short-description")?)
        .next()
    {
        parts.push(short.inner_html());
    }
    if let Some(tab) = doc.select(&sel("div#tab-description")?).next() {
        let mut body = String::new();
        for child in tab.children() {
            if let Some(el) = ElementRef::wrap(child) {
                if el.value().name() != "h2" {
                    body.push_str(&el.html());
                }
            } else if let Some(text) = child.value().as_text() {
                body.push_str(text);
            }
        }
        parts.push(body);
    }
    Ok(parts.concat().trim().to_string())
}

struct SelectOption {
    value: String,
    text: String,
}

fn cross_product<'a, T>(lists: &[&'a [T]]) -> Vec<Vec<&'a T>> {
    let mut combinations: Vec<Vec<&T>> = vec![Vec::new()];
    for list in lists {
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                list.iter().map(move |item| {
                    let mut next = prefix.clone();
                    next.push(item);
                    next
                })
            })
            .collect();
    }
    combinations
}

// -- Variations blob wire types --

#[derive(Debug, Deserialize)]
struct Variation {
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    is_in_stock: Option<bool>,
    display_price: Option<Loose>,
    variation_id: Option<Loose>,
    image: Option<VariationImage>,
}

#[derive(Debug, Deserialize)]
struct VariationImage {
    full_src: Option<String>,
}

/// Numbers the blob may encode either as JSON numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(u64),
    Float(f64),
    Text(String),
}

impl Loose {
    fn as_text(&self) -> String {
        match self {
            Loose::Int(n) => n.to_string(),
            Loose::Float(n) => n.to_string(),
            Loose::Text(s) => s.trim().to_string(),
        }
    }
}
