use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::context::ExecContext;
use crate::error::AppError;
use crate::models::{ScrapeRequest, ScrapeResult};
use crate::plugin::{Plugin, PluginInfo};
use crate::registry::PluginRegistry;

/// Option key set by [`ScraperManager::scrape_multiple_pages`] on each page request.
pub const PAGE_OPTION: &str = "page";

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Deadline imposed on a scrape whose context carries none.
    pub default_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Resolves plugins through the registry and runs them under a deadline.
#[derive(Clone)]
pub struct ScraperManager {
    registry: Arc<PluginRegistry>,
    config: ManagerConfig,
}

impl ScraperManager {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self::with_config(registry, ManagerConfig::default())
    }

    pub fn with_config(registry: Arc<PluginRegistry>, config: ManagerConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), AppError> {
        self.registry.register(plugin)
    }

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.registry.list_plugins()
    }

    pub fn list_supported_types(&self) -> Vec<String> {
        self.registry.list_supported_types()
    }

    /// Resolve the plugin for `req.source_type` and run it.
    pub async fn scrape_by_type(
        &self,
        ctx: &ExecContext,
        req: &ScrapeRequest,
    ) -> Result<ScrapeResult, AppError> {
        let plugin = self.registry.get_plugin_for_type(&req.source_type)?;
        self.execute(plugin.as_ref(), ctx, req).await
    }

    /// Run the plugin registered under `name`, regardless of `req.source_type`.
    pub async fn scrape_by_plugin(
        &self,
        ctx: &ExecContext,
        name: &str,
        req: &ScrapeRequest,
    ) -> Result<ScrapeResult, AppError> {
        let plugin = self.registry.get_plugin(name)?;
        self.execute(plugin.as_ref(), ctx, req).await
    }

    /// Walk pages `1..=max_pages` by setting the `page` option, stopping at the
    /// first page that yields no products or reports itself as the last.
    ///
    /// A failure on the first page is returned as-is. A failure on a later page
    /// is recorded as a soft error and ends the walk with what was collected.
    pub async fn scrape_multiple_pages(
        &self,
        ctx: &ExecContext,
        base: &ScrapeRequest,
        max_pages: u32,
    ) -> Result<ScrapeResult, AppError> {
        let plugin = self.registry.get_plugin_for_type(&base.source_type)?;
        let ctx = self.bounded(ctx);
        let started = Instant::now();
        let mut combined = ScrapeResult::default();

        for page in 1..=max_pages.max(1) {
            let page_req = base.clone().with_option(PAGE_OPTION, page.to_string());
            match self.execute(plugin.as_ref(), &ctx, &page_req).await {
                Ok(result) => {
                    let done = result.products.is_empty() || result.last_page;
                    tracing::debug!(
                        page,
                        products = result.products.len(),
                        source_type = %base.source_type,
                        "Scraped page"
                    );
                    combined.merge(result);
                    if done {
                        break;
                    }
                }
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    tracing::warn!(page, error = %e, "Page scrape failed, stopping pagination");
                    combined.errors.push(format!("page {page}: {e}"));
                    break;
                }
            }
        }

        combined.stats = Default::default();
        backfill_stats(&mut combined, started.elapsed(), base, plugin.as_ref());
        Ok(combined)
    }

    fn bounded(&self, ctx: &ExecContext) -> ExecContext {
        if ctx.has_deadline() {
            *ctx
        } else {
            ctx.with_timeout(self.config.default_timeout)
        }
    }

    async fn execute(
        &self,
        plugin: &dyn Plugin,
        ctx: &ExecContext,
        req: &ScrapeRequest,
    ) -> Result<ScrapeResult, AppError> {
        plugin.validate_request(req)?;

        let ctx = self.bounded(ctx);
        let started = Instant::now();
        let mut result = ctx.run(plugin.scrape(&ctx, req)).await?;

        backfill_stats(&mut result, started.elapsed(), req, plugin);
        tracing::info!(
            plugin = plugin.name(),
            products = result.stats.products_found,
            variants = result.stats.variants_found,
            errors = result.stats.error_count,
            duration_ms = result.stats.duration_ms,
            "Scrape finished"
        );
        Ok(result)
    }
}

fn backfill_stats(
    result: &mut ScrapeResult,
    elapsed: Duration,
    req: &ScrapeRequest,
    plugin: &dyn Plugin,
) {
    let variants = result.variant_count();
    let stats = &mut result.stats;
    if stats.products_found == 0 {
        stats.products_found = result.products.len();
    }
    if stats.variants_found == 0 {
        stats.variants_found = variants;
    }
    if stats.error_count == 0 {
        stats.error_count = result.errors.len();
    }
    if stats.duration_ms == 0 {
        stats.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }
    if stats.source.is_empty() {
        stats.source = if req.reseller.is_empty() {
            plugin.name().to_string()
        } else {
            req.reseller.clone()
        };
    }
}
