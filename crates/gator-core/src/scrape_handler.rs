use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;

use crate::context::ExecContext;
use crate::error::AppError;
use crate::handler::JobHandler;
use crate::job::{Job, JobType, NewJob, Priority};
use crate::job_queue::JobSink;
use crate::manager::ScraperManager;
use crate::models::{SaveOutcome, ScrapeJobPayload, ScrapeJobResult, ScrapedProduct};
use crate::traits::ProductStore;

pub const DEFAULT_MAX_PAGES: u32 = 10;

/// Handles `scrape_products` jobs: scrape one source, persist every product.
///
/// Only a failure of the scrape itself fails the job. Products that cannot be
/// saved are reported in the job result.
///
/// With a tag queue attached, every saved product gets a `tag_product` job
/// keyed by `(reseller_id, source_type, source_id)`.
#[derive(Clone)]
pub struct ScrapeJobHandler<S: ProductStore> {
    manager: ScraperManager,
    store: S,
    tag_queue: Option<Arc<dyn JobSink>>,
}

impl<S: ProductStore> ScrapeJobHandler<S> {
    pub fn new(manager: ScraperManager, store: S) -> Self {
        Self {
            manager,
            store,
            tag_queue: None,
        }
    }

    pub fn with_tag_queue(mut self, queue: Arc<dyn JobSink>) -> Self {
        self.tag_queue = Some(queue);
        self
    }

    /// Failures are returned as soft-error text; they never fail the scrape job.
    async fn enqueue_tag_job(
        &self,
        queue: &dyn JobSink,
        job_id: &str,
        reseller_id: &str,
        product: &ScrapedProduct,
        stamp: i64,
    ) -> Result<(), String> {
        let tag_job = NewJob::new(
            format!("tag_{job_id}_{}_{stamp}", product.source_id),
            JobType::TagProduct,
            serde_json::json!({
                "reseller_id": reseller_id,
                "source_type": product.source_type,
                "source_id": product.source_id,
            }),
        )
        .with_priority(Priority::Normal);

        match queue.submit(tag_job).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    source_id = %product.source_id,
                    error = %e,
                    "Failed to enqueue tag job"
                );
                Err(format!("tag {}: {e}", product.source_id))
            }
        }
    }

    async fn run(&self, ctx: &ExecContext, job: &mut Job) -> Result<(), AppError> {
        let payload: ScrapeJobPayload = job.payload_as()?;
        if payload.reseller_id.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "job {}: reseller_id is required",
                job.id
            )));
        }

        let req = payload.to_request();
        let plugin = self
            .manager
            .registry()
            .get_plugin_for_type(&req.source_type)?;
        let result = if payload.all_pages && !plugin.paginates() {
            let max_pages = payload.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
            self.manager
                .scrape_multiple_pages(ctx, &req, max_pages)
                .await?
        } else {
            self.manager.scrape_by_type(ctx, &req).await?
        };

        let mut summary = ScrapeJobResult {
            products_found: result.stats.products_found,
            variants_found: result.stats.variants_found,
            errors: result.errors.clone(),
            duration_ms: result.stats.duration_ms,
            source: result.stats.source.clone(),
            ..Default::default()
        };

        let stamp = Utc::now().timestamp_micros();
        for product in &result.products {
            let saved = match self.store.save(&payload.reseller_id, product).await {
                Ok(SaveOutcome::Created) => {
                    summary.products_created += 1;
                    true
                }
                Ok(SaveOutcome::Updated) => {
                    summary.products_updated += 1;
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        source_id = %product.source_id,
                        error = %e,
                        "Failed to save product"
                    );
                    summary
                        .errors
                        .push(format!("save {}: {e}", product.source_id));
                    false
                }
            };

            if saved && let Some(queue) = &self.tag_queue {
                let enqueued = self
                    .enqueue_tag_job(queue.as_ref(), &job.id, &payload.reseller_id, product, stamp)
                    .await;
                match enqueued {
                    Ok(()) => summary.tag_jobs_enqueued += 1,
                    Err(message) => summary.errors.push(message),
                }
            }
        }
        summary.products_saved = summary.products_created + summary.products_updated;
        summary.total_errors = summary.errors.len();
        summary.scraped_at = Utc::now().to_rfc3339();

        tracing::info!(
            job_id = %job.id,
            source_type = %req.source_type,
            found = summary.products_found,
            saved = summary.products_saved,
            tag_jobs = summary.tag_jobs_enqueued,
            errors = summary.total_errors,
            "Scrape job finished"
        );
        job.result = serde_json::to_value(&summary)?;
        Ok(())
    }
}

impl<S: ProductStore + 'static> JobHandler for ScrapeJobHandler<S> {
    fn job_type(&self) -> JobType {
        JobType::ScrapeProducts
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a ExecContext,
        job: &'a mut Job,
    ) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(self.run(ctx, job))
    }
}
