//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::context::ExecContext;
use crate::error::AppError;
use crate::handler::JobHandler;
use crate::job::{Job, JobType};
use crate::models::{SaveOutcome, ScrapeRequest, ScrapeResult, ScrapedProduct, ScrapedVariant};
use crate::plugin::Plugin;
use crate::scheduler::{SchedulerEvent, SchedulerReporter};
use crate::traits::{Fetcher, ProductStore};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with responses keyed by exact URL.
///
/// Unknown URLs fail with an HTTP 404 error. Every requested URL is recorded.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, Result<String, String>>>>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(body.to_string()));
        self
    }

    /// Respond to `url` with a network error carrying `message`.
    pub fn with_failure(self, url: &str, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(message.to_string()));
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.responses.lock().unwrap().get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(message)) => Err(AppError::NetworkError(message.clone())),
            None => Err(AppError::HttpError(format!("HTTP 404 from {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockProductStore
// ---------------------------------------------------------------------------

/// Recorded save: (reseller_id, product).
pub type SavedProduct = (String, ScrapedProduct);

/// Mock store that records saves. Source IDs can be preset as existing
/// (reported `Updated`) or failing.
#[derive(Clone, Default)]
pub struct MockProductStore {
    pub saved: Arc<Mutex<Vec<SavedProduct>>>,
    existing: Arc<Mutex<HashSet<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MockProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, source_id: &str) -> Self {
        self.existing.lock().unwrap().insert(source_id.to_string());
        self
    }

    pub fn with_failure(self, source_id: &str) -> Self {
        self.failing.lock().unwrap().insert(source_id.to_string());
        self
    }
}

impl ProductStore for MockProductStore {
    async fn save(
        &self,
        reseller_id: &str,
        product: &ScrapedProduct,
    ) -> Result<SaveOutcome, AppError> {
        if self.failing.lock().unwrap().contains(&product.source_id) {
            return Err(AppError::DatabaseError(format!(
                "constraint violation for {}",
                product.source_id
            )));
        }
        self.saved
            .lock()
            .unwrap()
            .push((reseller_id.to_string(), product.clone()));

        let mut existing = self.existing.lock().unwrap();
        if existing.insert(product.source_id.clone()) {
            Ok(SaveOutcome::Created)
        } else {
            Ok(SaveOutcome::Updated)
        }
    }
}

// ---------------------------------------------------------------------------
// MockPlugin
// ---------------------------------------------------------------------------

/// Mock plugin returning queued results, then a one-product default.
pub struct MockPlugin {
    name: String,
    types: Vec<&'static str>,
    results: Arc<Mutex<Vec<Result<ScrapeResult, AppError>>>>,
    validation_error: Option<String>,
    delay: Option<Duration>,
    paginates: bool,
    pub calls: Arc<Mutex<Vec<ScrapeRequest>>>,
}

impl MockPlugin {
    pub fn new(name: &str, types: &[&'static str]) -> Self {
        Self {
            name: name.to_string(),
            types: types.to_vec(),
            results: Arc::new(Mutex::new(Vec::new())),
            validation_error: None,
            delay: None,
            paginates: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_results(self, results: Vec<Result<ScrapeResult, AppError>>) -> Self {
        *self.results.lock().unwrap() = results;
        self
    }

    pub fn with_validation_error(mut self, message: &str) -> Self {
        self.validation_error = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn paginating(mut self) -> Self {
        self.paginates = true;
        self
    }
}

impl Plugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_types(&self) -> &[&str] {
        &self.types
    }

    fn validate_request(&self, _req: &ScrapeRequest) -> Result<(), AppError> {
        match &self.validation_error {
            Some(message) => Err(AppError::ValidationError(message.clone())),
            None => Ok(()),
        }
    }

    fn scrape<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        req: &'a ScrapeRequest,
    ) -> BoxFuture<'a, Result<ScrapeResult, AppError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(req.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(ScrapeResult {
                    products: vec![make_product("default", 1)],
                    ..Default::default()
                })
            } else {
                results.remove(0)
            }
        })
    }

    fn paginates(&self) -> bool {
        self.paginates
    }
}

// ---------------------------------------------------------------------------
// MockHandler
// ---------------------------------------------------------------------------

/// Mock handler that records handled job IDs and writes `{"handled": id}` as result.
pub struct MockHandler {
    job_type: JobType,
    /// Message of the error returned by every call, if failing.
    failure: Option<String>,
    delay: Option<Duration>,
    pub handled: Arc<Mutex<Vec<String>>>,
}

impl MockHandler {
    pub fn succeeding(job_type: JobType) -> Self {
        Self {
            job_type,
            failure: None,
            delay: None,
            handled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handler failing every call with the message of `error`.
    pub fn failing(job_type: JobType, error: AppError) -> Self {
        Self {
            failure: Some(error.to_string()),
            ..Self::succeeding(job_type)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl JobHandler for MockHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        job: &'a mut Job,
    ) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            self.handled.lock().unwrap().push(job.id.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.failure {
                return Err(AppError::Generic(message.clone()));
            }
            job.result = serde_json::json!({"handled": job.id});
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock scheduler reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, label: &str) -> bool {
        self.count(label) > 0
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == label)
            .count()
    }
}

impl SchedulerReporter for MockReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        let label = match &event {
            SchedulerEvent::Started { .. } => "Started",
            SchedulerEvent::WorkerStarted { .. } => "WorkerStarted",
            SchedulerEvent::JobClaimed { .. } => "JobClaimed",
            SchedulerEvent::JobCompleted { .. } => "JobCompleted",
            SchedulerEvent::JobFailed { .. } => "JobFailed",
            SchedulerEvent::ClaimFailed { .. } => "ClaimFailed",
            SchedulerEvent::Maintenance { .. } => "Maintenance",
            SchedulerEvent::MaintenanceFailed { .. } => "MaintenanceFailed",
            SchedulerEvent::WorkerStopped { .. } => "WorkerStopped",
            SchedulerEvent::Stopped => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a product whose source ID is `source_id`, with `variants` priced variants.
pub fn make_product(source_id: &str, variants: usize) -> ScrapedProduct {
    ScrapedProduct {
        name: format!("Product {source_id}"),
        handle: source_id.to_string(),
        url: format!("https://shop.test/products/{source_id}"),
        brand: "GMK".to_string(),
        category: "Keycaps".to_string(),
        source_type: "MOCK".to_string(),
        source_id: source_id.to_string(),
        variants: (0..variants)
            .map(|i| ScrapedVariant {
                name: format!("Variant {i}"),
                price: 1000.0 + i as f64,
                currency: "INR".to_string(),
                available: true,
                source_id: format!("{source_id}-{i}"),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}
