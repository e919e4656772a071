use std::future::Future;

use crate::error::AppError;
use crate::models::{SaveOutcome, ScrapedProduct};

/// Fetches the raw body (HTML or JSON text) of a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Persists normalized products.
///
/// Implementations upsert on `(source_type, source_id, reseller_id)` and replace
/// the product's full variant set in one transaction.
pub trait ProductStore: Send + Sync + Clone {
    fn save(
        &self,
        reseller_id: &str,
        product: &ScrapedProduct,
    ) -> impl Future<Output = Result<SaveOutcome, AppError>> + Send;
}
