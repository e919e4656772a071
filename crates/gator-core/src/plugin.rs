use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::context::ExecContext;
use crate::error::AppError;
use crate::models::{ScrapeRequest, ScrapeResult};

/// A source-specific scraping strategy.
///
/// A plugin may be invoked concurrently for different jobs and must not hold
/// per-call mutable state.
pub trait Plugin: Send + Sync {
    /// Unique registry name.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Source-type identifiers this plugin handles.
    fn supported_types(&self) -> &[&str];

    /// Reject structurally invalid input before any network activity.
    fn validate_request(&self, req: &ScrapeRequest) -> Result<(), AppError>;

    fn scrape<'a>(
        &'a self,
        ctx: &'a ExecContext,
        req: &'a ScrapeRequest,
    ) -> BoxFuture<'a, Result<ScrapeResult, AppError>>;

    /// Whether one `scrape` call already walks every page of the source.
    fn paginates(&self) -> bool {
        false
    }

    /// Request options the plugin reads, as `(name, description)` pairs.
    fn supported_options(&self) -> &[(&str, &str)] {
        &[]
    }

    /// Credential keys that must be present in the request options.
    fn required_credentials(&self) -> &[&str] {
        &[]
    }

    fn supports(&self, source_type: &str) -> bool {
        self.supported_types()
            .iter()
            .any(|t| t.eq_ignore_ascii_case(source_type))
    }
}

/// Introspection view of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub supported_types: Vec<String>,
    pub paginates: bool,
    pub supported_options: BTreeMap<String, String>,
    pub required_credentials: Vec<String>,
}

impl PluginInfo {
    pub fn of(plugin: &dyn Plugin) -> Self {
        Self {
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
            supported_types: plugin
                .supported_types()
                .iter()
                .map(|t| t.to_string())
                .collect(),
            paginates: plugin.paginates(),
            supported_options: plugin
                .supported_options()
                .iter()
                .map(|(name, description)| (name.to_string(), description.to_string()))
                .collect(),
            required_credentials: plugin
                .required_credentials()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}
