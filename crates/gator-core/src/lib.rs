pub mod brand;
pub mod context;
pub mod error;
pub mod handler;
pub mod job;
pub mod job_queue;
pub mod manager;
pub mod memory_queue;
pub mod models;
pub mod plugin;
pub mod registry;
pub mod scheduler;
pub mod scrape_handler;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use brand::BrandLexicon;
pub use context::ExecContext;
pub use error::AppError;
pub use handler::JobHandler;
pub use job::{Job, JobStatus, JobType, NewJob, Priority, RetryPolicy, SchedulerConfig};
pub use job_queue::{JobQueue, JobSink};
pub use manager::{ManagerConfig, ScraperManager};
pub use memory_queue::MemoryJobQueue;
pub use models::{
    SaveOutcome, ScrapeJobPayload, ScrapeJobResult, ScrapeRequest, ScrapeResult, ScrapeStats,
    ScrapedProduct, ScrapedVariant, compute_hash,
};
pub use plugin::{Plugin, PluginInfo};
pub use registry::PluginRegistry;
pub use scheduler::{Scheduler, SchedulerEvent, SchedulerReporter, TracingSchedulerReporter};
pub use scrape_handler::ScrapeJobHandler;
pub use traits::{Fetcher, ProductStore};
