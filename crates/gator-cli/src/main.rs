use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gator_client::{ReqwestFetcher, ShopifyPlugin, StacksKbPlugin};
use gator_core::{
    BrandLexicon, ExecContext, JobQueue, JobStatus, JobType, NewJob, PluginRegistry, Priority,
    ScrapeJobHandler, ScrapeJobPayload, ScrapeRequest, Scheduler, SchedulerConfig, ScraperManager,
};
use gator_db::{Database, DatabaseConfig, PgJobQueue};

const MAX_JOB_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Parser)]
#[command(name = "gator", version, about = "Mech Gator catalog scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job scheduler until interrupted
    Worker {
        /// Number of concurrent workers
        #[arg(long, env = "WORKER_COUNT", default_value_t = 3)]
        workers: usize,

        /// Seconds between polls when the queue is empty
        #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 5)]
        poll_interval: u64,

        /// Upper bound in seconds on a single job execution
        #[arg(
            long,
            env = "JOB_TIMEOUT_SECS",
            default_value_t = 1800,
            value_parser = clap::value_parser!(u64).range(1..=MAX_JOB_TIMEOUT_SECS)
        )]
        job_timeout: u64,

        /// Days to keep completed, failed and cancelled jobs
        #[arg(
            long,
            env = "JOB_RETENTION_DAYS",
            default_value_t = 7,
            value_parser = clap::value_parser!(i64).range(1..=MAX_RETENTION_DAYS)
        )]
        retention_days: i64,

        /// Seconds to wait for running jobs after an interrupt
        #[arg(long, default_value_t = 30)]
        shutdown_timeout: u64,
    },

    /// Queue a scrape of one reseller source
    Enqueue {
        #[arg(long)]
        reseller_id: String,

        #[arg(long, default_value = "")]
        reseller_name: String,

        /// Source URL (storefront root or listing/product page)
        #[arg(short, long)]
        url: String,

        /// Source type, e.g. SHOPIFY or STACKS
        #[arg(short, long)]
        source_type: String,

        #[arg(long, default_value = "")]
        category: String,

        /// Identifier of the scrape configuration this job belongs to
        #[arg(long, default_value = "cli")]
        config_id: String,

        /// Plugin option as key=value (repeatable)
        #[arg(short, long = "option", value_parser = parse_option)]
        options: Vec<(String, String)>,

        /// Walk numbered pages when the plugin does not paginate itself
        #[arg(long, default_value_t = false)]
        all_pages: bool,

        #[arg(long)]
        max_pages: Option<u32>,

        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
    },

    /// List jobs, newest first
    Jobs {
        /// Only show jobs in this status
        #[arg(long)]
        status: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one job as JSON
    Job { id: String },

    /// Cancel a pending job
    Cancel { id: String },

    /// Queue a fresh copy of a failed job
    Retry { id: String },

    /// Delete a job that is not running
    Remove { id: String },

    /// Scrape a source once and print the result as JSON (nothing is stored)
    Scrape {
        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        source_type: String,

        #[arg(long, default_value = "")]
        category: String,

        #[arg(short, long = "option", value_parser = parse_option)]
        options: Vec<(String, String)>,

        /// Walk up to this many numbered pages
        #[arg(long)]
        pages: Option<u32>,
    },

    /// List registered plugins and their source types
    Plugins,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::Urgent => Priority::Urgent,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gator=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Worker {
            workers,
            poll_interval,
            job_timeout,
            retention_days,
            shutdown_timeout,
        } => {
            let config = SchedulerConfig::default()
                .with_workers(workers)
                .with_poll_interval(Duration::from_secs(poll_interval))
                .with_job_timeout(Duration::from_secs(job_timeout))
                .with_retention(
                    TimeDelta::try_days(retention_days).context("retention out of range")?,
                );
            cmd_worker(config, Duration::from_secs(shutdown_timeout)).await?;
        }
        Commands::Enqueue {
            reseller_id,
            reseller_name,
            url,
            source_type,
            category,
            config_id,
            options,
            all_pages,
            max_pages,
            priority,
        } => {
            let payload = ScrapeJobPayload {
                config_id,
                reseller_id,
                reseller_name,
                url,
                source_type,
                category,
                options: options.into_iter().collect(),
                all_pages,
                max_pages,
            };
            let scheduler = connect_scheduler().await?;
            cmd_enqueue(&scheduler, payload, priority.into()).await?;
        }
        Commands::Jobs { status, limit } => {
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let scheduler = connect_scheduler().await?;
            cmd_jobs(&scheduler, status, limit).await?;
        }
        Commands::Job { id } => {
            let scheduler = connect_scheduler().await?;
            let job = scheduler
                .queue()
                .get_job(&id)
                .await?
                .with_context(|| format!("job {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Cancel { id } => {
            let scheduler = connect_scheduler().await?;
            let job = scheduler.cancel_job(&id).await?;
            println!("Cancelled {} ({})", job.id, job.job_type);
        }
        Commands::Retry { id } => {
            let scheduler = connect_scheduler().await?;
            let job = scheduler.retry_job(&id).await?;
            println!("Queued {} as a retry of {id}", job.id);
        }
        Commands::Remove { id } => {
            let scheduler = connect_scheduler().await?;
            scheduler.remove_job(&id).await?;
            println!("Removed {id}");
        }
        Commands::Scrape {
            url,
            source_type,
            category,
            options,
            pages,
        } => {
            let mut req = ScrapeRequest::new(url, source_type).with_category(category);
            for (key, value) in options {
                req = req.with_option(key, value);
            }
            cmd_scrape(&req, pages).await?;
        }
        Commands::Plugins => {
            let manager = build_manager()?;
            for info in manager.list_plugins() {
                println!(
                    "{} v{} types={} paginates={}",
                    info.name,
                    info.version,
                    info.supported_types.join(","),
                    info.paginates
                );
                for (option, description) in &info.supported_options {
                    println!("  --option {option}=...  {description}");
                }
                if !info.required_credentials.is_empty() {
                    println!("  credentials: {}", info.required_credentials.join(","));
                }
            }
        }
    }

    Ok(())
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Registry holding every built-in plugin, sharing one HTTP client.
fn build_manager() -> Result<ScraperManager> {
    let fetcher = ReqwestFetcher::new().context("Failed to create HTTP client")?;
    let lexicon = BrandLexicon::default();

    let registry = Arc::new(PluginRegistry::new());
    registry.register(Arc::new(ShopifyPlugin::new(fetcher.clone(), lexicon.clone())))?;
    registry.register(Arc::new(StacksKbPlugin::new(fetcher, lexicon)))?;
    Ok(ScraperManager::new(registry))
}

/// Connect and migrate using DATABASE_URL and friends.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

async fn connect_scheduler() -> Result<Scheduler<PgJobQueue>> {
    let db = connect_db().await?;
    Ok(Scheduler::new(db.job_queue(), SchedulerConfig::default()))
}

async fn cmd_worker(config: SchedulerConfig, shutdown_timeout: Duration) -> Result<()> {
    let db = connect_db().await?;
    let handler = ScrapeJobHandler::new(build_manager()?, db.product_repo())
        .with_tag_queue(Arc::new(db.job_queue()));

    let scheduler = Scheduler::new(db.job_queue(), config);
    scheduler.register_handler(Arc::new(handler));

    let shutdown = CancellationToken::new();
    scheduler.start(&shutdown).await?;
    tracing::info!(
        workers = scheduler.config().workers,
        "Worker running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    scheduler.stop().await?;
    if !scheduler.wait_in_flight(shutdown_timeout).await {
        tracing::warn!(
            in_flight = scheduler.in_flight(),
            "Jobs still running at shutdown, they will be recovered on next start"
        );
    }
    Ok(())
}

async fn cmd_enqueue(
    scheduler: &Scheduler<PgJobQueue>,
    payload: ScrapeJobPayload,
    priority: Priority,
) -> Result<()> {
    let id = format!("scrape_{}_{}", payload.config_id, Utc::now().timestamp());
    let job = NewJob::new(id, JobType::ScrapeProducts, serde_json::to_value(&payload)?)
        .with_priority(priority);
    let job = scheduler.add_job(job).await?;
    println!("Queued {} ({}, priority {:?})", job.id, job.job_type, job.priority);
    Ok(())
}

async fn cmd_jobs(
    scheduler: &Scheduler<PgJobQueue>,
    status: Option<JobStatus>,
    limit: usize,
) -> Result<()> {
    let jobs = scheduler.queue().list_jobs(status, limit).await?;
    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    for job in &jobs {
        println!(
            "  {:<40} {:<10} {:<16} attempts {}/{}  {}",
            job.id,
            job.status,
            job.job_type,
            job.attempts,
            job.max_attempts,
            job.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        if let Some(error) = &job.error {
            println!("      error: {error}");
        }
    }
    println!("\nTotal: {} jobs", jobs.len());
    Ok(())
}

async fn cmd_scrape(req: &ScrapeRequest, pages: Option<u32>) -> Result<()> {
    let manager = build_manager()?;
    let ctx = ExecContext::background();

    let result = match pages {
        Some(pages) if pages > 1 => manager.scrape_multiple_pages(&ctx, req, pages).await?,
        _ => manager.scrape_by_type(&ctx, req).await?,
    };
    if result.products.is_empty() && !result.errors.is_empty() {
        bail!("scrape produced no products: {}", result.errors.join("; "));
    }

    tracing::info!(
        products = result.products.len(),
        variants = result.variant_count(),
        errors = result.errors.len(),
        "Scrape complete"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_in_plugins_describe_their_options() {
        let plugins = build_manager().unwrap().list_plugins();
        let shopify = plugins.iter().find(|p| p.name == "shopify").unwrap();
        assert!(shopify.supported_options.contains_key("collection_handle"));
        assert!(shopify.required_credentials.is_empty());
        assert!(plugins.iter().any(|p| p.paginates));
    }

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("collection=keycaps").unwrap(),
            ("collection".to_string(), "keycaps".to_string())
        );
        assert_eq!(
            parse_option("limit = 50").unwrap(),
            ("limit".to_string(), "50".to_string())
        );
        assert!(parse_option("novalue").is_err());
        assert!(parse_option("=x").is_err());
    }

    #[test]
    fn test_cli_parses_enqueue() {
        let cli = Cli::try_parse_from([
            "gator",
            "enqueue",
            "--reseller-id",
            "r1",
            "--url",
            "https://shop.test",
            "--source-type",
            "SHOPIFY",
            "-o",
            "collection=keycaps",
            "--priority",
            "high",
        ])
        .unwrap();
        let Commands::Enqueue {
            options, priority, ..
        } = cli.command
        else {
            panic!("expected enqueue");
        };
        assert_eq!(options, vec![("collection".into(), "keycaps".into())]);
        assert_eq!(Priority::from(priority), Priority::High);
    }

    #[test]
    fn test_worker_rejects_out_of_range_durations() {
        assert!(Cli::try_parse_from(["gator", "worker", "--job-timeout", "604800"]).is_ok());
        assert!(
            Cli::try_parse_from(["gator", "worker", "--job-timeout", "18446744073709551615"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["gator", "worker", "--job-timeout", "0"]).is_err());
        assert!(
            Cli::try_parse_from(["gator", "worker", "--retention-days", "9223372036854775807"])
                .is_err()
        );
    }

    #[test]
    fn test_builtin_plugins_cover_both_sources() {
        let manager = build_manager().unwrap();
        let types = manager.list_supported_types();
        assert!(types.iter().any(|t| t == "SHOPIFY"));
        assert!(types.iter().any(|t| t == "STACKS"));
        assert!(types.iter().any(|t| t == "STACKSKB"));
    }
}
