pub mod config;
pub mod database;
pub mod job_repository;
pub mod product_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use job_repository::PgJobQueue;
pub use product_repository::ProductRepository;
