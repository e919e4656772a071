pub mod common;

mod job_queue_tests;
mod product_tests;
