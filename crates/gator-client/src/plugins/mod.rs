//! Source plugins. Each one turns a reseller's storefront into [`ScrapedProduct`]s.
//!
//! [`ScrapedProduct`]: gator_core::models::ScrapedProduct

pub mod shopify;
pub mod stackskb;
