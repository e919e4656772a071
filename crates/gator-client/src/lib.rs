pub mod fetcher;
pub mod plugins;

pub use fetcher::ReqwestFetcher;
pub use plugins::shopify::ShopifyPlugin;
pub use plugins::stackskb::{HtmlPluginConfig, StacksKbPlugin};
