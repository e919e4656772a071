use url::Url;

use crate::models::compute_hash;

/// Longest source identifier the product store accepts.
pub const MAX_SOURCE_ID_LEN: usize = 45;

const HASH_SUFFIX_LEN: usize = 8;

/// Build a URL-safe slug: lowercase, runs of non-alphanumerics collapsed to `-`.
///
/// Example: `"GMK Olivia++ (Base Kit)"` → `"gmk-olivia-base-kit"`
pub fn generate_handle(name: &str) -> String {
    if name.trim().is_empty() {
        return "unknown-product".to_string();
    }

    let mut handle = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_alphanumeric() {
            handle.push(c);
        } else if !handle.is_empty() && !handle.ends_with('-') {
            handle.push('-');
        }
    }
    let handle = handle.trim_end_matches('-');

    if handle.is_empty() {
        "unnamed-product".to_string()
    } else {
        handle.to_string()
    }
}

/// Shorten `s` to at most `max_len` bytes, keeping it stable across calls.
///
/// Long values become a prefix cut at a hyphen (when the hyphen falls in the
/// second half of the prefix) plus `-` and the first 8 hex chars of the
/// SHA-256 of the full value.
pub fn ensure_max_length(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let hash = compute_hash(s);
    if max_len <= HASH_SUFFIX_LEN + 1 {
        return hash[..max_len.min(hash.len())].to_string();
    }

    let prefix_len = floor_char_boundary(s, max_len - HASH_SUFFIX_LEN - 1);
    let mut prefix = &s[..prefix_len];
    if let Some(hyphen) = prefix.rfind('-')
        && hyphen > prefix_len / 2
    {
        prefix = &prefix[..hyphen];
    }
    let prefix = prefix.trim_end_matches('-');

    format!("{prefix}-{}", &hash[..HASH_SUFFIX_LEN])
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    (0..=index.min(s.len()))
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0)
}

/// Tolerant price parser: strips currency symbols and thousands separators,
/// yielding `0.0` for anything unparseable.
pub fn parse_price(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim_end_matches('.');
    cleaned.parse::<f64>().unwrap_or(0.0)
}

/// Slug of a product URL: the segment after `products/` or `product/`, else the
/// last path segment when it does not look like a file.
pub fn id_from_url(product_url: &str) -> Option<String> {
    let url = Url::parse(product_url).ok()?;
    let segments: Vec<&str> = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();

    if let Some(pos) = segments
        .iter()
        .position(|s| *s == "products" || *s == "product")
        && let Some(next) = segments.get(pos + 1)
    {
        return Some(next.to_string());
    }

    segments
        .last()
        .filter(|last| !last.contains('.'))
        .map(|last| last.to_string())
}

/// Stable identifier from the product URL, falling back to the name's handle,
/// shortened to [`MAX_SOURCE_ID_LEN`].
pub fn derive_source_id(product_url: &str, name: &str) -> String {
    let base = id_from_url(product_url).unwrap_or_else(|| generate_handle(name));
    ensure_max_length(&base, MAX_SOURCE_ID_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_handle() {
        assert_eq!(generate_handle("GMK Olivia++ (Base Kit)"), "gmk-olivia-base-kit");
        assert_eq!(generate_handle("  --Hello   World--  "), "hello-world");
        assert_eq!(generate_handle(""), "unknown-product");
        assert_eq!(generate_handle("+++"), "unnamed-product");
    }

    #[test]
    fn test_ensure_max_length_short_values_untouched() {
        assert_eq!(ensure_max_length("gmk-olivia", 45), "gmk-olivia");
    }

    #[test]
    fn test_ensure_max_length_word_aligned_and_stable() {
        let long = "gmk-cyl-olivia-plus-plus-base-kit-with-novelties-and-spacebars";
        let short = ensure_max_length(long, 45);
        assert!(short.len() <= 45, "{short} is {} chars", short.len());
        assert!(short.starts_with("gmk-cyl-olivia-plus-plus-base-kit-"));
        assert_eq!(short, ensure_max_length(long, 45));

        let (prefix, hash) = short.rsplit_once('-').unwrap();
        assert_eq!(hash.len(), 8);
        assert!(long.starts_with(prefix));
        assert!(!prefix.ends_with('-'));

        let other = ensure_max_length(
            "gmk-cyl-olivia-plus-plus-base-kit-with-novelties-and-numpad",
            45,
        );
        assert_ne!(short, other);
    }

    #[test]
    fn test_ensure_max_length_multibyte_safe() {
        let long = "キーキャップ".repeat(10);
        let short = ensure_max_length(&long, 45);
        assert!(short.len() <= 45);
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("₹1,299.00"), 1299.0);
        assert_eq!(parse_price("Rs. 4,500"), 4500.0);
        assert_eq!(parse_price("2499.50"), 2499.5);
        assert_eq!(parse_price("free"), 0.0);
        assert_eq!(parse_price(""), 0.0);
        assert_eq!(parse_price("1.2.3"), 0.0);
    }

    #[test]
    fn test_id_from_url() {
        assert_eq!(
            id_from_url("https://stackskb.com/product/gmk-olivia/").as_deref(),
            Some("gmk-olivia")
        );
        assert_eq!(
            id_from_url("https://shop.test/collections/keycaps/products/epbt-kuro").as_deref(),
            Some("epbt-kuro")
        );
        assert_eq!(
            id_from_url("https://shop.test/some-page").as_deref(),
            Some("some-page")
        );
        assert_eq!(id_from_url("https://shop.test/index.html"), None);
        assert_eq!(id_from_url("not a url"), None);
    }

    #[test]
    fn test_derive_source_id_falls_back_to_name() {
        assert_eq!(derive_source_id("", "ePBT Kuro Shiro"), "epbt-kuro-shiro");
    }
}
