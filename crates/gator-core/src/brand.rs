/// Brand name returned when nothing better is known.
pub const UNKNOWN_BRAND: &str = "Unknown";

/// Curated brand keywords plus a denylist of placeholder vendor names.
///
/// Passed explicitly into plugin constructors; there is no process-wide instance.
#[derive(Debug, Clone)]
pub struct BrandLexicon {
    /// `(keyword, display name)` pairs, checked in order.
    keywords: Vec<(String, String)>,
    /// Lowercased vendor values that carry no brand information.
    generic_vendors: Vec<String>,
}

impl Default for BrandLexicon {
    fn default() -> Self {
        Self::new(
            [
                ("gmk", "GMK"),
                ("epbt", "ePBT"),
                ("wuque studio", "Wuque Studio"),
                ("keychron", "Keychron"),
                ("akko", "Akko"),
                ("drop", "Drop"),
                ("cherry", "Cherry"),
                ("gateron", "Gateron"),
                ("kailh", "Kailh"),
                ("domikey", "Domikey"),
                ("jwk", "JWK"),
                ("tecsee", "Tecsee"),
                ("ttc", "TTC"),
                ("sa", "SA"),
            ],
            ["", "default", "vendor", "unknown", "n/a", "na", "none", "generic", "store"],
        )
    }
}

impl BrandLexicon {
    pub fn new<K, D, V>(
        keywords: impl IntoIterator<Item = (K, D)>,
        generic_vendors: impl IntoIterator<Item = V>,
    ) -> Self
    where
        K: Into<String>,
        D: Into<String>,
        V: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|(k, d)| (k.into().to_lowercase(), d.into()))
                .collect(),
            generic_vendors: generic_vendors
                .into_iter()
                .map(|v| v.into().trim().to_lowercase())
                .collect(),
        }
    }

    /// Add a vendor name treated as a placeholder (e.g. the reseller's own store name).
    pub fn with_generic_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.generic_vendors.push(vendor.into().trim().to_lowercase());
        self
    }

    pub fn is_generic_vendor(&self, vendor: &str) -> bool {
        let vendor = vendor.trim().to_lowercase();
        self.generic_vendors.iter().any(|g| *g == vendor)
    }

    /// First keyword appearing as whole words in `title`.
    pub fn from_title(&self, title: &str) -> Option<&str> {
        let normalized = format!(" {} ", words(title).join(" "));
        self.keywords
            .iter()
            .find(|(keyword, _)| normalized.contains(&format!(" {keyword} ")))
            .map(|(_, display)| display.as_str())
    }

    /// Explicit vendor unless it is a placeholder, else a title keyword, else `None`.
    pub fn resolve(&self, vendor: Option<&str>, title: &str) -> Option<String> {
        if let Some(vendor) = vendor.map(str::trim).filter(|v| !self.is_generic_vendor(v)) {
            return Some(vendor.to_string());
        }
        self.from_title(title).map(str::to_string)
    }

    /// [`BrandLexicon::resolve`] falling back to [`UNKNOWN_BRAND`].
    pub fn infer(&self, vendor: Option<&str>, title: &str) -> String {
        self.resolve(vendor, title)
            .unwrap_or_else(|| UNKNOWN_BRAND.to_string())
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_vendor_wins() {
        let lexicon = BrandLexicon::default();
        assert_eq!(lexicon.infer(Some("Keygem"), "GMK Olivia"), "Keygem");
    }

    #[test]
    fn test_generic_vendor_falls_back_to_title() {
        let lexicon = BrandLexicon::default().with_generic_vendor("Stackskb");
        assert_eq!(lexicon.infer(Some("Default"), "GMK Olivia++ Keycaps"), "GMK");
        assert_eq!(lexicon.infer(Some("StacksKB"), "ePBT Kuro Shiro"), "ePBT");
        assert_eq!(lexicon.infer(None, "Wuque Studio Mammoth75"), "Wuque Studio");
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let lexicon = BrandLexicon::default();
        // "sa" must not match inside "sale" or "samurai".
        assert_eq!(lexicon.infer(None, "Samurai keycaps on sale"), UNKNOWN_BRAND);
        assert_eq!(lexicon.infer(None, "SA Bliss keycap set"), "SA");
    }

    #[test]
    fn test_unknown_fallback() {
        let lexicon = BrandLexicon::default();
        assert_eq!(lexicon.infer(Some("  "), "Mystery switches"), UNKNOWN_BRAND);
        assert!(lexicon.resolve(None, "Mystery switches").is_none());
    }
}
