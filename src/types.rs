use scraper::Html;
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::extract::AttributeExtractor;
use crate::fetcher::PageFetcher;

/// Attributes parsed from a keg detail page.
///
/// Every field is best-effort: `None` (or an empty string) marks a
/// value the page did not yield.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemAttrs {
    /// Display name, usually brand plus beer.
    pub name: String,
    /// Price in dollars.
    pub price: Option<f64>,
    /// Volume in gallons.
    pub volume: Option<f64>,
    /// Number of kegs in stock.
    pub availability: Option<u32>,
    /// Free-text description.
    pub description: String,
}

/// A single keg, identified by its catalog URL.
///
/// Attributes are filled in by the first [`Item::ensure_parsed`] call
/// and never change afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub url: String,
    pub short_id: String,
    attrs: Option<ItemAttrs>,
}

impl Item {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            short_id: derive_short_id(url),
            attrs: None,
        }
    }

    pub fn attrs(&self) -> Option<&ItemAttrs> {
        self.attrs.as_ref()
    }

    /// Fetch the detail page and extract attributes, once. Later calls
    /// are no-ops. A failed fetch still marks the item parsed, with
    /// every field unknown.
    pub async fn ensure_parsed(&mut self, fetcher: &PageFetcher, extractor: &AttributeExtractor) {
        if self.attrs.is_some() {
            return;
        }
        let attrs = match fetcher.fetch(&self.url).await {
            Ok(body) => extractor.extract(&Html::parse_document(&body)),
            Err(e) => {
                warn!("keg page {} unavailable: {}", self.url, e);
                ItemAttrs::default()
            }
        };
        self.attrs = Some(attrs);
    }
}

/// Stable short identifier for an item: the trailing path segment of
/// its URL. Listing pages may link the same keg more than once, so
/// crawl dedup keys on this rather than the raw link.
fn derive_short_id(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    match Url::parse(trimmed) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string()),
        Err(_) => trimmed.rsplit('/').next().unwrap_or(trimmed).to_string(),
    }
}
