use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::crawl::CrawlEngine;
use crate::extract::AttributeExtractor;
use crate::fetcher::PageFetcher;
use crate::resolver::AbvResolver;
use crate::topk::{ScoredItem, TopKSelector};
use crate::types::ItemAttrs;

/// Per-item filters and run limits.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How many kegs to keep.
    pub top_k: usize,
    /// Maximum number of kegs to discover during the crawl.
    pub page_budget: usize,
    /// Kegs priced above this are dropped before resolution.
    pub price_ceiling: Option<f64>,
    /// Every keyword must appear in the description.
    pub include: Vec<String>,
    /// Any matching keyword drops the keg.
    pub exclude: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            page_budget: 10_000,
            price_ceiling: None,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Counters for a completed run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PipelineStats {
    pub discovered: usize,
    pub filtered: usize,
    pub unresolved: usize,
    pub unscorable: usize,
    pub scored: usize,
}

/// Streams kegs from the crawl through filter, resolution, and scoring,
/// keeping the best `top_k` by ratio. Each keg runs the whole chain
/// before the next is touched.
pub struct RankingPipeline {
    fetcher: Arc<PageFetcher>,
    extractor: AttributeExtractor,
    resolver: AbvResolver,
    config: PipelineConfig,
}

impl RankingPipeline {
    pub fn new(fetcher: Arc<PageFetcher>, resolver: AbvResolver, config: PipelineConfig) -> Self {
        Self {
            fetcher,
            extractor: AttributeExtractor::new(),
            resolver,
            config,
        }
    }

    pub async fn run(&self, seed: &str) -> (Vec<ScoredItem>, PipelineStats) {
        let mut engine = CrawlEngine::new(Arc::clone(&self.fetcher), seed, self.config.page_budget);
        let mut selector = TopKSelector::new(self.config.top_k);
        let mut stats = PipelineStats::default();

        while let Some(mut item) = engine.next_item().await {
            stats.discovered += 1;
            item.ensure_parsed(self.fetcher.as_ref(), &self.extractor).await;
            let Some(attrs) = item.attrs() else {
                continue;
            };
            if !self.passes_filters(attrs) {
                stats.filtered += 1;
                continue;
            }
            let Some(abv) = self.resolver.resolve(&attrs.name).await else {
                debug!("no ABV found for '{}'; keg excluded", attrs.name);
                stats.unresolved += 1;
                continue;
            };
            let Some(ratio) = compute_ratio(abv, attrs) else {
                stats.unscorable += 1;
                continue;
            };
            info!("'{}': {}% ABV, ratio {:.4}", attrs.name, abv, ratio);
            stats.scored += 1;
            selector.offer(ScoredItem {
                ratio,
                item: item.clone(),
            });
        }

        info!(
            discovered = stats.discovered,
            filtered = stats.filtered,
            unresolved = stats.unresolved,
            unscorable = stats.unscorable,
            scored = stats.scored,
            "pipeline complete"
        );
        (selector.snapshot(), stats)
    }

    fn passes_filters(&self, attrs: &ItemAttrs) -> bool {
        if let (Some(ceiling), Some(price)) = (self.config.price_ceiling, attrs.price) {
            if price > ceiling {
                debug!("'{}' at ${} is over the price ceiling", attrs.name, price);
                return false;
            }
        }
        let desc = attrs.description.to_lowercase();
        if !self
            .config
            .include
            .iter()
            .all(|kw| desc.contains(&kw.to_lowercase()))
        {
            debug!("'{}' is missing a required keyword", attrs.name);
            return false;
        }
        if self
            .config
            .exclude
            .iter()
            .any(|kw| !kw.is_empty() && desc.contains(&kw.to_lowercase()))
        {
            debug!("'{}' matches an excluded keyword", attrs.name);
            return false;
        }
        true
    }
}

/// Gallons of alcohol per dollar: `abv% * 0.1 * gallons / dollars`.
/// Needs a known volume and a known, nonzero price; anything else
/// yields no ratio at all rather than a misleading zero.
fn compute_ratio(abv: f64, attrs: &ItemAttrs) -> Option<f64> {
    let Some(volume) = attrs.volume else {
        debug!("'{}' has no volume; keg excluded", attrs.name);
        return None;
    };
    match attrs.price {
        Some(price) if price > 0.0 => Some(abv * 0.1 * volume / price),
        _ => {
            warn!("'{}' has an unusable price; keg excluded", attrs.name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetcherConfig;
    use crate::reference::ReferenceIndex;
    use crate::resolver::ResolverConfig;
    use crate::types::Item;

    fn attrs(price: Option<f64>, volume: Option<f64>, description: &str) -> ItemAttrs {
        ItemAttrs {
            name: "Test Keg".to_string(),
            price,
            volume,
            availability: Some(1),
            description: description.to_string(),
        }
    }

    #[test]
    fn ratio_matches_hand_computation() {
        let ratio = compute_ratio(5.0, &attrs(Some(62.0), Some(15.5), "")).unwrap();
        assert!((ratio - 0.125).abs() < 1e-12);
    }

    #[test]
    fn zero_or_unknown_price_yields_no_ratio() {
        assert_eq!(compute_ratio(5.0, &attrs(Some(0.0), Some(15.5), "")), None);
        assert_eq!(compute_ratio(5.0, &attrs(None, Some(15.5), "")), None);
    }

    #[test]
    fn unknown_volume_yields_no_ratio() {
        assert_eq!(compute_ratio(5.0, &attrs(Some(62.0), None, "")), None);
    }

    fn pipeline(config: PipelineConfig) -> RankingPipeline {
        let fetcher = Arc::new(PageFetcher::new(FetcherConfig::default()).unwrap());
        let resolver = AbvResolver::new(
            Arc::clone(&fetcher),
            ReferenceIndex::default(),
            ResolverConfig::default(),
        );
        RankingPipeline::new(fetcher, resolver, config)
    }

    #[test]
    fn price_ceiling_drops_expensive_kegs() {
        let pipeline = pipeline(PipelineConfig {
            price_ceiling: Some(150.0),
            ..Default::default()
        });
        assert!(!pipeline.passes_filters(&attrs(Some(200.0), Some(15.5), "")));
        assert!(pipeline.passes_filters(&attrs(Some(120.0), Some(15.5), "")));
        // unknown price is not the ceiling's business; scoring drops it
        assert!(pipeline.passes_filters(&attrs(None, Some(15.5), "")));
    }

    #[test]
    fn include_keywords_must_all_match() {
        let pipeline = pipeline(PipelineConfig {
            include: vec!["hoppy".to_string(), "citrus".to_string()],
            ..Default::default()
        });
        assert!(pipeline.passes_filters(&attrs(None, None, "A Hoppy ale with citrus notes")));
        assert!(!pipeline.passes_filters(&attrs(None, None, "A hoppy ale")));
    }

    #[test]
    fn any_exclude_keyword_drops() {
        let pipeline = pipeline(PipelineConfig {
            exclude: vec!["sour".to_string()],
            ..Default::default()
        });
        assert!(!pipeline.passes_filters(&attrs(None, None, "A SOUR wheat beer")));
        assert!(pipeline.passes_filters(&attrs(None, None, "A stout")));
    }

    fn detail_page(name: &str, price: &str, desc: &str) -> String {
        format!(
            r#"<html><body>
                <h1>{name}</h1>
                <span class="ProductDetailItemPrice">{price}</span>
                <em>8 in stock</em>
                <table><tr><td class="ProductDetailCell"><p>{desc}</p></td></tr></table>
            </body></html>"#
        )
    }

    fn listing_page(server: &str, ids: &[&str], paging: &[&str]) -> String {
        let items: String = ids
            .iter()
            .map(|id| format!(r#"<a class="ProductListItemLink" href="{server}/kegs/item/{id}">{id}</a>"#))
            .collect();
        let pages: String = paging
            .iter()
            .map(|q| format!(r#"<a href="{server}/kegs?{q}">next</a>"#))
            .collect();
        format!(r#"<html><body>{items}<div class="ProductListPaging">{pages}</div></body></html>"#)
    }

    #[tokio::test]
    async fn end_to_end_ranks_resolvable_kegs() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        server
            .mock("GET", "/kegs?offset=0")
            .with_body(listing_page(&url, &["stone-ipa", "guinness", "sierra"], &["offset=100"]))
            .create_async()
            .await;
        server
            .mock("GET", "/kegs?offset=100")
            .with_body(listing_page(&url, &["anchor", "mystery"], &[]))
            .create_async()
            .await;

        for (id, name, price) in [
            ("stone-ipa", "Stone IPA (15.5 Gal)", "$172.99"),
            ("guinness", "Guinness Draught (13.2 Gal)", "$159.99"),
            ("sierra", "Sierra Nevada Pale Ale (15.5 Gal)", "$154.99"),
            ("anchor", "Anchor Steam (15.5 Gal)", "$148.99"),
            ("mystery", "Mystery Sour (15.5 Gal)", "$99.99"),
        ] {
            server
                .mock("GET", format!("/kegs/item/{id}").as_str())
                .with_body(detail_page(name, price, "A fine keg."))
                .create_async()
                .await;
        }
        // "Mystery Sour" is not in the reference and its search finds
        // nothing, so it must drop out rather than score zero.
        server
            .mock("GET", mockito::Matcher::Regex(r"^/search".to_string()))
            .with_body("<html><body>nothing here</body></html>")
            .create_async()
            .await;

        let reference = ReferenceIndex::from_tokens(
            [
                "Stone", "IPA", "6.9", "Guinness", "Draught", "4.2", "Sierra Nevada", "Pale Ale",
                "5.6", "Anchor", "Steam", "4.9",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        let fetcher = Arc::new(PageFetcher::new(FetcherConfig::default()).unwrap());
        let resolver = AbvResolver::new(
            Arc::clone(&fetcher),
            reference,
            ResolverConfig {
                search_endpoint: format!("{url}/search"),
                ..Default::default()
            },
        );
        let pipeline = RankingPipeline::new(
            fetcher,
            resolver,
            PipelineConfig {
                top_k: 3,
                page_budget: 10,
                ..Default::default()
            },
        );

        let (ranked, stats) = pipeline.run(&format!("{url}/kegs?offset=0")).await;

        assert_eq!(stats.discovered, 5);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.scored, 4);
        assert_eq!(ranked.len(), 3);
        let ids: Vec<&str> = ranked.iter().map(|s| s.item.short_id.as_str()).collect();
        assert_eq!(ids, vec!["stone-ipa", "sierra", "anchor"]);
        for pair in ranked.windows(2) {
            assert!(pair[0].ratio >= pair[1].ratio);
        }
        let mut unique = ids.clone();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        let expected = 6.9 * 0.1 * 15.5 / 172.99;
        assert!((ranked[0].ratio - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unreachable_seed_reports_no_results() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/kegs?offset=0")
            .with_status(404)
            .create_async()
            .await;

        let pipeline = pipeline(PipelineConfig::default());
        let (ranked, stats) = pipeline
            .run(&format!("{}/kegs?offset=0", server.url()))
            .await;
        assert!(ranked.is_empty());
        assert_eq!(stats.discovered, 0);
    }

    #[test]
    fn equal_ratio_items_keep_size_k() {
        let mut selector = TopKSelector::new(2);
        for id in ["a", "b", "c"] {
            selector.offer(ScoredItem {
                ratio: 0.2,
                item: Item::new(&format!("https://shop.example.com/kegs/item/{id}")),
            });
        }
        assert_eq!(selector.len(), 2);
    }
}
