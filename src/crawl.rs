use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::fetcher::PageFetcher;
use crate::types::Item;

/// Listing pages show this many items per page; pagination offsets land
/// on multiples of it.
pub const PAGE_SIZE: u64 = 100;
const OFFSET_PARAM: &str = "offset";

/// Crawl-wide frontier and dedup state, owned by one engine run and
/// discarded with it.
///
/// Pages and items are deduplicated separately: several listing pages
/// can link the same keg, and the same listing URL can be reachable
/// from several pages.
#[derive(Debug, Default)]
pub struct CrawlState {
    frontier: VecDeque<String>,
    enqueued_pages: HashSet<String>,
    seen_items: HashSet<String>,
}

impl CrawlState {
    fn enqueue_page(&mut self, url: String) -> bool {
        if self.enqueued_pages.insert(url.clone()) {
            self.frontier.push_back(url);
            true
        } else {
            false
        }
    }

    fn next_page(&mut self) -> Option<String> {
        self.frontier.pop_front()
    }

    fn claim_item(&mut self, short_id: &str) -> bool {
        self.seen_items.insert(short_id.to_string())
    }
}

/// Breadth-first traversal of a paginated catalog.
///
/// Single use: state is consumed by one crawl. Items come out in
/// discovery order, each exactly once, as soon as the listing page
/// naming them has been processed.
pub struct CrawlEngine {
    fetcher: Arc<PageFetcher>,
    state: CrawlState,
    ready: VecDeque<Item>,
    discovered: usize,
    budget: usize,
    item_sel: Selector,
    paging_sel: Selector,
}

impl CrawlEngine {
    pub fn new(fetcher: Arc<PageFetcher>, seed: &str, budget: usize) -> Self {
        let mut state = CrawlState::default();
        state.enqueue_page(normalize_page_url(seed));
        Self {
            fetcher,
            state,
            ready: VecDeque::new(),
            discovered: 0,
            budget,
            item_sel: Selector::parse("a.ProductListItemLink").expect("valid selector"),
            paging_sel: Selector::parse("div.ProductListPaging a").expect("valid selector"),
        }
    }

    /// The next discovered keg, or `None` once the frontier is empty or
    /// the item budget is reached. A listing page that fails to fetch
    /// is logged and skipped; the rest of the frontier continues.
    pub async fn next_item(&mut self) -> Option<Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.discovered >= self.budget {
                return None;
            }
            let page = self.state.next_page()?;
            debug!("crawling listing page {}", page);
            let body = match self.fetcher.fetch(&page).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("skipping listing page {}: {}", page, e);
                    continue;
                }
            };
            self.ingest_listing(&page, &body);
        }
    }

    fn ingest_listing(&mut self, page_url: &str, body: &str) {
        let Ok(base) = Url::parse(page_url) else {
            return;
        };
        let doc = Html::parse_document(body);

        for el in doc.select(&self.item_sel) {
            if self.discovered >= self.budget {
                break;
            }
            let Some(link) = usable_href(el.value().attr("href"), &base) else {
                continue;
            };
            let item = Item::new(link.as_str());
            if self.state.claim_item(&item.short_id) {
                self.discovered += 1;
                self.ready.push_back(item);
            }
        }

        for el in doc.select(&self.paging_sel) {
            let Some(link) = usable_href(el.value().attr("href"), &base) else {
                continue;
            };
            if !spawns_more_pages(&link) {
                continue;
            }
            if self.state.enqueue_page(normalize_page_url(link.as_str())) {
                debug!("queued listing page {}", link);
            }
        }
    }
}

fn usable_href(href: Option<&str>, base: &Url) -> Option<Url> {
    let href = href?;
    if href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok()
}

/// A pagination link expands the frontier only when its offset lands on
/// a page boundary. Off-boundary offsets point inside an already-known
/// page range and are leaves; so are links without an offset.
pub fn spawns_more_pages(url: &Url) -> bool {
    match url.query_pairs().find(|(key, _)| key == OFFSET_PARAM) {
        Some((_, value)) => value
            .parse::<u64>()
            .map(|offset| offset % PAGE_SIZE == 0)
            .unwrap_or(false),
        None => false,
    }
}

/// Canonical form used for page dedup: parsed and with the fragment
/// dropped.
fn normalize_page_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}
