use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::extract::visible_text;
use crate::fetcher::PageFetcher;
use crate::reference::ReferenceIndex;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How many distinct-domain search results to try per keg.
    pub attempts: usize,
    /// Candidates at or above this percentage are implausible.
    pub ceiling: f64,
    pub search_endpoint: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            ceiling: 30.0,
            search_endpoint: "https://www.google.com/search".to_string(),
        }
    }
}

/// Resolves a keg's alcohol percentage: reference table first, then a
/// web search whose result pages are scanned for an ABV mention.
pub struct AbvResolver {
    fetcher: Arc<PageFetcher>,
    reference: ReferenceIndex,
    config: ResolverConfig,
}

impl AbvResolver {
    pub fn new(fetcher: Arc<PageFetcher>, reference: ReferenceIndex, config: ResolverConfig) -> Self {
        Self {
            fetcher,
            reference,
            config,
        }
    }

    /// `None` means unresolved: the keg is excluded from ranking, it
    /// does not score zero.
    pub async fn resolve(&self, name: &str) -> Option<f64> {
        if name.trim().is_empty() {
            return None;
        }
        if let Some(abv) = self.reference.lookup(name) {
            debug!("reference index hit for '{}': {}%", name, abv);
            return Some(abv);
        }

        let search_url = self.search_url(name);
        let body = match self.fetcher.fetch(&search_url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("search for '{}' failed: {}", name, e);
                return None;
            }
        };
        let targets = {
            let base = Url::parse(&search_url).ok()?;
            let doc = Html::parse_document(&body);
            select_targets(&result_links(&doc, &base), self.config.attempts)
        };

        let mut policy = ConfidencePolicy::new(self.config.ceiling);
        for url in targets {
            let text = match self.fetcher.fetch(&url).await {
                Ok(body) => visible_text(&Html::parse_document(&body)),
                Err(e) => {
                    debug!("skipping result page {}: {}", url, e);
                    continue;
                }
            };
            let Some(candidate) = extract_candidate(&text) else {
                continue;
            };
            debug!("candidate {}% for '{}' from {}", candidate, name, url);
            if let Some(abv) = policy.observe(candidate) {
                return Some(abv);
            }
        }
        policy.finish()
    }

    /// Query in the catalog name plus a topical suffix, words joined
    /// with `+`.
    fn search_url(&self, name: &str) -> String {
        let words: Vec<String> = name
            .split_whitespace()
            .map(|w| utf8_percent_encode(w, NON_ALPHANUMERIC).to_string())
            .collect();
        format!(
            "{}?q={}+alcohol+content",
            self.config.search_endpoint,
            words.join("+")
        )
    }
}

/// Genuine result links from a search page: anchors that are neither
/// in-page navigation (`#`) nor script handlers, made absolute.
fn result_links(doc: &Html, base: &Url) -> Vec<String> {
    let sel = Selector::parse("a[href]").expect("valid selector");
    let mut links = Vec::new();
    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        if let Ok(absolute) = base.join(href) {
            links.push(absolute.to_string());
        }
    }
    links
}

/// Up to `limit` links on distinct registrable domains, in result
/// order. Mirrors of an already-selected source are skipped.
fn select_targets(links: &[String], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for link in links {
        if targets.len() == limit {
            break;
        }
        let Some(domain) = registrable_domain(link) else {
            continue;
        };
        if seen.insert(domain) {
            targets.push(link.clone());
        }
    }
    targets
}

/// Reduce a URL to its registrable domain, so `beer.example.com` and
/// `www.example.com` count as one source. Two-label public suffixes
/// like `co.uk` keep a third label.
fn registrable_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return Some(host);
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return Some(host);
    }
    let tld = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];
    let take = if tld.len() == 2 && matches!(second, "co" | "com" | "net" | "org" | "ac" | "gov" | "edu") {
        3
    } else {
        2
    };
    Some(labels[labels.len() - take..].join("."))
}

/// Find an ABV percentage in page text. Two alternatives: the
/// qualifier before the number ("ABV: 6.5%") or the number before the
/// qualifier ("6.5% ABC").
pub fn extract_candidate(text: &str) -> Option<f64> {
    let pattern = Regex::new(r"(?i)abv[^\d]*(\d+\.?\d*)%|%[^\d]*(\d+\.?\d*)[^\d]*abc").unwrap();
    let caps = pattern.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(2))?
        .as_str()
        .parse::<f64>()
        .ok()
}

/// Sequential acceptance over noisy candidates. A value below half the
/// ceiling is trusted outright; a plausible-but-high value is held and
/// compared against the next one, keeping the lower. Values at or
/// above the ceiling are rejected.
#[derive(Debug)]
pub struct ConfidencePolicy {
    ceiling: f64,
    held: Option<f64>,
}

impl ConfidencePolicy {
    pub fn new(ceiling: f64) -> Self {
        Self {
            ceiling,
            held: None,
        }
    }

    /// Feed the next candidate; `Some` means resolution is decided and
    /// no further pages need fetching.
    pub fn observe(&mut self, candidate: f64) -> Option<f64> {
        if candidate >= self.ceiling {
            debug!("rejecting implausible candidate {}%", candidate);
            return None;
        }
        if candidate < self.ceiling / 2.0 {
            return Some(candidate);
        }
        match self.held {
            Some(held) => Some(held.min(candidate)),
            None => {
                self.held = Some(candidate);
                None
            }
        }
    }

    /// The stream ended: fall back to a held candidate, if any.
    pub fn finish(self) -> Option<f64> {
        self.held
    }
}
