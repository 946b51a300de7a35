use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::fetcher::PageFetcher;

/// Trusted pages listing brewery, beer, and alcohol percentage rows.
pub const REFERENCE_SOURCES: &[&str] = &[
    "http://www.realbeer.com/edu/health/calories.php",
    "http://www.realbeer.com/edu/health/calories2.php",
];

/// Known alcohol percentages, indexed by the first letter of the brand
/// so a lookup only scans one bucket. Built once per run from the
/// reference source; read-only afterwards.
///
/// Brands and beers keep first-seen order, which is what breaks ties
/// during fuzzy lookup.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    buckets: HashMap<char, Vec<BrandEntry>>,
}

#[derive(Debug)]
struct BrandEntry {
    name: String,
    beers: Vec<(String, f64)>,
}

impl ReferenceIndex {
    /// Build the index from a raw token stream, one token per table
    /// cell. The stream is cleaned, numeric runs are collapsed, and
    /// the remainder is segmented into (brand, beer, percent) records.
    pub fn from_tokens(raw: impl IntoIterator<Item = String>) -> Self {
        let records = segment_records(collapse_numeric_runs(clean_tokens(raw)));
        let mut index = Self::default();
        for [brand, beer, pct] in records {
            if let Some(abv) = parse_numeric_token(&pct) {
                index.insert(brand, beer, abv);
            }
        }
        index
    }

    fn insert(&mut self, brand: String, beer: String, abv: f64) {
        let Some(letter) = brand.chars().next().map(|c| c.to_ascii_lowercase()) else {
            return;
        };
        let bucket = self.buckets.entry(letter).or_default();
        let pos = match bucket.iter().position(|b| b.name == brand) {
            Some(pos) => pos,
            None => {
                bucket.push(BrandEntry {
                    name: brand,
                    beers: Vec::new(),
                });
                bucket.len() - 1
            }
        };
        let entry = &mut bucket[pos];
        match entry.beers.iter_mut().find(|(name, _)| *name == beer) {
            Some((_, pct)) => *pct = abv,
            None => entry.beers.push((beer, abv)),
        }
    }

    /// Total number of beverages held.
    pub fn len(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.iter())
            .map(|brand| brand.beers.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fuzzy best-match lookup. Buckets for the first letter of each
    /// item-name word are scanned; a brand matches when every word of
    /// it appears in the item name, and among matching brands the beer
    /// with the most words present wins. Ties keep the first find.
    pub fn lookup(&self, item_name: &str) -> Option<f64> {
        let name = item_name.to_ascii_lowercase();
        let mut visited = HashSet::new();
        let mut best: Option<(usize, f64)> = None;

        for word in name.split_whitespace() {
            let Some(letter) = word.chars().next() else {
                continue;
            };
            if !visited.insert(letter) {
                continue;
            }
            let Some(bucket) = self.buckets.get(&letter) else {
                continue;
            };
            for brand in bucket {
                let brand_lower = brand.name.to_ascii_lowercase();
                if !brand_lower.split_whitespace().all(|w| name.contains(w)) {
                    continue;
                }
                for (beer, abv) in &brand.beers {
                    let matched = beer
                        .to_ascii_lowercase()
                        .split_whitespace()
                        .filter(|w| name.contains(*w))
                        .count();
                    if matched == 0 {
                        continue;
                    }
                    if best.map_or(true, |(count, _)| matched > count) {
                        best = Some((matched, *abv));
                    }
                }
            }
        }
        best.map(|(_, abv)| abv)
    }
}

/// Numeric-token test used throughout cleaning. The source's numeric
/// cells carry stray `-`, `<`, and `>` characters ("<0.5"); those are
/// ignored for the test.
pub(crate) fn is_numeric_token(token: &str) -> bool {
    parse_numeric_token(token).is_some()
}

pub(crate) fn parse_numeric_token(token: &str) -> Option<f64> {
    let cleaned: String = token
        .chars()
        .filter(|c| !matches!(c, '-' | '<' | '>'))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Strip whitespace, drop unprintable characters, and discard tokens
/// that end up empty.
fn clean_tokens(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    raw.into_iter()
        .map(|token| {
            token
                .chars()
                .filter(|c| c.is_ascii() && (c.is_ascii_graphic() || c.is_ascii_whitespace()))
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Keep only the first of any run of consecutive numeric tokens. The
/// source rows append trailing numeric columns (calories, carbs) whose
/// meaning we don't need; dropping everything after the first number
/// removes them without knowing which is which.
fn collapse_numeric_runs(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut prev_was_num = false;
    for token in tokens {
        if is_numeric_token(&token) {
            if prev_was_num {
                continue;
            }
            prev_was_num = true;
        } else {
            prev_was_num = false;
        }
        out.push(token);
    }
    out
}

/// Re-segment the cleaned stream into records of exactly (brand, beer,
/// percent), using each numeric token as a record terminator. A record
/// of the wrong width gets one repair attempt: dropping repeated
/// tokens. Still malformed, it is discarded.
fn segment_records(tokens: Vec<String>) -> Vec<[String; 3]> {
    let mut records = Vec::new();
    let mut line: Vec<String> = Vec::new();
    for token in tokens {
        let terminator = is_numeric_token(&token);
        line.push(token);
        if !terminator {
            continue;
        }
        if line.len() != 3 {
            let mut seen = HashSet::new();
            line.retain(|t| seen.insert(t.clone()));
        }
        if line.len() == 3 {
            records.push([line[0].clone(), line[1].clone(), line[2].clone()]);
        } else {
            debug!("discarding malformed reference record {:?}", line);
        }
        line.clear();
    }
    records
}

/// Fetch the reference pages and build the index. A missing source
/// page just contributes no rows.
pub async fn load_reference_index(fetcher: &PageFetcher) -> ReferenceIndex {
    let mut tokens = Vec::new();
    for url in REFERENCE_SOURCES {
        match fetcher.fetch(url).await {
            Ok(body) => {
                let doc = Html::parse_document(&body);
                tokens.extend(table_cell_text(&doc));
            }
            Err(e) => warn!("reference source {} unavailable: {}", url, e),
        }
    }
    let index = ReferenceIndex::from_tokens(tokens);
    info!("reference index holds {} beverages", index.len());
    index
}

/// Cell text of the data table: the second `cellpadding="2"` table on
/// the page carries the rows.
fn table_cell_text(doc: &Html) -> Vec<String> {
    let table_sel = Selector::parse(r#"table[cellpadding="2"]"#).expect("valid selector");
    let cell_sel = Selector::parse("td").expect("valid selector");
    doc.select(&table_sel)
        .nth(1)
        .map(|table| {
            table
                .select(&cell_sel)
                .flat_map(|cell| cell.text().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
