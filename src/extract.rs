use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::types::ItemAttrs;

/// Field extraction for keg detail pages.
///
/// The selectors encode the catalog's fixed page structure. Extraction
/// never fails as a whole: each field falls back to its unknown value
/// independently.
pub struct AttributeExtractor {
    name_sel: Selector,
    price_sel: Selector,
    avail_sel: Selector,
    desc_sel: Selector,
}

impl AttributeExtractor {
    pub fn new() -> Self {
        Self {
            name_sel: Selector::parse("h1").expect("valid selector"),
            price_sel: Selector::parse("span.ProductDetailItemPrice").expect("valid selector"),
            avail_sel: Selector::parse("em").expect("valid selector"),
            desc_sel: Selector::parse("td.ProductDetailCell p").expect("valid selector"),
        }
    }

    pub fn extract(&self, doc: &Html) -> ItemAttrs {
        let mut attrs = ItemAttrs::default();

        match first_text(doc, &self.name_sel) {
            Some(display) => {
                let (name, volume) = split_name_volume(&display);
                attrs.name = name;
                attrs.volume = volume;
                if attrs.volume.is_none() {
                    debug!("no volume in display name '{}'", display);
                }
            }
            None => debug!("detail page has no title heading"),
        }

        attrs.price = first_text(doc, &self.price_sel).and_then(|raw| parse_price(&raw));

        attrs.availability = first_text(doc, &self.avail_sel)
            .and_then(|raw| raw.split_whitespace().next().map(str::to_string))
            .and_then(|token| token.parse::<u32>().ok());

        attrs.description = first_text(doc, &self.desc_sel).unwrap_or_default();

        attrs
    }
}

impl Default for AttributeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector).next().map(|el| {
        el.text()
            .collect::<String>()
            .trim()
            .to_string()
    })
}

/// Split a display name like "Stone IPA (15.5 Gal)" into the name and
/// the volume parsed from inside the parentheses. Without a
/// parenthesized numeric volume the item cannot be scored later.
pub fn split_name_volume(display: &str) -> (String, Option<f64>) {
    match display.split_once('(') {
        Some((head, tail)) => {
            let inside = tail.split(')').next().unwrap_or("");
            let volume = Regex::new(r"\d+\.?\d*")
                .unwrap()
                .find(inside)
                .and_then(|m| m.as_str().parse::<f64>().ok());
            (head.trim().to_string(), volume)
        }
        None => (display.trim().to_string(), None),
    }
}

/// Parse a price cell, tolerating a leading currency symbol.
pub fn parse_price(raw: &str) -> Option<f64> {
    raw.trim()
        .trim_start_matches('$')
        .trim()
        .parse::<f64>()
        .ok()
}

/// Collect the rendered text of a document, skipping script and style
/// blocks. Used when scanning search-result pages for ABV mentions.
pub fn visible_text(doc: &Html) -> String {
    let mut parts = Vec::new();
    collect_text(&doc.root_element(), &mut parts);
    parts.join(" ")
}

fn collect_text(element: &ElementRef, parts: &mut Vec<String>) {
    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            if matches!(el.value().name(), "script" | "style" | "noscript") {
                continue;
            }
            collect_text(&el, parts);
        } else if let Some(text) = child.value().as_text() {
            let trimmed = text.text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
    }
}
