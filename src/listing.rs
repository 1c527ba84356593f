use std::collections::HashSet;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::warn;

use crate::domain::MaterialSlug;
use crate::error::HarvestError;

const MATERIAL_HREF_PREFIX: &str = "/material/";
const PAGE_HREF_PATTERN: &str = r"/table\?sid=\d+&page=(\d+)";

/// Material slugs linked from one listing page, deduplicated while keeping
/// the table's order. A malformed href never aborts the page.
pub fn extract_slugs(html: &str) -> Result<Vec<MaterialSlug>, HarvestError> {
    let document = Html::parse_document(html);
    let anchors = create_selector("a[href]")?;

    let mut seen = HashSet::new();
    let mut slugs = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(rest) = href.strip_prefix(MATERIAL_HREF_PREFIX) else {
            continue;
        };
        let candidate = rest.split(['/', '?']).next().unwrap_or_default();
        match candidate.parse::<MaterialSlug>() {
            Ok(slug) => {
                if seen.insert(slug.as_str().to_string()) {
                    slugs.push(slug);
                }
            }
            Err(_) => warn!(href, "skipping malformed material link"),
        }
    }
    Ok(slugs)
}

/// Highest page number (0-indexed, inclusive) referenced by the pagination
/// links, or `None` when the page carries no pagination markers at all.
pub fn last_page(html: &str) -> Result<Option<u32>, HarvestError> {
    let document = Html::parse_document(html);
    let anchors = create_selector("a[href]")?;
    let page_re = Regex::new(PAGE_HREF_PATTERN)
        .map_err(|err| HarvestError::ListingParse(err.to_string()))?;

    let mut last = None;
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        for capture in page_re.captures_iter(href) {
            if let Ok(page) = capture[1].parse::<u32>() {
                last = Some(last.map_or(page, |current: u32| current.max(page)));
            }
        }
    }
    Ok(last)
}

fn create_selector(selector: &str) -> Result<Selector, HarvestError> {
    Selector::parse(selector).map_err(|_| HarvestError::ListingParse(selector.to_string()))
}
