use std::collections::BTreeMap;

use scraper::{ElementRef, Html};
use serde::Serialize;
use url::Url;

use crate::config::BlockingSection;

use super::discovery::{absolutize, origin_of, parse_selector};
use super::error::{ScrapeError, ScrapeResult};

/// Field name to ordered selector chain. Within a chain, the first selector
/// with at least one match supplies the field; later selectors are still
/// evaluated for their hit counts.
pub type SelectorMap = BTreeMap<String, Vec<String>>;

/// One matched element flattened to the attributes callers care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedElement {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    pub html: String,
}

/// Page-level diagnostics attached to every selector scrape, blocked or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionDebug {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    pub has_main: bool,
    pub body_children: usize,
    pub selector_hits: BTreeMap<String, usize>,
    pub blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorScrape {
    pub fields: BTreeMap<String, Vec<SelectedElement>>,
    pub debug: ExtractionDebug,
}

/// Runs a selector map against fetched markup. Every field key is present in
/// the result, possibly empty. Bot-defense markers are checked last so the
/// debug payload reflects what the page actually contained.
pub fn scrape_fields(
    markup: &str,
    page_url: &str,
    selectors: &SelectorMap,
    blocking: &BlockingSection,
) -> ScrapeResult<SelectorScrape> {
    let document = Html::parse_document(markup);
    let origin = origin_of(page_url)?;

    let mut selector_hits = BTreeMap::new();
    let mut fields = BTreeMap::new();
    for (field, chain) in selectors {
        let mut winner: Option<Vec<SelectedElement>> = None;
        for raw in chain {
            let selector = parse_selector(raw)?;
            let matched: Vec<_> = document.select(&selector).collect();
            selector_hits.insert(raw.clone(), matched.len());
            if winner.is_none() && !matched.is_empty() {
                winner = Some(
                    matched
                        .iter()
                        .map(|element| flatten_element(element, &origin))
                        .collect(),
                );
            }
        }
        fields.insert(field.clone(), winner.unwrap_or_default());
    }

    let mut debug = ExtractionDebug {
        url: page_url.to_string(),
        page_title: page_title(&document)?,
        has_main: document.select(&parse_selector("main")?).next().is_some(),
        body_children: document.select(&parse_selector("body > *")?).count(),
        selector_hits,
        blocked: false,
    };
    if let Some(marker) = block_marker(&debug.page_title, markup, blocking) {
        debug.blocked = true;
        return Err(ScrapeError::Blocked {
            url: page_url.to_string(),
            marker,
            debug: Box::new(debug),
        });
    }
    Ok(SelectorScrape { fields, debug })
}

fn flatten_element(element: &ElementRef, origin: &Url) -> SelectedElement {
    let value = element.value();
    SelectedElement {
        text: element.text().collect::<String>().trim().to_string(),
        href: value.attr("href").and_then(|raw| absolutize(origin, raw)),
        src: value.attr("src").and_then(|raw| absolutize(origin, raw)),
        html: element.inner_html(),
    }
}

fn page_title(document: &Html) -> ScrapeResult<Option<String>> {
    let title = document
        .select(&parse_selector("title")?)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty());
    Ok(title)
}

/// Title markers match case-insensitively; body markers must appear verbatim
/// in the raw markup.
fn block_marker(
    title: &Option<String>,
    markup: &str,
    blocking: &BlockingSection,
) -> Option<String> {
    if let Some(title) = title {
        let lowered = title.to_lowercase();
        if let Some(marker) = blocking
            .title_markers
            .iter()
            .find(|marker| lowered.contains(&marker.to_lowercase()))
        {
            return Some(marker.clone());
        }
    }
    blocking
        .body_markers
        .iter()
        .find(|marker| markup.contains(marker.as_str()))
        .cloned()
}
