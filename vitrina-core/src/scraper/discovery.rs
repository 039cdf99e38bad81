use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::DiscoverySection;

use super::error::{ScrapeError, ScrapeResult};
use super::retry::Backoff;
use super::session::{ProductPage, ProductPageFactory};

pub(crate) fn parse_selector(raw: &str) -> ScrapeResult<Selector> {
    Selector::parse(raw)
        .map_err(|err| ScrapeError::Configuration(format!("invalid css selector {raw:?}: {err}")))
}

pub(crate) fn origin_of(page_url: &str) -> ScrapeResult<Url> {
    let parsed = Url::parse(page_url)
        .map_err(|err| ScrapeError::Configuration(format!("invalid url {page_url:?}: {err}")))?;
    parsed
        .join("/")
        .map_err(|err| ScrapeError::Configuration(format!("no origin for {page_url:?}: {err}")))
}

/// Resolves an href against the page origin. Absolute links pass through;
/// empty or unparseable ones are dropped.
pub(crate) fn absolutize(origin: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http") {
        return Some(raw.to_string());
    }
    origin.join(raw).ok().map(|url| url.to_string())
}

/// Human-readable label from the last path segment of a listing URL.
pub fn category_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return "Unknown".to_string();
    };
    let last = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|part| !part.is_empty()).last())
        .unwrap_or_default();
    let mut chars = last.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Unknown".to_string(),
    }
}

pub struct LinkHarvester {
    primary: Selector,
    fallbacks: Vec<Selector>,
    detail_fragment: String,
}

impl LinkHarvester {
    pub fn new(config: &DiscoverySection) -> ScrapeResult<Self> {
        let primary = parse_selector(&config.primary_selector)?;
        let fallbacks = config
            .fallback_selectors
            .iter()
            .map(|raw| parse_selector(raw))
            .collect::<ScrapeResult<Vec<_>>>()?;
        Ok(Self {
            primary,
            fallbacks,
            detail_fragment: config.detail_href_fragment.clone(),
        })
    }

    /// Collects up to `limit` unique detail URLs in document order. The
    /// primary selector wins outright; each fallback selector additionally
    /// requires the detail fragment in the raw href, and the first fallback
    /// producing any link ends the cascade.
    pub fn harvest(
        &self,
        markup: &str,
        listing_url: &str,
        limit: usize,
    ) -> ScrapeResult<Vec<String>> {
        let origin = origin_of(listing_url)?;
        let document = Html::parse_document(markup);
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        collect_links(&document, &self.primary, None, &origin, limit, &mut seen, &mut urls);
        if urls.is_empty() {
            for fallback in &self.fallbacks {
                collect_links(
                    &document,
                    fallback,
                    Some(self.detail_fragment.as_str()),
                    &origin,
                    limit,
                    &mut seen,
                    &mut urls,
                );
                if !urls.is_empty() {
                    break;
                }
            }
        }
        Ok(urls)
    }
}

#[allow(clippy::too_many_arguments)]
fn collect_links(
    document: &Html,
    selector: &Selector,
    required_fragment: Option<&str>,
    origin: &Url,
    limit: usize,
    seen: &mut HashSet<String>,
    urls: &mut Vec<String>,
) {
    for element in document.select(selector) {
        if urls.len() >= limit {
            return;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Some(fragment) = required_fragment {
            if !href.contains(fragment) {
                continue;
            }
        }
        let Some(absolute) = absolutize(origin, href) else {
            continue;
        };
        if seen.insert(absolute.clone()) {
            urls.push(absolute);
        }
    }
}

/// First crawl stage: one context, one listing navigation, selector-cascade
/// link harvest.
pub struct LinkDiscovery {
    harvester: LinkHarvester,
    backoff: Backoff,
}

impl LinkDiscovery {
    pub fn new(config: &DiscoverySection, backoff: Backoff) -> ScrapeResult<Self> {
        Ok(Self {
            harvester: LinkHarvester::new(config)?,
            backoff,
        })
    }

    pub async fn run(
        &self,
        sessions: &dyn ProductPageFactory,
        listing_url: &str,
        limit: usize,
    ) -> ScrapeResult<Vec<String>> {
        let mut page = sessions.open().await?;
        let outcome = self.collect_urls(&*page, listing_url, limit).await;
        if let Err(err) = page.close().await {
            warn!(error = %err, "failed to close discovery context");
        }
        outcome
    }

    async fn collect_urls(
        &self,
        page: &dyn ProductPage,
        listing_url: &str,
        limit: usize,
    ) -> ScrapeResult<Vec<String>> {
        self.backoff
            .run("listing navigation", |_| page.goto(listing_url))
            .await?;
        page.settle().await?;
        let markup = page.content().await?;
        let urls = self.harvester.harvest(&markup, listing_url, limit)?;
        debug!(
            listing = %listing_url,
            found = urls.len(),
            limit,
            "listing discovery finished"
        );
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoverySection;

    const LISTING_URL: &str = "https://shop.example.com/catalog/skincare";

    fn listing_markup(count: usize) -> String {
        let mut links = String::new();
        for idx in 0..count {
            links.push_str(&format!(
                r#"<a data-testid="product-link" href="/p/item-{idx}">Item {idx}</a>"#
            ));
        }
        format!("<html><body><main>{links}</main></body></html>")
    }

    fn harvester() -> LinkHarvester {
        LinkHarvester::new(&DiscoverySection::default()).unwrap()
    }

    #[test]
    fn primary_selector_collects_in_document_order_up_to_limit() {
        let markup = listing_markup(7);
        let urls = harvester().harvest(&markup, LISTING_URL, 5).unwrap();
        assert_eq!(urls.len(), 5);
        for (idx, url) in urls.iter().enumerate() {
            assert_eq!(url, &format!("https://shop.example.com/p/item-{idx}"));
        }
    }

    #[test]
    fn smaller_limit_yields_prefix_of_larger_limit() {
        let markup = listing_markup(7);
        let h = harvester();
        let three = h.harvest(&markup, LISTING_URL, 3).unwrap();
        let five = h.harvest(&markup, LISTING_URL, 5).unwrap();
        assert_eq!(three.as_slice(), &five[..3]);
    }

    #[test]
    fn duplicate_hrefs_are_collapsed() {
        let markup = r#"<html><body>
            <a data-testid="product-link" href="/p/serum">first</a>
            <a data-testid="product-link" href="/p/serum">again</a>
            <a data-testid="product-link" href="https://shop.example.com/p/serum">absolute</a>
            <a data-testid="product-link" href="/p/cream">other</a>
        </body></html>"#;
        let urls = harvester().harvest(markup, LISTING_URL, 10).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://shop.example.com/p/serum".to_string(),
                "https://shop.example.com/p/cream".to_string(),
            ]
        );
    }

    #[test]
    fn fallback_requires_detail_fragment() {
        let markup = r#"<html><body>
            <a href="/help/contact">contact</a>
            <a href="/p/toner">toner</a>
            <a href="/about">about</a>
            <a href="/p/mask">mask</a>
        </body></html>"#;
        let urls = harvester().harvest(markup, LISTING_URL, 10).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://shop.example.com/p/toner".to_string(),
                "https://shop.example.com/p/mask".to_string(),
            ]
        );
    }

    #[test]
    fn no_links_yields_empty_without_error() {
        let markup = "<html><body><p>nothing for sale</p></body></html>";
        let urls = harvester().harvest(markup, LISTING_URL, 10).unwrap();
        assert!(urls.is_empty());
    }

    #[test]
    fn hrefs_resolve_against_listing_origin() {
        let markup = r#"<html><body>
            <a data-testid="product-link" href="/p/abs-path">a</a>
            <a data-testid="product-link" href="https://cdn.example.net/p/elsewhere">b</a>
        </body></html>"#;
        let urls = harvester()
            .harvest(markup, "https://shop.example.com/catalog/deep/path", 10)
            .unwrap();
        assert_eq!(
            urls,
            vec![
                "https://shop.example.com/p/abs-path".to_string(),
                "https://cdn.example.net/p/elsewhere".to_string(),
            ]
        );
    }

    #[test]
    fn category_label_comes_from_last_path_segment() {
        assert_eq!(
            category_from_url("https://shop.example.com/shop/hair/shampoo"),
            "Shampoo"
        );
        assert_eq!(category_from_url("https://shop.example.com/"), "Unknown");
        assert_eq!(category_from_url("not a url"), "Unknown");
    }
}
