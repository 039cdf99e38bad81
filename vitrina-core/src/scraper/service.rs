use tracing::{info, warn};

use crate::config::ScrapeConfig;

use super::discovery::LinkDiscovery;
use super::error::{ScrapeError, ScrapeResult};
use super::extract::ExtractedItem;
use super::fetcher::DetailFetcher;
use super::metrics::SessionMetrics;
use super::retry::Backoff;
use super::selectors::{scrape_fields, SelectorMap, SelectorScrape};
use super::session::{BrowserPageFactory, ProductPage, ProductPageFactory, SessionManager};

/// Facade over the whole pipeline: one managed browser, link discovery,
/// batched detail fetching, and ad-hoc selector scrapes. Every operation
/// other than `initialize`/`close` requires a live session.
pub struct CatalogScraper {
    session: SessionManager,
    discovery: LinkDiscovery,
    fetcher: DetailFetcher,
    backoff: Backoff,
}

impl CatalogScraper {
    pub fn new(config: ScrapeConfig) -> ScrapeResult<Self> {
        let backoff = Backoff::new(config.max_retries, config.retry);
        let discovery = LinkDiscovery::new(&config.discovery, backoff.clone())?;
        let session = SessionManager::new(config);
        let fetcher =
            DetailFetcher::new(session.config(), backoff.clone(), session.metrics_handle())?;
        Ok(Self {
            session,
            discovery,
            fetcher,
            backoff,
        })
    }

    /// Snapshot of the session counters.
    pub fn metrics(&self) -> SessionMetrics {
        self.session.metrics()
    }

    pub async fn initialize(&mut self) -> ScrapeResult<()> {
        self.session.initialize().await
    }

    pub async fn close(&mut self) -> ScrapeResult<()> {
        self.session.close().await
    }

    /// Two-stage crawl: harvest up to `limit` product links from the listing,
    /// then fetch and extract each detail page. Pages that fail or carry no
    /// recognizable product are dropped, never failing the crawl.
    pub async fn discover_and_fetch(
        &self,
        listing_url: &str,
        limit: usize,
    ) -> ScrapeResult<Vec<ExtractedItem>> {
        if !self.session.is_initialized() {
            return Err(ScrapeError::NotInitialized);
        }
        let factory = BrowserPageFactory::new(&self.session);
        let urls = self.discovery.run(&factory, listing_url, limit).await?;
        if urls.is_empty() {
            info!(listing = %listing_url, "no product links discovered");
            return Ok(Vec::new());
        }
        info!(
            listing = %listing_url,
            count = urls.len(),
            "fetching discovered product pages"
        );
        Ok(self.fetcher.run(&factory, &urls).await)
    }

    /// Single-page scrape with a caller-supplied selector map.
    pub async fn scrape_by_selectors(
        &self,
        url: &str,
        selectors: &SelectorMap,
    ) -> ScrapeResult<SelectorScrape> {
        if !self.session.is_initialized() {
            return Err(ScrapeError::NotInitialized);
        }
        let factory = BrowserPageFactory::new(&self.session);
        let mut page = factory.open().await?;
        let outcome = self.selector_pass(&*page, url, selectors).await;
        if let Err(err) = page.close().await {
            warn!(url, error = %err, "selector scrape page close failed");
        }
        if let Err(ScrapeError::Blocked { marker, .. }) = &outcome {
            warn!(url, marker = %marker, "page served a bot-defense response");
            self.session
                .metrics_handle()
                .lock()
                .unwrap()
                .record_blocked_page();
        }
        outcome
    }

    async fn selector_pass(
        &self,
        page: &dyn ProductPage,
        url: &str,
        selectors: &SelectorMap,
    ) -> ScrapeResult<SelectorScrape> {
        self.backoff
            .run("selector navigation", |_| page.goto(url))
            .await?;
        page.settle().await?;
        let markup = page.content().await?;
        scrape_fields(&markup, url, selectors, &self.session.config().blocking)
    }
}
