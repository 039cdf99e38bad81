use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::ScrapeConfig;

use super::error::ScrapeResult;
use super::extract::{ExtractedItem, FieldExtractor};
use super::human::HumanPacer;
use super::metrics::SessionMetrics;
use super::retry::Backoff;
use super::session::{ProductPage, ProductPageFactory};

/// Second crawl stage: visits detail pages in fixed-size batches. Pages in a
/// batch are fetched concurrently, each on its own browsing context; a
/// randomized pause separates consecutive batches. A failing page drops that
/// URL and never aborts the batch.
pub struct DetailFetcher {
    batch_size: usize,
    pacer: HumanPacer,
    backoff: Backoff,
    extractor: FieldExtractor,
    metrics: Arc<Mutex<SessionMetrics>>,
}

impl DetailFetcher {
    pub fn new(
        config: &ScrapeConfig,
        backoff: Backoff,
        metrics: Arc<Mutex<SessionMetrics>>,
    ) -> ScrapeResult<Self> {
        Ok(Self {
            batch_size: config.fetch.batch_size.max(1),
            pacer: HumanPacer::new(config.delay_range_ms, config.human),
            backoff,
            extractor: FieldExtractor::new(&config.extraction)?,
            metrics,
        })
    }

    pub async fn run(
        &self,
        sessions: &dyn ProductPageFactory,
        urls: &[String],
    ) -> Vec<ExtractedItem> {
        let mut items = Vec::new();
        for (index, batch) in urls.chunks(self.batch_size).enumerate() {
            if index > 0 {
                self.pacer.pause().await;
            }
            debug!(batch = index, size = batch.len(), "fetching detail batch");
            let fetched = join_all(batch.iter().map(|url| self.fetch_one(sessions, url))).await;
            items.extend(fetched.into_iter().flatten());
        }
        items
    }

    async fn fetch_one(
        &self,
        sessions: &dyn ProductPageFactory,
        url: &str,
    ) -> Option<ExtractedItem> {
        let mut page = match sessions.open().await {
            Ok(page) => page,
            Err(err) => {
                warn!(url, error = %err, "could not open detail page");
                self.metrics.lock().unwrap().record_items_dropped(1);
                return None;
            }
        };
        let outcome = self.visit(&*page, url).await;
        if let Err(err) = page.close().await {
            warn!(url, error = %err, "detail page close failed");
        }
        match outcome {
            Ok(Some(item)) => {
                self.metrics.lock().unwrap().record_items_extracted(1);
                Some(item)
            }
            Ok(None) => {
                debug!(url, "no recognizable product on page, dropping");
                self.metrics.lock().unwrap().record_items_dropped(1);
                None
            }
            Err(err) => {
                warn!(url, error = %err, "detail fetch failed");
                self.metrics.lock().unwrap().record_items_dropped(1);
                None
            }
        }
    }

    async fn visit(
        &self,
        page: &dyn ProductPage,
        url: &str,
    ) -> ScrapeResult<Option<ExtractedItem>> {
        self.backoff
            .run("detail navigation", |_| page.goto(url))
            .await?;
        page.settle().await?;
        let markup = page.content().await?;
        Ok(self.extractor.extract(&markup, url))
    }
}
