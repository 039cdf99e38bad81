use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vitrina_core::config::{DelayRange, DiscoverySection, RetrySection, ScrapeConfig};
use vitrina_core::scraper::{
    Backoff, DetailFetcher, LinkDiscovery, ProductPage, ProductPageFactory, ScrapeError,
    ScrapeResult, SessionMetrics,
};

const LISTING_URL: &str = "https://shop.example.com/catalog/hair-care";

struct StubBehavior {
    markup: String,
    fail_first: usize,
    always_fail: bool,
}

impl StubBehavior {
    fn ok(markup: String) -> Self {
        Self {
            markup,
            fail_first: 0,
            always_fail: false,
        }
    }

    fn flaky(markup: String, fail_first: usize) -> Self {
        Self {
            markup,
            fail_first,
            always_fail: false,
        }
    }

    fn broken() -> Self {
        Self {
            markup: String::new(),
            fail_first: 0,
            always_fail: true,
        }
    }
}

struct StubRegistry {
    pages: HashMap<String, StubBehavior>,
    goto_counts: Mutex<HashMap<String, usize>>,
    opened: Mutex<usize>,
    closed: Mutex<usize>,
}

impl StubRegistry {
    fn with_pages(pages: Vec<(String, StubBehavior)>) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.into_iter().collect(),
            goto_counts: Mutex::new(HashMap::new()),
            opened: Mutex::new(0),
            closed: Mutex::new(0),
        })
    }

    fn record_goto(&self, url: &str) -> usize {
        let mut counts = self.goto_counts.lock().unwrap();
        let count = counts.entry(url.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn goto_count(&self, url: &str) -> usize {
        self.goto_counts
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    fn opened(&self) -> usize {
        *self.opened.lock().unwrap()
    }

    fn closed(&self) -> usize {
        *self.closed.lock().unwrap()
    }
}

struct StubPage {
    registry: Arc<StubRegistry>,
    current: Mutex<Option<String>>,
    closed: bool,
}

#[async_trait(?Send)]
impl ProductPage for StubPage {
    async fn goto(&self, url: &str) -> ScrapeResult<()> {
        let attempt = self.registry.record_goto(url);
        let behavior = self.registry.pages.get(url).expect("unexpected url");
        if behavior.always_fail || attempt <= behavior.fail_first {
            return Err(ScrapeError::Navigation {
                url: url.to_string(),
                reason: "connection reset".into(),
            });
        }
        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn settle(&self) -> ScrapeResult<()> {
        Ok(())
    }

    async fn content(&self) -> ScrapeResult<String> {
        let current = self.current.lock().unwrap();
        let url = current.as_ref().expect("content before navigation");
        Ok(self.registry.pages[url].markup.clone())
    }

    async fn close(&mut self) -> ScrapeResult<()> {
        if !self.closed {
            self.closed = true;
            *self.registry.closed.lock().unwrap() += 1;
        }
        Ok(())
    }
}

struct StubFactory {
    registry: Arc<StubRegistry>,
}

#[async_trait(?Send)]
impl ProductPageFactory for StubFactory {
    async fn open(&self) -> ScrapeResult<Box<dyn ProductPage>> {
        *self.registry.opened.lock().unwrap() += 1;
        Ok(Box::new(StubPage {
            registry: Arc::clone(&self.registry),
            current: Mutex::new(None),
            closed: false,
        }))
    }
}

fn listing_markup(count: usize) -> String {
    let links: String = (0..count)
        .map(|i| format!("<a data-testid=\"product-link\" href=\"/p/item-{i}\">Item {i}</a>"))
        .collect();
    format!("<html><body><main>{links}</main></body></html>")
}

fn product_markup(name: &str) -> String {
    format!(
        r#"<html><body>
        <h1 data-testid="product-title">{name}</h1>
        <div data-testid="product-brand">Vitrina Labs</div>
        <section>
            <h2>Ingredients</h2>
            <p>Water, Glycerin, Parfum, Citric Acid, Panthenol</p>
        </section>
        </body></html>"#
    )
}

fn product_url(index: usize) -> String {
    format!("https://shop.example.com/p/item-{index}")
}

fn fast_config() -> ScrapeConfig {
    let mut config = ScrapeConfig::default();
    config.delay_range_ms = DelayRange { min: 0, max: 0 };
    config.retry = RetrySection {
        base_delay_ms: 0,
        backoff_cap_ms: 0,
        jitter_ms: 0,
    };
    config
}

fn backoff(config: &ScrapeConfig) -> Backoff {
    Backoff::new(config.max_retries, config.retry)
}

fn fetcher(config: &ScrapeConfig) -> (DetailFetcher, Arc<Mutex<SessionMetrics>>) {
    let metrics = Arc::new(Mutex::new(SessionMetrics::default()));
    let fetcher =
        DetailFetcher::new(config, backoff(config), Arc::clone(&metrics)).expect("valid config");
    (fetcher, metrics)
}

#[tokio::test]
async fn crawl_pipeline_discovers_and_extracts_products() {
    let mut pages = vec![(
        LISTING_URL.to_string(),
        StubBehavior::ok(listing_markup(4)),
    )];
    for index in 0..4 {
        pages.push((
            product_url(index),
            StubBehavior::ok(product_markup(&format!("Product {index}"))),
        ));
    }
    let registry = StubRegistry::with_pages(pages);
    let factory = StubFactory {
        registry: Arc::clone(&registry),
    };
    let config = fast_config();

    let discovery = LinkDiscovery::new(&DiscoverySection::default(), backoff(&config)).unwrap();
    let urls = discovery.run(&factory, LISTING_URL, 10).await.unwrap();
    assert_eq!(urls.len(), 4);

    let (fetcher, metrics) = fetcher(&config);
    let items = fetcher.run(&factory, &urls).await;
    assert_eq!(items.len(), 4);
    for (index, item) in items.iter().enumerate() {
        assert_eq!(item.name, format!("Product {index}"));
        assert_eq!(item.source_url, product_url(index));
        assert_eq!(item.brand.as_deref(), Some("Vitrina Labs"));
        assert_eq!(
            item.ingredients.as_deref(),
            Some("Water, Glycerin, Parfum, Citric acid, Panthenol")
        );
    }

    // one listing context plus one per product, all closed again
    assert_eq!(registry.opened(), 5);
    assert_eq!(registry.closed(), 5);
    let snapshot = metrics.lock().unwrap().clone();
    assert_eq!(snapshot.items_extracted, 4);
    assert_eq!(snapshot.items_dropped, 0);
}

#[tokio::test]
async fn discovery_caps_urls_at_the_requested_limit() {
    let registry = StubRegistry::with_pages(vec![(
        LISTING_URL.to_string(),
        StubBehavior::ok(listing_markup(7)),
    )]);
    let factory = StubFactory {
        registry: Arc::clone(&registry),
    };
    let config = fast_config();

    let discovery = LinkDiscovery::new(&DiscoverySection::default(), backoff(&config)).unwrap();
    let urls = discovery.run(&factory, LISTING_URL, 5).await.unwrap();

    assert_eq!(urls.len(), 5);
    for (index, url) in urls.iter().enumerate() {
        assert_eq!(url, &product_url(index));
    }
    assert_eq!(registry.opened(), 1);
    assert_eq!(registry.closed(), 1);
}

#[tokio::test]
async fn pages_without_a_product_are_dropped_not_fatal() {
    let registry = StubRegistry::with_pages(vec![
        (
            product_url(0),
            StubBehavior::ok(product_markup("Repair Shampoo")),
        ),
        (
            product_url(1),
            StubBehavior::ok("<html><body><p>catalog moved</p></body></html>".into()),
        ),
        (
            product_url(2),
            StubBehavior::ok(product_markup("Glow Conditioner")),
        ),
    ]);
    let factory = StubFactory {
        registry: Arc::clone(&registry),
    };
    let config = fast_config();
    let urls: Vec<String> = (0..3).map(product_url).collect();

    let (fetcher, metrics) = fetcher(&config);
    let items = fetcher.run(&factory, &urls).await;

    let names: Vec<&str> = items.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, vec!["Repair Shampoo", "Glow Conditioner"]);
    assert_eq!(registry.opened(), 3);
    assert_eq!(registry.closed(), 3);
    let snapshot = metrics.lock().unwrap().clone();
    assert_eq!(snapshot.items_extracted, 2);
    assert_eq!(snapshot.items_dropped, 1);
}

#[tokio::test]
async fn permanently_failing_page_is_retried_then_dropped() {
    let registry =
        StubRegistry::with_pages(vec![(product_url(0), StubBehavior::broken())]);
    let factory = StubFactory {
        registry: Arc::clone(&registry),
    };
    let mut config = fast_config();
    config.max_retries = 2;
    let urls = vec![product_url(0)];

    let (fetcher, metrics) = fetcher(&config);
    let items = fetcher.run(&factory, &urls).await;

    assert!(items.is_empty());
    assert_eq!(registry.goto_count(&product_url(0)), 2);
    assert_eq!(registry.opened(), 1);
    assert_eq!(registry.closed(), 1);
    assert_eq!(metrics.lock().unwrap().items_dropped, 1);
}

#[tokio::test]
async fn transient_navigation_failures_recover_within_budget() {
    let registry = StubRegistry::with_pages(vec![(
        product_url(0),
        StubBehavior::flaky(product_markup("Silk Serum"), 2),
    )]);
    let factory = StubFactory {
        registry: Arc::clone(&registry),
    };
    let config = fast_config();
    let urls = vec![product_url(0)];

    let (fetcher, metrics) = fetcher(&config);
    let items = fetcher.run(&factory, &urls).await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "Silk Serum");
    assert_eq!(registry.goto_count(&product_url(0)), 3);
    assert_eq!(metrics.lock().unwrap().items_extracted, 1);
}

#[tokio::test(start_paused = true)]
async fn consecutive_batches_are_separated_by_a_pause() {
    let mut pages = Vec::new();
    for index in 0..4 {
        pages.push((
            product_url(index),
            StubBehavior::ok(product_markup(&format!("Product {index}"))),
        ));
    }
    let registry = StubRegistry::with_pages(pages);
    let factory = StubFactory {
        registry: Arc::clone(&registry),
    };
    let mut config = fast_config();
    config.fetch.batch_size = 2;
    config.delay_range_ms = DelayRange { min: 500, max: 500 };
    let urls: Vec<String> = (0..4).map(product_url).collect();

    let (fetcher, _metrics) = fetcher(&config);
    let started = tokio::time::Instant::now();
    let items = fetcher.run(&factory, &urls).await;

    assert_eq!(items.len(), 4);
    // two batches of two, one inter-batch pause
    assert_eq!(started.elapsed(), std::time::Duration::from_millis(500));
}
