mod discovery;
mod error;
mod extract;
mod fetcher;
mod fingerprint;
mod human;
mod metrics;
mod retry;
mod selectors;
mod service;
mod session;

pub use discovery::{category_from_url, LinkDiscovery, LinkHarvester};
pub use error::{ScrapeError, ScrapeResult};
pub use extract::{ExtractedItem, FieldExtractor};
pub use fetcher::DetailFetcher;
pub use fingerprint::{FingerprintGenerator, FingerprintProfile, StealthMasker, ViewportSpec};
pub use human::HumanPacer;
pub use metrics::SessionMetrics;
pub use retry::Backoff;
pub use selectors::{scrape_fields, ExtractionDebug, SelectedElement, SelectorMap, SelectorScrape};
pub use service::CatalogScraper;
pub use session::{
    BrowserPageFactory, ProductPage, ProductPageFactory, ScrapeContext, SessionManager,
};
