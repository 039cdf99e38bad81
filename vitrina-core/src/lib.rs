pub mod config;
pub mod error;
pub mod scraper;

pub use config::{load_scrape_config, ScrapeConfig};
pub use error::{ConfigError, Result};
pub use scraper::{
    category_from_url, CatalogScraper, ExtractedItem, ExtractionDebug, FingerprintGenerator,
    FingerprintProfile, ScrapeError, ScrapeResult, SelectedElement, SelectorMap, SelectorScrape,
    SessionManager, SessionMetrics,
};
