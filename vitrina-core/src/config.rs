use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Root configuration for the scraper. The five top-level knobs mirror the
/// caller-facing contract; the sections below them tune pools, selector
/// chains, and plausibility thresholds and all carry working defaults, so an
/// empty TOML file (or no file at all) yields a usable configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub headless: bool,
    pub proxy_url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub delay_range_ms: DelayRange,
    pub browser: BrowserSection,
    pub fingerprint: FingerprintSection,
    pub retry: RetrySection,
    pub human: HumanSection,
    pub discovery: DiscoverySection,
    pub fetch: FetchSection,
    pub extraction: ExtractionSection,
    pub blocking: BlockingSection,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            proxy_url: None,
            timeout_ms: 60_000,
            max_retries: 3,
            delay_range_ms: DelayRange::default(),
            browser: BrowserSection::default(),
            fingerprint: FingerprintSection::default(),
            retry: RetrySection::default(),
            human: HumanSection::default(),
            discovery: DiscoverySection::default(),
            fetch: FetchSection::default(),
            extraction: ExtractionSection::default(),
            blocking: BlockingSection::default(),
        }
    }
}

/// Inclusive bounds, in milliseconds, for randomized anti-burst pauses.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DelayRange {
    pub min: u64,
    pub max: u64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min: 1_000,
            max: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    /// Explicit Chromium binary; autodetected when absent.
    pub executable_path: Option<String>,
    /// Persistent profile directory; an ephemeral one is created when absent.
    pub user_data_dir: Option<String>,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            user_data_dir: None,
            sandbox: false,
            disable_gpu: false,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    pub user_agents: Vec<String>,
    pub viewports: Vec<[u32; 2]>,
    pub viewport_jitter_px: u32,
    pub regions: Vec<RegionSection>,
    pub enable_canvas_noise: bool,
    pub enable_webgl_mask: bool,
    pub enable_audio_mask: bool,
    pub canvas_noise_range: [i32; 2],
    pub audio_noise: f64,
    pub webgl_vendor: Option<String>,
    pub webgl_renderer: Option<String>,
}

impl Default for FingerprintSection {
    fn default() -> Self {
        Self {
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".into(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".into(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0".into(),
            ],
            viewports: vec![[1920, 1080], [1536, 864], [1440, 900], [1366, 768]],
            viewport_jitter_px: 0,
            regions: vec![RegionSection::default()],
            enable_canvas_noise: true,
            enable_webgl_mask: true,
            enable_audio_mask: true,
            canvas_noise_range: [-2, 2],
            audio_noise: 0.0001,
            webgl_vendor: None,
            webgl_renderer: None,
        }
    }
}

/// Locale, timezone, and coordinates that must stay mutually plausible; a
/// profile never mixes values across regions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegionSection {
    pub locale: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accept_language: String,
}

impl Default for RegionSection {
    fn default() -> Self {
        Self {
            locale: "en-US".into(),
            timezone: "America/New_York".into(),
            latitude: 40.7128,
            longitude: -74.006,
            accept_language: "en-US,en;q=0.9".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub base_delay_ms: u64,
    pub backoff_cap_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            backoff_cap_ms: 30_000,
            jitter_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HumanSection {
    /// Fixed dwell after navigation before the page is considered settled.
    pub settle_ms: u64,
    pub cursor_wander: bool,
    pub wander_steps: [u32; 2],
}

impl Default for HumanSection {
    fn default() -> Self {
        Self {
            settle_ms: 2_000,
            cursor_wander: true,
            wander_steps: [8, 18],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub primary_selector: String,
    pub fallback_selectors: Vec<String>,
    /// Fallback anchors must carry this fragment in their href to count as
    /// detail links; the primary selector is trusted as-is.
    pub detail_href_fragment: String,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            primary_selector: "a[data-testid=\"product-link\"]".into(),
            fallback_selectors: vec![
                "a[href*=\"/p/\"]".into(),
                ".product-tile a".into(),
                ".ProductTile a".into(),
                "a[href*=\"/product/\"]".into(),
            ],
            detail_href_fragment: "/p/".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub batch_size: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self { batch_size: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    pub name_selectors: Vec<String>,
    pub brand_selector: String,
    pub price_selector: String,
    pub description_selector: String,
    pub image_selector: String,
    pub ingredient_keywords: Vec<String>,
    pub ingredient_anchor_max_len: usize,
    pub ingredient_min_len: usize,
    pub ingredient_max_len: usize,
    pub ingredient_min_commas: usize,
    pub ingredient_indicators: Vec<String>,
    pub ingredient_sibling_run: usize,
    pub claim_keywords: Vec<String>,
    pub claim_anchor_max_len: usize,
    pub claim_min_len: usize,
    pub claim_max_len: usize,
    pub claim_indicators: Vec<String>,
    pub claim_sibling_run: usize,
    pub claim_fallback_patterns: Vec<String>,
    pub claim_fallback_max: usize,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            name_selectors: vec![
                "h1[data-testid=\"product-title\"]".into(),
                "h1.ProductHero__title".into(),
                "h1[class*=\"product-title\"]".into(),
                "h1[class*=\"ProductTitle\"]".into(),
                ".product-title h1".into(),
                ".ProductHero h1".into(),
                "h1".into(),
                "[data-testid=\"product-name\"]".into(),
            ],
            brand_selector: "[data-testid=\"product-brand\"]".into(),
            price_selector: "[data-testid=\"product-price\"]".into(),
            description_selector: ".ProductDetail__description".into(),
            image_selector: ".ProductHero__image img".into(),
            ingredient_keywords: vec!["ingredients".into()],
            ingredient_anchor_max_len: 50,
            ingredient_min_len: 20,
            ingredient_max_len: 2_000,
            ingredient_min_commas: 3,
            ingredient_indicators: vec![
                "Aqua".into(),
                "Water".into(),
                r"Sodium\s+\w+".into(),
                "Glycerin".into(),
                "Dimethicone".into(),
                "Parfum".into(),
                "Fragrance".into(),
                r"Citric\s+Acid".into(),
            ],
            ingredient_sibling_run: 2,
            claim_keywords: vec![
                "benefits".into(),
                "details".into(),
                "claims".into(),
                "what it does".into(),
                "key benefits".into(),
                "product benefits".into(),
                "leaves hair".into(),
                "provides".into(),
                "cleanses".into(),
                "nourishes".into(),
                "hydrates".into(),
                "strengthens".into(),
                "repairs".into(),
            ],
            claim_anchor_max_len: 100,
            claim_min_len: 20,
            claim_max_len: 500,
            claim_indicators: vec![
                "leaves hair".into(),
                "provides".into(),
                "cleanses".into(),
                "nourishes".into(),
                "hydrates".into(),
                "strengthens".into(),
                "repairs".into(),
                "soft".into(),
                "silky".into(),
                "manageable".into(),
                "shine".into(),
                "conditioning".into(),
                r"\d+x more".into(),
                r"\d+% more".into(),
            ],
            claim_sibling_run: 3,
            claim_fallback_patterns: vec![
                r"(?:leaves hair|provides|cleanses|nourishes|hydrates|strengthens|repairs)[^.!?]*[.!?]".into(),
                r"(?:\d+x more|\d+% more|\d+x stronger)[^.!?]*[.!?]".into(),
                r"(?:soft|silky|smooth|manageable|shiny|healthy)[^.!?]*hair[^.!?]*[.!?]".into(),
            ],
            claim_fallback_max: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlockingSection {
    /// Case-insensitive markers checked against the page title.
    pub title_markers: Vec<String>,
    /// Case-sensitive markers checked against the raw markup.
    pub body_markers: Vec<String>,
}

impl Default for BlockingSection {
    fn default() -> Self {
        Self {
            title_markers: vec!["access denied".into(), "blocked".into()],
            body_markers: vec!["Access Denied".into()],
        }
    }
}

pub fn load_scrape_config<P: AsRef<Path>>(path: P) -> Result<ScrapeConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
