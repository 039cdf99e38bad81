use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use vitrina_core::scraper::{FieldExtractor, LinkHarvester, ScrapeError, SelectedElement};
use vitrina_core::{
    category_from_url, load_scrape_config, CatalogScraper, ExtractedItem, FingerprintGenerator,
    FingerprintProfile, ScrapeConfig, SelectorMap, SelectorScrape, SessionMetrics,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vitrina_core::ConfigError),
    #[error("scrape error: {0}")]
    Scrape(#[from] ScrapeError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid selector argument {0:?}, expected FIELD=CSS[,CSS...]")]
    SelectorArgument(String),
    #[error("configuration check failed: {0}")]
    FailedCheck(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Stealth product-catalog scraper", long_about = None)]
pub struct Cli {
    /// Path to scraper.toml; built-in defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Run the browser with a visible window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
    /// Route browser traffic through this proxy
    #[arg(long)]
    pub proxy: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl a listing page and extract every discovered product
    Crawl(CrawlArgs),
    /// Scrape one page with explicit selector chains
    Scrape(ScrapeArgs),
    /// Print sample fingerprint profiles without launching a browser
    Profile(ProfileArgs),
    /// Validate the configuration and report the effective settings
    Check,
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Listing URL to harvest product links from
    #[arg(long)]
    pub url: String,
    /// Maximum number of product pages to fetch
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Page URL to scrape
    #[arg(long)]
    pub url: String,
    /// Field mapping, repeatable. Commas separate fallback selectors:
    /// --select "price=.price,.product-cost"
    #[arg(long = "select", value_name = "FIELD=CSS[,CSS...]", required = true)]
    pub select: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ProfileArgs {
    /// Number of profiles to generate
    #[arg(long, default_value_t = 3)]
    pub count: usize,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = effective_config(&cli)?;

    match &cli.command {
        Commands::Crawl(args) => {
            let report = crawl(config, args).await?;
            render(&report, cli.format)?;
        }
        Commands::Scrape(args) => {
            let selectors = parse_selectors(&args.select)?;
            let scrape = scrape(config, &args.url, &selectors).await?;
            render(&scrape, cli.format)?;
        }
        Commands::Profile(args) => {
            let report = sample_profiles(&config, args.count);
            render(&report, cli.format)?;
        }
        Commands::Check => {
            let report = check_config(&cli, &config);
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::FailedCheck(
                    "one or more checks reported an error".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn effective_config(cli: &Cli) -> Result<ScrapeConfig> {
    let mut config = match &cli.config {
        Some(path) => load_scrape_config(path)?,
        None => ScrapeConfig::default(),
    };
    if cli.headed {
        config.headless = false;
    }
    if let Some(proxy) = &cli.proxy {
        config.proxy_url = Some(proxy.clone());
    }
    Ok(config)
}

async fn crawl(config: ScrapeConfig, args: &CrawlArgs) -> Result<CrawlReport> {
    let mut scraper = CatalogScraper::new(config)?;
    scraper.initialize().await?;
    let outcome = scraper.discover_and_fetch(&args.url, args.limit).await;
    let close_result = scraper.close().await;
    let items = outcome?;
    close_result?;

    Ok(CrawlReport {
        listing_url: args.url.clone(),
        category: category_from_url(&args.url),
        count: items.len(),
        items,
        metrics: scraper.metrics(),
    })
}

async fn scrape(
    config: ScrapeConfig,
    url: &str,
    selectors: &SelectorMap,
) -> Result<SelectorScrape> {
    let mut scraper = CatalogScraper::new(config)?;
    scraper.initialize().await?;
    let outcome = scraper.scrape_by_selectors(url, selectors).await;
    let close_result = scraper.close().await;
    let scrape = outcome?;
    close_result?;
    Ok(scrape)
}

fn sample_profiles(config: &ScrapeConfig, count: usize) -> ProfileReport {
    let generator = FingerprintGenerator::new(config.fingerprint.clone());
    ProfileReport {
        profiles: (0..count).map(|_| generator.generate()).collect(),
    }
}

/// Parses repeated `FIELD=CSS[,CSS...]` arguments. Repeating a field extends
/// its fallback chain.
fn parse_selectors(specs: &[String]) -> Result<SelectorMap> {
    let mut map = SelectorMap::new();
    for spec in specs {
        let (field, chain) = spec
            .split_once('=')
            .ok_or_else(|| AppError::SelectorArgument(spec.clone()))?;
        let field = field.trim();
        let selectors: Vec<String> = chain
            .split(',')
            .map(str::trim)
            .filter(|selector| !selector.is_empty())
            .map(str::to_string)
            .collect();
        if field.is_empty() || selectors.is_empty() {
            return Err(AppError::SelectorArgument(spec.clone()));
        }
        map.entry(field.to_string()).or_default().extend(selectors);
    }
    Ok(map)
}

fn check_config(cli: &Cli, config: &ScrapeConfig) -> Vec<CheckEntry> {
    let mut entries = Vec::new();

    entries.push(CheckEntry::ok(
        "config source",
        match &cli.config {
            Some(path) => format!("{}", path.display()),
            None => "built-in defaults".to_string(),
        },
    ));
    entries.push(match LinkHarvester::new(&config.discovery) {
        Ok(_) => CheckEntry::ok(
            "discovery selectors",
            format!("1 primary, {} fallbacks", config.discovery.fallback_selectors.len()),
        ),
        Err(err) => CheckEntry::error("discovery selectors", err.to_string()),
    });
    entries.push(match FieldExtractor::new(&config.extraction) {
        Ok(_) => CheckEntry::ok(
            "extraction rules",
            format!("{} name selectors", config.extraction.name_selectors.len()),
        ),
        Err(err) => CheckEntry::error("extraction rules", err.to_string()),
    });
    entries.push(CheckEntry::ok(
        "fingerprint pool",
        format!(
            "{} user agents, {} viewports, {} regions",
            config.fingerprint.user_agents.len(),
            config.fingerprint.viewports.len(),
            config.fingerprint.regions.len()
        ),
    ));
    entries.push(CheckEntry::ok(
        "retry schedule",
        format!(
            "{} attempts, {}ms base, {}ms cap",
            config.max_retries.max(1),
            config.retry.base_delay_ms,
            config.retry.backoff_cap_ms
        ),
    ));
    entries.push(CheckEntry::ok(
        "detail fetch",
        format!(
            "batches of {}, {}..{}ms pauses",
            config.fetch.batch_size.max(1),
            config.delay_range_ms.min,
            config.delay_range_ms.max
        ),
    ));

    entries
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct CrawlReport {
    pub listing_url: String,
    pub category: String,
    pub count: usize,
    pub items: Vec<ExtractedItem>,
    pub metrics: SessionMetrics,
}

impl DisplayFallback for CrawlReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{category}: {count} products from {url}",
            category = self.category,
            count = self.count,
            url = self.listing_url
        )];
        for item in &self.items {
            lines.push(format!(
                "{name} | brand={brand} | price={price}",
                name = item.name,
                brand = item.brand.as_deref().unwrap_or("-"),
                price = item.price.as_deref().unwrap_or("-"),
            ));
        }
        lines.push(format!(
            "contexts: {opened} opened / {closed} closed, {navigated} navigations, {dropped} dropped",
            opened = self.metrics.contexts_opened,
            closed = self.metrics.contexts_closed,
            navigated = self.metrics.pages_navigated,
            dropped = self.metrics.items_dropped,
        ));
        lines.join("\n")
    }
}

impl DisplayFallback for SelectorScrape {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        if let Some(title) = &self.debug.page_title {
            lines.push(format!("page: {title}"));
        }
        for (field, elements) in &self.fields {
            lines.push(format!("{field} ({} matched):", elements.len()));
            for element in elements {
                lines.push(format!("  - {}", element_summary(element)));
            }
        }
        lines.join("\n")
    }
}

fn element_summary(element: &SelectedElement) -> String {
    let mut summary = element.text.clone();
    if let Some(href) = &element.href {
        summary.push_str(&format!(" href={href}"));
    }
    if let Some(src) = &element.src {
        summary.push_str(&format!(" src={src}"));
    }
    if summary.trim().is_empty() {
        summary = "<empty>".to_string();
    }
    summary
}

#[derive(Debug, Serialize)]
pub struct ProfileReport {
    pub profiles: Vec<FingerprintProfile>,
}

impl DisplayFallback for ProfileReport {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for profile in &self.profiles {
            lines.push(format!(
                "{width}x{height} | {locale} | {timezone} | {ua}",
                width = profile.viewport.width,
                height = profile.viewport.height,
                locale = profile.locale,
                timezone = profile.timezone,
                ua = profile.user_agent,
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CheckEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl DisplayFallback for Vec<CheckEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_with_config(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            headed: false,
            proxy: None,
            format: OutputFormat::Json,
            command: Commands::Check,
        }
    }

    #[test]
    fn selector_specs_build_ordered_chains() {
        let specs = vec![
            "price=.price, .product-cost".to_string(),
            "title=h1".to_string(),
            "price=.amount".to_string(),
        ];
        let map = parse_selectors(&specs).unwrap();
        assert_eq!(
            map["price"],
            vec![".price".to_string(), ".product-cost".to_string(), ".amount".to_string()]
        );
        assert_eq!(map["title"], vec!["h1".to_string()]);
    }

    #[test]
    fn malformed_selector_specs_are_rejected() {
        let missing_eq = vec!["price".to_string()];
        assert!(matches!(
            parse_selectors(&missing_eq),
            Err(AppError::SelectorArgument(_))
        ));

        let empty_chain = vec!["price=".to_string()];
        assert!(matches!(
            parse_selectors(&empty_chain),
            Err(AppError::SelectorArgument(_))
        ));
    }

    #[test]
    fn cli_overrides_apply_on_top_of_defaults() {
        let mut cli = cli_with_config(None);
        cli.headed = true;
        cli.proxy = Some("http://127.0.0.1:8080".to_string());
        let config = effective_config(&cli).unwrap();
        assert!(!config.headless);
        assert_eq!(config.proxy_url.as_deref(), Some("http://127.0.0.1:8080"));
    }

    #[test]
    fn config_file_is_loaded_when_given() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "headless = false\nmax_retries = 7\n").unwrap();
        let cli = cli_with_config(Some(file.path().to_path_buf()));
        let config = effective_config(&cli).unwrap();
        assert!(!config.headless);
        assert_eq!(config.max_retries, 7);
    }

    #[test]
    fn default_configuration_passes_every_check() {
        let cli = cli_with_config(None);
        let config = effective_config(&cli).unwrap();
        let entries = check_config(&cli, &config);
        assert!(entries
            .iter()
            .all(|entry| matches!(entry.status, CheckStatus::Ok)));
    }

    #[test]
    fn broken_patterns_fail_the_extraction_check() {
        let cli = cli_with_config(None);
        let mut config = effective_config(&cli).unwrap();
        config.extraction.ingredient_indicators = vec!["(unclosed".to_string()];
        let entries = check_config(&cli, &config);
        let extraction = entries
            .iter()
            .find(|entry| entry.name == "extraction rules")
            .unwrap();
        assert!(matches!(extraction.status, CheckStatus::Error));
    }
}
