use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ScrapeConfig;

use super::error::{ScrapeError, ScrapeResult};
use super::fingerprint::{FingerprintGenerator, FingerprintProfile, StealthMasker};
use super::human::HumanPacer;
use super::metrics::SessionMetrics;

/// Owns the single Chromium process and hands out isolated, fingerprinted
/// page contexts. All contexts share the one browser.
#[derive(Debug)]
pub struct SessionManager {
    config: ScrapeConfig,
    generator: FingerprintGenerator,
    masker: StealthMasker,
    metrics: Arc<Mutex<SessionMetrics>>,
    session: Option<BrowserSession>,
}

#[derive(Debug)]
struct BrowserSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("browser session dropped without explicit close");
            }
        }
    }
}

impl SessionManager {
    pub fn new(config: ScrapeConfig) -> Self {
        let generator = FingerprintGenerator::new(config.fingerprint.clone());
        let masker = StealthMasker::new(config.fingerprint.clone());
        Self {
            config,
            generator,
            masker,
            metrics: Arc::new(Mutex::new(SessionMetrics::default())),
            session: None,
        }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics.lock().unwrap().clone()
    }

    pub(crate) fn metrics_handle(&self) -> Arc<Mutex<SessionMetrics>> {
        Arc::clone(&self.metrics)
    }

    /// Launches Chromium with a fresh launch-time fingerprint. An already
    /// live session is torn down first.
    pub async fn initialize(&mut self) -> ScrapeResult<()> {
        if self.session.is_some() {
            debug!("tearing down live browser session before relaunch");
            self.close().await?;
        }
        let profile = self.generator.generate();
        let chromium_config = self.build_chromium_config(&profile)?;
        info!(
            ua = %profile.user_agent,
            width = profile.viewport.width,
            height = profile.viewport.height,
            headless = self.config.headless,
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| ScrapeError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        self.metrics.lock().unwrap().record_browser_launch();
        self.session = Some(BrowserSession {
            browser,
            handler_task: Some(handler_task),
        });
        Ok(())
    }

    /// Closes the browser and joins the handler drain task. Safe to call
    /// repeatedly; closing an uninitialized manager is a no-op.
    pub async fn close(&mut self) -> ScrapeResult<()> {
        if let Some(mut session) = self.session.take() {
            info!("shutting down chromium instance");
            if let Err(err) = session.browser.close().await {
                warn!(error = %err, "failed to close browser gracefully");
            }
            if let Some(handle) = session.handler_task.take() {
                if let Err(err) = handle.await {
                    warn!(error = %err, "browser handler join error");
                }
            }
        }
        Ok(())
    }

    /// Opens a new page with its own fingerprint profile applied before any
    /// site script can run.
    pub async fn new_context(&self) -> ScrapeResult<ScrapeContext> {
        let session = self.session.as_ref().ok_or(ScrapeError::NotInitialized)?;
        let profile = self.generator.generate();
        let params = CreateTargetParams::new("about:blank");
        let page = session.browser.new_page(params).await?;
        if let Err(err) = self.configure_page(&page, &profile).await {
            if let Err(close_err) = page.close().await {
                warn!(error = %close_err, "failed to close partially configured page");
            }
            return Err(err);
        }
        self.metrics.lock().unwrap().record_context_open();
        debug!(
            ua = %profile.user_agent,
            timezone = %profile.timezone,
            "opened scrape context"
        );
        Ok(ScrapeContext {
            page,
            profile,
            metrics: Arc::clone(&self.metrics),
            closed: false,
        })
    }

    async fn configure_page(&self, page: &Page, profile: &FingerprintProfile) -> ScrapeResult<()> {
        page.enable_stealth_mode_with_agent(&profile.user_agent)
            .await?;

        let ua_params = SetUserAgentOverrideParams::builder()
            .user_agent(profile.user_agent.clone())
            .accept_language(profile.accept_language.clone())
            .build()
            .map_err(ScrapeError::Configuration)?;
        page.set_user_agent(ua_params).await?;

        let metrics_params = SetDeviceMetricsOverrideParams::builder()
            .width(profile.viewport.width as i64)
            .height(profile.viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ScrapeError::Configuration)?;
        page.execute(metrics_params).await?;

        page.execute(SetTimezoneOverrideParams::new(profile.timezone.clone()))
            .await?;

        self.masker.apply(page, profile).await?;
        Ok(())
    }

    fn build_chromium_config(&self, profile: &FingerprintProfile) -> ScrapeResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .viewport(ChromiumViewport {
                width: profile.viewport.width,
                height: profile.viewport.height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: profile.viewport.width >= profile.viewport.height,
                has_touch: false,
            })
            .request_timeout(Duration::from_millis(self.config.timeout_ms));

        if let Some(path) = &self.config.browser.executable_path {
            builder = builder.chrome_executable(path);
        }
        if let Some(dir) = &self.config.browser.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.browser.sandbox {
            builder = builder.no_sandbox();
        }

        builder = builder.args(self.launch_args(profile));
        builder.build().map_err(ScrapeError::Configuration)
    }

    fn launch_args(&self, profile: &FingerprintProfile) -> Vec<String> {
        let mut args = vec![
            format!("--user-agent={}", profile.user_agent),
            format!(
                "--window-size={},{}",
                profile.viewport.width, profile.viewport.height
            ),
            format!("--lang={}", profile.locale),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-background-timer-throttling".to_string(),
            "--disable-backgrounding-occluded-windows".to_string(),
            "--disable-renderer-backgrounding".to_string(),
            "--password-store=basic".to_string(),
        ];
        if self.config.browser.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(proxy) = &self.config.proxy_url {
            args.push(format!("--proxy-server={proxy}"));
        }
        args.extend(self.config.browser.extra_args.iter().cloned());
        args
    }
}

/// One fingerprinted page. Closing is balanced against opening even on
/// failure paths; a context dropped without close cleans up through the
/// runtime as a last resort.
#[derive(Debug)]
pub struct ScrapeContext {
    page: Page,
    profile: FingerprintProfile,
    metrics: Arc<Mutex<SessionMetrics>>,
    closed: bool,
}

impl ScrapeContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn profile(&self) -> &FingerprintProfile {
        &self.profile
    }

    pub async fn goto(&self, url: &str) -> ScrapeResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(ScrapeError::Configuration)?;
        self.page
            .goto(params)
            .await
            .map_err(|err| ScrapeError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|err| ScrapeError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        self.metrics.lock().unwrap().record_navigation();
        Ok(())
    }

    pub async fn content(&self) -> ScrapeResult<String> {
        Ok(self.page.content().await?)
    }

    pub async fn close(&mut self) -> ScrapeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.metrics.lock().unwrap().record_context_close();
        self.page.clone().close().await?;
        Ok(())
    }
}

impl Drop for ScrapeContext {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.metrics.lock().unwrap().record_context_close();
        let page = self.page.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = page.close().await {
                    debug!(error = %err, "page close during context drop failed");
                }
            });
        } else {
            warn!("scrape context dropped outside a runtime; page lives until browser shutdown");
        }
    }
}

/// Seam between the pipeline stages and the live browser. Tests drive the
/// stages with scripted implementations.
#[async_trait(?Send)]
pub trait ProductPage {
    async fn goto(&self, url: &str) -> ScrapeResult<()>;
    async fn settle(&self) -> ScrapeResult<()>;
    async fn content(&self) -> ScrapeResult<String>;
    async fn close(&mut self) -> ScrapeResult<()>;
}

#[async_trait(?Send)]
pub trait ProductPageFactory {
    async fn open(&self) -> ScrapeResult<Box<dyn ProductPage>>;
}

pub struct BrowserProductPage {
    context: ScrapeContext,
    pacer: HumanPacer,
}

#[async_trait(?Send)]
impl ProductPage for BrowserProductPage {
    async fn goto(&self, url: &str) -> ScrapeResult<()> {
        self.context.goto(url).await
    }

    async fn settle(&self) -> ScrapeResult<()> {
        self.pacer
            .settle(self.context.page(), self.context.profile().viewport)
            .await
    }

    async fn content(&self) -> ScrapeResult<String> {
        self.context.content().await
    }

    async fn close(&mut self) -> ScrapeResult<()> {
        self.context.close().await
    }
}

pub struct BrowserPageFactory<'a> {
    manager: &'a SessionManager,
}

impl<'a> BrowserPageFactory<'a> {
    pub fn new(manager: &'a SessionManager) -> Self {
        Self { manager }
    }
}

#[async_trait(?Send)]
impl ProductPageFactory for BrowserPageFactory<'_> {
    async fn open(&self) -> ScrapeResult<Box<dyn ProductPage>> {
        let context = self.manager.new_context().await?;
        let config = self.manager.config();
        let pacer = HumanPacer::new(config.delay_range_ms, config.human);
        Ok(Box::new(BrowserProductPage { context, pacer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrapeConfig;

    #[test]
    fn launch_args_carry_identity_and_hardening_flags() {
        let mut config = ScrapeConfig::default();
        config.proxy_url = Some("http://127.0.0.1:8080".into());
        config.browser.disable_gpu = true;
        config.browser.extra_args = vec!["--mute-audio".into()];
        let manager = SessionManager::new(config);
        let profile = FingerprintGenerator::new(manager.config().fingerprint.clone()).generate();

        let args = manager.launch_args(&profile);
        assert!(args
            .iter()
            .any(|arg| arg == &format!("--user-agent={}", profile.user_agent)));
        assert!(args
            .iter()
            .any(|arg| arg == "--disable-blink-features=AutomationControlled"));
        assert!(args
            .iter()
            .any(|arg| arg == "--proxy-server=http://127.0.0.1:8080"));
        assert!(args.iter().any(|arg| arg == "--disable-gpu"));
        assert!(args.iter().any(|arg| arg == "--mute-audio"));
    }

    #[tokio::test]
    async fn context_requires_initialized_session() {
        let manager = SessionManager::new(ScrapeConfig::default());
        let err = manager.new_context().await.unwrap_err();
        assert!(matches!(err, ScrapeError::NotInitialized));
    }

    #[tokio::test]
    async fn close_before_initialize_is_a_noop() {
        let mut manager = SessionManager::new(ScrapeConfig::default());
        manager.close().await.unwrap();
        manager.close().await.unwrap();
        assert!(!manager.is_initialized());
        assert_eq!(manager.metrics().browsers_launched, 0);
    }
}
