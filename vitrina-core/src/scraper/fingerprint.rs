use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::config::{FingerprintSection, RegionSection};

use super::error::{ScrapeError, ScrapeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
}

/// One coherent browser identity: every field is drawn so the combination
/// stays plausible (desktop agent with desktop viewport, locale matching
/// timezone and geolocation).
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintProfile {
    pub user_agent: String,
    pub viewport: ViewportSpec,
    pub locale: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accept_language: String,
}

#[derive(Debug, Clone)]
pub struct FingerprintGenerator {
    config: FingerprintSection,
}

impl FingerprintGenerator {
    pub fn new(config: FingerprintSection) -> Self {
        Self { config }
    }

    pub fn generate(&self) -> FingerprintProfile {
        let mut rng = rand::thread_rng();
        let user_agent = self
            .config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(default_user_agent);
        let viewport = self.pick_viewport(&mut rng);
        let region = self
            .config
            .regions
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(RegionSection::default);
        FingerprintProfile {
            user_agent,
            viewport,
            locale: region.locale,
            timezone: region.timezone,
            latitude: region.latitude,
            longitude: region.longitude,
            accept_language: region.accept_language,
        }
    }

    fn pick_viewport(&self, rng: &mut impl Rng) -> ViewportSpec {
        let base = self
            .config
            .viewports
            .choose(rng)
            .copied()
            .unwrap_or([1_920, 1_080]);
        let jitter = self.config.viewport_jitter_px;
        let mut spec = ViewportSpec {
            width: base[0],
            height: base[1],
        };
        if jitter > 0 {
            spec.width = spec.width.saturating_sub(rng.gen_range(0..=jitter)).max(800);
            spec.height = spec.height.saturating_sub(rng.gen_range(0..=jitter)).max(600);
        }
        spec
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

/// Installs before-page scripts that hide automation markers and skew the
/// fingerprint surfaces bot defenses probe.
#[derive(Debug, Clone)]
pub struct StealthMasker {
    config: FingerprintSection,
}

impl StealthMasker {
    pub fn new(config: FingerprintSection) -> Self {
        Self { config }
    }

    pub async fn apply(&self, page: &Page, profile: &FingerprintProfile) -> ScrapeResult<()> {
        self.inject(page, identity_script(profile)).await?;
        if self.config.enable_canvas_noise {
            self.inject(page, self.canvas_noise_script()).await?;
        }
        if self.config.enable_webgl_mask {
            self.inject(page, self.webgl_mask_script()).await?;
        }
        if self.config.enable_audio_mask {
            self.inject(page, self.audio_mask_script()).await?;
        }
        Ok(())
    }

    async fn inject(&self, page: &Page, script: String) -> ScrapeResult<()> {
        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(script)
                .build()
                .map_err(ScrapeError::Configuration)?,
        )
        .await?;
        Ok(())
    }

    fn canvas_noise_script(&self) -> String {
        let min = self.config.canvas_noise_range[0];
        let max = self.config.canvas_noise_range[1];
        format!(
            r#"
            (() => {{
                const randomInt = (min, max) => {{
                    return Math.floor(Math.random() * (max - min + 1)) + min;
                }};
                const originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
                HTMLCanvasElement.prototype.toDataURL = function() {{
                    try {{
                        const ctx = this.getContext('2d');
                        if (ctx) {{
                            const imageData = ctx.getImageData(0, 0, this.width, this.height);
                            for (let i = 0; i < imageData.data.length; i += 4) {{
                                const delta = randomInt({min}, {max});
                                imageData.data[i] = Math.min(255, Math.max(0, imageData.data[i] + delta));
                            }}
                            ctx.putImageData(imageData, 0, 0);
                        }}
                    }} catch (_) {{}}
                    return originalToDataURL.apply(this, arguments);
                }};
            }})();
            "#
        )
    }

    fn webgl_mask_script(&self) -> String {
        let vendor = self
            .config
            .webgl_vendor
            .clone()
            .unwrap_or_else(|| "Intel Inc.".to_string());
        let renderer = self
            .config
            .webgl_renderer
            .clone()
            .unwrap_or_else(|| "Intel Iris OpenGL Engine".to_string());
        format!(
            r#"
            (() => {{
                const spoofParam = (proto) => {{
                    if (!proto || !proto.getParameter) {{
                        return;
                    }}
                    const original = proto.getParameter;
                    proto.getParameter = function(param) {{
                        if (param === 37445) {{
                            return '{vendor}';
                        }}
                        if (param === 37446) {{
                            return '{renderer}';
                        }}
                        return original.apply(this, arguments);
                    }};
                }};
                spoofParam(WebGLRenderingContext?.prototype);
                spoofParam(WebGL2RenderingContext?.prototype);
            }})();
            "#
        )
    }

    fn audio_mask_script(&self) -> String {
        let noise = self.config.audio_noise;
        format!(
            r#"
            (() => {{
                const noiseLevel = {noise};
                const origGetChannelData = AudioBuffer?.prototype?.getChannelData;
                if (!origGetChannelData) {{
                    return;
                }}
                AudioBuffer.prototype.getChannelData = function(channel) {{
                    const data = origGetChannelData.call(this, channel);
                    if (data) {{
                        for (let i = 0; i < data.length; i++) {{
                            data[i] = data[i] + (Math.random() * noiseLevel - noiseLevel / 2);
                        }}
                    }}
                    return data;
                }};
            }})();
            "#
        )
    }
}

/// Overrides the navigator surfaces that betray headless Chromium and pins
/// geolocation to the profile's region. Runs before any page script.
fn identity_script(profile: &FingerprintProfile) -> String {
    let locale = &profile.locale;
    let base_lang = locale.split('-').next().unwrap_or("en");
    let latitude = profile.latitude;
    let longitude = profile.longitude;
    format!(
        r#"
        (() => {{
            Object.defineProperty(navigator, 'webdriver', {{
                get: () => undefined,
            }});
            Object.defineProperty(navigator, 'plugins', {{
                get: () => [
                    {{
                        0: {{
                            type: 'application/x-google-chrome-pdf',
                            suffixes: 'pdf',
                            description: 'Portable Document Format',
                        }},
                        description: 'Portable Document Format',
                        filename: 'internal-pdf-viewer',
                        length: 1,
                        name: 'Chrome PDF Plugin',
                    }},
                ],
            }});
            Object.defineProperty(navigator, 'languages', {{
                get: () => ['{locale}', '{base_lang}'],
            }});
            const originalQuery = window.navigator.permissions.query;
            window.navigator.permissions.query = (parameters) => (
                parameters.name === 'notifications'
                    ? Promise.resolve({{ state: Notification.permission }})
                    : originalQuery(parameters)
            );
            window.chrome = {{ runtime: {{}} }};
            const pinnedPosition = {{
                coords: {{
                    latitude: {latitude},
                    longitude: {longitude},
                    accuracy: 50,
                    altitude: null,
                    altitudeAccuracy: null,
                    heading: null,
                    speed: null,
                }},
                timestamp: Date.now(),
            }};
            if (navigator.geolocation) {{
                navigator.geolocation.getCurrentPosition = (success) => success(pinnedPosition);
                navigator.geolocation.watchPosition = (success) => {{
                    success(pinnedPosition);
                    return 0;
                }};
            }}
        }})();
        "#
    )
}
