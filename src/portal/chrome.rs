use crate::config::Config;
use crate::models::{Category, MonthRange};
use crate::portal::selectors::{self, FROM_DATE_SELECTORS, TO_DATE_SELECTORS};
use crate::portal::traits::ExportPortal;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Browser as CdpBrowser;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Export page driven through headless Chrome
pub struct ChromePortal {
    // keeps the Chrome process alive for as long as the tab is used
    _browser: Browser,
    tab: Arc<Tab>,
    url: String,
    click_retry_max: u32,
    click_retry_wait: Duration,
}

impl ChromePortal {
    /// Launch Chrome with downloads routed into `cfg.temp_dir`
    pub fn launch(cfg: &Config) -> Result<Self> {
        info!(headless = cfg.headless, "Launching Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(cfg.headless)
            .window_size(Some((1400, 900)))
            .path(cfg.chrome_bin.clone())
            .args(vec![OsStr::new("--lang=ko-KR"), OsStr::new("--disable-dev-shm-usage")])
            .idle_browser_timeout(Duration::from_secs(600))
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(Duration::from_secs(30));

        std::fs::create_dir_all(&cfg.temp_dir)?;
        let download_dir = cfg
            .temp_dir
            .canonicalize()
            .with_context(|| format!("Bad download directory {}", cfg.temp_dir.display()))?;
        tab.call_method(CdpBrowser::SetDownloadBehavior {
            behavior: CdpBrowser::SetDownloadBehaviorBehaviorOption::Allow,
            browser_context_id: None,
            download_path: Some(download_dir.to_string_lossy().into_owned()),
            events_enabled: None,
        })
        .context("Failed to route downloads")?;
        debug!(dir = %download_dir.display(), "Downloads routed");

        Ok(Self {
            _browser: browser,
            tab,
            url: cfg.portal_url.clone(),
            click_retry_max: cfg.click_retry_max.max(1),
            click_retry_wait: cfg.click_retry_wait,
        })
    }

    /// Run a blocking browser call off the async runtime
    async fn with_tab<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .context("Browser task panicked")?
    }

    /// Full HTML of the current page
    pub async fn page_html(&self) -> Result<String> {
        self.with_tab(|tab| {
            Ok(eval_string(tab, "document.documentElement.outerHTML")?.unwrap_or_default())
        })
        .await
    }

    /// Save the page HTML and a screenshot for selector debugging
    pub async fn dump_debug(&self, dir: &Path, stem: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let html_path = dir.join(format!("{stem}.html"));
        let png_path = dir.join(format!("{stem}.png"));

        let html = self.page_html().await?;
        std::fs::write(&html_path, &html)?;
        info!("Saved page HTML to {} ({} bytes)", html_path.display(), html.len());

        let png = self
            .with_tab(|tab| {
                tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            })
            .await?;
        std::fs::write(&png_path, png)?;
        info!("Saved screenshot to {}", png_path.display());
        Ok(())
    }

    fn retry_settings(&self) -> (u32, Duration) {
        (self.click_retry_max, self.click_retry_wait)
    }
}

#[async_trait]
impl ExportPortal for ChromePortal {
    async fn open(&self) -> Result<()> {
        let url = self.url.clone();
        info!("Opening {}", url);
        self.with_tab(move |tab| {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            // the form is wired up by scripts after load
            thread::sleep(Duration::from_secs(2));
            install_dialog_hook(tab)
        })
        .await
    }

    async fn select_category(&self, category: Category) -> Result<()> {
        let (tries, wait) = self.retry_settings();
        let script = selectors::tab_click_script(category.label());
        self.with_tab(move |tab| {
            let how = click_with_retry(tab, &script, tries, wait)
                .with_context(|| format!("Tab '{}' not found", category.label()))?;
            debug!(category = %category, via = %how, "Clicked tab");

            thread::sleep(Duration::from_millis(1500));
            // tab switches may reload the page and drop the hook
            let _ = tab.wait_until_navigated();
            install_dialog_hook(tab)?;

            if let Some(active) = eval_string(tab, selectors::ACTIVE_TAB_JS)? {
                if !active.contains(category.label()) {
                    warn!(expected = %category, active = %active, "Active tab does not match");
                }
            }
            Ok(())
        })
        .await
    }

    async fn set_date_range(&self, range: MonthRange) -> Result<()> {
        let from = range.from.format("%Y-%m-%d").to_string();
        let to = range.to.format("%Y-%m-%d").to_string();
        self.with_tab(move |tab| {
            let from_sel = eval_string(tab, &selectors::set_input_script(FROM_DATE_SELECTORS, &from))?
                .context("Start date input not found")?;
            let to_sel = eval_string(tab, &selectors::set_input_script(TO_DATE_SELECTORS, &to))?
                .context("End date input not found")?;
            debug!(%from, %to, %from_sel, %to_sel, "Date range set");
            thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await
    }

    async fn trigger_export(&self) -> Result<()> {
        let (tries, wait) = self.retry_settings();
        self.with_tab(move |tab| {
            let how = click_with_retry(tab, &selectors::export_click_script(), tries, wait)
                .context("Export button not found")?;
            debug!(via = %how, "Clicked export");
            Ok(())
        })
        .await
    }

    async fn take_dialogs(&self) -> Result<Vec<String>> {
        self.with_tab(|tab| {
            let raw = eval_string(tab, selectors::TAKE_DIALOGS_JS)?.unwrap_or_else(|| "[]".into());
            serde_json::from_str(&raw).context("Unexpected dialog buffer contents")
        })
        .await
    }
}

/// Evaluate a script that returns a string (or null)
fn eval_string(tab: &Tab, js: &str) -> Result<Option<String>> {
    let result = tab.evaluate(js, false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(str::to_string)))
}

fn install_dialog_hook(tab: &Tab) -> Result<()> {
    tab.evaluate(selectors::DIALOG_HOOK_JS, false)
        .context("Failed to hook page dialogs")?;
    Ok(())
}

fn click_with_retry(tab: &Tab, script: &str, tries: u32, wait: Duration) -> Result<String> {
    for attempt in 1..=tries {
        match eval_string(tab, script) {
            Ok(Some(how)) => return Ok(how),
            Ok(None) => debug!(attempt, "Click target not present yet"),
            Err(e) => debug!(attempt, error = %e, "Click script failed"),
        }
        thread::sleep(wait);
    }
    bail!("no clickable element after {tries} attempts")
}
