//! Chromium-backed automation using headless Chrome.
//!
//! The browser is lazily launched on first use and a single page is shared
//! across calls: the underlying browsing session is not safely shareable, so
//! the worker drives it from one task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::automation::{BrowserAutomation, PageSnapshot, SessionProbe};
use crate::captcha::CaptchaMonitor;
use crate::config::Config;
use crate::error::ArchiveError;
use crate::model::{Attachment, ChannelTarget, ItemId, MessageItem};
use crate::session::Session;

/// Default viewport width in pixels.
const VIEWPORT_WIDTH: u32 = 1280;

/// Default viewport height in pixels.
const VIEWPORT_HEIGHT: u32 = 800;

/// Collects notable DOM markers for [`PageSnapshot`].
const SNAPSHOT_JS: &str = r#"
(() => {
    const markers = [];
    if (document.querySelector('iframe[src*="hcaptcha"], iframe[src*="recaptcha"]')) {
        markers.push('hcaptcha');
    }
    if (document.querySelector('[class*="captcha"], [id*="captcha"]')) {
        markers.push('captcha-container');
    }
    if (document.querySelector('[class*="qrCode"]')) {
        markers.push('qr-code-login');
    }
    if (document.querySelector('form input[name="password"], form[class*="login"]')) {
        markers.push('login-form');
    }
    if (document.querySelector('li[id^="chat-messages-"]')) {
        markers.push('message-list');
    }
    return markers;
})()
"#;

/// Extracts the rendered message list as JSON records.
const READ_ITEMS_JS: &str = r#"
(() => {
    const out = [];
    for (const node of document.querySelectorAll('li[id^="chat-messages-"]')) {
        const rawId = node.id.replace('chat-messages-', '');
        if (!/^\d+$/.test(rawId)) continue;

        const contentNode = node.querySelector('[id^="message-content-"]');
        const authorNode = node.querySelector('h3');
        const timeNode = node.querySelector('time');
        const attachments = [];
        for (const img of node.querySelectorAll('img[class^="originalLink"], a[href*="cdn."] img')) {
            if (img.src) attachments.push(img.src);
        }

        out.push({
            id: rawId,
            author: authorNode ? authorNode.innerText.split('\n')[0] : 'Unknown',
            content: contentNode ? contentNode.innerText : '',
            timestamp: timeNode ? timeNode.getAttribute('datetime') : null,
            attachments,
        });
    }
    return out;
})()
"#;

/// One message as extracted from the DOM.
#[derive(Debug, Deserialize)]
struct RawDomItem {
    id: String,
    author: String,
    content: String,
    timestamp: Option<String>,
    #[serde(default)]
    attachments: Vec<String>,
}

/// Browser automation backed by chromiumoxide.
pub struct ChromiumAutomation {
    headless: bool,
    chrome_path: Option<String>,
    nav_timeout: Duration,
    origin: Url,
    monitor: CaptchaMonitor,
    browser: Arc<Mutex<Option<Browser>>>,
    page: Arc<Mutex<Option<Page>>>,
}

impl ChromiumAutomation {
    /// Create an automation instance from configuration. The platform
    /// origin (used for session probes) is derived from the first channel.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let mut origin = config.channels[0].url().clone();
        origin.set_path("/");
        origin.set_query(None);

        Self {
            headless: config.headless,
            chrome_path: config.chrome_path.clone(),
            nav_timeout: config.nav_timeout,
            origin,
            monitor: CaptchaMonitor::new(),
            browser: Arc::new(Mutex::new(None)),
            page: Arc::new(Mutex::new(None)),
        }
    }

    /// Launch the browser and create the shared page if not already running.
    async fn ensure_page(&self) -> Result<Page, ArchiveError> {
        {
            let page_guard = self.page.lock().await;
            if let Some(page) = page_guard.as_ref() {
                return Ok(page.clone());
            }
        }

        let mut browser_guard = self.browser.lock().await;
        if browser_guard.is_none() {
            info!("Launching browser for channel automation");

            let mut config_builder = BrowserConfig::builder()
                .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
                .request_timeout(self.nav_timeout)
                .no_sandbox()
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--disable-extensions")
                .arg("--disable-sync")
                .arg("--mute-audio")
                .arg("--hide-scrollbars");

            if self.headless {
                config_builder = config_builder.arg("--headless=new");
            } else {
                config_builder = config_builder.with_head();
            }

            if let Some(ref chrome_path) = self.chrome_path {
                config_builder = config_builder.chrome_executable(chrome_path);
            }

            let browser_config = config_builder
                .build()
                .map_err(|e| ArchiveError::Transient(format!("browser config: {e}")))?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| ArchiveError::Transient(format!("browser launch: {e}")))?;

            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!("Browser handler error: {e}");
                    }
                }
            });

            *browser_guard = Some(browser);
            info!("Browser launched");
        }

        let browser = browser_guard.as_ref().expect("browser just initialized");
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ArchiveError::Transient(format!("open page: {e}")))?;

        let mut page_guard = self.page.lock().await;
        *page_guard = Some(page.clone());
        Ok(page)
    }

    /// Run a browser call under the per-call timeout.
    async fn timed<T, F>(&self, what: &str, fut: F) -> Result<T, ArchiveError>
    where
        F: Future<Output = Result<T, chromiumoxide::error::CdpError>>,
    {
        match tokio::time::timeout(self.nav_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ArchiveError::Transient(format!("{what}: {e}"))),
            Err(_) => Err(ArchiveError::Transient(format!(
                "{what}: timed out after {:?}",
                self.nav_timeout
            ))),
        }
    }

    async fn snapshot_current_page(&self, page: &Page) -> Result<PageSnapshot, ArchiveError> {
        let url = self
            .timed("read url", page.url())
            .await?
            .unwrap_or_default();
        let markers: Vec<String> = self
            .timed("snapshot page", async {
                page.evaluate(SNAPSHOT_JS).await?.into_value().map_err(Into::into)
            })
            .await?;
        Ok(PageSnapshot { url, markers })
    }
}

#[async_trait]
impl BrowserAutomation for ChromiumAutomation {
    async fn restore(&self, session: &Session) -> Result<SessionProbe, ArchiveError> {
        let page = self.ensure_page().await?;

        let cookies: Vec<CookieParam> = session
            .blob
            .get("cookies")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ArchiveError::Transient(format!("decode session cookies: {e}")))?
            .unwrap_or_default();

        if !cookies.is_empty() {
            self.timed("restore cookies", page.set_cookies(cookies))
                .await?;
        }

        // Probe validity by loading the platform origin and checking for a
        // logged-out page.
        self.timed("probe navigation", page.goto(self.origin.as_str()))
            .await?;
        let snapshot = self.snapshot_current_page(&page).await?;

        if self.monitor.is_logged_out(&snapshot) {
            debug!(url = %snapshot.url, "Restored session is logged out");
            Ok(SessionProbe::LoggedOut)
        } else {
            Ok(SessionProbe::Valid)
        }
    }

    async fn observe(&self, target: &ChannelTarget) -> Result<PageSnapshot, ArchiveError> {
        let page = self.ensure_page().await?;
        self.timed("navigate to channel", page.goto(target.url().as_str()))
            .await?;
        self.snapshot_current_page(&page).await
    }

    async fn read_items_since(
        &self,
        target: &ChannelTarget,
        after: Option<ItemId>,
    ) -> Result<Vec<MessageItem>, ArchiveError> {
        let page = self.ensure_page().await?;

        let raw: Vec<RawDomItem> = self
            .timed("read messages", async {
                page.evaluate(READ_ITEMS_JS).await?.into_value().map_err(Into::into)
            })
            .await?;

        let now = Utc::now();
        let mut items: Vec<MessageItem> = raw
            .into_iter()
            .filter_map(|raw_item| {
                let Ok(item_id) = raw_item.id.parse::<ItemId>() else {
                    warn!(raw_id = %raw_item.id, "Skipping message with unparseable id");
                    return None;
                };
                if after.is_some_and(|watermark| item_id <= watermark) {
                    return None;
                }
                // Prefer the platform timestamp; fall back to scrape time.
                let observed_at = raw_item
                    .timestamp
                    .as_deref()
                    .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                    .map_or(now, |ts| ts.with_timezone(&Utc));
                Some(MessageItem {
                    channel_id: target.channel_id().to_string(),
                    item_id,
                    author: raw_item.author,
                    content: raw_item.content,
                    attachments: raw_item
                        .attachments
                        .into_iter()
                        .map(|url| Attachment { url })
                        .collect(),
                    observed_at,
                })
            })
            .collect();

        // Uploads must cover items oldest first.
        items.sort_by_key(|item| item.item_id);

        Ok(items)
    }

    async fn export_session(&self) -> Result<Session, ArchiveError> {
        let page = self.ensure_page().await?;
        let cookies = self.timed("export cookies", page.get_cookies()).await?;
        let blob = json!({ "cookies": cookies });
        Ok(Session::new(blob))
    }
}
