//! C2 — HTML scraping with a reference-counted page-slot pool.
//!
//! Playwright's `BrowserContext` has no first-class equivalent in
//! chromiumoxide, so the acquire/release/retire accounting that the donor
//! builds around a pool of browser contexts is rebuilt here around a pool of
//! configured [`chromiumoxide::page::Page`] handles instead. The concurrency
//! contract (ref-counted acquire, retire-then-drain, single active slot) is
//! unchanged; only the resource being pooled differs.

mod slot;

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tracing::{info, warn};

use crate::browser::BrowserManager;
use crate::config::AppConfig;
use crate::error::{BrowserError, ScrapeError};
use crate::pdf::PdfService;

pub use slot::{ContextSlot, PageSlotGuard, SlotPool};

/// Resource types blocked to keep scraped pages cheap: images, media, fonts,
/// stylesheets and anything not recognized as essential.
const BLOCKED_RESOURCE_TYPES: &[&str] = &["Image", "Media", "Font", "Stylesheet", "Other"];

pub struct ScrapeService {
    browser: Arc<BrowserManager>,
    pool: Arc<SlotPool>,
    config: AppConfig,
    pdf: Option<Arc<PdfService>>,
}

/// A scraped document: title-prefixed text body plus the source URL, mirrors
/// the `langchain_core.documents.Document` shape the donor returns.
#[derive(Debug, Clone)]
pub struct ScrapedDocument {
    pub source: String,
    pub title: String,
    pub content: String,
}

impl ScrapeService {
    pub fn new(browser: Arc<BrowserManager>, config: AppConfig, pdf: Option<Arc<PdfService>>) -> Self {
        Self { browser, pool: Arc::new(SlotPool::new()), config, pdf }
    }

    fn is_browser_disconnect_error(message: &str) -> bool {
        let lowered = message.to_lowercase();
        lowered.contains("browser has been closed")
            || lowered.contains("browser closed")
            || lowered.contains("connection closed")
            || lowered.contains("is not connected")
            || lowered.contains("browser is disconnected")
            || lowered.contains("target closed")
    }

    fn is_context_closed_error(message: &str) -> bool {
        let lowered = message.to_lowercase();
        lowered.contains("target page, context or browser has been closed")
            || lowered.contains("context has been closed")
            || lowered.contains("target page")
            || lowered.contains("closed")
    }

    fn is_expected_navigation_error(message: &str) -> bool {
        let lowered = message.to_lowercase();
        lowered.contains("download is starting")
            || lowered.contains("err_http2_protocol_error")
            || lowered.contains("err_connection_reset")
            || lowered.contains("err_too_many_redirects")
            || lowered.contains("blockedbyclient")
    }

    async fn ensure_browser_health(&self) -> Result<(), ScrapeError> {
        if self.browser.is_connected().await {
            return Ok(());
        }
        warn!("detected disconnected browser while scraping; relaunching");
        self.browser
            .relaunch("scrape_browser_disconnected", false)
            .await
            .map_err(ScrapeError::Browser)?;
        if !self.browser.is_connected().await {
            return Err(ScrapeError::Browser(BrowserError::Disconnected));
        }
        Ok(())
    }

    /// Apply stealth document-init script and resource blocking to a freshly
    /// created page. Mirrors `_configure_context`'s `apply_stealth_async` +
    /// route handler, scoped to a single page instead of a shared context.
    async fn configure_page(page: &Page) -> Result<(), ScrapeError> {
        page.evaluate_on_new_document(
            "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });",
        )
        .await
        .map_err(|e| ScrapeError::Unexpected(e.to_string()))?;

        page.execute(EnableParams {
            patterns: Some(vec![RequestPattern {
                url_pattern: Some("*".to_string()),
                resource_type: None,
                request_stage: None,
            }]),
            handle_auth_requests: None,
        })
        .await
        .map_err(|e| ScrapeError::Unexpected(e.to_string()))?;

        let mut events = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| ScrapeError::Unexpected(e.to_string()))?;
        let client = page.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let blocked = event
                    .resource_type
                    .as_ref()
                    .map(|rt| BLOCKED_RESOURCE_TYPES.contains(&rt.as_ref()))
                    .unwrap_or(false);
                let result = if blocked {
                    client
                        .execute(FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient))
                        .await
                        .map(|_| ())
                } else {
                    client
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = result {
                    warn!("fetch interception response failed: {e}");
                }
            }
        });

        Ok(())
    }

    async fn create_configured_page(&self) -> Result<Page, ScrapeError> {
        for attempt in 0..2 {
            self.ensure_browser_health().await?;
            let page_result = self
                .browser
                .with_browser(|browser| {
                    Box::pin(async move {
                        browser
                            .new_page("about:blank")
                            .await
                            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))
                    })
                })
                .await;

            match page_result {
                Ok(page) => match Self::configure_page(&page).await {
                    Ok(()) => return Ok(page),
                    Err(e) => {
                        let _ = page.close().await;
                        if attempt == 0 && Self::is_browser_disconnect_error(&e.to_string()) {
                            self.browser.relaunch("scrape_new_context_disconnected", false).await.ok();
                            continue;
                        }
                        return Err(e);
                    }
                },
                Err(e) => {
                    if attempt == 0 && Self::is_browser_disconnect_error(&e.to_string()) {
                        self.browser.relaunch("scrape_new_context_disconnected", false).await.ok();
                        continue;
                    }
                    return Err(ScrapeError::Browser(e));
                }
            }
        }
        Err(ScrapeError::Unexpected("failed to create scrape context".to_string()))
    }

    /// Acquire a slot (creating or reusing the active one), open a page, and
    /// return both wrapped in a guard that releases the slot ref and closes
    /// the page on every exit path the caller takes, including cancellation.
    async fn new_page(&self) -> Result<PageSlotGuard, ScrapeError> {
        let mut last_error = None;
        for attempt in 0..2 {
            let slot_id = self.pool.acquire_active_slot(|| self.create_configured_page()).await?;
            match self.create_configured_page().await {
                Ok(page) => return Ok(PageSlotGuard::new(page, slot_id, self.pool.clone())),
                Err(e) => {
                    self.pool.release(slot_id).await;
                    let message = e.to_string();
                    if !Self::is_context_closed_error(&message) {
                        return Err(e);
                    }
                    self.pool.retire(slot_id, "new_page_context_closed").await;
                    if Self::is_browser_disconnect_error(&message) {
                        self.browser.relaunch("new_page_browser_disconnected", false).await.ok();
                    }
                    last_error = Some(e);
                    if attempt == 0 {
                        continue;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ScrapeError::Unexpected("unable to create a new page".to_string())))
    }

    async fn goto_page(&self, page: &Page, url: &str) -> Result<(), ScrapeError> {
        if url.to_lowercase().ends_with(".pdf") {
            return Err(ScrapeError::Unexpected("PDF URLs are not supported by the HTML scraper".to_string()));
        }
        let timeout = Duration::from_millis(self.config.scrape.timeout_ms);
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                let message = e.to_string();
                if message.to_lowercase().contains("err_http2_protocol_error") {
                    tokio::time::timeout(timeout, page.goto(url))
                        .await
                        .map_err(|_| ScrapeError::Timeout)?
                        .map_err(|e| ScrapeError::Unexpected(e.to_string()))?;
                    Ok(())
                } else {
                    Err(ScrapeError::Unexpected(message))
                }
            }
            Err(_) => Err(ScrapeError::Timeout),
        }
    }

    /// Scrape `url`, returning `None` on any recoverable failure (timeout,
    /// expected navigation error, too-short content) rather than propagating
    /// an error — callers treat absence as "skip this result".
    pub async fn scrape(&self, url: &str, title: Option<&str>) -> Option<ScrapedDocument> {
        if let Some(pdf) = &self.pdf
            && pdf.is_pdf_url(url).await
        {
            return pdf.process_pdf_url(url, title).await;
        }

        let mut last_error: Option<ScrapeError> = None;
        for attempt in 0..2 {
            let guard = match self.new_page().await {
                Ok(v) => v,
                Err(e) => {
                    warn!("error scraping {url}: {e}");
                    return None;
                }
            };
            let slot_id = guard.slot_id;

            let outcome = self.scrape_once(guard.page(), url, title).await;
            guard.close_and_release().await;

            match outcome {
                Ok(doc) => return doc,
                Err(e) => {
                    let message = e.to_string();
                    if attempt == 0 && Self::is_context_closed_error(&message) {
                        if slot_id > 0 {
                            self.pool.retire(slot_id, "scrape_context_closed_during_navigation").await;
                        }
                        if Self::is_browser_disconnect_error(&message) {
                            self.browser.relaunch("scrape_navigation_browser_disconnected", false).await.ok();
                        }
                        last_error = Some(e);
                        continue;
                    }
                    if matches!(e, ScrapeError::Timeout) {
                        info!("timeout while accessing {url}");
                        return None;
                    }
                    if Self::is_expected_navigation_error(&message) {
                        info!("skipping {url}: {message}");
                        return None;
                    }
                    warn!("error scraping {url}: {message}");
                    return None;
                }
            }
        }

        if let Some(e) = last_error {
            warn!("error scraping {url}: {e}");
        }
        None
    }

    async fn scrape_once(
        &self,
        page: &Page,
        url: &str,
        title: Option<&str>,
    ) -> Result<Option<ScrapedDocument>, ScrapeError> {
        self.goto_page(page, url).await?;

        let page_title = page.get_title().await.ok().flatten();
        let html = page
            .content()
            .await
            .map_err(|e| ScrapeError::Unexpected(e.to_string()))?;

        let (resolved_title, text) = tokio::task::spawn_blocking({
            let url = url.to_string();
            let title = title.map(str::to_string);
            move || extract_text_and_title(&html, &url, title.as_deref(), page_title.as_deref())
        })
        .await
        .map_err(|e| ScrapeError::Unexpected(e.to_string()))?;

        if text.len() < self.config.scrape.min_content_chars {
            return Ok(None);
        }

        Ok(Some(ScrapedDocument {
            source: url.to_string(),
            title: resolved_title.clone(),
            content: format!("{resolved_title}\n\n{text}"),
        }))
    }
}

/// Parse rendered HTML down to plain text and a resolved title, in priority
/// order: explicit `title` argument, then the page's own `document.title`,
/// then the HTML `<title>` tag, then the URL itself.
fn extract_text_and_title(
    html: &str,
    url: &str,
    provided_title: Option<&str>,
    page_title: Option<&str>,
) -> (String, String) {
    use scraper::{Html, Selector};

    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap();
    let text: String = document
        .select(&body_selector)
        .next()
        .map(|body| body.text().map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("\n"))
        .unwrap_or_default();

    let title_selector = Selector::parse("title").unwrap();
    let html_title = document.select(&title_selector).next().map(|t| t.text().collect::<String>());

    let resolved = provided_title
        .map(str::to_string)
        .or_else(|| page_title.map(str::to_string))
        .or(html_title)
        .unwrap_or_else(|| url.to_string());

    (resolved, text)
}
