//! `url_search` — a single-URL variant of scraping: fetches exactly the page
//! the caller named, persists it, and queues a PDF background fallback when
//! the fetch times out against a PDF URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::render::render_document;
use crate::config::WebSearchConfig;
use crate::jobs::JobStore;
use crate::model::Tool;
use crate::pdf::PdfService;
use crate::scrape::ScrapeService;
use crate::vector::VectorStore;

pub struct UrlSearchTool {
    scrape: Arc<ScrapeService>,
    vector_store: Arc<dyn VectorStore>,
    pdf: Option<Arc<PdfService>>,
    job_store: Arc<dyn JobStore>,
    session_id: String,
    timeout_seconds: f64,
}

impl UrlSearchTool {
    pub fn new(
        scrape: Arc<ScrapeService>,
        vector_store: Arc<dyn VectorStore>,
        pdf: Option<Arc<PdfService>>,
        job_store: Arc<dyn JobStore>,
        session_id: impl Into<String>,
        config: &WebSearchConfig,
    ) -> Self {
        Self { scrape, vector_store, pdf, job_store, session_id: session_id.into(), timeout_seconds: config.per_url_timeout_seconds }
    }

    async fn queue_pdf_fallback_if_needed(&self, url: &str, reason: &str) {
        let Some(pdf) = &self.pdf else { return };
        if !pdf.is_pdf_url(url).await {
            return;
        }
        self.job_store.enqueue_pdf_job(&self.session_id, url, url, reason, false).await;
    }
}

fn extract_url(args: &str) -> String {
    serde_json::from_str::<serde_json::Value>(args)
        .ok()
        .and_then(|v| v.get("url").and_then(|u| u.as_str()).map(str::to_string))
        .unwrap_or_else(|| args.trim().trim_matches('"').to_string())
}

#[async_trait]
impl Tool for UrlSearchTool {
    fn name(&self) -> &str {
        "url_search"
    }

    fn description(&self) -> &str {
        "Fetch a specific page or file by URL that you already found and want to read in full."
    }

    async fn call(&self, args: &str) -> String {
        let url = extract_url(args);
        if url.is_empty() {
            return "No content found at the provided URL.".to_string();
        }

        match tokio::time::timeout(Duration::from_secs_f64(self.timeout_seconds), self.scrape.scrape(&url, None)).await {
            Ok(Some(document)) if !document.content.trim().is_empty() => {
                if let Err(error) = self.vector_store.add_data(&self.session_id, std::slice::from_ref(&document)).await {
                    warn!("failed to persist url_search result for '{url}': {error}");
                }
                render_document(&document, &document.content)
            }
            Ok(_) => "No content found at the provided URL.".to_string(),
            Err(_) => {
                warn!("url_search timed out after {:.0}s fetching '{url}'", self.timeout_seconds);
                self.queue_pdf_fallback_if_needed(&url, "url_tool_timeout").await;
                "No content found at the provided URL.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_extraction_falls_back_to_raw_args() {
        assert_eq!(extract_url(r#"{"url":"https://x"}"#), "https://x");
        assert_eq!(extract_url("https://y"), "https://y");
    }
}
