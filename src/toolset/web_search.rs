//! `web_search` — the one tool with internal concurrency (§4.4): ask the
//! search provider for candidate URLs, scrape them concurrently with
//! first-completed fan-in, stop early once enough unique documents are in
//! hand, and render with per-document rolling summaries.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::warn;

use super::render::{render_documents, NO_SCRAPEABLE_CONTENT};
use super::search_provider::SearchProvider;
use crate::config::WebSearchConfig;
use crate::jobs::JobStore;
use crate::model::{ModelClient, Tool};
use crate::pdf::PdfService;
use crate::scrape::{ScrapeService, ScrapedDocument};
use crate::vector::VectorStore;

/// Below this word count a document's full text is used as-is; at or above
/// it, a rolling summary is requested instead so the rendered observation
/// stays a reasonable size for the model context.
const SUMMARIZE_WORD_THRESHOLD: usize = 3000;

pub struct WebSearchTool {
    search: Arc<dyn SearchProvider>,
    scrape: Arc<ScrapeService>,
    vector_store: Arc<dyn VectorStore>,
    pdf: Option<Arc<PdfService>>,
    job_store: Arc<dyn JobStore>,
    summary_model: Arc<dyn ModelClient>,
    session_id: String,
    research_depth: String,
    config: WebSearchConfig,
}

impl WebSearchTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: Arc<dyn SearchProvider>,
        scrape: Arc<ScrapeService>,
        vector_store: Arc<dyn VectorStore>,
        pdf: Option<Arc<PdfService>>,
        job_store: Arc<dyn JobStore>,
        summary_model: Arc<dyn ModelClient>,
        session_id: impl Into<String>,
        research_depth: impl Into<String>,
        config: WebSearchConfig,
    ) -> Self {
        Self {
            search,
            scrape,
            vector_store,
            pdf,
            job_store,
            summary_model,
            session_id: session_id.into(),
            research_depth: research_depth.into(),
            config,
        }
    }

    async fn queue_pdf_fallback_if_needed(&self, url: &str, title: &str, reason: &str) {
        let Some(pdf) = &self.pdf else { return };
        if !pdf.is_pdf_url(url).await {
            return;
        }
        self.job_store.enqueue_pdf_job(&self.session_id, url, title, reason, false).await;
    }

    async fn scrape_with_timeout(&self, url: &str, title: Option<&str>) -> Option<ScrapedDocument> {
        let call = self.scrape.scrape(url, title);
        match tokio::time::timeout(Duration::from_secs_f64(self.config.per_url_timeout_seconds), call).await {
            Ok(document) => document,
            Err(_) => {
                warn!("skipping {url}: scrape exceeded {:.0}s", self.config.per_url_timeout_seconds);
                self.queue_pdf_fallback_if_needed(url, title.unwrap_or(url), "scrape_timeout").await;
                None
            }
        }
    }

    /// Word count below [`SUMMARIZE_WORD_THRESHOLD`] → full text; otherwise a
    /// rolling summary, or `None` (caller falls back to full text) if the
    /// summarizer call fails.
    async fn summarize(&self, document: &ScrapedDocument) -> Option<String> {
        if document.content.split_whitespace().count() < SUMMARIZE_WORD_THRESHOLD {
            return Some(document.content.clone());
        }
        match self
            .summary_model
            .generate_text(
                "Summarize the following without losing any important information.",
                &document.content,
            )
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            _ => None,
        }
    }

    async fn web_search_impl(&self, query: &str, partial: &AsyncMutex<Vec<ScrapedDocument>>, persisted: &AtomicBool) -> String {
        let hits = match self.search.search(query, self.config.search_result_count).await {
            Ok(hits) if !hits.is_empty() => hits,
            Ok(_) => return "No search results found.".to_string(),
            Err(error) => {
                warn!("search provider failed for query '{query}': {error}");
                return "No search results found.".to_string();
            }
        };

        let max_documents = self.config.search_result_count;
        let min_documents_before_stop = self.config.min_documents_before_stop(&self.research_depth);
        let scrape_deadline_seconds = self.config.per_url_timeout_seconds;

        let mut pending: FuturesUnordered<_> = hits
            .into_iter()
            .map(|hit| {
                let title = hit.title.clone();
                async move { self.scrape_with_timeout(&hit.url, title.as_deref()).await }
            })
            .collect();

        let mut documents: Vec<ScrapedDocument> = Vec::new();
        let mut seen_sources: HashSet<String> = HashSet::new();
        let deadline = Instant::now() + Duration::from_secs_f64(scrape_deadline_seconds);

        'fan_in: while !pending.is_empty() && documents.len() < max_documents {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let next = tokio::time::timeout(remaining, pending.next()).await;
            let Ok(Some(maybe_document)) = next else { break };

            if let Some(document) = maybe_document {
                if !document.content.trim().is_empty() && seen_sources.insert(document.source.clone()) {
                    partial.lock().await.push(document.clone());
                    documents.push(document);
                    if documents.len() >= max_documents {
                        break 'fan_in;
                    }
                }
            }

            if documents.len() >= min_documents_before_stop {
                break;
            }
        }

        // Remaining in-flight scrapes are simply dropped here: `pending` goes
        // out of scope at the end of this function, which cancels every
        // still-running future (the async equivalent of the source's
        // cancel-and-await-settlement cleanup, since a dropped Rust future
        // never continues running in the background). Each one still holds
        // its page and slot ref behind a `PageSlotGuard`, whose `Drop` spawns
        // the close/release that a normal return awaits inline, so cancelling
        // here never leaks an open tab or a stuck slot ref.
        drop(pending);

        if documents.is_empty() {
            return NO_SCRAPEABLE_CONTENT.to_string();
        }

        if let Err(error) = self.vector_store.add_data(&self.session_id, &documents).await {
            warn!("failed to persist web_search documents for session '{}': {error}", self.session_id);
        } else {
            persisted.store(true, Ordering::SeqCst);
        }

        let mut bodies = Vec::with_capacity(documents.len());
        for document in &documents {
            bodies.push(self.summarize(document).await);
        }
        render_documents(&documents, &bodies)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Open-ended web search to discover and read new documents relevant to a query."
    }

    async fn call(&self, args: &str) -> String {
        let query = serde_json::from_str::<serde_json::Value>(args)
            .ok()
            .and_then(|v| v.get("query").and_then(|q| q.as_str()).map(str::to_string))
            .unwrap_or_else(|| args.trim().trim_matches('"').to_string());

        let partial = AsyncMutex::new(Vec::new());
        let persisted = AtomicBool::new(false);

        match tokio::time::timeout(
            Duration::from_secs_f64(self.config.total_timeout_seconds),
            self.web_search_impl(&query, &partial, &persisted),
        )
        .await
        {
            Ok(rendered) => rendered,
            Err(_) => {
                warn!("web search tool exceeded total timeout of {:.0}s", self.config.total_timeout_seconds);
                let partial_documents = partial.into_inner();
                if partial_documents.is_empty() {
                    return "An error occured: web search tool timed out, you can try again with a different query.".to_string();
                }
                if !persisted.load(Ordering::SeqCst) {
                    let _ = self.vector_store.add_data(&self.session_id, &partial_documents).await;
                }
                let bodies = vec![None; partial_documents.len()];
                format!(
                    "{}\n\n[Note: web search timed out before full completion. Returning partial results.]",
                    render_documents(&partial_documents, &bodies)
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::toolset::search_provider::{test_support::StubSearchProvider, SearchHit};
    use crate::vector::InMemoryVectorStore;
    use futures::stream::BoxStream;

    struct StubSummaryModel;
    #[async_trait]
    impl ModelClient for StubSummaryModel {
        async fn generate_text(&self, _s: &str, _p: &str) -> Result<String, ModelError> {
            Ok("summary".to_string())
        }
        async fn stream_text(&self, _s: &str, _p: &str) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError> {
            unimplemented!()
        }
        async fn generate_structured_json(&self, _s: &str, _p: &str, _h: &str) -> Result<serde_json::Value, ModelError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn no_search_hits_returns_the_sentinel() {
        let search: Arc<dyn SearchProvider> = Arc::new(StubSearchProvider { hits: vec![] });
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::default());
        let browser = Arc::new(crate::browser::BrowserManager::new(crate::config::AppConfig::default()));
        let scrape = Arc::new(ScrapeService::new(browser, crate::config::AppConfig::default(), None));
        let job_store: Arc<dyn JobStore> = Arc::new(crate::jobs::InMemoryJobStore::default());
        let summary_model: Arc<dyn ModelClient> = Arc::new(StubSummaryModel);

        let tool = WebSearchTool::new(search, scrape, vector_store, None, job_store, summary_model, "s1", "medium", WebSearchConfig::default());
        assert_eq!(tool.call(r#"{"query":"anything"}"#).await, "No search results found.");
    }

    #[test]
    fn search_hit_title_is_optional() {
        let hit = SearchHit { url: "https://x".to_string(), title: None };
        assert!(hit.title.is_none());
    }
}
