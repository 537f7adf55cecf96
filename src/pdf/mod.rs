//! C3 — PDF detection and extraction, plus the document shape PDF results
//! are rendered into. The background-worker fallback (C10) lives in
//! [`worker`].

pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PdfConfig;
use crate::error::PdfError;
use crate::model::ModelClient;
use crate::scrape::ScrapedDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfExtractStatus {
    Complete,
    PartialTimeout,
    Queued,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PdfExtractResult {
    pub status: PdfExtractStatus,
    pub text: String,
    pub title: String,
    pub error: Option<String>,
    pub total_pages: Option<usize>,
}

pub struct PdfService {
    client: reqwest::Client,
    model: Option<Arc<dyn ModelClient>>,
    config: PdfConfig,
}

impl PdfService {
    pub fn new(model: Option<Arc<dyn ModelClient>>, config: PdfConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.http_timeout_seconds))
            .build()
            .expect("reqwest client builds with static config");
        Self { client, model, config }
    }

    fn derive_title(url: &str, provided: Option<&str>) -> String {
        match provided.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => url.to_string(),
        }
    }

    fn looks_like_pdf_content_type(content_type: Option<&str>) -> bool {
        content_type.map(|c| c.to_lowercase().contains("application/pdf")).unwrap_or(false)
    }

    /// Suffix check, then a HEAD probe, then a 1KB ranged GET. Any positive
    /// signal short-circuits; network errors during probing are swallowed.
    pub async fn is_pdf_url(&self, url: &str) -> bool {
        let lowered = url.trim().to_lowercase();
        if lowered.is_empty() {
            return false;
        }
        if lowered.contains(".pdf") {
            return true;
        }

        let probe_timeout = Duration::from_secs_f64(self.config.probe_timeout_seconds);

        if let Ok(Ok(resp)) = tokio::time::timeout(probe_timeout, self.client.head(url).send()).await {
            let content_type = resp.headers().get("content-type").and_then(|v| v.to_str().ok());
            if Self::looks_like_pdf_content_type(content_type) {
                return true;
            }
            if resp.url().as_str().to_lowercase().contains(".pdf") {
                return true;
            }
        }

        if let Ok(Ok(resp)) = tokio::time::timeout(
            probe_timeout,
            self.client.get(url).header("Range", "bytes=0-1023").send(),
        )
        .await
        {
            let content_type = resp.headers().get("content-type").and_then(|v| v.to_str().ok());
            if Self::looks_like_pdf_content_type(content_type) {
                return true;
            }
            if resp.url().as_str().to_lowercase().contains(".pdf") {
                return true;
            }
        }

        false
    }

    fn merge_chunk_text(existing: &str, incoming: &str) -> String {
        if incoming.is_empty() {
            return existing.to_string();
        }
        if existing.is_empty() {
            return incoming.to_string();
        }
        if incoming.starts_with(existing) {
            return incoming.to_string();
        }
        if existing.ends_with(incoming) {
            return existing.to_string();
        }
        format!("{existing}{incoming}")
    }

    /// Primary extraction path: stream tokens from a model instructed to
    /// read the PDF via URL context, merging chunks under a monotonic
    /// per-attempt deadline.
    pub async fn extract_with_stream(&self, url: &str, title: Option<&str>) -> PdfExtractResult {
        let resolved_title = Self::derive_title(url, title);

        let Some(model) = &self.model else {
            return PdfExtractResult {
                status: PdfExtractStatus::Failed,
                text: String::new(),
                title: resolved_title,
                error: Some("primary model is disabled".to_string()),
                total_pages: None,
            };
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(self.config.primary_timeout_seconds);
        let system_prompt = "Extract the full text content of the PDF at the given URL using URL context.";

        let stream_result = model.stream_text(system_prompt, url).await;
        let mut stream = match stream_result {
            Ok(s) => s,
            Err(e) => {
                return PdfExtractResult {
                    status: PdfExtractStatus::Failed,
                    text: String::new(),
                    title: resolved_title,
                    error: Some(e.to_string()),
                    total_pages: None,
                }
            }
        };

        let mut accumulated = String::new();
        let mut timed_out = false;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                timed_out = true;
                break;
            }
            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(Ok(chunk))) => accumulated = Self::merge_chunk_text(&accumulated, &chunk),
                Ok(Some(Err(e))) => {
                    return PdfExtractResult {
                        status: PdfExtractStatus::Failed,
                        text: accumulated.trim().to_string(),
                        title: resolved_title,
                        error: Some(e.to_string()),
                        total_pages: None,
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let normalized = accumulated.trim().to_string();

        if timed_out {
            if normalized.len() >= self.config.min_partial_chars {
                return PdfExtractResult {
                    status: PdfExtractStatus::PartialTimeout,
                    text: normalized,
                    title: resolved_title,
                    error: None,
                    total_pages: None,
                };
            }
            return PdfExtractResult {
                status: PdfExtractStatus::Queued,
                text: normalized,
                title: resolved_title,
                error: None,
                total_pages: None,
            };
        }

        if normalized.is_empty() {
            return PdfExtractResult {
                status: PdfExtractStatus::Failed,
                text: String::new(),
                title: resolved_title,
                error: Some("model returned no extractable text".to_string()),
                total_pages: None,
            };
        }

        PdfExtractResult {
            status: PdfExtractStatus::Complete,
            text: normalized,
            title: resolved_title,
            error: None,
            total_pages: None,
        }
    }

    /// Fallback path: download the full PDF, then extract per-page text on a
    /// worker thread via `pdf-extract`.
    pub async fn extract_in_memory(&self, url: &str, title: Option<&str>) -> PdfExtractResult {
        let resolved_title = Self::derive_title(url, title);
        let timeout = Duration::from_secs_f64(self.config.in_memory_timeout_seconds);

        let bytes = match tokio::time::timeout(timeout, self.client.get(url).send()).await {
            Ok(Ok(resp)) => match resp.error_for_status() {
                Ok(resp) => match resp.bytes().await {
                    Ok(b) => b,
                    Err(e) => {
                        return Self::fetch_failed(resolved_title, e);
                    }
                },
                Err(e) => return Self::fetch_failed(resolved_title, e),
            },
            Ok(Err(e)) => return Self::fetch_failed(resolved_title, e),
            Err(_) => {
                return PdfExtractResult {
                    status: PdfExtractStatus::Failed,
                    text: String::new(),
                    title: resolved_title,
                    error: Some("could not fetch PDF bytes: timed out".to_string()),
                    total_pages: None,
                }
            }
        };

        let extraction = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || extract_pdf_text_from_bytes(&bytes)),
        )
        .await;

        let (text, page_count) = match extraction {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                return PdfExtractResult {
                    status: PdfExtractStatus::Failed,
                    text: String::new(),
                    title: resolved_title,
                    error: Some(format!("in-memory PDF parsing failed: {e}")),
                    total_pages: None,
                }
            }
            Ok(Err(e)) => {
                return PdfExtractResult {
                    status: PdfExtractStatus::Failed,
                    text: String::new(),
                    title: resolved_title,
                    error: Some(format!("in-memory PDF parsing failed: {e}")),
                    total_pages: None,
                }
            }
            Err(_) => {
                return PdfExtractResult {
                    status: PdfExtractStatus::Failed,
                    text: String::new(),
                    title: resolved_title,
                    error: Some("in-memory PDF parsing timed out".to_string()),
                    total_pages: None,
                }
            }
        };

        let normalized = text.trim().to_string();
        if normalized.is_empty() {
            return PdfExtractResult {
                status: PdfExtractStatus::Failed,
                text: String::new(),
                title: resolved_title,
                error: Some("PDF does not contain extractable text".to_string()),
                total_pages: Some(page_count),
            };
        }

        PdfExtractResult {
            status: PdfExtractStatus::Complete,
            text: normalized,
            title: resolved_title,
            error: None,
            total_pages: Some(page_count),
        }
    }

    fn fetch_failed(title: String, e: impl std::fmt::Display) -> PdfExtractResult {
        PdfExtractResult {
            status: PdfExtractStatus::Failed,
            text: String::new(),
            title,
            error: Some(format!("could not fetch PDF bytes: {e}")),
            total_pages: None,
        }
    }

    /// Render a PDF extraction result into the same [`ScrapedDocument`]
    /// shape HTML scraping produces, tagging it with PDF-specific metadata.
    pub fn build_pdf_document(
        &self,
        url: &str,
        title: &str,
        text: &str,
        partial: bool,
        extraction_method: &str,
        job_id: Option<&str>,
    ) -> Option<ScrapedDocument> {
        let normalized = text.trim();
        if normalized.is_empty() {
            return None;
        }

        let body = if partial {
            format!(
                "[Partial PDF extraction: primary processing timed out after {} seconds. Background completion is queued.]\n\n{}",
                self.config.primary_timeout_seconds as u64, normalized
            )
        } else {
            normalized.to_string()
        };

        let metadata = PdfDocumentMetadata {
            source: url.to_string(),
            title: title.to_string(),
            content_type: "application/pdf".to_string(),
            is_pdf: true,
            partial_pdf_content: partial,
            extraction_method: extraction_method.to_string(),
            processed_at: Utc::now(),
            pdf_job_id: job_id.map(str::to_string),
        };
        info!(source = %url, method = extraction_method, "built pdf document ({:?})", metadata);

        Some(ScrapedDocument { source: url.to_string(), title: title.to_string(), content: format!("{title}\n\n{body}") })
    }

    /// Top-level entry used by the `url_search` tool: primary stream, with a
    /// background job enqueued whenever the primary path doesn't produce a
    /// complete result.
    pub async fn process_pdf_url(&self, url: &str, title: Option<&str>) -> Option<ScrapedDocument> {
        let result = self.extract_with_stream(url, title).await;
        match result.status {
            PdfExtractStatus::Complete => {
                self.build_pdf_document(url, &result.title, &result.text, false, "model_url_context", None)
            }
            PdfExtractStatus::PartialTimeout | PdfExtractStatus::Queued => {
                if !result.text.trim().is_empty() {
                    self.build_pdf_document(url, &result.title, &result.text, true, "model_url_context", None)
                } else {
                    None
                }
            }
            PdfExtractStatus::Failed => {
                if !result.text.trim().is_empty() {
                    self.build_pdf_document(url, &result.title, &result.text, true, "model_url_context", None)
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PdfDocumentMetadata {
    source: String,
    title: String,
    content_type: String,
    is_pdf: bool,
    partial_pdf_content: bool,
    extraction_method: String,
    processed_at: chrono::DateTime<Utc>,
    pdf_job_id: Option<String>,
}

/// Extract per-page text via `pdf-extract`, concatenating non-empty pages
/// with a blank line between them, returning `(text, page_count)`.
fn extract_pdf_text_from_bytes(bytes: &[u8]) -> Result<(String, usize), PdfError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| PdfError::ExtractionFailed(e.to_string()))?;
    // pdf-extract doesn't report a page count alongside the flattened text;
    // non-empty paragraph runs are a reasonable proxy for "page count" here.
    let page_count = text.split("\n\n").filter(|p| !p.trim().is_empty()).count().max(1);
    Ok((text.trim().to_string(), page_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_longer_prefix_match() {
        assert_eq!(PdfService::merge_chunk_text("hello", "hello world"), "hello world");
        assert_eq!(PdfService::merge_chunk_text("hello world", "hello"), "hello world");
        assert_eq!(PdfService::merge_chunk_text("hello", " world"), "hello world");
        assert_eq!(PdfService::merge_chunk_text("", "x"), "x");
    }

    #[test]
    fn derive_title_falls_back_to_url() {
        assert_eq!(PdfService::derive_title("https://x/a.pdf", Some("  ")), "https://x/a.pdf");
        assert_eq!(PdfService::derive_title("https://x/a.pdf", Some("Report")), "Report");
    }
}
