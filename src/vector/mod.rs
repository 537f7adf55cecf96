//! The vector store seam: the external ingestion/retrieval collaborator
//! named in §1's scope boundaries. A real deployment points this at an
//! embedding-backed service; [`InMemoryVectorStore`] is the same kind of
//! reference backend `jobs::InMemoryJobStore` is for `JobStore` — a
//! substring-matching stand-in good enough to run the binary and the test
//! suite against, not a model for how a real backend indexes.
//!
//! `replace_source_data` is the seam C10's background PDF worker calls to
//! atomically swap a source URL's stale partial-extraction chunks for its
//! completed text, without a caller observing a moment where that source's
//! data is entirely absent.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::VectorStoreError;
use crate::scrape::ScrapedDocument;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ingest `documents` into the session's collection. At-least-once;
    /// idempotency of re-ingesting the same source is the store's concern.
    async fn add_data(&self, session_id: &str, documents: &[ScrapedDocument]) -> Result<(), VectorStoreError>;

    /// Up to `limit` documents most relevant to `query`, scoped to the
    /// session. Empty, never an error, when nothing matches.
    async fn vector_search(&self, session_id: &str, query: &str, limit: usize) -> Result<Vec<ScrapedDocument>, VectorStoreError>;

    /// Delete every chunk previously ingested for `source_url` within the
    /// session, then ingest `documents` in its place. Used by the PDF
    /// background worker so a completed extraction replaces the partial one
    /// rather than appending alongside it.
    async fn replace_source_data(&self, session_id: &str, source_url: &str, documents: &[ScrapedDocument]) -> Result<(), VectorStoreError>;
}

/// Session-id → documents, in insertion order.
#[derive(Default)]
pub struct InMemoryVectorStore {
    documents: Mutex<std::collections::HashMap<String, Vec<ScrapedDocument>>>,
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_data(&self, session_id: &str, documents: &[ScrapedDocument]) -> Result<(), VectorStoreError> {
        self.documents.lock().unwrap().entry(session_id.to_string()).or_default().extend(documents.iter().cloned());
        Ok(())
    }

    async fn vector_search(&self, session_id: &str, query: &str, limit: usize) -> Result<Vec<ScrapedDocument>, VectorStoreError> {
        let query = query.to_lowercase();
        let guard = self.documents.lock().unwrap();
        let matches = guard
            .get(session_id)
            .into_iter()
            .flatten()
            .filter(|d| query.is_empty() || d.content.to_lowercase().contains(&query) || d.title.to_lowercase().contains(&query))
            .take(limit)
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn replace_source_data(&self, session_id: &str, source_url: &str, documents: &[ScrapedDocument]) -> Result<(), VectorStoreError> {
        let mut guard = self.documents.lock().unwrap();
        let bucket = guard.entry(session_id.to_string()).or_default();
        bucket.retain(|d| d.source != source_url);
        bucket.extend(documents.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str, content: &str) -> ScrapedDocument {
        ScrapedDocument { source: source.to_string(), title: "T".to_string(), content: content.to_string() }
    }

    #[tokio::test]
    async fn replace_source_data_drops_only_the_matching_source() {
        let store = InMemoryVectorStore::default();
        store.add_data("s1", &[doc("https://a", "alpha"), doc("https://b", "beta")]).await.unwrap();
        store.replace_source_data("s1", "https://a", &[doc("https://a", "alpha v2")]).await.unwrap();

        let results = store.vector_search("s1", "", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|d| d.content == "alpha v2"));
        assert!(results.iter().any(|d| d.content == "beta"));
    }

    #[tokio::test]
    async fn search_is_scoped_to_the_session() {
        let store = InMemoryVectorStore::default();
        store.add_data("s1", &[doc("https://a", "alpha")]).await.unwrap();
        let results = store.vector_search("s2", "alpha", 10).await.unwrap();
        assert!(results.is_empty());
    }
}
