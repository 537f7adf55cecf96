//! `vector_search` — the cheapest of the three tools: a direct read against
//! documents already persisted for this session by an earlier `url_search`
//! or `web_search` call, so a reasoning agent revisits prior findings
//! without a new scrape or network round-trip.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::render::{render_documents, NO_SCRAPEABLE_CONTENT};
use crate::model::Tool;
use crate::vector::VectorStore;

const MAX_RESULTS: usize = 5;

pub struct VectorSearchTool {
    vector_store: Arc<dyn VectorStore>,
    session_id: String,
}

impl VectorSearchTool {
    pub fn new(vector_store: Arc<dyn VectorStore>, session_id: impl Into<String>) -> Self {
        Self { vector_store, session_id: session_id.into() }
    }
}

fn extract_query(args: &str) -> String {
    serde_json::from_str::<serde_json::Value>(args)
        .ok()
        .and_then(|v| v.get("query").and_then(|q| q.as_str()).map(str::to_string))
        .unwrap_or_else(|| args.trim().trim_matches('"').to_string())
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &str {
        "vector_search"
    }

    fn description(&self) -> &str {
        "Search documents already collected for this session in the vector store. Always try this before web_search or url_search."
    }

    async fn call(&self, args: &str) -> String {
        let query = extract_query(args);
        match self.vector_store.vector_search(&self.session_id, &query, MAX_RESULTS).await {
            Ok(documents) if documents.is_empty() => "No relevant documents found in the vector store.".to_string(),
            Ok(documents) => {
                let bodies = vec![None; documents.len()];
                render_documents(&documents, &bodies)
            }
            Err(error) => {
                warn!("vector search failed for session '{}': {error}", self.session_id);
                format!("An error occurred: {error}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::InMemoryVectorStore;

    #[tokio::test]
    async fn empty_store_returns_the_sentinel() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::default());
        let tool = VectorSearchTool::new(store, "s1");
        assert_eq!(tool.call(r#"{"query":"anything"}"#).await, "No relevant documents found in the vector store.");
    }

    #[tokio::test]
    async fn matching_documents_are_rendered() {
        let store = InMemoryVectorStore::default();
        store
            .add_data(
                "s1",
                &[crate::scrape::ScrapedDocument { source: "https://a".to_string(), title: "A".to_string(), content: "alpha content".to_string() }],
            )
            .await
            .unwrap();
        let tool = VectorSearchTool::new(Arc::new(store), "s1");
        let result = tool.call(r#"{"query":"alpha"}"#).await;
        assert!(result.contains("alpha content"));
        assert!(!result.contains(NO_SCRAPEABLE_CONTENT));
    }

    #[test]
    fn query_extraction_falls_back_to_raw_args() {
        assert_eq!(extract_query(r#"{"query":"x"}"#), "x");
        assert_eq!(extract_query("plain text"), "plain text");
    }
}
