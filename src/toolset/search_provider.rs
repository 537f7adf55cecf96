//! The web-search API seam: an opaque external collaborator (§1) that
//! `web_search` and `url_search` ask for candidate URLs.
//! [`GoogleCustomSearchProvider`] is the concrete binding a deployment runs
//! against — the Google Custom Search JSON API — the same way
//! [`crate::model::OpenAiCompatibleClient`] is the concrete binding for the
//! otherwise-opaque model-provider seam.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::CustomSearchConfig;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Up to `count` ranked hits for `query`. Empty on no results; errors are
    /// reserved for transport failures the caller should treat as "no
    /// results found" rather than retry.
    async fn search(&self, query: &str, count: usize) -> anyhow::Result<Vec<SearchHit>>;
}

pub struct GoogleCustomSearchProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    search_engine_id: Option<String>,
}

impl GoogleCustomSearchProvider {
    pub fn new(config: &CustomSearchConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env_var).unwrap_or_default();
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs_f64(config.timeout_seconds))
            .build()
            .expect("reqwest client builds with static config");
        Self { http, base_url: config.base_url.clone(), api_key, search_engine_id: config.search_engine_id.clone() }
    }
}

#[async_trait]
impl SearchProvider for GoogleCustomSearchProvider {
    async fn search(&self, query: &str, count: usize) -> anyhow::Result<Vec<SearchHit>> {
        let Some(search_engine_id) = self.search_engine_id.as_deref() else {
            anyhow::bail!("custom search is not configured (missing search_engine_id)");
        };
        if self.api_key.is_empty() {
            anyhow::bail!("custom search is not configured (missing API key)");
        }

        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", search_engine_id),
                ("lr", "lang_en"),
                ("hl", "en"),
                ("num", &count.min(10).to_string()),
                ("q", query),
                ("c2coff", "1"),
                ("orTerms", "Research Paper|Article|Research Article|Research|Latest|News"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("custom search returned {status}: {text}");
        }

        let parsed: CustomSearchResponse = response.json().await?;
        let Some(items) = parsed.items else {
            warn!("custom search returned no items for query '{query}'");
            return Ok(Vec::new());
        };

        Ok(items
            .into_iter()
            .filter(|item| !item.link.is_empty())
            .map(|item| SearchHit { url: item.link, title: Some(item.title).filter(|t| !t.is_empty()) })
            .take(count)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct CustomSearchResponse {
    #[serde(default)]
    items: Option<Vec<CustomSearchItem>>,
}

#[derive(Debug, Deserialize)]
struct CustomSearchItem {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Returns a fixed, caller-supplied hit list regardless of query.
    pub struct StubSearchProvider {
        pub hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl SearchProvider for StubSearchProvider {
        async fn search(&self, _query: &str, count: usize) -> anyhow::Result<Vec<SearchHit>> {
            Ok(self.hits.iter().take(count).cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_without_configured_engine_id_errors_instead_of_panicking() {
        let config = CustomSearchConfig { search_engine_id: None, ..CustomSearchConfig::default() };
        let provider = GoogleCustomSearchProvider::new(&config);
        let result = provider.search("quantum computing", 5).await;
        assert!(result.is_err());
    }
}
