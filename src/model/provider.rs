//! A thin [`ModelClient`] over any OpenAI-compatible chat-completions
//! endpoint. Concrete model providers are an opaque external collaborator,
//! so this is deliberately generic rather than vendor-specific: it reads its
//! API key from an configured environment variable and talks the same
//! `/chat/completions` shape every major hosted provider and local gateway
//! exposes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ModelProviderConfig;
use crate::error::ModelError;

use super::ModelClient;

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    /// One client instance talks to exactly one model name; pass
    /// `config.mini_model`/`pro_model`/`secondary_model` to build the
    /// distinct clients a [`crate::research_worker::PipelineFactory`] wires
    /// up per job.
    pub fn new(config: &ModelProviderConfig, model: impl Into<String>) -> Self {
        let api_key = std::env::var(&config.api_key_env_var).unwrap_or_default();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.request_timeout_seconds))
            .build()
            .expect("reqwest client builds with static config");
        Self { http, base_url: config.base_url.trim_end_matches('/').to_string(), api_key, model: model.into() }
    }

    /// Select the client for a job's `model_tier` (`"mini"` vs. anything
    /// else, which defaults to `pro`), per §3's `model_tier ∈ {mini, pro}`.
    pub fn for_tier(config: &ModelProviderConfig, model_tier: &str) -> Arc<dyn ModelClient> {
        let model = if model_tier == "mini" { config.mini_model.clone() } else { config.pro_model.clone() };
        Arc::new(Self::new(config, model))
    }

    pub fn secondary(config: &ModelProviderConfig) -> Arc<dyn ModelClient> {
        Arc::new(Self::new(config, config.secondary_model.clone()))
    }

    async fn complete(&self, system_prompt: &str, prompt: &str, json_mode: bool) -> Result<String, ModelError> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": prompt},
            ],
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Provider(format!("provider returned {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| ModelError::Provider(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ModelError::Provider("provider returned no completion choices".to_string()))
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    async fn generate_text(&self, system_prompt: &str, prompt: &str) -> Result<String, ModelError> {
        self.complete(system_prompt, prompt, false).await
    }

    async fn stream_text(&self, system_prompt: &str, prompt: &str) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError> {
        let body = json!({
            "model": self.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Provider(format!("provider returned {status}: {text}")));
        }

        let bytes_stream = response.bytes_stream();
        let chunk_stream = bytes_stream.flat_map(|chunk| {
            let lines: Vec<Result<String, ModelError>> = match chunk {
                Ok(bytes) => parse_sse_chunks(&String::from_utf8_lossy(&bytes)),
                Err(error) => vec![Err(ModelError::Provider(error.to_string()))],
            };
            futures::stream::iter(lines)
        });

        Ok(Box::pin(chunk_stream))
    }

    async fn generate_structured_json(&self, system_prompt: &str, prompt: &str, schema_hint: &str) -> Result<serde_json::Value, ModelError> {
        let system_prompt = format!("{system_prompt}\n\nRespond with a single JSON object matching this shape: {schema_hint}");
        let content = self.complete(&system_prompt, prompt, true).await?;
        serde_json::from_str(&content).map_err(|e| ModelError::StructuredOutputValidation(e.to_string()))
    }
}

/// Extracts non-empty `delta.content` fragments out of one `data: ...`
/// SSE-framed chunk of bytes, skipping the terminal `[DONE]` sentinel and
/// any line that doesn't parse as a completion-delta event.
fn parse_sse_chunks(text: &str) -> Vec<Result<String, ModelError>> {
    text.lines()
        .filter_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
        .map(str::trim)
        .filter(|payload| !payload.is_empty() && *payload != "[DONE]")
        .filter_map(|payload| match serde_json::from_str::<ChatCompletionChunk>(payload) {
            Ok(chunk) => chunk.choices.into_iter().next().and_then(|c| c.delta.content).filter(|c| !c.is_empty()).map(Ok),
            Err(error) => Some(Err(ModelError::Provider(format!("malformed stream chunk: {error}")))),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize, Serialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkChoice {
    delta: ChatDelta,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_talks_to_the_configured_base_url_and_model() {
        let config = ModelProviderConfig { mini_model: "tiny".to_string(), ..ModelProviderConfig::default() };
        let client = OpenAiCompatibleClient::new(&config, config.mini_model.clone());
        assert_eq!(client.model, "tiny");
        assert!(!client.base_url.ends_with('/'));
    }

    #[test]
    fn for_tier_selects_mini_only_for_the_mini_tier() {
        let config = ModelProviderConfig { mini_model: "m".to_string(), pro_model: "p".to_string(), ..ModelProviderConfig::default() };
        let mini = OpenAiCompatibleClient::new(&config, config.mini_model.clone());
        let pro = OpenAiCompatibleClient::new(&config, config.pro_model.clone());
        assert_eq!(mini.model, "m");
        assert_eq!(pro.model, "p");
    }

    #[test]
    fn sse_parsing_extracts_content_deltas_and_skips_done() {
        let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n";
        let results: Vec<String> = parse_sse_chunks(chunk).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(results, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[test]
    fn sse_parsing_skips_heartbeat_and_empty_lines() {
        let chunk = ": heartbeat\n\ndata: {\"choices\":[{\"delta\":{}}]}\n\n";
        assert!(parse_sse_chunks(chunk).is_empty());
    }
}
