//! `ModelClient`: the single seam behind which a concrete model provider
//! sits. Kept deliberately thin — streaming, one-shot text, and structured
//! output are the only three operations any pipeline stage needs.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use crate::error::ModelError;

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate_text(&self, system_prompt: &str, prompt: &str) -> Result<String, ModelError>;

    /// Stream of text chunks. Each item is a chunk as the provider emits it;
    /// callers are responsible for deadline enforcement between items.
    async fn stream_text(
        &self,
        system_prompt: &str,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError>;

    /// Ask the provider for JSON matching `schema_hint` (a human-readable
    /// description of the expected shape, embedded in the prompt). Returns
    /// the raw JSON value; callers validate against their target type.
    async fn generate_structured_json(
        &self,
        system_prompt: &str,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<serde_json::Value, ModelError>;
}

/// `generate_structured[T](prompt) → T` from the design notes: asks the
/// client for JSON and validates it against `T`, mapping a parse failure to
/// the distinguishable structured-output-validation error.
pub async fn generate_structured<T: DeserializeOwned>(
    client: &dyn ModelClient,
    system_prompt: &str,
    prompt: &str,
    schema_hint: &str,
) -> Result<T, ModelError> {
    let value = client.generate_structured_json(system_prompt, prompt, schema_hint).await?;
    serde_json::from_value(value)
        .map_err(|e| ModelError::StructuredOutputValidation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct StubClient {
        json: serde_json::Value,
    }

    #[async_trait]
    impl ModelClient for StubClient {
        async fn generate_text(&self, _system_prompt: &str, _prompt: &str) -> Result<String, ModelError> {
            Ok("stub".to_string())
        }
        async fn stream_text(
            &self,
            _system_prompt: &str,
            _prompt: &str,
        ) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError> {
            Ok(Box::pin(futures::stream::iter(vec![Ok("stub".to_string())])))
        }
        async fn generate_structured_json(
            &self,
            _system_prompt: &str,
            _prompt: &str,
            _schema_hint: &str,
        ) -> Result<serde_json::Value, ModelError> {
            Ok(self.json.clone())
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Shape {
        name: String,
    }

    #[tokio::test]
    async fn structured_output_validates_against_target_type() {
        let client = StubClient { json: serde_json::json!({"name": "x"}) };
        let parsed: Shape = generate_structured(&client, "sys", "prompt", "{name: string}").await.unwrap();
        assert_eq!(parsed, Shape { name: "x".to_string() });
    }

    #[tokio::test]
    async fn malformed_structured_output_is_distinguishable() {
        let client = StubClient { json: serde_json::json!({"wrong_field": 1}) };
        let err = generate_structured::<Shape>(&client, "sys", "prompt", "{name: string}")
            .await
            .unwrap_err();
        assert!(err.is_structured_output_error());
    }
}
