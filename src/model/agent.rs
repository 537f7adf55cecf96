//! `ReasoningAgent::plan_and_execute`: drives a bounded tool-calling loop
//! over a [`ModelClient`] until the model emits a terminal answer or the
//! step budget is exhausted. Adapted from the donor's actor-style step loop
//! (`agent/core.rs`), collapsed to a single async function since the
//! provider-specific action-channel plumbing it used is out of scope here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ModelError;
use crate::model::ModelClient;

/// One capability exposed to a reasoning agent. `{vector_search, url_search,
/// web_search}` are the concrete implementations (§4.4); the loop itself is
/// polymorphic over this trait and never inspects which one it's calling.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn call(&self, args: &str) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgentStep {
    Tool { tool: String, args: serde_json::Value },
    Final { final_answer: String },
}

const MAX_STEPS: usize = 8;

pub struct ReasoningAgent {
    client: Arc<dyn ModelClient>,
    tools: Vec<Arc<dyn Tool>>,
}

impl ReasoningAgent {
    pub fn new(client: Arc<dyn ModelClient>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { client, tools }
    }

    fn tool_catalog(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Run the tool-calling loop to completion and return the model's final
    /// text. `user_messages` are joined as the running transcript; each tool
    /// result is appended as an observation before the next model turn.
    pub async fn plan_and_execute(
        &self,
        system_prompt: &str,
        user_messages: &[String],
    ) -> Result<String, ModelError> {
        let mut transcript = user_messages.to_vec();
        let schema_hint = format!(
            "Respond with exactly one JSON object. To call a tool: {{\"tool\": name, \"args\": object}}. \
             To finish: {{\"final_answer\": string}}. Available tools:\n{}",
            self.tool_catalog()
        );

        for step in 0..MAX_STEPS {
            let prompt = transcript.join("\n\n");
            let decision: serde_json::Value = self
                .client
                .generate_structured_json(system_prompt, &prompt, &schema_hint)
                .await?;

            let step: AgentStep = serde_json::from_value(decision)
                .map_err(|e| ModelError::StructuredOutputValidation(e.to_string()))?;

            match step {
                AgentStep::Final { final_answer } => return Ok(final_answer),
                AgentStep::Tool { tool, args } => {
                    let args_str = args.to_string();
                    let Some(handler) = self.find_tool(&tool) else {
                        warn!("agent requested unknown tool: {tool}");
                        transcript.push(format!("Observation: unknown tool '{tool}'"));
                        continue;
                    };
                    debug!(step, tool = %tool, "agent tool call");
                    let observation = handler.call(&args_str).await;
                    transcript.push(format!("Tool call: {tool}({args_str})\nObservation: {observation}"));
                }
            }
        }

        Err(ModelError::Provider(format!("tool-calling loop exceeded {MAX_STEPS} steps without a final answer")))
    }
}

/// A static lookup used by tests and simple integrations that don't need a
/// full [`ReasoningAgent`] — e.g. dispatching a single named tool call.
pub fn dispatch_by_name<'a>(tools: &'a [Arc<dyn Tool>], name: &str) -> Option<&'a Arc<dyn Tool>> {
    tools.iter().find(|t| t.name() == name)
}

#[allow(dead_code)]
fn _assert_tool_map_shape(_: &HashMap<String, ToolCall>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::BoxStream;

    struct EchoTool;
    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes args back"
        }
        async fn call(&self, args: &str) -> String {
            format!("echoed:{args}")
        }
    }

    struct ScriptedClient {
        responses: std::sync::Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn generate_text(&self, _s: &str, _p: &str) -> Result<String, ModelError> {
            unimplemented!()
        }
        async fn stream_text(
            &self,
            _s: &str,
            _p: &str,
        ) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError> {
            unimplemented!()
        }
        async fn generate_structured_json(
            &self,
            _s: &str,
            _p: &str,
            _hint: &str,
        ) -> Result<serde_json::Value, ModelError> {
            let mut responses = self.responses.lock().unwrap();
            Ok(responses.remove(0))
        }
    }

    #[tokio::test]
    async fn loop_terminates_on_final_answer() {
        let client = Arc::new(ScriptedClient {
            responses: std::sync::Mutex::new(vec![
                serde_json::json!({"tool": "echo", "args": {"q": "hi"}}),
                serde_json::json!({"final_answer": "done"}),
            ]),
        });
        let agent = ReasoningAgent::new(client, vec![Arc::new(EchoTool)]);
        let result = agent.plan_and_execute("sys", &["go".to_string()]).await.unwrap();
        assert_eq!(result, "done");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_observation_not_fatal() {
        let client = Arc::new(ScriptedClient {
            responses: std::sync::Mutex::new(vec![
                serde_json::json!({"tool": "missing", "args": {}}),
                serde_json::json!({"final_answer": "recovered"}),
            ]),
        });
        let agent = ReasoningAgent::new(client, vec![Arc::new(EchoTool)]);
        let result = agent.plan_and_execute("sys", &["go".to_string()]).await.unwrap();
        assert_eq!(result, "recovered");
    }
}
