//! Reasoning-agent abstraction (§9): a `plan_and_execute` tool-calling loop
//! over a pluggable [`ModelClient`], generalized from the donor's
//! `agent/core.rs` actor (which drove a fixed browser-action tool set) to a
//! capability set of `{vector_search, url_search, web_search}`.

mod agent;
mod client;
mod provider;

pub use agent::{ReasoningAgent, Tool, ToolCall};
pub use client::{generate_structured, ModelClient};
pub use provider::OpenAiCompatibleClient;
