//! The four pipeline stages (§4.7) plus their internal helpers: the serial,
//! rolling-summary expert sub-pipeline and the retry/timeout wrapper around
//! each section write.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::prompts::PromptBuilder;
use crate::config::SectionGenerationConfig;
use crate::domain::{CompleteDocument, ContentSection, Expert, Outline, OutlineSection, Perspectives};
use crate::error::ModelError;
use crate::model::{generate_structured, ModelClient, ReasoningAgent, Tool};

pub fn fallback_section_text(section_title: &str) -> String {
    format!("Could not generate section content for '{section_title}' due to repeated generation failures.")
}

// ---------------------------------------------------------------------
// Stage 1 — outline
// ---------------------------------------------------------------------

const OUTLINE_SCHEMA_HINT: &str = "\
{document_title: string, document_description: string, sections: [{section_title: string, \
description: string, subsections: [{title: string, description: string}]}]}";

pub async fn run_generate_document_outline(
    research_idea: &str,
    outline_model: &Arc<dyn ModelClient>,
    tools: &[Arc<dyn Tool>],
) -> Result<Outline, ModelError> {
    let agent = ReasoningAgent::new(outline_model.clone(), tools.to_vec());
    let research_summary = agent
        .plan_and_execute(&PromptBuilder::outline_system_prompt(), &[PromptBuilder::outline_user_message(research_idea)])
        .await?;

    generate_structured::<Outline>(
        outline_model.as_ref(),
        "Produce the document outline as structured JSON from the research notes below.",
        &research_summary,
        OUTLINE_SCHEMA_HINT,
    )
    .await
}

// ---------------------------------------------------------------------
// Stage 2 — perspectives
// ---------------------------------------------------------------------

const PERSPECTIVES_SCHEMA_HINT: &str = "{experts: [{name: string, profession: string, role: string}]}";

pub async fn run_generate_perspectives(
    outline: &Outline,
    perspectives_model: &Arc<dyn ModelClient>,
    expert_count: usize,
) -> Result<Perspectives, ModelError> {
    let mut perspectives: Perspectives = generate_structured(
        perspectives_model.as_ref(),
        "Generate a diverse, distinct panel of expert perspectives for this research document.",
        &PromptBuilder::generate_perspectives(&outline.as_str(), expert_count),
        PERSPECTIVES_SCHEMA_HINT,
    )
    .await?;

    if perspectives.experts.len() > expert_count {
        perspectives.experts.truncate(expert_count);
    }
    Ok(perspectives)
}

// ---------------------------------------------------------------------
// Stage 3 — parallel experts, serial sections
// ---------------------------------------------------------------------

async fn invoke_section_with_retry(
    agent: &ReasoningAgent,
    system_prompt: &str,
    prompt: &str,
    section_title: &str,
    expert_label: &str,
    section_cfg: &SectionGenerationConfig,
) -> String {
    let attempt_count = section_cfg.retry_delays_seconds.len() + 1;

    for attempt in 1..=attempt_count {
        let call = agent.plan_and_execute(system_prompt, &[prompt.to_string()]);
        let outcome = tokio::time::timeout(Duration::from_secs_f64(section_cfg.attempt_timeout_seconds), call).await;

        let failure_reason = match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => return text.trim().to_string(),
            Ok(Ok(_)) => "generated section content was empty".to_string(),
            Ok(Err(error)) => error.to_string(),
            Err(_) => "attempt timed out".to_string(),
        };

        if attempt >= attempt_count {
            warn!(
                "expert '{expert_label}' failed for section '{section_title}' after {attempt_count} attempts: \
                 {failure_reason}. Using fallback content."
            );
            return fallback_section_text(section_title);
        }

        let delay = section_cfg.retry_delays_seconds[attempt - 1];
        warn!(
            "expert '{expert_label}' attempt {attempt}/{attempt_count} failed for section '{section_title}': \
             {failure_reason}. Retrying in {delay:.1}s."
        );
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }

    fallback_section_text(section_title)
}

#[allow(clippy::too_many_arguments)]
async fn run_expert_pipeline(
    expert_index: usize,
    expert_name: &str,
    expert_system_prompt: String,
    model: Arc<dyn ModelClient>,
    tools: &[Arc<dyn Tool>],
    sections: &[OutlineSection],
    summary_model: &Arc<dyn ModelClient>,
    section_cfg: &SectionGenerationConfig,
) -> Vec<String> {
    let start = std::time::Instant::now();
    tracing::info!("expert pipeline started: index={expert_index}, name='{expert_name}'");

    let agent = ReasoningAgent::new(model, tools.to_vec());
    let mut pipeline_outputs = Vec::with_capacity(sections.len());
    let mut expert_history: Vec<String> = Vec::with_capacity(sections.len());
    let mut summary: Option<String> = None;

    for section in sections {
        let prompt = PromptBuilder::write_section_prompt(&section.as_str(), summary.as_deref());
        let section_text = invoke_section_with_retry(
            &agent,
            &expert_system_prompt,
            &prompt,
            &section.section_title,
            expert_name,
            section_cfg,
        )
        .await;

        pipeline_outputs.push(section_text.clone());
        expert_history.push(format!("## {}\n\n{}", section.section_title, section_text).trim().to_string());

        match summary_model
            .generate_text("Summarize the content so far without losing any important information.", &PromptBuilder::generate_rolling_summary(&expert_history.join("\n\n")))
            .await
        {
            Ok(next_summary) if !next_summary.trim().is_empty() => summary = Some(next_summary.trim().to_string()),
            Ok(_) => {}
            Err(error) => warn!(
                "summary update failed for expert '{expert_name}' after section '{}': {error}. Continuing without summary update.",
                section.section_title
            ),
        }
    }

    tracing::info!(
        "expert pipeline completed: index={expert_index}, name='{expert_name}', sections={}, elapsed={:.2}s",
        pipeline_outputs.len(),
        start.elapsed().as_secs_f64()
    );
    pipeline_outputs
}

#[allow(clippy::too_many_arguments)]
pub async fn run_generate_content_for_perspectives(
    outline: &Outline,
    perspectives: &Perspectives,
    expert_models: &[Arc<dyn ModelClient>],
    tools: &[Arc<dyn Tool>],
    summary_model: &Arc<dyn ModelClient>,
    section_cfg: &SectionGenerationConfig,
) -> Vec<Vec<String>> {
    let sections = &outline.sections;
    if sections.is_empty() || perspectives.experts.is_empty() || expert_models.is_empty() {
        return Vec::new();
    }

    let outline_str = outline.as_str();
    let expert_tasks: Vec<_> = perspectives
        .experts
        .iter()
        .enumerate()
        .map(|(index, expert): (usize, &Expert)| {
            let model = expert_models[index % expert_models.len()].clone();
            let system_prompt = PromptBuilder::perspective_agent_system_prompt(expert, &outline_str);
            let expert_name = if expert.name.trim().is_empty() { format!("Expert {}", index + 1) } else { expert.name.clone() };
            let tools = tools.to_vec();
            let summary_model = summary_model.clone();
            let sections = sections.clone();
            let section_cfg = section_cfg.clone();
            tokio::spawn(async move {
                run_expert_pipeline(index, &expert_name, system_prompt, model, &tools, &sections, &summary_model, &section_cfg).await
            })
        })
        .collect();

    let mut expert_outputs: Vec<Vec<String>> = Vec::with_capacity(expert_tasks.len());
    for task in expert_tasks {
        let mut normalized = match task.await {
            Ok(outputs) => outputs,
            Err(error) => {
                warn!("an expert pipeline crashed: {error}. Using fallback content for all sections.");
                sections.iter().map(|s| fallback_section_text(&s.section_title)).collect()
            }
        };
        if normalized.len() < sections.len() {
            for section in &sections[normalized.len()..] {
                normalized.push(fallback_section_text(&section.section_title));
            }
        } else if normalized.len() > sections.len() {
            normalized.truncate(sections.len());
        }
        expert_outputs.push(normalized);
    }

    sections
        .iter()
        .enumerate()
        .map(|(section_index, section)| {
            expert_outputs
                .iter()
                .map(|row| {
                    let text = row[section_index].trim();
                    if text.is_empty() { fallback_section_text(&section.section_title) } else { text.to_string() }
                })
                .collect()
        })
        .collect()
}

// ---------------------------------------------------------------------
// Stage 4 — fusion
// ---------------------------------------------------------------------

const CONTENT_SECTION_SCHEMA_HINT: &str = "{section_title: string, content: string, citations: [string]}";

/// Retries once on a structured-output parse failure, matching the
/// reference behaviour of swallowing exactly one such error before
/// re-attempting; any other error, or a second failure, propagates.
pub async fn generate_final_section(
    section_content: &[String],
    outline_str: &str,
    summary: Option<&str>,
    final_content_model: &Arc<dyn ModelClient>,
) -> Result<ContentSection, ModelError> {
    let prompt = PromptBuilder::generate_combined_section_user_message(&section_content.join("\n\n"), outline_str, summary);
    let system_prompt = PromptBuilder::generate_combined_section_system_prompt();

    match generate_structured::<ContentSection>(final_content_model.as_ref(), &system_prompt, &prompt, CONTENT_SECTION_SCHEMA_HINT).await {
        Ok(section) => Ok(section),
        Err(error) if error.is_structured_output_error() => {
            generate_structured::<ContentSection>(final_content_model.as_ref(), &system_prompt, &prompt, CONTENT_SECTION_SCHEMA_HINT).await
        }
        Err(error) => Err(error),
    }
}

/// Breadth=low short-circuit: one section per outline entry, taken straight
/// from the single expert's draft (no fusion model call).
pub fn build_low_breadth_document(outline: &Outline, perspective_content: &[Vec<String>]) -> CompleteDocument {
    let final_sections = outline
        .sections
        .iter()
        .enumerate()
        .map(|(section_index, section)| {
            let text = perspective_content
                .get(section_index)
                .and_then(|row| row.first())
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| fallback_section_text(&section.section_title));
            ContentSection { section_title: section.section_title.clone(), content: text, citations: Vec::new() }
        })
        .collect();

    CompleteDocument { title: outline.document_title.clone(), sections: final_sections }
}
