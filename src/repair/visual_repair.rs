//! LLM repair loop for invalid `chartjson`/`mermaid` blocks. Mirrors
//! `equation_repair` in structure: validate, iterate invalid blocks
//! back-to-front, bounded-retry repair, splice on success. Unlike equation
//! repair, a block that can't be repaired is deleted outright — a missing
//! chart is always a safe degrade, so the crash fallback also deletes
//! rather than preserving the unrepaired section.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{repair_visual_block_prompt, RepairConfig};
use crate::domain::ContentSection;
use crate::model::ModelClient;
use crate::validators::{
    self, extract_visual_blocks, validate_chartjson, validate_mermaid, InvalidVisualBlock, SectionValidationReport,
    ValidationResult, VisualBlock,
};

fn replace_span(source: &str, start: usize, end: usize, replacement: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let safe_start = start.min(len);
    let safe_end = end.min(len).max(safe_start);
    let mut out: String = chars[..safe_start].iter().collect();
    out.push_str(replacement);
    out.extend(chars[safe_end..].iter());
    out
}

fn remove_span(source: &str, start: usize, end: usize) -> String {
    replace_span(source, start, end, "")
}

fn remove_invalid_spans(source: &str, invalid_blocks: &[InvalidVisualBlock]) -> String {
    let mut cleaned = source.to_string();
    let mut sorted: Vec<&InvalidVisualBlock> = invalid_blocks.iter().collect();
    sorted.sort_by_key(|b| std::cmp::Reverse(b.block.start));
    for invalid in sorted {
        cleaned = remove_span(&cleaned, invalid.block.start, invalid.block.end);
    }
    cleaned
}

fn build_fenced_block(block_type: &str, block_body: &str) -> String {
    format!("```{}\n{}\n```", block_type.trim().to_lowercase(), block_body.trim())
}

/// Pull the repaired body back out of the model's raw reply: prefer a fenced
/// block of the expected type if the model wrapped its answer in one, fall
/// back to the whole reply if it's plain text, reject anything else that
/// still contains a fence (wrong type, or multiple blocks).
fn extract_repaired_body(raw_model_text: &str, expected_type: &str) -> Option<String> {
    let source = raw_model_text.trim();
    if source.is_empty() {
        return None;
    }
    let normalized_type = expected_type.trim().to_lowercase();
    let blocks = extract_visual_blocks(source);
    if !blocks.is_empty() {
        return blocks
            .into_iter()
            .find(|b| b.block_type == normalized_type)
            .map(|b| b.content.trim().to_string());
    }
    if source.contains("```") {
        return None;
    }
    Some(source.to_string())
}

fn validate_block(block_type: &str, block_body: &str) -> ValidationResult {
    match block_type.trim().to_lowercase().as_str() {
        "chartjson" => validate_chartjson(block_body),
        "mermaid" => validate_mermaid(block_body),
        other => ValidationResult::invalid(format!("Unsupported visualization type: {other}")),
    }
}

pub async fn drop_invalid_visualizations(section: &ContentSection) -> ContentSection {
    let report = validators::validate_section_visualizations(&section.content);
    if report.invalid_blocks.is_empty() {
        return section.clone();
    }
    let cleaned = remove_invalid_spans(&section.content, &report.invalid_blocks);
    ContentSection { section_title: section.section_title.clone(), content: cleaned, citations: section.citations.clone() }
}

pub async fn repair_section_visualizations(
    section: &ContentSection,
    config: &RepairConfig,
    model: &Arc<dyn ModelClient>,
) -> ContentSection {
    if !config.visual_repair_enabled {
        return drop_invalid_visualizations(section).await;
    }

    let mut working_content = section.content.clone();
    let citations = section.citations.clone();
    let section_title = {
        let t = section.section_title.trim();
        if t.is_empty() { "Untitled Section".to_string() } else { t.to_string() }
    };

    let initial_report: SectionValidationReport = validators::validate_section_visualizations(&working_content);
    if initial_report.invalid_blocks.is_empty() {
        return ContentSection { section_title, content: working_content, citations };
    }

    let repair_attempt_budget = config.max_retries;
    let mut invalid_desc: Vec<InvalidVisualBlock> = initial_report.invalid_blocks;
    invalid_desc.sort_by_key(|b| std::cmp::Reverse(b.block.start));

    for invalid in invalid_desc {
        let original_block: VisualBlock = invalid.block;
        let mut repaired = false;

        if repair_attempt_budget > 0 {
            for attempt in 1..=repair_attempt_budget {
                let prompt = repair_visual_block_prompt(&original_block.block_type, &original_block.content, &invalid.reason);
                let call = model.generate_text("Repair the visualization block as instructed.", &prompt);
                let outcome = tokio::time::timeout(Duration::from_secs_f64(config.retry_timeout_seconds), call).await;

                let candidate_text = match outcome {
                    Ok(Ok(text)) => text,
                    Ok(Err(error)) => {
                        warn!(
                            "visualization repair attempt {attempt}/{repair_attempt_budget} failed for section '{section_title}' ({}): {error}",
                            original_block.block_type
                        );
                        continue;
                    }
                    Err(_) => {
                        warn!(
                            "visualization repair attempt {attempt}/{repair_attempt_budget} timed out for section '{section_title}' ({})",
                            original_block.block_type
                        );
                        continue;
                    }
                };

                let Some(candidate_body) = extract_repaired_body(&candidate_text, &original_block.block_type) else {
                    continue;
                };

                let candidate_validation = validate_block(&original_block.block_type, &candidate_body);
                if !candidate_validation.is_valid {
                    continue;
                }

                working_content = replace_span(
                    &working_content,
                    original_block.start,
                    original_block.end,
                    &build_fenced_block(&original_block.block_type, &candidate_body),
                );
                repaired = true;
                break;
            }
        }

        if !repaired {
            working_content = remove_span(&working_content, original_block.start, original_block.end);
        }
    }

    let final_report = validators::validate_section_visualizations(&working_content);
    if !final_report.invalid_blocks.is_empty() {
        working_content = remove_invalid_spans(&working_content, &final_report.invalid_blocks);
    }

    ContentSection { section_title, content: working_content, citations }
}

/// Await a pipelined repair task; on crash, fall back to the unconditional
/// drop-invalid-spans pass rather than the (possibly still invalid)
/// pre-repair section — a dropped visual is always safe to lose.
pub async fn resolve_repair_task(
    task: tokio::task::JoinHandle<ContentSection>,
    fallback_section: &ContentSection,
) -> ContentSection {
    match task.await {
        Ok(section) => section,
        Err(error) => {
            warn!(
                "visualization repair task crashed for section '{}': {error}. Applying safe fallback.",
                fallback_section.section_title
            );
            drop_invalid_visualizations(fallback_section).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct StubModel {
        reply: String,
    }

    #[async_trait]
    impl ModelClient for StubModel {
        async fn generate_text(&self, _system_prompt: &str, _prompt: &str) -> Result<String, ModelError> {
            Ok(self.reply.clone())
        }
        async fn stream_text(
            &self,
            _system_prompt: &str,
            _prompt: &str,
        ) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError> {
            unimplemented!()
        }
        async fn generate_structured_json(
            &self,
            _system_prompt: &str,
            _prompt: &str,
            _schema_hint: &str,
        ) -> Result<serde_json::Value, ModelError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn valid_section_is_returned_unchanged() {
        let section = ContentSection {
            section_title: "S".to_string(),
            content: "No visuals here.".to_string(),
            citations: vec![],
        };
        let model: Arc<dyn ModelClient> = Arc::new(StubModel { reply: String::new() });
        let result = repair_section_visualizations(&section, &RepairConfig::default(), &model).await;
        assert_eq!(result.content, "No visuals here.");
    }

    #[tokio::test]
    async fn invalid_block_is_repaired_when_model_returns_a_valid_candidate() {
        let section = ContentSection {
            section_title: "S".to_string(),
            content: "Intro\n\n```chartjson\nnot json\n```\n\nOutro".to_string(),
            citations: vec![],
        };
        let valid_option = r#"{"option": {"series": [{"type": "pie", "data": []}]}}"#;
        let model: Arc<dyn ModelClient> = Arc::new(StubModel { reply: valid_option.to_string() });
        let result = repair_section_visualizations(&section, &RepairConfig::default(), &model).await;
        assert!(result.content.contains("```chartjson"));
        assert!(result.content.contains("pie"));
    }

    #[tokio::test]
    async fn invalid_block_is_dropped_when_repair_never_succeeds() {
        let section = ContentSection {
            section_title: "S".to_string(),
            content: "Intro\n\n```chartjson\nnot json\n```\n\nOutro".to_string(),
            citations: vec![],
        };
        let model: Arc<dyn ModelClient> = Arc::new(StubModel { reply: "still not json".to_string() });
        let result = repair_section_visualizations(&section, &RepairConfig::default(), &model).await;
        assert_eq!(result.content, "Intro\n\nOutro");
    }
}
