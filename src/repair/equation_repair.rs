//! LLM repair loop for invalid equation spans. Structurally identical to
//! `visual_repair`, but an equation that can't be repaired is demoted to an
//! inline code span rather than deleted — prose around a broken formula is
//! never silently lost, and a crashed repair task returns the section
//! unrepaired instead of dropping anything.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{repair_equation_prompt, RepairConfig};
use crate::domain::ContentSection;
use crate::model::ModelClient;
use crate::validators::{self, validate_equation, EquationSpan, InvalidEquationSpan, SectionEquationReport};

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

fn code_span_fallback(expression: &str) -> String {
    format!("`{}`", expression.replace('`', "'"))
}

fn build_delimited_equation(delimiter_style: &str, expression: &str) -> String {
    match delimiter_style.trim().to_lowercase().as_str() {
        "block_dollar" => format!("$${expression}$$"),
        "block_bracket" => format!("\\[{expression}\\]"),
        "inline_paren" => format!("\\({expression}\\)"),
        _ => format!("${expression}$"),
    }
}

fn validate_all_spans(content: &str, max_chars: usize) -> SectionEquationReport {
    validators::validate_section_equations(content, max_chars)
}

pub async fn repair_section_equations(
    section: &ContentSection,
    config: &RepairConfig,
    model: &Arc<dyn ModelClient>,
) -> ContentSection {
    let mut working_content = section.content.clone();
    let citations = section.citations.clone();
    let section_title = {
        let t = section.section_title.trim();
        if t.is_empty() { "Untitled Section".to_string() } else { t.to_string() }
    };

    let initial_report = validate_all_spans(&working_content, config.equation_max_chars);
    if initial_report.invalid_spans.is_empty() {
        return ContentSection { section_title, content: working_content, citations };
    }

    let repair_attempt_budget = config.max_retries;
    let mut invalid_desc: Vec<InvalidEquationSpan> = initial_report.invalid_spans;
    invalid_desc.sort_by_key(|s| std::cmp::Reverse(s.span.start));

    for invalid in invalid_desc {
        let original_span: EquationSpan = invalid.span;
        let mut repaired = false;

        if repair_attempt_budget > 0 {
            for attempt in 1..=repair_attempt_budget {
                let prompt = repair_equation_prompt(&original_span.delimiter_style, &original_span.expression, &invalid.reason);
                let call = model.generate_text("Repair the equation expression as instructed.", &prompt);
                let outcome = tokio::time::timeout(Duration::from_secs_f64(config.retry_timeout_seconds), call).await;

                let candidate_text = match outcome {
                    Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
                    Ok(Ok(_)) => continue,
                    Ok(Err(error)) => {
                        warn!(
                            "equation repair attempt {attempt}/{repair_attempt_budget} failed for section '{section_title}' ({}): {error}",
                            original_span.delimiter_style
                        );
                        continue;
                    }
                    Err(_) => {
                        warn!(
                            "equation repair attempt {attempt}/{repair_attempt_budget} timed out for section '{section_title}' ({})",
                            original_span.delimiter_style
                        );
                        continue;
                    }
                };

                let candidate_len = candidate_text.chars().count();
                let candidate_span = EquationSpan {
                    delimiter_style: original_span.delimiter_style.clone(),
                    expression: candidate_text.clone(),
                    start: 0,
                    end: candidate_len,
                    full_match: candidate_text.clone(),
                };
                let candidate_result = validate_equation(&candidate_span, config.equation_max_chars);
                if !candidate_result.is_valid {
                    continue;
                }

                let candidate_replacement = build_delimited_equation(&original_span.delimiter_style, &candidate_text);
                working_content = replace_span(&working_content, original_span.start, original_span.end, &candidate_replacement);
                repaired = true;
                break;
            }
        }

        if !repaired {
            working_content = replace_span(
                &working_content,
                original_span.start,
                original_span.end,
                &code_span_fallback(&original_span.expression),
            );
        }
    }

    ContentSection { section_title, content: working_content, citations }
}

/// On crash, equations are never deleted silently — the fallback is the
/// unmodified section, unlike visual-block repair's drop-on-crash.
pub async fn resolve_equation_repair_task(
    task: tokio::task::JoinHandle<ContentSection>,
    fallback_section: &ContentSection,
) -> ContentSection {
    match task.await {
        Ok(section) => section,
        Err(error) => {
            warn!(
                "equation repair task crashed for section '{}': {error}. Returning unrepaired section.",
                fallback_section.section_title
            );
            fallback_section.clone()
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
    async fn valid_section_passes_through_unchanged() {
        let section = ContentSection { section_title: "S".to_string(), content: "Plain prose, no math.".to_string(), citations: vec![] };
        let model: Arc<dyn ModelClient> = Arc::new(StubModel { reply: String::new() });
        let result = repair_section_equations(&section, &RepairConfig::default(), &model).await;
        assert_eq!(result.content, "Plain prose, no math.");
    }

    #[tokio::test]
    async fn unrepairable_equation_becomes_an_inline_code_span() {
        let section = ContentSection {
            section_title: "S".to_string(),
            content: r"Broken: $\frac{1}{$ end.".to_string(),
            citations: vec![],
        };
        let model: Arc<dyn ModelClient> = Arc::new(StubModel { reply: r"\frac{1}{".to_string() });
        let result = repair_section_equations(&section, &RepairConfig::default(), &model).await;
        assert!(result.content.starts_with("Broken: `"));
    }

    #[tokio::test]
    async fn repaired_equation_is_spliced_back_with_original_delimiters() {
        let section = ContentSection {
            section_title: "S".to_string(),
            content: r"Broken: $\frac{1}{$ end.".to_string(),
            citations: vec![],
        };
        let model: Arc<dyn ModelClient> = Arc::new(StubModel { reply: r"\frac{1}{2}".to_string() });
        let result = repair_section_equations(&section, &RepairConfig::default(), &model).await;
        assert!(result.content.contains(r"$\frac{1}{2}$"));
    }
}
