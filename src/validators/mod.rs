//! C5 — structural ("Tier-1") validators for the fenced visualization blocks
//! and inline equations a model can emit inside a section's content. These
//! are pure, synchronous checks; a browser-backed "Tier-2" probe (rendering
//! the block for real) is out of scope here; the async wrappers exist only
//! so the repair loop can treat validation uniformly regardless of whether a
//! slower, fallible Tier-2 check ever gets plugged in behind them.

pub mod chartjson;
pub mod equation;
pub mod extract;
pub mod mermaid;

pub use chartjson::validate_chartjson;
pub use equation::validate_equation;
pub use extract::{extract_equation_spans, extract_visual_blocks};
pub use mermaid::validate_mermaid;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, reason: None }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self { is_valid: false, reason: Some(reason.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualBlock {
    pub block_type: String,
    pub content: String,
    pub raw: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidVisualBlock {
    pub block: VisualBlock,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SectionValidationReport {
    pub blocks: Vec<VisualBlock>,
    pub invalid_blocks: Vec<InvalidVisualBlock>,
}

impl SectionValidationReport {
    pub fn has_invalid(&self) -> bool {
        !self.invalid_blocks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquationSpan {
    /// "inline_dollar" | "block_dollar" | "inline_paren" | "block_bracket"
    pub delimiter_style: String,
    pub expression: String,
    pub start: usize,
    pub end: usize,
    pub full_match: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEquationSpan {
    pub span: EquationSpan,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SectionEquationReport {
    pub spans: Vec<EquationSpan>,
    pub invalid_spans: Vec<InvalidEquationSpan>,
}

impl SectionEquationReport {
    pub fn has_invalid(&self) -> bool {
        !self.invalid_spans.is_empty()
    }
}

pub fn validate_section_visualizations(content: &str) -> SectionValidationReport {
    let blocks = extract_visual_blocks(content);
    let mut invalid = Vec::new();
    for block in &blocks {
        let result = match block.block_type.as_str() {
            "chartjson" => validate_chartjson(&block.content),
            "mermaid" => validate_mermaid(&block.content),
            _ => continue,
        };
        if !result.is_valid {
            invalid.push(InvalidVisualBlock {
                block: block.clone(),
                reason: result.reason.unwrap_or_else(|| "Invalid block.".to_string()),
            });
        }
    }
    SectionValidationReport { blocks, invalid_blocks: invalid }
}

pub fn validate_section_equations(content: &str, max_chars: usize) -> SectionEquationReport {
    let spans = extract_equation_spans(content);
    let mut invalid = Vec::new();
    for span in &spans {
        let result = validate_equation(span, max_chars);
        if !result.is_valid {
            invalid.push(InvalidEquationSpan {
                span: span.clone(),
                reason: result.reason.unwrap_or_else(|| "Invalid equation.".to_string()),
            });
        }
    }
    SectionEquationReport { spans, invalid_spans: invalid }
}

/// Remove every block named in `invalid_blocks`, collapse the resulting
/// triple-plus blank lines down to one, and trim the ends.
pub fn drop_invalid_blocks(content: &str, invalid_blocks: &[InvalidVisualBlock]) -> String {
    if invalid_blocks.is_empty() {
        return content.to_string();
    }
    let mut sorted: Vec<&InvalidVisualBlock> = invalid_blocks.iter().collect();
    sorted.sort_by_key(|b| b.block.start);

    let mut parts = String::new();
    let mut cursor = 0usize;
    let len = content.chars().count();
    let chars: Vec<char> = content.chars().collect();
    for invalid in sorted {
        let start = invalid.block.start.min(len);
        let end = invalid.block.end.min(len);
        if start < cursor {
            continue;
        }
        parts.extend(&chars[cursor..start]);
        cursor = end;
    }
    parts.extend(&chars[cursor..]);

    let collapsed = collapse_blank_runs(&parts);
    collapsed.trim().to_string()
}

fn collapse_blank_runs(text: &str) -> String {
    let re = regex::Regex::new(r"\n{3,}").unwrap();
    re.replace_all(text, "\n\n").into_owned()
}

pub fn format_invalid_visual_report(report: &SectionValidationReport) -> String {
    if report.invalid_blocks.is_empty() {
        return "No invalid visualization blocks found.".to_string();
    }
    let ws_re = regex::Regex::new(r"\s+").unwrap();
    report
        .invalid_blocks
        .iter()
        .enumerate()
        .map(|(i, invalid)| {
            let mut snippet = ws_re.replace_all(&invalid.block.content, " ").trim().to_string();
            if snippet.chars().count() > 220 {
                snippet = snippet.chars().take(220).collect::<String>() + "...";
            }
            format!(
                "{}. type={}; reason={}; snippet={}",
                i + 1,
                invalid.block.block_type,
                invalid.reason,
                snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_invalid_blocks_collapses_blank_runs() {
        let content = "Intro\n\n```chartjson\nnot json\n```\n\nOutro";
        let blocks = extract_visual_blocks(content);
        let invalid = vec![InvalidVisualBlock { block: blocks[0].clone(), reason: "bad".into() }];
        let cleaned = drop_invalid_blocks(content, &invalid);
        assert_eq!(cleaned, "Intro\n\nOutro");
    }

    #[test]
    fn report_formats_as_no_invalid_when_empty() {
        let report = SectionValidationReport::default();
        assert_eq!(format_invalid_visual_report(&report), "No invalid visualization blocks found.");
    }
}
