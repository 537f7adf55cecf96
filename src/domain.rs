//! Core data model: durable job records, the four-stage pipeline's state
//! shape, and the document types it produces. Rendering (`as_str`) mirrors
//! the reference implementation's markdown layout byte-for-byte, since §6
//! treats the persisted document format as an external interface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------
// Outline
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSubsection {
    pub title: String,
    pub description: String,
}

impl OutlineSubsection {
    pub fn as_str(&self) -> String {
        format!("### {}\n\n{}", self.title, self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub section_title: String,
    pub description: String,
    #[serde(default)]
    pub subsections: Vec<OutlineSubsection>,
}

impl OutlineSection {
    pub fn as_str(&self) -> String {
        let subsections: Vec<String> = self.subsections.iter().map(|s| s.as_str()).collect();
        let mut out = format!(
            "## {}\n\n{}",
            self.section_title, self.description
        );
        if !subsections.is_empty() {
            out.push_str("\n\n");
            out.push_str(&subsections.join("\n\n"));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub document_title: String,
    pub document_description: String,
    pub sections: Vec<OutlineSection>,
}

impl Outline {
    pub fn as_str(&self) -> String {
        let sections: Vec<String> = self.sections.iter().map(|s| s.as_str()).collect();
        format!(
            "# {}\n\n## Research Document Description\n{}\n\n{}",
            self.document_title,
            self.document_description,
            sections.join("\n\n")
        )
    }
}

// ---------------------------------------------------------------------
// Perspectives
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expert {
    pub name: String,
    pub profession: String,
    pub role: String,
}

impl Expert {
    pub fn as_str(&self) -> String {
        format!("{} ({}): {}", self.name, self.profession, self.role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Perspectives {
    pub experts: Vec<Expert>,
}

/// `low=1, medium=3, high=5` from the breadth → expert-count mapping.
pub fn expert_count_for_breadth(breadth: &str) -> usize {
    match breadth {
        "low" => 1,
        "high" => 5,
        _ => 3,
    }
}

// ---------------------------------------------------------------------
// Content / documents
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSection {
    pub section_title: String,
    pub content: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

impl ContentSection {
    pub fn as_str(&self) -> String {
        let citations: Vec<String> = self
            .citations
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}", i + 1, c))
            .collect();
        let body = self.content.trim_matches('#');
        if citations.is_empty() {
            format!("## {}\n\n{}", self.section_title, body)
        } else {
            format!(
                "## {}\n\n{}\n\n{}",
                self.section_title,
                body,
                citations.join("\n")
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteDocument {
    pub title: String,
    pub sections: Vec<ContentSection>,
}

impl CompleteDocument {
    /// Markdown rendering per §6: title, each section as `## title\n\ncontent`,
    /// then a de-duplicated `## References` block in first-appearance order.
    pub fn as_str(&self) -> String {
        let sections_block = if self.sections.is_empty() {
            "No sections generated.".to_string()
        } else {
            self.sections
                .iter()
                .map(|s| format!("## {}\n\n{}", s.section_title, s.content))
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let mut seen = HashSet::new();
        let mut references = Vec::new();
        for section in &self.sections {
            for citation in &section.citations {
                if seen.insert(citation.clone()) {
                    references.push(citation.clone());
                }
            }
        }
        let references_block = if references.is_empty() {
            "No references provided.".to_string()
        } else {
            references
                .iter()
                .enumerate()
                .map(|(i, r)| format!("[{}] {}", i + 1, r))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "# {}\n\n{}\n\n## References\n{}",
            self.title, sections_block, references_block
        )
    }
}

// ---------------------------------------------------------------------
// Pipeline state (checkpoint payload, C8 operates on this)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    pub research_idea: String,
    pub document_outline: Option<Outline>,
    pub perspectives: Option<Perspectives>,
    /// Rectangular `sections × experts` matrix of drafted text.
    pub perspective_content: Option<Vec<Vec<String>>>,
    pub final_document: Option<CompleteDocument>,
}

/// The four DAG stages in their fixed linear order.
pub const NODE_SEQUENCE: [&str; 4] = [
    "generate_document_outline",
    "generate_perspectives",
    "generate_content_for_perspectives",
    "final_section_generation",
];

// ---------------------------------------------------------------------
// Research job
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub research_idea: String,
    pub model_tier: String,
    pub breadth: String,
    pub depth: String,
    pub document_length: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchJob {
    pub job_id: String,
    pub user_id: String,
    pub session_id: String,
    pub status: JobStatus,
    pub current_node: String,
    pub progress_message: String,
    pub resume_from_node: Option<String>,
    pub attempts: u32,
    pub worker_id: Option<String>,
    pub error: Option<String>,
    pub result_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub lease_deadline: Option<DateTime<Utc>>,
    pub graph_state: serde_json::Value,
    pub request: ResearchRequest,
}

// ---------------------------------------------------------------------
// PDF job
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfJob {
    pub job_id: String,
    pub session_id: String,
    pub source_url: String,
    pub title: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub reason: String,
    pub partial_text_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub lease_deadline: Option<DateTime<Utc>>,
    pub result_characters: Option<usize>,
    pub result_page_count: Option<usize>,
}

// ---------------------------------------------------------------------
// Per-session active task
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTask {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: JobStatus,
    pub current_node: Option<String>,
    pub progress_message: Option<String>,
}

impl ActiveTask {
    pub fn research(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            kind: "research".to_string(),
            status,
            current_node: None,
            progress_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_document_renders_in_outline_order() {
        let doc = CompleteDocument {
            title: "Title".to_string(),
            sections: vec![
                ContentSection {
                    section_title: "First".to_string(),
                    content: "x".to_string(),
                    citations: vec!["https://a".to_string()],
                },
                ContentSection {
                    section_title: "Second".to_string(),
                    content: "y".to_string(),
                    citations: vec!["https://a".to_string(), "https://b".to_string()],
                },
            ],
        };
        let rendered = doc.as_str();
        let first_pos = rendered.find("## First").unwrap();
        let second_pos = rendered.find("## Second").unwrap();
        assert!(first_pos < second_pos);
        assert!(rendered.contains("[1] https://a"));
        assert!(rendered.contains("[2] https://b"));
        assert!(!rendered.contains("[3]"));
    }

    #[test]
    fn empty_document_uses_fallback_text() {
        let doc = CompleteDocument {
            title: "Empty".to_string(),
            sections: vec![],
        };
        let rendered = doc.as_str();
        assert!(rendered.contains("No sections generated."));
        assert!(rendered.contains("No references provided."));
    }

    #[test]
    fn expert_count_mapping() {
        assert_eq!(expert_count_for_breadth("low"), 1);
        assert_eq!(expert_count_for_breadth("medium"), 3);
        assert_eq!(expert_count_for_breadth("high"), 5);
        assert_eq!(expert_count_for_breadth("anything-else"), 3);
    }
}
