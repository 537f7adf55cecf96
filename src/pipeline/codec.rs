//! C8 — checkpoint codec: `PipelineState ⇄ serde_json::Value`, and the
//! resume-stage arithmetic that decides where a paused or crashed job picks
//! back up. Every loader here is "safe": malformed input produces `None` for
//! that field rather than propagating a decode error, so one corrupted field
//! in a checkpoint never loses the rest of the state.

use serde_json::Value;

use crate::domain::{CompleteDocument, Outline, Perspectives, PipelineState, NODE_SEQUENCE};

fn safe_outline(value: Option<&Value>) -> Option<Outline> {
    serde_json::from_value(value?.clone()).ok()
}

fn safe_perspectives(value: Option<&Value>) -> Option<Perspectives> {
    serde_json::from_value(value?.clone()).ok()
}

fn safe_document(value: Option<&Value>) -> Option<CompleteDocument> {
    serde_json::from_value(value?.clone()).ok()
}

fn normalize_nested_string_rows(value: Option<&Value>) -> Option<Vec<Vec<String>>> {
    let rows = value?.as_array()?;
    let mut normalized = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = row.as_array()?;
        normalized.push(
            cells
                .iter()
                .map(|cell| cell.as_str().map(str::to_string).unwrap_or_default())
                .collect(),
        );
    }
    Some(normalized)
}

/// Decode a checkpoint payload. Accepts the legacy camelCase aliases
/// (`documentOutline`, `perspectiveContent`, `finalDocument`) alongside the
/// canonical snake_case keys; `research_idea` is left for the caller to set,
/// since `run_resumable` always overwrites it with the current request.
pub fn deserialize_graph_state(graph_state: Option<&Value>) -> PipelineState {
    let Some(graph_state) = graph_state.and_then(Value::as_object) else {
        return PipelineState::default();
    };

    PipelineState {
        research_idea: String::new(),
        document_outline: safe_outline(graph_state.get("document_outline").or_else(|| graph_state.get("documentOutline"))),
        perspectives: safe_perspectives(graph_state.get("perspectives")),
        perspective_content: normalize_nested_string_rows(
            graph_state.get("perspective_content").or_else(|| graph_state.get("perspectiveContent")),
        ),
        final_document: safe_document(graph_state.get("final_document").or_else(|| graph_state.get("finalDocument"))),
    }
}

/// Encode a [`PipelineState`] into the canonical (snake_case) checkpoint
/// shape. Only present fields are emitted, matching the source's sparse
/// payload convention.
pub fn serialize_graph_state(state: &PipelineState) -> Value {
    let mut payload = serde_json::Map::new();
    payload.insert("research_idea".to_string(), Value::String(state.research_idea.trim().to_string()));

    if let Some(outline) = &state.document_outline {
        payload.insert("document_outline".to_string(), serde_json::to_value(outline).unwrap_or(Value::Null));
    }
    if let Some(perspectives) = &state.perspectives {
        payload.insert("perspectives".to_string(), serde_json::to_value(perspectives).unwrap_or(Value::Null));
    }
    if let Some(rows) = &state.perspective_content {
        payload.insert("perspective_content".to_string(), serde_json::to_value(rows).unwrap_or(Value::Null));
    }
    if let Some(document) = &state.final_document {
        payload.insert("final_document".to_string(), serde_json::to_value(document).unwrap_or(Value::Null));
    }

    Value::Object(payload)
}

/// The stage immediately after `node_name` in [`NODE_SEQUENCE`], or `None`
/// for an unrecognised name or the last stage.
pub fn next_node_after(node_name: &str) -> Option<&'static str> {
    let normalized = node_name.trim();
    let index = NODE_SEQUENCE.iter().position(|n| *n == normalized)?;
    NODE_SEQUENCE.get(index + 1).copied()
}

/// The first stage whose prerequisite output is absent from `state`, or
/// `None` once `final_document` is present (nothing left to run).
pub fn default_resume_node_for_state(state: &PipelineState) -> Option<&'static str> {
    if state.document_outline.is_none() {
        return Some("generate_document_outline");
    }
    if state.perspectives.is_none() {
        return Some("generate_perspectives");
    }
    if state.perspective_content.is_none() {
        return Some("generate_content_for_perspectives");
    }
    if state.final_document.is_none() {
        return Some("final_section_generation");
    }
    None
}

/// Resolve where a run should (re)start: `requested` is honoured only when
/// it names a real stage whose prerequisites `state` already satisfies;
/// otherwise (blank, unknown, or prerequisites missing) the first missing
/// stage wins.
pub fn resolve_resume_node(requested_node: Option<&str>, state: &PipelineState) -> Option<&'static str> {
    if state.final_document.is_some() {
        return None;
    }

    let normalized = requested_node.map(str::trim).unwrap_or_default();
    if normalized.is_empty() || !NODE_SEQUENCE.contains(&normalized) {
        return default_resume_node_for_state(state);
    }

    match normalized {
        "generate_document_outline" => Some("generate_document_outline"),
        "generate_perspectives" => {
            if state.document_outline.is_none() {
                Some("generate_document_outline")
            } else {
                Some("generate_perspectives")
            }
        }
        "generate_content_for_perspectives" => {
            if state.document_outline.is_none() {
                Some("generate_document_outline")
            } else if state.perspectives.is_none() {
                Some("generate_perspectives")
            } else {
                Some("generate_content_for_perspectives")
            }
        }
        "final_section_generation" => {
            if state.document_outline.is_none() {
                Some("generate_document_outline")
            } else if state.perspectives.is_none() {
                Some("generate_perspectives")
            } else if state.perspective_content.is_none() {
                Some("generate_content_for_perspectives")
            } else {
                Some("final_section_generation")
            }
        }
        _ => default_resume_node_for_state(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outline, OutlineSection};

    fn sample_outline() -> Outline {
        Outline {
            document_title: "T".to_string(),
            document_description: "D".to_string(),
            sections: vec![OutlineSection { section_title: "S".to_string(), description: "d".to_string(), subsections: vec![] }],
        }
    }

    #[test]
    fn round_trips_through_serialize_and_deserialize() {
        let mut state = PipelineState { research_idea: "idea".to_string(), ..Default::default() };
        state.document_outline = Some(sample_outline());
        state.perspective_content = Some(vec![vec!["a".to_string(), "b".to_string()]]);

        let payload = serialize_graph_state(&state);
        let mut decoded = deserialize_graph_state(Some(&payload));
        decoded.research_idea = state.research_idea.clone();

        assert_eq!(decoded.document_outline, state.document_outline);
        assert_eq!(decoded.perspective_content, state.perspective_content);
    }

    #[test]
    fn legacy_camel_case_aliases_are_accepted() {
        let payload = serde_json::json!({
            "documentOutline": serde_json::to_value(sample_outline()).unwrap(),
            "perspectiveContent": [["x", "y"]],
        });
        let decoded = deserialize_graph_state(Some(&payload));
        assert!(decoded.document_outline.is_some());
        assert_eq!(decoded.perspective_content, Some(vec![vec!["x".to_string(), "y".to_string()]]));
    }

    #[test]
    fn malformed_field_decodes_to_none_without_losing_siblings() {
        let payload = serde_json::json!({
            "document_outline": "not an outline",
            "perspectives": {"experts": []},
        });
        let decoded = deserialize_graph_state(Some(&payload));
        assert!(decoded.document_outline.is_none());
        assert!(decoded.perspectives.is_some());
    }

    #[test]
    fn resolve_resume_node_ignores_requested_stage_with_unmet_prerequisites() {
        let state = PipelineState::default();
        assert_eq!(resolve_resume_node(Some("final_section_generation"), &state), Some("generate_document_outline"));
    }

    #[test]
    fn resolve_resume_node_honours_requested_stage_when_satisfied() {
        let mut state = PipelineState::default();
        state.document_outline = Some(sample_outline());
        assert_eq!(resolve_resume_node(Some("generate_perspectives"), &state), Some("generate_perspectives"));
    }

    #[test]
    fn final_document_present_means_nothing_left_to_run() {
        let mut state = PipelineState::default();
        state.document_outline = Some(sample_outline());
        state.perspectives = Some(Perspectives::default());
        state.perspective_content = Some(vec![]);
        state.final_document = Some(CompleteDocument { title: "T".to_string(), sections: vec![] });
        assert_eq!(default_resume_node_for_state(&state), None);
    }

    #[test]
    fn resolve_resume_node_short_circuits_even_with_an_explicit_requested_stage() {
        let mut state = PipelineState::default();
        state.document_outline = Some(sample_outline());
        state.perspectives = Some(Perspectives::default());
        state.perspective_content = Some(vec![]);
        state.final_document = Some(CompleteDocument { title: "T".to_string(), sections: vec![] });
        assert_eq!(resolve_resume_node(Some("final_section_generation"), &state), None);
    }

    #[test]
    fn next_node_after_the_last_stage_is_none() {
        assert_eq!(next_node_after("final_section_generation"), None);
        assert_eq!(next_node_after("generate_perspectives"), Some("generate_content_for_perspectives"));
    }
}
