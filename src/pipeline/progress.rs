//! Fixed node → user-facing progress message table (§6). Used by the job
//! store when it seeds/updates `progress_message` and by the checkpoint
//! callback after each completed stage.

/// `(node, message)` pairs in the order a research job visits them, plus the
/// three terminal/pre-run pseudo-nodes (`queued`, `preparing`, `completed`,
/// `failed`) that never appear in [`crate::domain::NODE_SEQUENCE`].
const NODE_PROGRESS_MESSAGES: &[(&str, &str)] = &[
    ("queued", "Research queued. Waiting to start."),
    ("preparing", "Preparing your research workflow."),
    (
        "generate_document_outline",
        "Analyzing your request, gathering context, and drafting an outline.",
    ),
    ("generate_perspectives", "Ensuring all important angles of your idea are covered."),
    (
        "generate_content_for_perspectives",
        "Performing deep, well-rounded research to collect information.",
    ),
    ("final_section_generation", "Writing your final research document."),
    ("completed", "Research completed."),
    ("failed", "Research could not be completed."),
];

const DEFAULT_MESSAGE: &str = "Research is in progress.";

/// Looks up `node` in the fixed table, falling back to `fallback` (or the
/// generic default) for an unrecognised or blank node name.
pub fn progress_message_for_node(node: &str) -> String {
    progress_message_for_node_or(node, DEFAULT_MESSAGE)
}

pub fn progress_message_for_node_or(node: &str, fallback: &str) -> String {
    let normalized = node.trim();
    if normalized.is_empty() {
        return fallback.to_string();
    }
    NODE_PROGRESS_MESSAGES
        .iter()
        .find(|(key, _)| *key == normalized)
        .map(|(_, message)| message.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_nodes_resolve_to_their_fixed_message() {
        assert_eq!(progress_message_for_node("queued"), "Research queued. Waiting to start.");
        assert_eq!(progress_message_for_node("completed"), "Research completed.");
    }

    #[test]
    fn unknown_or_blank_node_uses_the_generic_default() {
        assert_eq!(progress_message_for_node("not_a_node"), "Research is in progress.");
        assert_eq!(progress_message_for_node(""), "Research is in progress.");
    }

    #[test]
    fn caller_supplied_fallback_overrides_the_generic_default() {
        assert_eq!(progress_message_for_node_or("not_a_node", "custom"), "custom");
    }
}
