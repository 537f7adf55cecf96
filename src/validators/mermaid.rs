//! Tier-1 structural validator for a single fenced mermaid block.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ValidationResult;

static UNSAFE_MERMAID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<script|onerror\s*=|onload\s*=|javascript:").unwrap());
// The source uses a negative lookahead `\[(?!")` to skip already-quoted
// labels; the `regex` crate has no lookaround, so the quote check is done
// on the captured label in `find_unquoted_risky_mermaid_label` instead.
static UNQUOTED_LABEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_][\w-]*\[([^\]\n]+)\]").unwrap());
static RISKY_UNQUOTED_LABEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/&()\\,:;]|[^\x00-\x7F]").unwrap());
static TRAILING_LABEL_TYPO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\]\)\}][A-Za-z_][A-Za-z0-9_]*(?:\s|$)").unwrap());
static CONTROL_CHAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F]").unwrap());
static MERMAID_HEADER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:flowchart|graph|sequenceDiagram|classDiagram|stateDiagram(?:-v2)?|erDiagram|journey|gantt|pie(?:\s+showData)?|mindmap|timeline|gitGraph|quadrantChart|requirementDiagram|sankey-beta|xychart-beta|block-beta|architecture(?:-beta)?|packet-beta)\b",
    )
    .unwrap()
});
static MALFORMED_ARROW_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-/->|--/>|-/-->|<-/->|<-/--").unwrap());
static EDGE_ARROW_TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)-->|<--|-\.->|<-\.-|==>|<==|--x|x--|--o|o--|---").unwrap());

fn has_balanced_delimiters(content: &str) -> bool {
    let mut stack = Vec::new();
    let mut in_double_quote = false;
    let mut escaped = false;

    for ch in content.chars() {
        if in_double_quote {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
                continue;
            }
            if ch == '"' {
                in_double_quote = false;
            }
            continue;
        }

        if ch == '"' {
            in_double_quote = true;
            continue;
        }

        match ch {
            '(' | '[' | '{' => stack.push(ch),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }

    stack.is_empty() && !in_double_quote
}

fn first_mermaid_content_line(content: &str) -> String {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("%%") {
            continue;
        }
        return line.to_string();
    }
    String::new()
}

fn find_unbalanced_double_quote_line(content: &str) -> Option<usize> {
    for (index, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with("%%") {
            continue;
        }

        let mut quote_count = 0;
        let mut escaped = false;
        for ch in raw_line.chars() {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
                continue;
            }
            if ch == '"' {
                quote_count += 1;
            }
        }

        if quote_count % 2 != 0 {
            return Some(index + 1);
        }
    }
    None
}

fn has_label_newlines(content: &str) -> bool {
    let mut in_double_quote = false;
    let mut escaped = false;
    for ch in content.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            in_double_quote = !in_double_quote;
            continue;
        }
        if in_double_quote && (ch == '\n' || ch == '\r') {
            return true;
        }
    }
    false
}

fn has_unbalanced_edge_label_pipes(content: &str) -> bool {
    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with("%%") {
            continue;
        }
        if !line.contains('|') {
            continue;
        }
        if !EDGE_ARROW_TOKEN_PATTERN.is_match(line) {
            continue;
        }
        if line.matches('|').count() % 2 != 0 {
            return true;
        }
    }
    false
}

fn find_unquoted_risky_mermaid_label(content: &str) -> Option<String> {
    for caps in UNQUOTED_LABEL_PATTERN.captures_iter(content) {
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        if raw.starts_with('"') {
            continue;
        }
        let label = raw.trim();
        if label.is_empty() {
            continue;
        }
        if RISKY_UNQUOTED_LABEL_PATTERN.is_match(label) {
            return Some(label.to_string());
        }
    }
    None
}

pub fn validate_mermaid(block_text: &str) -> ValidationResult {
    let source = block_text.trim();
    if source.is_empty() {
        return ValidationResult::invalid("Empty mermaid block.");
    }

    if source.contains("```") {
        return ValidationResult::invalid("Mermaid block contains nested markdown fences.");
    }

    if CONTROL_CHAR_PATTERN.is_match(source) {
        return ValidationResult::invalid("Mermaid block contains disallowed control characters.");
    }

    if has_label_newlines(source) {
        return ValidationResult::invalid(
            "Mermaid label contains embedded newlines; use <br/> for multi-line labels.",
        );
    }

    if UNSAFE_MERMAID_PATTERN.is_match(source) {
        return ValidationResult::invalid("Mermaid block contains disallowed content.");
    }

    let first_line = first_mermaid_content_line(source);
    if first_line.is_empty() {
        return ValidationResult::invalid("Mermaid block has no diagram content.");
    }
    if !MERMAID_HEADER_PATTERN.is_match(&first_line) {
        return ValidationResult::invalid("Mermaid block is missing a valid diagram header.");
    }

    if let Some(line) = find_unbalanced_double_quote_line(source) {
        return ValidationResult::invalid(format!(
            "Mermaid block has unbalanced double quotes on line {line}."
        ));
    }

    if !has_balanced_delimiters(source) {
        return ValidationResult::invalid("Mermaid block contains unbalanced delimiters.");
    }

    if MALFORMED_ARROW_PATTERN.is_match(source) {
        return ValidationResult::invalid("Mermaid block contains malformed edge syntax.");
    }

    if has_unbalanced_edge_label_pipes(source) {
        return ValidationResult::invalid("Mermaid edge labels contain unbalanced | pipes.");
    }

    if let Some(label) = find_unquoted_risky_mermaid_label(source) {
        return ValidationResult::invalid(format!(
            "Mermaid label \"{label}\" should be quoted as nodeId[\"Label\"]."
        ));
    }

    if TRAILING_LABEL_TYPO_PATTERN.is_match(source) {
        return ValidationResult::invalid("Mermaid block contains an unexpected token after a node label.");
    }

    ValidationResult::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_flowchart_passes() {
        let result = validate_mermaid("graph TD\nA[\"Start\"] --> B[\"End\"]");
        assert!(result.is_valid, "{:?}", result.reason);
    }

    #[test]
    fn missing_header_is_rejected() {
        let result = validate_mermaid("A --> B");
        assert!(!result.is_valid);
    }

    #[test]
    fn unquoted_risky_label_is_rejected() {
        let result = validate_mermaid("graph TD\nA[foo/bar] --> B[ok]");
        assert!(!result.is_valid);
    }

    #[test]
    fn script_injection_is_rejected() {
        let result = validate_mermaid("graph TD\nA[\"<script>\"] --> B[\"x\"]");
        assert!(!result.is_valid);
    }
}
