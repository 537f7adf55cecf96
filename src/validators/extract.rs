//! Scans section markdown for fenced visualization blocks and inline
//! equation spans, skipping code fences and inline code for the latter.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{EquationSpan, VisualBlock};

static FENCED_VISUAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```(?P<type>chartjson|mermaid)[ \t]*\r?\n(?P<body>.*?)```").unwrap()
});

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]+`").unwrap());

pub fn extract_visual_blocks(content: &str) -> Vec<VisualBlock> {
    let mut blocks = Vec::new();
    for caps in FENCED_VISUAL_PATTERN.captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let block_type = caps.name("type").map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let body = caps.name("body").map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        blocks.push(VisualBlock {
            block_type,
            content: body,
            raw: whole.as_str().to_string(),
            start: char_offset(content, whole.start()),
            end: char_offset(content, whole.end()),
        });
    }
    blocks
}

/// Byte offset -> char offset, since our spans are defined in char units
/// (matching Python's string indexing) while `regex` reports byte offsets.
fn char_offset(source: &str, byte_idx: usize) -> usize {
    source[..byte_idx].chars().count()
}

/// Replace every character that sits inside a code fence or inline-code span
/// with `\0` (newlines kept) so equation-delimiter search can't match inside
/// a code span. Mirrors `_build_masked` in the source.
fn build_masked(text: &str) -> Vec<char> {
    let chars: Vec<char> = text.chars().collect();
    let mut masked = chars.clone();

    let mut fence_ranges: Vec<(usize, usize)> = Vec::new();
    for m in CODE_FENCE_RE.find_iter(text) {
        let s = char_offset(text, m.start());
        let e = char_offset(text, m.end());
        fence_ranges.push((s, e));
        for k in s..e {
            if masked[k] != '\n' {
                masked[k] = '\0';
            }
        }
    }

    let in_fence = |pos: usize| fence_ranges.iter().any(|&(s, e)| s <= pos && pos < e);

    for m in INLINE_CODE_RE.find_iter(text) {
        let s = char_offset(text, m.start());
        if in_fence(s) {
            continue;
        }
        let e = char_offset(text, m.end());
        for k in s..e {
            if masked[k] != '\n' {
                masked[k] = '\0';
            }
        }
    }

    masked
}

pub fn extract_equation_spans(source: &str) -> Vec<EquationSpan> {
    if source.is_empty() {
        return Vec::new();
    }
    let text: Vec<char> = source.chars().collect();
    let masked = build_masked(source);
    let n = masked.len();
    let mut spans = Vec::new();
    let mut i = 0usize;

    let find_from = |needle: &[char], from: usize| -> Option<usize> {
        if needle.is_empty() || from >= n {
            return None;
        }
        (from..=n.saturating_sub(needle.len())).find(|&k| masked[k..k + needle.len()] == *needle)
    };

    while i < n {
        if masked[i] == '\0' {
            i += 1;
            continue;
        }

        if i + 2 <= n && masked[i..i + 2] == ['$', '$'] {
            if let Some(close) = find_from(&['$', '$'], i + 2) {
                let end = close + 2;
                spans.push(EquationSpan {
                    delimiter_style: "block_dollar".to_string(),
                    expression: text[i + 2..close].iter().collect(),
                    start: i,
                    end,
                    full_match: text[i..end].iter().collect(),
                });
                i = end;
                continue;
            }
        }

        if masked[i] == '$' {
            let mut j = i + 1;
            let mut found_close: Option<usize> = None;
            while j < n {
                let ch = masked[j];
                if ch == '\n' {
                    break;
                }
                if ch == '\0' {
                    j += 1;
                    continue;
                }
                if ch == '$' {
                    found_close = Some(j);
                    break;
                }
                j += 1;
            }
            if let Some(close) = found_close {
                let end = close + 1;
                spans.push(EquationSpan {
                    delimiter_style: "inline_dollar".to_string(),
                    expression: text[i + 1..close].iter().collect(),
                    start: i,
                    end,
                    full_match: text[i..end].iter().collect(),
                });
                i = end;
                continue;
            }
        }

        if i + 2 <= n && masked[i..i + 2] == ['\\', '['] {
            if let Some(close) = find_from(&['\\', ']'], i + 2) {
                let end = close + 2;
                spans.push(EquationSpan {
                    delimiter_style: "block_bracket".to_string(),
                    expression: text[i + 2..close].iter().collect(),
                    start: i,
                    end,
                    full_match: text[i..end].iter().collect(),
                });
                i = end;
                continue;
            }
        }

        if i + 2 <= n && masked[i..i + 2] == ['\\', '('] {
            if let Some(close) = find_from(&['\\', ')'], i + 2) {
                let end = close + 2;
                spans.push(EquationSpan {
                    delimiter_style: "inline_paren".to_string(),
                    expression: text[i + 2..close].iter().collect(),
                    start: i,
                    end,
                    full_match: text[i..end].iter().collect(),
                });
                i = end;
                continue;
            }
        }

        i += 1;
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_block_dollar_and_inline_dollar() {
        let source = "Start $$x = y$$ middle $a + b$ end.";
        let spans = extract_equation_spans(source);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].delimiter_style, "block_dollar");
        assert_eq!(spans[0].expression, "x = y");
        assert_eq!(spans[1].delimiter_style, "inline_dollar");
        assert_eq!(spans[1].expression, "a + b");
    }

    #[test]
    fn skips_equation_delimiters_inside_code_fences() {
        let source = "```text\n$$not an equation$$\n```\nReal: $x$";
        let spans = extract_equation_spans(source);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].expression, "x");
    }

    #[test]
    fn extracts_fenced_chartjson_and_mermaid_blocks() {
        let source = "```chartjson\n{\"option\": {}}\n```\n\n```mermaid\ngraph TD\n```";
        let blocks = extract_visual_blocks(source);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].block_type, "chartjson");
        assert_eq!(blocks[1].block_type, "mermaid");
    }
}
