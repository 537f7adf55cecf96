//! Tier-1 structural validator for a single equation span: fast, pure
//! checks that catch obviously broken LaTeX before (an out-of-scope) Tier-2
//! KaTeX render probe would ever see it.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{EquationSpan, ValidationResult};

static UNSAFE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<script|javascript:|data:\s*text/").unwrap());
static MACRO_DEF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:newcommand|renewcommand|providecommand|DeclareMathOperator|def|edef|gdef|xdef|let|futurelet)\b").unwrap()
});
static CONTROL_CHAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").unwrap());
static LEFT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\left(?:[^a-zA-Z]|$)").unwrap());
static RIGHT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\right(?:[^a-zA-Z]|$)").unwrap());
static NEEDS_ARG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\\(?:frac|dfrac|tfrac|cfrac|binom|dbinom|tbinom|stackrel|overset|underset|xrightarrow|xleftarrow|xleftrightarrow|xLeftarrow|xRightarrow|xlongequal|overbrace|underbrace|sqrt|vec|hat|bar|dot|ddot|tilde|widetilde|widehat|overline|underline|mathbb|mathbf|mathcal|mathfrak|mathit|mathrm|mathsf|mathtt|boldsymbol|pmb|text|mbox|operatorname)\b",
    )
    .unwrap()
});
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[a-zA-Z][a-zA-Z0-9]*[\s/>]").unwrap());

const NEEDS_BRACED_ARG: &[&str] = &[
    "\\frac", "\\dfrac", "\\tfrac", "\\cfrac", "\\binom", "\\dbinom", "\\tbinom", "\\stackrel",
    "\\overset", "\\underset",
];

fn check_brace_balance(expr: &str) -> Option<String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut depth: i64 = 0;
    let mut i = 0;
    let n = chars.len();
    while i < n {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Some("Unmatched closing brace '}' (no matching '{').".to_string());
                }
            }
            _ => {}
        }
        i += 1;
    }
    if depth > 0 {
        return Some(format!("Unclosed brace group ({depth} '{{' without matching '}}')."));
    }
    None
}

fn check_env_nesting(expr: &str) -> Option<String> {
    static BEGIN_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(begin|end)\{([^}]*)\}").unwrap());
    let mut stack: Vec<String> = Vec::new();
    for caps in BEGIN_END_RE.captures_iter(expr) {
        let kind = &caps[1];
        let env = caps[2].trim().to_string();
        if env.is_empty() {
            return Some("Empty environment name in \\begin{} or \\end{}.".to_string());
        }
        if kind == "begin" {
            stack.push(env);
        } else {
            match stack.pop() {
                None => return Some(format!("\\end{{{env}}} without a matching \\begin{{{env}}}.")),
                Some(top) if top != env => {
                    return Some(format!(
                        "Mismatched environments: \\begin{{{top}}} closed by \\end{{{env}}}."
                    ))
                }
                _ => {}
            }
        }
    }
    if !stack.is_empty() {
        let unclosed = stack.iter().map(|e| format!("\\begin{{{e}}}")).collect::<Vec<_>>().join(", ");
        return Some(format!("Unclosed environment(s): {unclosed}."));
    }
    None
}

fn consume_arg(expr: &[char], mut pos: usize) -> usize {
    let n = expr.len();
    while pos < n && matches!(expr[pos], ' ' | '\t' | '\r' | '\n') {
        pos += 1;
    }
    if pos >= n {
        return pos;
    }
    if expr[pos] == '{' {
        let mut d = 0;
        while pos < n {
            if expr[pos] == '\\' {
                pos += 2;
                continue;
            }
            if expr[pos] == '{' {
                d += 1;
            } else if expr[pos] == '}' {
                d -= 1;
                if d == 0 {
                    return pos + 1;
                }
            }
            pos += 1;
        }
        pos
    } else if expr[pos] == '\\' {
        pos += 1;
        if pos < n && !expr[pos].is_alphabetic() {
            return pos + 1;
        }
        while pos < n && expr[pos].is_alphabetic() {
            pos += 1;
        }
        pos
    } else {
        pos + 1
    }
}

fn check_double_script(expr: &str) -> Option<String> {
    let chars: Vec<char> = expr.chars().collect();
    let n = chars.len();
    let mut super_used: std::collections::HashMap<i64, bool> = std::collections::HashMap::new();
    let mut sub_used: std::collections::HashMap<i64, bool> = std::collections::HashMap::new();
    let mut depth: i64 = 0;
    let mut i = 0usize;

    while i < n {
        let ch = chars[i];

        if ch == '\\' {
            i += 1;
            if i < n && !chars[i].is_alphabetic() {
                i += 1;
            } else {
                while i < n && chars[i].is_alphabetic() {
                    i += 1;
                }
            }
            super_used.insert(depth, false);
            sub_used.insert(depth, false);
            continue;
        }

        if ch == '{' {
            depth += 1;
            super_used.insert(depth, false);
            sub_used.insert(depth, false);
            i += 1;
            continue;
        }

        if ch == '}' {
            super_used.remove(&depth);
            sub_used.remove(&depth);
            depth = (depth - 1).max(0);
            super_used.insert(depth, false);
            sub_used.insert(depth, false);
            i += 1;
            continue;
        }

        if ch == '^' {
            if *super_used.get(&depth).unwrap_or(&false) {
                return Some("Double superscript: '^' applied twice to the same base.".to_string());
            }
            super_used.insert(depth, true);
            sub_used.insert(depth, false);
            i = consume_arg(&chars, i + 1);
            continue;
        }

        if ch == '_' {
            if *sub_used.get(&depth).unwrap_or(&false) {
                return Some("Double subscript: '_' applied twice to the same base.".to_string());
            }
            sub_used.insert(depth, true);
            super_used.insert(depth, false);
            i = consume_arg(&chars, i + 1);
            continue;
        }

        if matches!(ch, ' ' | '\t' | '\r' | '\n') {
            i += 1;
            continue;
        }

        super_used.insert(depth, false);
        sub_used.insert(depth, false);
        i += 1;
    }

    None
}

fn check_needs_arg(expr: &str) -> Option<String> {
    for m in NEEDS_ARG_RE.find_iter(expr) {
        let cmd = m.as_str();
        let rest = expr[m.end()..].trim_start_matches([' ', '\t', '\r', '\n']);
        if rest.is_empty() {
            return Some(format!("{cmd} at end of expression without a required argument."));
        }
        if rest.starts_with('\\') && NEEDS_BRACED_ARG.contains(&cmd) {
            return Some(format!("{cmd} is followed by another command without its required argument(s)."));
        }
    }
    None
}

pub fn validate_equation(span: &EquationSpan, max_chars: usize) -> ValidationResult {
    let expr = span.expression.as_str();

    if expr.trim().is_empty() {
        return ValidationResult::invalid("Equation expression is empty.");
    }

    if expr.chars().count() > max_chars {
        return ValidationResult::invalid(format!(
            "Equation expression is too long ({} chars > {max_chars}).",
            expr.chars().count()
        ));
    }

    if UNSAFE_RE.is_match(expr) {
        return ValidationResult::invalid("Equation contains potentially unsafe content.");
    }

    if let Some(m) = MACRO_DEF_RE.find(expr) {
        return ValidationResult::invalid(format!(
            "Equation contains a disallowed macro command: {:?}.",
            m.as_str()
        ));
    }

    if CONTROL_CHAR_RE.is_match(expr) {
        return ValidationResult::invalid("Equation contains null bytes or non-printable control characters.");
    }

    let stripped = expr.trim_end();
    if stripped.ends_with('\\') && !stripped.ends_with("\\\\") {
        return ValidationResult::invalid("Equation ends with an incomplete backslash sequence.");
    }

    let mut prev = '\0';
    let mut bare_percent = false;
    for ch in expr.chars() {
        if ch == '%' && prev != '\\' {
            bare_percent = true;
            break;
        }
        prev = ch;
    }
    if bare_percent {
        return ValidationResult::invalid(
            "Equation contains a bare '%' (comment character). Use '\\%' for a literal percent sign.",
        );
    }

    if span.delimiter_style == "inline_dollar" && expr.contains('\n') {
        return ValidationResult::invalid(
            "Inline-dollar equation spans a newline; use $$ or \\[...\\] for display math.",
        );
    }

    if span.delimiter_style == "inline_dollar" && expr.contains("$$") {
        return ValidationResult::invalid(
            "Inline-dollar expression contains '$$'; use $$ delimiters for display math.",
        );
    }

    if let Some(err) = check_brace_balance(expr) {
        return ValidationResult::invalid(err);
    }

    if let Some(err) = check_env_nesting(expr) {
        return ValidationResult::invalid(err);
    }

    let lefts = LEFT_RE.find_iter(expr).count();
    let rights = RIGHT_RE.find_iter(expr).count();
    if lefts != rights {
        return ValidationResult::invalid(format!(
            "Unmatched \\left/\\right pairs ({lefts} \\left vs {rights} \\right)."
        ));
    }

    if let Some(err) = check_double_script(expr) {
        return ValidationResult::invalid(err);
    }

    if let Some(err) = check_needs_arg(expr) {
        return ValidationResult::invalid(err);
    }

    if HTML_TAG_RE.is_match(expr) {
        return ValidationResult::invalid("Equation contains an HTML/XML tag.");
    }

    ValidationResult::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(style: &str, expr: &str) -> EquationSpan {
        EquationSpan {
            delimiter_style: style.to_string(),
            expression: expr.to_string(),
            start: 0,
            end: expr.chars().count(),
            full_match: expr.to_string(),
        }
    }

    #[test]
    fn balanced_expression_is_valid() {
        let result = validate_equation(&span("inline_dollar", r"x^2 + y_1"), 4096);
        assert!(result.is_valid, "{:?}", result.reason);
    }

    #[test]
    fn unbalanced_braces_are_rejected() {
        let result = validate_equation(&span("block_dollar", r"\frac{1}{2"), 4096);
        assert!(!result.is_valid);
    }

    #[test]
    fn double_superscript_is_rejected() {
        let result = validate_equation(&span("inline_dollar", "x^2^3"), 4096);
        assert!(!result.is_valid);
    }

    #[test]
    fn mismatched_environment_is_rejected() {
        let result = validate_equation(&span("block_dollar", r"\begin{matrix}1\end{pmatrix}"), 4096);
        assert!(!result.is_valid);
    }

    #[test]
    fn inline_dollar_cannot_span_newline() {
        let result = validate_equation(&span("inline_dollar", "a\nb"), 4096);
        assert!(!result.is_valid);
    }
}
