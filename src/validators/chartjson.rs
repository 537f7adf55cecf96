//! Tier-1 structural validator for a single fenced `chartjson` block — an
//! ECharts `option` object the pipeline accepts as a rendering directive.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use super::ValidationResult;

static FUNCTION_LIKE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:function\s*\(|\(?\s*[\w$,\s]+\)?\s*=>)").unwrap());
static SERIES_TYPE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap());

const CHART_MAX_JSON_NODES: usize = 15_000;
const CHART_MAX_JSON_DEPTH: usize = 64;

fn unsafe_keys() -> &'static HashSet<&'static str> {
    static KEYS: Lazy<HashSet<&str>> =
        Lazy::new(|| ["__proto__", "prototype", "constructor"].into_iter().collect());
    &KEYS
}

fn allowed_top_level_keys() -> &'static HashSet<&'static str> {
    static KEYS: Lazy<HashSet<&str>> = Lazy::new(|| ["title", "caption", "option"].into_iter().collect());
    &KEYS
}

fn allowed_axis_types() -> &'static HashSet<&'static str> {
    static KEYS: Lazy<HashSet<&str>> =
        Lazy::new(|| ["category", "value", "time", "log"].into_iter().collect());
    &KEYS
}

fn supported_series_types() -> &'static HashSet<&'static str> {
    static KEYS: Lazy<HashSet<&str>> = Lazy::new(|| {
        [
            "line", "bar", "pie", "scatter", "effectscatter", "radar", "tree", "treemap",
            "sunburst", "boxplot", "candlestick", "heatmap", "map", "parallel", "lines", "graph",
            "sankey", "funnel", "gauge", "pictorialbar", "themeriver", "custom",
        ]
        .into_iter()
        .collect()
    });
    &KEYS
}

fn axis_required_series_types() -> &'static HashSet<&'static str> {
    static KEYS: Lazy<HashSet<&str>> = Lazy::new(|| {
        [
            "line", "bar", "scatter", "effectscatter", "boxplot", "candlestick", "heatmap",
            "pictorialbar", "custom",
        ]
        .into_iter()
        .collect()
    });
    &KEYS
}

fn has_unsafe_keys_or_values(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => FUNCTION_LIKE_PATTERN.is_match(s),
        Value::Array(items) => items.iter().any(has_unsafe_keys_or_values),
        Value::Object(map) => map.iter().any(|(k, v)| {
            unsafe_keys().contains(k.as_str()) || has_unsafe_keys_or_values(v)
        }),
        _ => false,
    }
}

fn json_shape_stats(value: &Value, depth: usize) -> (usize, usize) {
    let mut total = 1usize;
    let mut max_depth = depth;
    match value {
        Value::Object(map) => {
            for v in map.values() {
                let (n, d) = json_shape_stats(v, depth + 1);
                total += n;
                max_depth = max_depth.max(d);
            }
        }
        Value::Array(items) => {
            for v in items {
                let (n, d) = json_shape_stats(v, depth + 1);
                total += n;
                max_depth = max_depth.max(d);
            }
        }
        _ => {}
    }
    (total, max_depth)
}

fn is_finite_number(value: &Value) -> bool {
    value.as_f64().is_some_and(|n| n.is_finite()) && !value.is_boolean()
}

fn validate_axis_config(axis_value: &Value, axis_name: &str) -> Option<String> {
    let items: Vec<&serde_json::Map<String, Value>> = match axis_value {
        Value::Object(m) => vec![m],
        Value::Array(list) => {
            if list.is_empty() {
                return Some(format!("chartjson option \"{axis_name}\" cannot be an empty list."));
            }
            if !list.iter().all(|i| i.is_object()) {
                return Some(format!("chartjson option \"{axis_name}\" list items must be objects."));
            }
            list.iter().filter_map(|i| i.as_object()).collect()
        }
        _ => return Some(format!("chartjson option \"{axis_name}\" must be an object or list of objects.")),
    };

    for item in items {
        if let Some(axis_type) = item.get("type") {
            match axis_type {
                Value::String(s) => {
                    if !allowed_axis_types().contains(s.to_lowercase().as_str()) {
                        let mut allowed: Vec<&str> = allowed_axis_types().iter().copied().collect();
                        allowed.sort();
                        return Some(format!(
                            "chartjson option \"{axis_name}.type\" has unsupported value \"{s}\". Supported values: {allowed:?}."
                        ));
                    }
                }
                _ => return Some(format!("chartjson option \"{axis_name}.type\" must be a string when provided.")),
            }
        }

        if let Some(data) = item.get("data") {
            if !data.is_array() {
                return Some(format!("chartjson option \"{axis_name}.data\" must be a list when provided."));
            }
        }

        if let Some(name) = item.get("name") {
            if !name.is_string() {
                return Some(format!("chartjson option \"{axis_name}.name\" must be a string when provided."));
            }
        }
    }

    None
}

fn validate_option_title(value: Option<&Value>) -> Option<String> {
    let value = match value {
        None | Some(Value::Null) => return None,
        Some(v) => v,
    };
    match value {
        Value::String(_) => None,
        Value::Object(map) => {
            if let Some(text) = map.get("text") {
                if !text.is_null() && !text.is_string() {
                    return Some("chartjson option \"title.text\" must be a string when provided.".to_string());
                }
            }
            if let Some(subtext) = map.get("subtext") {
                if !subtext.is_null() && !subtext.is_string() {
                    return Some("chartjson option \"title.subtext\" must be a string when provided.".to_string());
                }
            }
            None
        }
        Value::Array(items) => {
            if items.is_empty() {
                return Some("chartjson option \"title\" cannot be an empty list.".to_string());
            }
            for item in items {
                let Some(map) = item.as_object() else {
                    return Some("chartjson option \"title\" list items must be objects.".to_string());
                };
                if let Some(text) = map.get("text") {
                    if !text.is_null() && !text.is_string() {
                        return Some("chartjson option \"title[].text\" must be a string when provided.".to_string());
                    }
                }
            }
            None
        }
        _ => Some("chartjson option \"title\" must be a string, object, or list of objects.".to_string()),
    }
}

fn validate_option_object(option: &serde_json::Map<String, Value>) -> Option<String> {
    if option.is_empty() {
        return Some("chartjson option object cannot be empty.".to_string());
    }

    if let Some(err) = validate_option_title(option.get("title")) {
        return Some(err);
    }

    for key in ["tooltip", "legend", "grid", "dataset", "visualMap", "dataZoom"] {
        let Some(value) = option.get(key) else { continue };
        if value.is_null() {
            continue;
        }
        let ok = value.is_object()
            || (value.is_array() && value.as_array().unwrap().iter().all(|i| i.is_object()));
        if !ok {
            return Some(format!(
                "chartjson option \"{key}\" must be an object or list of objects when provided."
            ));
        }
    }

    let x_axis = option.get("xAxis");
    if let Some(x) = x_axis {
        if !x.is_null() {
            if let Some(err) = validate_axis_config(x, "xAxis") {
                return Some(err);
            }
        }
    }

    let y_axis = option.get("yAxis");
    if let Some(y) = y_axis {
        if !y.is_null() {
            if let Some(err) = validate_axis_config(y, "yAxis") {
                return Some(err);
            }
        }
    }

    let series = option.get("series").and_then(|v| v.as_array());
    let Some(series) = series.filter(|s| !s.is_empty()) else {
        return Some("chartjson option must include a non-empty array field named \"series\".".to_string());
    };

    let mut has_axis_series = false;
    for (index, series_item) in series.iter().enumerate() {
        let Some(item) = series_item.as_object() else {
            return Some(format!("chartjson option \"series[{index}]\" must be an object."));
        };

        let series_type = item.get("type").and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty());
        let Some(series_type) = series_type else {
            return Some(format!("chartjson option \"series[{index}].type\" must be a non-empty string."));
        };

        let normalized = series_type.trim().to_lowercase();
        if !SERIES_TYPE_CHARS.is_match(&normalized) {
            return Some(format!(
                "chartjson option \"series[{index}].type\" contains unsupported characters: \"{series_type}\"."
            ));
        }
        if !supported_series_types().contains(normalized.as_str()) {
            let mut allowed: Vec<&str> = supported_series_types().iter().copied().collect();
            allowed.sort();
            return Some(format!(
                "chartjson option \"series[{index}].type\" unsupported value \"{series_type}\". Supported values include: {allowed:?}."
            ));
        }

        if axis_required_series_types().contains(normalized.as_str()) {
            has_axis_series = true;
        }

        if let Some(data) = item.get("data") {
            if !data.is_null() && !data.is_array() {
                return Some(format!("chartjson option \"series[{index}].data\" must be a list when provided."));
            }
        }

        if let Some(name) = item.get("name") {
            if !name.is_null() && !name.is_string() {
                return Some(format!("chartjson option \"series[{index}].name\" must be a string when provided."));
            }
        }

        if let Some(encode) = item.get("encode") {
            if !encode.is_null() && !encode.is_object() {
                return Some(format!("chartjson option \"series[{index}].encode\" must be an object when provided."));
            }
        }

        if let Some(bar_width) = item.get("barWidth") {
            if !(bar_width.is_string() || is_finite_number(bar_width)) {
                return Some(format!(
                    "chartjson option \"series[{index}].barWidth\" must be a string or finite number when provided."
                ));
            }
        }
    }

    if has_axis_series && (x_axis.is_none() || y_axis.is_none()) {
        return Some(
            "chartjson option with axis-based series types must include both \"xAxis\" and \"yAxis\".".to_string(),
        );
    }

    None
}

pub fn validate_chartjson(block_text: &str) -> ValidationResult {
    let raw = block_text.trim();
    if raw.is_empty() {
        return ValidationResult::invalid("Empty chartjson block.");
    }

    let payload: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return ValidationResult::invalid(format!("Invalid chartjson JSON: {e}.")),
    };

    let Value::Object(payload) = payload else {
        return ValidationResult::invalid("chartjson payload root must be an object.");
    };

    let mut unknown: Vec<&str> = payload
        .keys()
        .map(|k| k.as_str())
        .filter(|k| !allowed_top_level_keys().contains(k))
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        let mut allowed: Vec<&str> = allowed_top_level_keys().iter().copied().collect();
        allowed.sort();
        return ValidationResult::invalid(format!(
            "chartjson payload has unsupported top-level keys: {unknown:?}. Allowed keys: {allowed:?}."
        ));
    }

    if has_unsafe_keys_or_values(&Value::Object(payload.clone())) {
        return ValidationResult::invalid("chartjson payload contains unsafe keys or function-like values.");
    }

    let (total_nodes, max_depth) = json_shape_stats(&Value::Object(payload.clone()), 1);
    if total_nodes > CHART_MAX_JSON_NODES {
        return ValidationResult::invalid(format!(
            "chartjson payload is too large for safe validation ({total_nodes} nodes > {CHART_MAX_JSON_NODES})."
        ));
    }
    if max_depth > CHART_MAX_JSON_DEPTH {
        return ValidationResult::invalid(format!(
            "chartjson payload is too deeply nested for safe validation (depth {max_depth} > {CHART_MAX_JSON_DEPTH})."
        ));
    }

    let Some(option) = payload.get("option").and_then(|v| v.as_object()) else {
        return ValidationResult::invalid("chartjson payload must include an object field named \"option\".");
    };

    if let Some(title) = payload.get("title") {
        if !title.is_null() && !title.is_string() {
            return ValidationResult::invalid("chartjson field \"title\" must be a string when provided.");
        }
    }
    if let Some(caption) = payload.get("caption") {
        if !caption.is_null() && !caption.is_string() {
            return ValidationResult::invalid("chartjson field \"caption\" must be a string when provided.");
        }
    }

    if let Some(err) = validate_option_object(option) {
        return ValidationResult::invalid(err);
    }

    ValidationResult::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_bar_chart_passes() {
        let json = r#"{"option": {"xAxis": {"type": "category"}, "yAxis": {"type": "value"}, "series": [{"type": "bar", "data": [1,2,3]}]}}"#;
        let result = validate_chartjson(json);
        assert!(result.is_valid, "{:?}", result.reason);
    }

    #[test]
    fn missing_series_is_rejected() {
        let json = r#"{"option": {}}"#;
        let result = validate_chartjson(json);
        assert!(!result.is_valid);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let json = r#"{"option": {"series": [{"type": "pie", "data": []}]}, "extra": 1}"#;
        let result = validate_chartjson(json);
        assert!(!result.is_valid);
    }

    #[test]
    fn axis_required_series_without_axes_is_rejected() {
        let json = r#"{"option": {"series": [{"type": "bar", "data": [1]}]}}"#;
        let result = validate_chartjson(json);
        assert!(!result.is_valid);
    }
}
