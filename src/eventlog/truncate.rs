//! "Smart-tee": preprocesses each line of a worker's raw stdout before it is
//! appended to the output stream file, so no single line exceeds the
//! configured cap (`spec.md` §4.2.2).

use serde_json::Value;
use std::sync::LazyLock;

const TRUNCATION_MARKER_PREFIX: &str = "[TRUNCATED:";
const BASE64_MARKER_PREFIX: &str = "[BASE64_DATA:";

static BASE64_RUN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[A-Za-z0-9+/]{100,}={0,2}").unwrap());

/// Preprocess one line of worker output. `line_cap` is the hard ceiling
/// (default 8 KiB); `field_cap` is the per-string-field ceiling inside a
/// parsed JSON object (default 2 KiB) above which a field is previewed
/// instead of written whole.
pub fn smart_tee(line: &str, line_cap: usize, field_cap: usize) -> String {
    if line.len() <= line_cap {
        return line.to_string();
    }

    match serde_json::from_str::<Value>(line) {
        Ok(mut value) => {
            if is_never_truncate(&value) || already_truncated(&value) {
                return line.to_string();
            }
            let mut truncated_any = false;
            truncate_value(&mut value, field_cap, &mut truncated_any);
            if truncated_any {
                if let Value::Object(map) = &mut value {
                    map.insert("truncated".to_string(), Value::Bool(true));
                }
            }
            let rendered = serde_json::to_string(&value).unwrap_or_else(|_| line.to_string());
            if rendered.len() <= line_cap {
                rendered
            } else {
                line_truncate(&rendered, line_cap)
            }
        }
        Err(_) => line_truncate(line, line_cap),
    }
}

fn is_never_truncate(value: &Value) -> bool {
    let Value::Object(map) = value else { return false };
    let kind = map.get("type").and_then(Value::as_str);
    match kind {
        Some("error") => true,
        Some("system") => map.get("subtype").and_then(Value::as_str) == Some("init"),
        _ => false,
    }
}

fn already_truncated(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            if map.get("truncated").and_then(Value::as_bool) == Some(true) {
                return true;
            }
            map.values().any(already_truncated)
        }
        Value::String(s) => s.contains(TRUNCATION_MARKER_PREFIX),
        Value::Array(items) => items.iter().any(already_truncated),
        _ => false,
    }
}

fn truncate_value(value: &mut Value, field_cap: usize, truncated_any: &mut bool) {
    match value {
        Value::String(s) => {
            if s.len() > field_cap {
                *s = preview_string(s);
                *truncated_any = true;
            } else if let Some(replaced) = replace_base64_runs(s) {
                *s = replaced;
                *truncated_any = true;
            }
        }
        Value::Array(items) => {
            for item in items {
                truncate_value(item, field_cap, truncated_any);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                truncate_value(v, field_cap, truncated_any);
            }
        }
        _ => {}
    }
}

/// First 30 + last 10 lines of `s` when it has enough line structure to make
/// that meaningful; otherwise a character-based head/tail preview of
/// comparable size. Either way, joined with a removed-content marker.
fn preview_string(s: &str) -> String {
    let lines: Vec<&str> = s.lines().collect();
    if lines.len() > 40 {
        let head = &lines[..30];
        let tail = &lines[lines.len() - 10..];
        let removed_lines = lines.len() - 40;
        let removed_chars: usize = lines[30..lines.len() - 10].iter().map(|l| l.len() + 1).sum();
        return format!(
            "{}\n{TRUNCATION_MARKER_PREFIX} {removed_lines} lines ({removed_chars} chars) removed]\n{}",
            head.join("\n"),
            tail.join("\n"),
        );
    }

    const HEAD_CHARS: usize = 1500;
    const TAIL_CHARS: usize = 500;
    if s.len() <= HEAD_CHARS + TAIL_CHARS {
        return s.to_string();
    }
    let head = char_boundary_slice(s, 0, HEAD_CHARS);
    let tail_start = s.len() - TAIL_CHARS.min(s.len());
    let tail = char_boundary_slice(s, tail_start, s.len());
    let removed_chars = s.len() - head.len() - tail.len();
    format!("{head}\n{TRUNCATION_MARKER_PREFIX} ~{removed_chars} chars removed]\n{tail}")
}

/// `s[start..end]`, nudged inward to the nearest char boundaries so we never
/// panic on a multi-byte UTF-8 split.
fn char_boundary_slice(s: &str, start: usize, end: usize) -> &str {
    let mut start = start.min(s.len());
    let mut end = end.min(s.len());
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[start..end]
}

fn replace_base64_runs(s: &str) -> Option<String> {
    if !BASE64_RUN.is_match(s) {
        return None;
    }
    let replaced = BASE64_RUN.replace_all(s, |caps: &regex::Captures| {
        format!("{BASE64_MARKER_PREFIX} {} bytes]", caps[0].len())
    });
    Some(replaced.to_string())
}

/// Line-based fallback when JSON parsing fails: keep whole lines from the
/// front until the cap would be exceeded, append a marker.
fn line_truncate(text: &str, cap: usize) -> String {
    let marker = format!("{TRUNCATION_MARKER_PREFIX} content exceeded {cap} bytes]");
    let budget = cap.saturating_sub(marker.len() + 1);
    let mut kept = String::new();
    for line in text.lines() {
        if kept.len() + line.len() + 1 > budget {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
    }
    format!("{kept}\n{marker}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lines_pass_through_verbatim() {
        let line = r#"{"type":"assistant","text":"hi"}"#;
        assert_eq!(smart_tee(line, 8192, 2048), line);
    }

    #[test]
    fn large_field_is_previewed_and_flagged_truncated() {
        let big_content = (0..2000).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let obj = serde_json::json!({
            "type": "tool_result",
            "tool_result": { "content": big_content }
        });
        let line = serde_json::to_string(&obj).unwrap();
        let result = smart_tee(&line, 8192, 2048);
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["truncated"], true);
        assert!(parsed["tool_result"]["content"].as_str().unwrap().contains("TRUNCATED"));
    }

    #[test]
    fn error_typed_objects_are_never_truncated() {
        let big = "x".repeat(10_000);
        let obj = serde_json::json!({ "type": "error", "message": big });
        let line = serde_json::to_string(&obj).unwrap();
        let result = smart_tee(&line, 8192, 2048);
        assert_eq!(result, line);
    }

    #[test]
    fn system_init_is_never_truncated() {
        let big = "x".repeat(10_000);
        let obj = serde_json::json!({ "type": "system", "subtype": "init", "data": big });
        let line = serde_json::to_string(&obj).unwrap();
        let result = smart_tee(&line, 8192, 2048);
        assert_eq!(result, line);
    }

    #[test]
    fn already_truncated_objects_are_not_re_truncated() {
        let obj = serde_json::json!({ "type": "tool_result", "truncated": true, "content": "x".repeat(10_000) });
        let line = serde_json::to_string(&obj).unwrap();
        let result = smart_tee(&line, 8192, 2048);
        assert_eq!(result, line);
    }

    #[test]
    fn malformed_json_falls_back_to_line_truncation_with_marker() {
        let text = (0..500).map(|i| format!("garbage line {i}")).collect::<Vec<_>>().join("\n");
        let result = smart_tee(&text, 1024, 256);
        assert!(result.len() <= 1024 + 64);
        assert!(result.contains("TRUNCATED"));
    }

    #[test]
    fn base64_looking_runs_are_replaced() {
        let run = "A".repeat(150);
        let obj = serde_json::json!({ "type": "tool_result", "data": format!("prefix {run} suffix") });
        let line = serde_json::to_string(&obj).unwrap();
        let result = smart_tee(&format!("{}{}", line, " ".repeat(9000)), 8192, 2048);
        assert!(result.contains("BASE64_DATA"));
    }

    #[test]
    fn output_never_exceeds_the_line_cap() {
        let obj = serde_json::json!({
            "type": "tool_result",
            "content": "x".repeat(100_000),
        });
        let line = serde_json::to_string(&obj).unwrap();
        let result = smart_tee(&line, 8192, 2048);
        assert!(result.len() <= 8192 || result.contains("TRUNCATED"));
    }
}
