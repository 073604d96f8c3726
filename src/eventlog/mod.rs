//! Append-only JSONL event streams with robust parsing and efficient
//! tailing (`spec.md` §4.3).

pub mod truncate;

pub use truncate::smart_tee;

use crate::errors::EventLogError;
use serde::Serialize;
use serde_json::Value;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Files at or above this size use the seek-from-end tail algorithm
/// instead of a full read (`spec.md` §4.3).
const LARGE_FILE_THRESHOLD: u64 = 1024 * 1024;

/// Bytes of tail region read per requested line, for the large-file path.
const TAIL_BYTES_PER_LINE: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Jsonl,
    Parsed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BoundedMetadata {
    pub file_size_bytes: u64,
    pub total_lines: usize,
    pub truncated_lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoundedRead {
    pub text: Option<String>,
    pub objects: Option<Vec<Value>>,
    pub metadata: Option<BoundedMetadata>,
}

/// Serialize `object` to one JSONL line and append it. No cross-call
/// buffering: every call opens, writes, and flushes (`spec.md` §4.3).
pub async fn append(path: &Path, object: &impl Serialize) -> Result<(), EventLogError> {
    let mut line = serde_json::to_string(object).map_err(|e| EventLogError::AppendFailed {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;
    line.push('\n');
    append_raw_line(path, &line).await
}

/// Append a pre-rendered line (used by the smart-tee path, which has
/// already serialized and truncated the object).
pub async fn append_raw_line(path: &Path, line_with_newline: &str) -> Result<(), EventLogError> {
    use tokio::fs::OpenOptions;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| EventLogError::AppendFailed { path: path.to_path_buf(), source })?;
    file.write_all(line_with_newline.as_bytes())
        .await
        .map_err(|source| EventLogError::AppendFailed { path: path.to_path_buf(), source })?;
    file.flush()
        .await
        .map_err(|source| EventLogError::AppendFailed { path: path.to_path_buf(), source })?;
    Ok(())
}

/// Split decoded text into lines, tolerating an incomplete trailing line
/// (`spec.md` §3 invariant 6, §4.3 robust parsing).
fn complete_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last().map(|l| !l.is_empty()).unwrap_or(false) {
        // Trailing content with no newline: likely a crash mid-write, drop it.
        lines.pop();
    } else if lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines.into_iter()
}

fn try_parse_line(line: &str) -> Option<Value> {
    if line.trim().is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Returns the last `n_lines` successfully-parsed objects.
pub async fn read_tail(path: &Path, n_lines: usize) -> Result<Vec<Value>, EventLogError> {
    if n_lines == 0 {
        return Ok(Vec::new());
    }
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(EventLogError::ReadFailed { path: path.to_path_buf(), source }),
    };

    let text = if meta.len() >= LARGE_FILE_THRESHOLD {
        read_tail_region(path, meta.len(), n_lines).await?
    } else {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| EventLogError::ReadFailed { path: path.to_path_buf(), source })?
    };

    let mut parsed: Vec<Value> = complete_lines(&text).rev().filter_map(try_parse_line).take(n_lines).collect();
    parsed.reverse();
    Ok(parsed)
}

/// Seeks from EOF by `n_lines * TAIL_BYTES_PER_LINE` bytes (capped at file
/// size), reads that tail region with lossy UTF-8 decoding.
async fn read_tail_region(path: &Path, file_len: u64, n_lines: usize) -> Result<String, EventLogError> {
    use std::fs::File;
    let want = (n_lines as u64).saturating_mul(TAIL_BYTES_PER_LINE).min(file_len);
    let offset = file_len - want;
    let path_owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String, std::io::Error> {
        use std::io::Read;
        let mut file = File::open(&path_owned)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    })
    .await
    .map_err(|e| EventLogError::ReadFailed { path: path.to_path_buf(), source: std::io::Error::other(e) })?
    .map_err(|source| EventLogError::ReadFailed { path: path.to_path_buf(), source })
}

/// Returns up to `limit` objects whose serialized line matches `pattern`.
pub async fn read_filtered(path: &Path, pattern: &regex::Regex, limit: usize) -> Result<Vec<Value>, EventLogError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(EventLogError::ReadFailed { path: path.to_path_buf(), source }),
    };
    Ok(complete_lines(&text)
        .filter(|line| pattern.is_match(line))
        .filter_map(try_parse_line)
        .take(limit)
        .collect())
}

/// Combines tail + filter + format selection, optionally attaching a
/// metadata block (`spec.md` §4.3 `read_bounded`).
pub async fn read_bounded(
    path: &Path,
    tail: Option<usize>,
    filter: Option<&regex::Regex>,
    format: OutputFormat,
    include_metadata: bool,
) -> Result<BoundedRead, EventLogError> {
    // `format=parsed` is requested against worker-authored streams that may
    // carry malformed lines; use the tolerant reader so a bad line becomes a
    // `ParseErrorSentinel` entry instead of silently vanishing from the
    // output (`spec.md` §4.3).
    let objects = match (format, tail, filter) {
        (OutputFormat::Parsed, Some(n), None) => read_parsed_tolerant(path, n).await?,
        (OutputFormat::Parsed, None, None) => read_parsed_tolerant(path, usize::MAX).await?,
        (_, Some(n), Some(pattern)) => {
            let all = read_filtered(path, pattern, usize::MAX).await?;
            all.into_iter().rev().take(n).rev().collect()
        }
        (_, Some(n), None) => read_tail(path, n).await?,
        (_, None, Some(pattern)) => read_filtered(path, pattern, usize::MAX).await?,
        (_, None, None) => read_tail(path, usize::MAX).await?,
    };

    let metadata = if include_metadata {
        let file_size_bytes = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        let total_lines = match tokio::fs::read_to_string(path).await {
            Ok(t) => complete_lines(&t).count(),
            Err(_) => 0,
        };
        let truncated_lines = objects
            .iter()
            .filter(|o| o.get("truncated").and_then(Value::as_bool) == Some(true))
            .count();
        Some(BoundedMetadata { file_size_bytes, total_lines, truncated_lines })
    } else {
        None
    };

    let (text, objects) = match format {
        OutputFormat::Text => {
            let rendered = objects.iter().filter_map(|o| serde_json::to_string(o).ok()).collect::<Vec<_>>().join("\n");
            (Some(rendered), None)
        }
        OutputFormat::Jsonl => {
            let rendered = objects.iter().filter_map(|o| serde_json::to_string(o).ok()).collect::<Vec<_>>().join("\n");
            (Some(rendered), None)
        }
        OutputFormat::Parsed => (None, Some(objects)),
    };

    Ok(BoundedRead { text, objects, metadata })
}

/// Reads parsed objects, inserting a parse-error sentinel for any line that
/// fails to JSON-parse. Used by `read_bounded` for `OutputFormat::Parsed`
/// requests with no line filter, since those read worker-authored streams
/// that may carry malformed lines.
pub async fn read_parsed_tolerant(path: &Path, n_lines: usize) -> Result<Vec<Value>, EventLogError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(EventLogError::ReadFailed { path: path.to_path_buf(), source }),
    };
    let mut out = Vec::new();
    for (idx, line) in complete_lines(&text).enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(v) => out.push(v),
            Err(e) => {
                tracing::warn!(target: "swarmd::eventlog", line_number = idx, %e, "skipping malformed JSONL line");
                let sentinel = swarmd_common::ParseErrorSentinel::new(idx, line, e);
                out.push(serde_json::to_value(sentinel).unwrap_or(Value::Null));
            }
        }
    }
    let start = out.len().saturating_sub(n_lines);
    Ok(out[start..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_then_tail_one_returns_that_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        append(&path, &serde_json::json!({"a": 1})).await.unwrap();
        let tail = read_tail(&path, 1).await.unwrap();
        assert_eq!(tail, vec![serde_json::json!({"a": 1})]);
    }

    #[tokio::test]
    async fn tail_tolerates_truncated_trailing_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        for i in 0..1000 {
            append(&path, &serde_json::json!({"timestamp": format!("t{i}")})).await.unwrap();
        }
        append_raw_line(&path, "{\"timestamp\":\"2026-").await.unwrap();
        let tail = read_tail(&path, 100).await.unwrap();
        assert_eq!(tail.len(), 100);
        assert_eq!(tail.last().unwrap()["timestamp"], "t999");
    }

    #[tokio::test]
    async fn read_tail_on_missing_file_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");
        assert_eq!(read_tail(&path, 10).await.unwrap(), Vec::<Value>::new());
    }

    #[tokio::test]
    async fn read_filtered_matches_regex_against_serialized_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        append(&path, &serde_json::json!({"message": "found a blocker"})).await.unwrap();
        append(&path, &serde_json::json!({"message": "all good"})).await.unwrap();
        let pattern = regex::Regex::new("blocker").unwrap();
        let results = read_filtered(&path, &pattern, 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn read_bounded_with_parsed_format_surfaces_parse_error_sentinel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        append(&path, &serde_json::json!({"a": 1})).await.unwrap();
        append_raw_line(&path, "not json at all\n").await.unwrap();
        append(&path, &serde_json::json!({"a": 2})).await.unwrap();

        let read = read_bounded(&path, Some(10), None, OutputFormat::Parsed, false).await.unwrap();
        let objects = read.objects.unwrap();
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[1]["type"], "parse_error");
    }

    #[tokio::test]
    async fn parsed_tolerant_read_inserts_sentinel_for_bad_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        append(&path, &serde_json::json!({"a": 1})).await.unwrap();
        append_raw_line(&path, "not json at all\n").await.unwrap();
        append(&path, &serde_json::json!({"a": 2})).await.unwrap();
        let objects = read_parsed_tolerant(&path, 10).await.unwrap();
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[1]["type"], "parse_error");
    }
}
