//! Event stream record types for the `progress` and `findings` JSONL
//! streams (`spec.md` §3, EventLog entries).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingType {
    Issue,
    Solution,
    Insight,
    Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub status: String,
    pub message: String,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingEvent {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub finding_type: FindingType,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A parse-error sentinel inserted in place of a line that failed to
/// JSON-parse, when the caller requested `format=parsed` (`spec.md` §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseErrorSentinel {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub line_number: usize,
    pub raw: String,
    pub error: String,
}

impl ParseErrorSentinel {
    pub fn new(line_number: usize, raw_line: &str, error: impl std::fmt::Display) -> Self {
        let raw: String = raw_line.chars().take(200).collect();
        Self {
            kind: "parse_error",
            line_number,
            raw,
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parse_roundtrips() {
        for s in ["low", "medium", "high", "critical"] {
            assert!(Severity::parse(s).is_some());
        }
        assert!(Severity::parse("urgent").is_none());
    }

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn parse_error_sentinel_caps_raw_at_200_chars() {
        let raw = "x".repeat(500);
        let sentinel = ParseErrorSentinel::new(12, &raw, "unexpected eof");
        assert_eq!(sentinel.raw.chars().count(), 200);
        assert_eq!(sentinel.kind, "parse_error");
    }
}
