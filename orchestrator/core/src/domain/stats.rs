// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One resource-usage sample derived from a raw engine stats document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatSample {
    pub time: DateTime<Utc>,
    /// Total CPU usage delta between the sample and its pre-sample.
    pub cpu: u64,
    /// Current memory usage in bytes.
    pub memory: u64,
}

fn u64_at(raw: &Value, pointer: &str) -> u64 {
    raw.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

impl StatSample {
    /// Returns `None` when the document has no parseable `read` timestamp.
    pub fn from_engine(raw: &Value) -> Option<Self> {
        let time = raw
            .get("read")
            .and_then(Value::as_str)
            .and_then(|read| DateTime::parse_from_rfc3339(read).ok())?
            .with_timezone(&Utc);

        let total = u64_at(raw, "/cpu_stats/cpu_usage/total_usage");
        let previous = u64_at(raw, "/precpu_stats/cpu_usage/total_usage");

        Some(Self {
            time,
            cpu: total.saturating_sub(previous),
            memory: u64_at(raw, "/memory_stats/usage"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatPoint {
    pub time: DateTime<Utc>,
    pub value: u64,
}

/// Historical series as returned by the stats query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSeries {
    pub cpu_stats: Vec<StatPoint>,
    pub mem_stats: Vec<StatPoint>,
}

impl StatsSeries {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a StatSample>) -> Self {
        let mut series = Self::default();
        for sample in samples {
            series.cpu_stats.push(StatPoint { time: sample.time, value: sample.cpu });
            series.mem_stats.push(StatPoint { time: sample.time, value: sample.memory });
        }
        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sample_from_engine_document() {
        let raw = json!({
            "read": "2026-03-01T10:00:05.123456789Z",
            "cpu_stats": {"cpu_usage": {"total_usage": 1500}},
            "precpu_stats": {"cpu_usage": {"total_usage": 1000}},
            "memory_stats": {"usage": 4096}
        });
        let sample = StatSample::from_engine(&raw).unwrap();
        assert_eq!(sample.cpu, 500);
        assert_eq!(sample.memory, 4096);
        assert_eq!(sample.time.timestamp(), 1772359205);
    }

    #[test]
    fn test_missing_read_is_rejected() {
        assert!(StatSample::from_engine(&json!({"memory_stats": {"usage": 1}})).is_none());
        assert!(StatSample::from_engine(&json!({"read": "yesterday"})).is_none());
    }

    #[test]
    fn test_first_sample_without_precpu() {
        let raw = json!({"read": "2026-03-01T10:00:00Z", "cpu_stats": {"cpu_usage": {"total_usage": 42}}});
        let sample = StatSample::from_engine(&raw).unwrap();
        assert_eq!(sample.cpu, 42);
        assert_eq!(sample.memory, 0);
    }
}
